//! Wire envelopes.
//!
//! Every frame is a JSON object `{"type": <tag>, "payload": <object>}`. Two
//! dialects exist and a deployment speaks exactly one of them:
//!
//! - [`TelemetryPacket`]: typed telemetry objects addressed by numeric id.
//!   Tags are `update`, `req`, `def`, `sub`, `unsub`, plus the legacy numeric
//!   command codes 0–4 (see [`TelemetryCommand`]).
//! - [`PubSubPacket`]: generic publish/subscribe addressed by identifier.
//!   Tags are `action`, `event`, `def`, `undef`, `sub`, `unsub`.

use crate::definition::Definition;
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which protocol dialect a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Typed-object telemetry, numeric object ids.
    Telemetry,
    /// Generic pub/sub, string identifiers.
    #[default]
    PubSub,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telemetry => f.write_str("telemetry"),
            Self::PubSub => f.write_str("pub/sub"),
        }
    }
}

/// Legacy numeric command codes of the telemetry dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryCommand {
    Object = 0,
    ObjectRequest = 1,
    ObjectAck = 2,
    Ack = 3,
    Nack = 4,
}

impl TelemetryCommand {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::Object,
            1 => Self::ObjectRequest,
            2 => Self::ObjectAck,
            3 => Self::Ack,
            4 => Self::Nack,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// The string tag carrying the same meaning.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Object => "update",
            Self::ObjectRequest => "req",
            Self::ObjectAck => "objectAck",
            Self::Ack => "ack",
            Self::Nack => "nack",
        }
    }
}

/// New value of a telemetry object instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectUpdate {
    pub object_id: u32,
    #[serde(default)]
    pub instance_id: u32,
    #[serde(default)]
    pub data: Value,
}

/// Reference to one instance of a telemetry object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub object_id: u32,
    #[serde(default)]
    pub instance_id: u32,
}

/// Reference to a telemetry object as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKey {
    pub object_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TelemetryPacket {
    #[serde(rename = "update")]
    Update(ObjectUpdate),
    #[serde(rename = "req")]
    Request(ObjectRef),
    #[serde(rename = "objectAck")]
    ObjectAck(ObjectRef),
    #[serde(rename = "ack")]
    Ack(ObjectRef),
    #[serde(rename = "nack")]
    Nack(ObjectRef),
    #[serde(rename = "def")]
    Definition(Definition),
    #[serde(rename = "sub")]
    Subscribe(ObjectKey),
    #[serde(rename = "unsub")]
    Unsubscribe(ObjectKey),
}

impl TelemetryPacket {
    /// Decode a frame, accepting numeric command codes in place of tags.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let mut frame: Value = serde_json::from_str(text)?;
        if let Some(tag) = frame.get_mut("type") {
            if let Some(code) = tag.as_u64() {
                let command =
                    TelemetryCommand::from_code(code).ok_or(DecodeError::UnknownCommand(code))?;
                *tag = Value::from(command.tag());
            }
        }
        Ok(serde_json::from_value(frame)?)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Data published under an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub identifier: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierKey {
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PubSubPacket {
    #[serde(rename = "action")]
    Action(Publication),
    #[serde(rename = "event")]
    Event(Publication),
    #[serde(rename = "def")]
    Definition(Definition),
    #[serde(rename = "undef")]
    Undefinition(Definition),
    #[serde(rename = "sub")]
    Subscribe(IdentifierKey),
    #[serde(rename = "unsub")]
    Unsubscribe(IdentifierKey),
}

impl PubSubPacket {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A decoded frame of either dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Telemetry(TelemetryPacket),
    PubSub(PubSubPacket),
}

impl Dialect {
    /// Decode a frame in this dialect.
    pub fn decode(self, text: &str) -> Result<Packet, DecodeError> {
        match self {
            Self::Telemetry => TelemetryPacket::decode(text).map(Packet::Telemetry),
            Self::PubSub => PubSubPacket::decode(text).map(Packet::PubSub),
        }
    }
}
