//! Core types for uavlink.
//!
//! This crate holds the I/O-free parts of the protocol: object definitions and
//! their store, per-name handler registries, the wire envelopes of both
//! dialects, and the telemetry handshake state machine. The client crate wires
//! them to a transport.

mod definition;
mod error;
mod handlers;
mod handshake;
mod packet;
mod store;

pub use definition::{Definition, DefinitionKind, FieldDefinition, FieldType};
pub use error::{DecodeError, DefinitionError, HandshakeError};
pub use handlers::{Callback, HandlerId, HandlerManager, Hook};
pub use handshake::{Handshake, HandshakeState, Step, TelemetryStatus};
pub use packet::{
    Dialect, IdentifierKey, ObjectKey, ObjectRef, ObjectUpdate, Packet, PubSubPacket,
    Publication, TelemetryCommand, TelemetryPacket,
};
pub use store::{Catalog, DefinitionStore, Namespace};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload delivered to update and request handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    /// Object name, resolved from the numeric id on telemetry links.
    pub name: String,
    /// Instance addressed by the packet; absent on pub/sub links.
    pub instance_id: Option<u32>,
    #[serde(default)]
    pub data: Value,
}

impl ObjectData {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            instance_id: None,
            data,
        }
    }
}
