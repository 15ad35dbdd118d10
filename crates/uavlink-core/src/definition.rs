//! Object definitions.
//!
//! A definition is the schema a peer publishes for one named object: its
//! identifier, the numeric id used on the wire, and the typed field list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which half of a pub/sub catalogue a definition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    /// Something a client asks a module to do.
    Action,
    /// Something a module publishes.
    Event,
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action => f.write_str("action"),
            Self::Event => f.write_str("event"),
        }
    }
}

/// Schema for one named protocol object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    /// Unique name within the definition's namespace.
    #[serde(alias = "name")]
    pub identifier: String,
    /// Numeric id used on the wire in place of the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Pub/sub kind; absent for telemetry objects.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<DefinitionKind>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl Definition {
    /// Create a definition with no fields.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            id: None,
            kind: None,
            fields: Vec::new(),
        }
    }

    /// Set the numeric wire id.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the pub/sub kind.
    pub fn with_kind(mut self, kind: DefinitionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Append a field.
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One field of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    /// Raw type tag as sent by the peer; see [`FieldType`].
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default = "single_element")]
    pub elements: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements_name: Vec<String>,
    /// Default value; comma-delimited when `elements > 1`.
    #[serde(default)]
    pub default_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

fn single_element() -> u32 {
    1
}

impl FieldDefinition {
    /// Create a scalar field.
    pub fn new(
        name: impl Into<String>,
        field_type: impl Into<String>,
        default_value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            elements: 1,
            elements_name: Vec::new(),
            default_value: default_value.into(),
            units: None,
        }
    }

    /// Turn this into a multi-element field with named elements.
    pub fn with_elements<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements_name = names.into_iter().map(Into::into).collect();
        self.elements = u32::try_from(self.elements_name.len()).unwrap_or(u32::MAX);
        self
    }
}

/// Field types this client knows how to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    Float,
    Enum,
}

impl FieldType {
    /// Resolve a wire type tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "uint8" => Self::Uint8,
            "uint16" => Self::Uint16,
            "uint32" => Self::Uint32,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "float" => Self::Float,
            "enum" => Self::Enum,
            _ => return None,
        })
    }

    /// Parse one textual value of this type into JSON.
    ///
    /// Returns `None` when the text is not a valid value of the type.
    pub fn parse(self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match self {
            Self::Uint8 => raw.parse::<u8>().ok().map(Value::from),
            Self::Uint16 => raw.parse::<u16>().ok().map(Value::from),
            Self::Uint32 => raw.parse::<u32>().ok().map(Value::from),
            Self::Int8 => raw.parse::<i8>().ok().map(Value::from),
            Self::Int16 => raw.parse::<i16>().ok().map(Value::from),
            Self::Int32 => raw.parse::<i32>().ok().map(Value::from),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Value::from),
            Self::Enum => Some(Value::from(raw)),
        }
    }
}
