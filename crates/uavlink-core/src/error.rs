//! Error types shared by the protocol primitives.

/// Errors raised while storing definitions or deriving values from them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("unknown definition: {0}")]
    UnknownDefinition(String),
    #[error("unknown type `{type_tag}` for field `{field}`")]
    UnknownFieldType { field: String, type_tag: String },
    #[error("invalid default value `{value}` for field `{field}`")]
    InvalidDefaultValue { field: String, value: String },
    #[error("malformed definition `{identifier}`: {reason}")]
    Malformed { identifier: String, reason: String },
    #[error("numeric id {id} of `{identifier}` already belongs to `{owner}`")]
    DuplicateId {
        id: u32,
        identifier: String,
        owner: String,
    },
    #[error("field `{field}` of `{identifier}` changed type from `{previous}` to `{current}`")]
    ConflictingField {
        identifier: String,
        field: String,
        previous: String,
        current: String,
    },
}

impl DefinitionError {
    pub(crate) fn malformed(identifier: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            identifier: identifier.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Error decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown command code: {0}")]
    UnknownCommand(u64),
}

/// Telemetry handshake protocol violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("unexpected telemetry status: {0}")]
    UnexpectedStatus(String),
    #[error("telemetry status field `{0}` missing from update")]
    MissingStatus(String),
    #[error("handshake halted, ignoring status {0}")]
    Halted(String),
}
