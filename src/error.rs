//! Error types for the ingestion path.
//!
//! One enum per concern so callers can match on the category that matters to
//! them (malformed input vs. dependency failure). Application wiring in
//! `main.rs` and `config.rs` stays on `anyhow`.

// ---

/// Rejected chunk parameters. Nothing in the table is touched when this is
/// returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("invalid chunking parameters: total={total}, part={index}")]
    InvalidChunk { total: u32, index: u32 },

    #[error("empty session key")]
    EmptySessionKey,
}

/// A topic that matched a subscription filter but not the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("topic '{0}' is outside the configured root")]
    ForeignRoot(String),

    #[error("malformed topic '{topic}': {reason}")]
    Malformed { topic: String, reason: &'static str },
}

/// Failures reported by a [`crate::store::DeviceStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The serial number is already registered (unique constraint).
    #[error("serial number already registered: {0}")]
    DuplicateSerial(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Why a single reading was not ingested.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to decode reading: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid reading: {0}")]
    Invalid(String),

    #[error("failed to resolve device '{serial}': {source}")]
    Resolve {
        serial: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to persist reading for device '{serial}': {source}")]
    Persist {
        serial: String,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    /// True for input the sender got wrong; false for dependency failures.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, IngestError::Decode(_) | IngestError::Invalid(_))
    }
}
