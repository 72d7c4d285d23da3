//! Error types for permission backends

use sitegate_sdk::EntityKind;

/// Error type for backend load and save operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Failed to read or write the backing file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize the document to TOML
    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Failed to parse or serialize JSON content
    #[error("Failed to process JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// File extension does not name a supported format
    #[error("Unsupported permissions file format: {0}")]
    UnsupportedFormat(String),

    /// A write referenced a record the backend does not hold
    #[error("No {kind} named '{id}' in backend")]
    MissingRecord { kind: EntityKind, id: String },
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
