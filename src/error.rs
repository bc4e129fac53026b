//! Error types for the batch pipeline

use thiserror::Error;

/// Result type for batch pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Batch pipeline errors
#[derive(Error, Debug)]
pub enum Error {
    /// Schema validation failed. Carries every violation message the
    /// validator produced, in document order.
    #[error("XML is invalid: {} error(s) found", messages.len())]
    Validation { messages: Vec<String> },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("batch is full: more than {max} events per batch is not permitted")]
    BatchFull { max: usize },

    #[error("missing credentials: {0} must be configured before events are added")]
    MissingCredentials(&'static str),

    #[error("no XSD found for {name} version {version}")]
    SchemaNotFound { name: String, version: String },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Failure inside the XML engine (parse error, tree construction).
    #[error("XML error: {0}")]
    Xml(String),

    /// Raised by a transport collaborator and passed through unchanged.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// All schema violation messages, or an empty slice for other variants.
    pub fn validation_messages(&self) -> &[String] {
        match self {
            Error::Validation { messages } => messages,
            _ => &[],
        }
    }
}
