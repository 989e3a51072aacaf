//! Error taxonomy for the Nancy architecture.
//!
//! Every variant here corresponds to one error kind from the design's error
//! taxonomy: configuration failures are fatal at startup, validation and
//! routing failures surface directly to callers, and backend/extractor/LLM
//! failures are the ones the query and ingestion paths are expected to
//! degrade around rather than propagate.

use thiserror::Error;

/// Main error type for the Nancy crates.
#[derive(Error, Debug)]
pub enum NancyError {
    /// IO related errors.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors.
    #[error("Serialization error: {source}")]
    Serialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid or incomplete configuration; fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A Knowledge Packet or API input failed schema validation.
    #[error("Validation error at {path}: {reason}")]
    ValidationError { path: String, reason: String },

    /// A storage brain is unreachable.
    #[error("Backend unavailable: {brain}")]
    BackendUnavailable { brain: String },

    /// A storage brain call exceeded its configured timeout.
    #[error("Backend timeout: {brain}.{operation}")]
    BackendTimeout { brain: String, operation: String },

    /// An extractor worker returned a JSON-RPC error.
    #[error("Extractor error from {worker}: {rpc_error}")]
    ExtractorError { worker: String, rpc_error: String },

    /// An extractor worker process exited unexpectedly.
    #[error("Extractor crashed: {worker}")]
    ExtractorCrash { worker: String },

    /// Intent analysis or response synthesis failed at the LLM boundary.
    #[error("LLM error: {0}")]
    LLMError(String),

    /// No registered extractor can handle the file's content type.
    #[error("No extractor for content type: {0}")]
    NoExtractorForContentType(String),

    /// The caller cancelled an in-flight query.
    #[error("Query cancelled")]
    QueryCancelled,

    /// The global query deadline fired before completion.
    #[error("Query timed out after {0:?}")]
    QueryTimeout(std::time::Duration),

    /// Item not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error with a custom message, used sparingly.
    #[error("Error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for NancyError {
    fn from(error: serde_json::Error) -> Self {
        NancyError::Serialization {
            source: Box::new(error),
        }
    }
}

/// Result type used throughout the Nancy crates.
pub type Result<T> = std::result::Result<T, NancyError>;

/// A structured validation failure, reported rather than raised.
///
/// Kept distinct from [`NancyError::ValidationError`] so that the packet
/// validator's `validate()` can return a `Vec` of every offending path in one
/// pass, instead of failing fast on the first problem.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

impl From<ValidationError> for NancyError {
    fn from(e: ValidationError) -> Self {
        NancyError::ValidationError {
            path: e.path,
            reason: e.reason,
        }
    }
}
