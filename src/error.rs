//! Error types for the masking router.
//!
//! The taxonomy is deliberately split in two: load-time problems (bad rule
//! library, missing dictionary file, malformed single entries) are recovered
//! locally and never surface here, while the variants below are the
//! propagating, mostly fatal conditions - job creation failures and the
//! fail-stop per-event I/O path.

use thiserror::Error;

/// Errors raised by the router and its collaborators.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Configuration error (invalid settings, unreadable config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unparseable change event envelope
    #[error("Event error: {0}")]
    Event(String),

    /// Script compilation or temp-file write failure
    #[error("Script error: {0}")]
    Script(String),

    /// Engine subprocess could not be spawned
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Write/flush to a job's input pipe failed; triggers fail-stop
    #[error("Pipe error for table '{table}': {source}")]
    Pipe {
        table: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON envelope error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an event error
    pub fn event(msg: impl Into<String>) -> Self {
        Self::Event(msg.into())
    }

    /// Create a script error
    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script(msg.into())
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Whether this error must terminate the whole application.
    ///
    /// Everything that reaches the router's caller is fatal under the
    /// fail-stop policy; this exists so callers can assert the contract.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;
