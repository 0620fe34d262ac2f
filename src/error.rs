//! Error handling for EventFlow-RS
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the engine. Per-event problems (type mismatches on a cell,
//! cut discards) are recoverable and usually only logged; configuration
//! problems surface as errors and abort the owning worker.

use thiserror::Error;

/// Main error type for EventFlow-RS operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// A typed read or write did not match the cell's declared type
    #[error("Type mismatch on observable '{observable}': declared {expected}, accessed as {actual}")]
    TypeMismatch {
        observable: String,
        expected: String,
        actual: String,
    },

    /// No observable with this name or index exists in the table
    #[error("Unknown observable: {0}")]
    UnknownObservable(String),

    /// The type name is neither a scalar kind nor registered
    #[error("Unknown observable type: {0}")]
    UnknownType(String),

    /// The table schema is frozen
    #[error("Observable table is locked, cannot add '{0}'")]
    TableLocked(String),

    /// Adjacent stages disagree on the event type flowing between them
    #[error("Stage '{upstream}' emits {output} but stage '{downstream}' expects {input}")]
    ChainMismatch {
        upstream: String,
        downstream: String,
        output: String,
        input: String,
    },

    /// A stage declared an event type nobody registered
    #[error("Stage '{stage}' declares unknown event type '{tag}'")]
    UnknownEventType { stage: String, tag: String },

    /// The stage factory has no constructor for this kind
    #[error("Unknown stage kind: {0}")]
    UnknownStageKind(String),

    /// The calibration run never produced an output event
    #[error("Calibration run produced no output event after {attempts} attempts")]
    CalibrationFailed { attempts: usize },

    /// The upstream source could not supply the first event
    #[error("Input source did not provide an event")]
    NoInput,

    /// An operation was called in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A worker hit a fatal configuration error
    #[error("Worker {worker} aborted: {reason}")]
    Aborted { worker: u32, reason: String },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error ends the run rather than a single event
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::ChainMismatch { .. }
            | EngineError::UnknownEventType { .. }
            | EngineError::UnknownStageKind(_)
            | EngineError::CalibrationFailed { .. }
            | EngineError::NoInput
            | EngineError::Aborted { .. }
            | EngineError::Config(_) => true,
            EngineError::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Result type alias for EventFlow-RS operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
