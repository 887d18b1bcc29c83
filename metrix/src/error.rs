//! Error types for the metrix store.

use thiserror::Error;

use crate::cycle::CycleId;

/// The main error type for all metrix operations.
///
/// Each variant wraps one class of failure. None of them are retried
/// internally; callers decide whether to abandon a cycle.
#[derive(Error, Debug)]
pub enum MetrixError {
    /// Malformed selector text.
    #[error("selector parse error: {0}")]
    Parse(#[from] ParseError),

    /// Invalid store configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Cycle state machine misuse.
    #[error("cycle error: {0}")]
    Cycle(#[from] CycleError),

    /// Instrument declaration or label resolution failure.
    #[error("instrument error: {0}")]
    Instrument(#[from] InstrumentError),
}

/// A selector expression could not be compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("at offset {offset}: {reason}")]
pub struct ParseError {
    /// Byte offset in the input where parsing failed.
    pub offset: usize,
    /// Description of what was expected or found.
    pub reason: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

/// Errors raised while building or loading a store configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A retention or compaction parameter is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidParameter {
        /// The offending field.
        field: &'static str,
        /// Why it is invalid.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`StoreConfig`](crate::config::StoreConfig).
    #[error("failed to decode config file '{path}': {source}")]
    Decode {
        /// The file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Misuse of the cycle state machine.
///
/// These are programming errors in the caller. The store reports them and
/// leaves its cycle state unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CycleError {
    /// `begin_cycle` was called while another cycle is still open.
    #[error("cycle {open} is already open")]
    AlreadyOpen {
        /// The cycle that is currently open.
        open: CycleId,
    },

    /// A commit was requested but no cycle is open.
    #[error("no open cycle to commit")]
    NotOpen,
}

/// Errors raised while declaring instruments or resolving their labels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    /// The instrument name was declared earlier with a different kind or flavor.
    #[error("instrument '{name}' already declared as {existing}, requested {requested}")]
    KindMismatch {
        /// The full metric name.
        name: String,
        /// Kind and flavor of the existing declaration.
        existing: String,
        /// Kind and flavor of the rejected declaration.
        requested: String,
    },

    /// The instrument or namespace name cannot be used in a metric name.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A label key is empty or uses the reserved `__` prefix.
    #[error("invalid label {key}={value}: {reason}")]
    InvalidLabel {
        /// The label key.
        key: String,
        /// The label value.
        value: String,
        /// Why the label is invalid.
        reason: String,
    },

    /// A vector instrument received the wrong number of label values.
    #[error("instrument '{name}' expects {expected} label values, got {got}")]
    LabelArity {
        /// The full metric name.
        name: String,
        /// Number of label keys declared on the vector.
        expected: usize,
        /// Number of values supplied.
        got: usize,
    },
}

/// Type alias for `Result<T, MetrixError>`.
pub type Result<T> = std::result::Result<T, MetrixError>;
