//! Engine error taxonomy.

use thiserror::Error;

use crate::engine::context::LifecycleState;

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OutOfMemory,
    SystemResourceFailure,
    InvalidArgument,
    InvalidState,
    CapacityExceeded,
    EmptyResult,
}

/// Errors produced by the dispatch engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An allocation could not be satisfied.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A socket or notification handle could not be created.
    #[error("system resource failure: {context}: {source}")]
    SystemResource {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed input (host, port, algorithm name, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted outside its valid lifecycle state.
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// The backend registry is full.
    #[error("backend registry full (capacity {capacity})")]
    CapacityExceeded { capacity: usize },

    /// No eligible backend for this unit of work.
    #[error("no eligible backend")]
    EmptyResult,

    /// Strategy initialization failed; fatal to context creation.
    #[error("strategy {strategy} failed to initialize: {reason}")]
    StrategyInit { strategy: &'static str, reason: String },
}

impl EngineError {
    /// Wrap an I/O error with a short description of what was attempted.
    pub fn system(context: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::SystemResource {
            context: context.into(),
            source,
        }
    }

    /// Return the taxonomy entry for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            EngineError::SystemResource { .. } => ErrorKind::SystemResourceFailure,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::InvalidState { .. } => ErrorKind::InvalidState,
            EngineError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            EngineError::EmptyResult => ErrorKind::EmptyResult,
            EngineError::StrategyInit { .. } => ErrorKind::InvalidState,
        }
    }

    /// Platform error code, when the failure came from the OS.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            EngineError::SystemResource { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
