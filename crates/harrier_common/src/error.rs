//! Error hierarchy for the harrier crates.
//!
//! One enum per layer (`StoreError`, `IndexError`, `SchedulerError`), all
//! converting into the top-level `HarrierError` via `#[from]`. Callers that
//! do not want to match variants can use `kind()` to decide between
//! surfacing a user mistake, retrying a wait, and dropping the index.

use thiserror::Error;

use crate::types::{EntityId, IndexId, PopulationState};

/// Convenience alias for `Result<T, HarrierError>`.
pub type HarrierResult<T> = Result<T, HarrierError>;

/// Error classification for retry/escalation decisions.
///
/// - `User`: bad input or a lookup against something that does not exist
/// - `Transient`: deadline expired; the caller may retry the wait
/// - `Fatal`: the population is dead; drop the index and recreate it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Transient,
    Fatal,
}

/// Top-level error type that all layer errors convert into.
#[derive(Error, Debug)]
pub enum HarrierError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarrierError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarrierError::Store(e) => e.kind(),
            HarrierError::Index(e) => e.kind(),
            HarrierError::Scheduler(_) => ErrorKind::Fatal,
            HarrierError::Internal(_) => ErrorKind::Fatal,
        }
    }
}

/// Errors raised by the entity store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::EntityNotFound(_) => ErrorKind::User,
        }
    }
}

/// Errors raised by the indexing subsystem.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index scope already exists: {scope}")]
    ScopeAlreadyIndexed { scope: String },

    #[error("Invalid index descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Index not found: {0}")]
    NotFound(IndexId),

    #[error("Index {id} is not online (state: {state})")]
    NotOnline { id: IndexId, state: PopulationState },

    #[error("Timed out after {waited_ms}ms waiting for {id} to come online")]
    AwaitTimeout { id: IndexId, waited_ms: u64 },

    #[error("Population of {id} failed: {reason}")]
    PopulationFailed { id: IndexId, reason: String },

    #[error("Index scan failed: {reason}")]
    ScanFailed { reason: String },

    #[error("Capture buffer overflow (capacity {capacity})")]
    CaptureOverflow { capacity: usize },

    /// Internal marker: the population was asked to stop. Never surfaced to
    /// callers through the lifecycle API.
    #[error("Population cancelled")]
    Cancelled,

    #[error("Population job could not be scheduled: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // User-facing errors (bad input, lookups against missing indexes)
            IndexError::ScopeAlreadyIndexed { .. } => ErrorKind::User,
            IndexError::InvalidDescriptor(_) => ErrorKind::User,
            IndexError::Unsupported(_) => ErrorKind::User,
            IndexError::NotFound(_) => ErrorKind::User,
            IndexError::NotOnline { .. } => ErrorKind::User,

            // The wait can be retried; the population itself is unaffected
            IndexError::AwaitTimeout { .. } => ErrorKind::Transient,

            // Population is dead; drop and recreate
            IndexError::PopulationFailed { .. } => ErrorKind::Fatal,
            IndexError::ScanFailed { .. } => ErrorKind::Fatal,
            IndexError::CaptureOverflow { .. } => ErrorKind::Fatal,
            IndexError::Cancelled => ErrorKind::Fatal,
            IndexError::Scheduler(_) => ErrorKind::Fatal,
        }
    }
}

/// Errors raised by the job scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is shut down")]
    ShutDown,

    #[error("Failed to spawn job thread: {0}")]
    Spawn(#[from] std::io::Error),
}
