use thiserror::Error;

/// The error taxonomy shared by every layer of the queue.
///
/// Each variant corresponds to one row of the kind table in the scheduled
/// priority queue design: registry-level identity conflicts, heap-level
/// reference misses, and defensive checks that should be unreachable in a
/// correct program.
#[derive(Debug, Error)]
pub enum Error {
    #[error("id already registered")]
    DuplicateId,
    #[error("payload already registered")]
    DuplicatePayload,
    #[error("handle is stale")]
    StaleHandle,
    #[error("reference not found")]
    NotFound,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("internal invariant violated: {0}")]
    InvariantViolation(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
