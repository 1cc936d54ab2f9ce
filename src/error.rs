//! Error taxonomy shared by every public operation.

use crate::datatype::DatatypeKind;
use crate::op::ReduceOp;
use thiserror::Error;

/// Result type returned by all message-passing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric status codes, kept for callers that still want the classic integer form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// The operation completed
    Success = 0,
    /// Generic failure
    Error = -1,
    /// A transaction dictionary could not record an entry
    ErrorRecording = -2,
    /// A transaction dictionary could not find the entry to complete
    ErrorCompleting = -3,
}

/// Errors produced by the rendezvous layer and the operations built on it.
///
/// Every variant is `Clone` so that a single failure can be delivered through
/// the one-shot futures of every participant waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Catch-all failure (maps to [ErrorCode::Error])
    #[error("operation failed: {0}")]
    Generic(String),

    /// A user-side or network-side record could not be placed
    #[error("unable to record transaction {trans_num}: {reason}")]
    Recording { trans_num: u64, reason: String },

    /// `complete()` did not find a live entry for the transaction
    #[error("unable to complete transaction {0}: no live entry")]
    Completing(u64),

    /// The reduction operator is not defined for the element type
    #[error("reduction {op:?} is not supported for datatype {kind:?}")]
    UnsupportedReduction { op: ReduceOp, kind: DatatypeKind },

    /// A rank outside `0..size`
    #[error("invalid rank {rank} (communicator size {size})")]
    InvalidRank { rank: usize, size: usize },

    /// A request number that is not active in the request table
    #[error("invalid request {0}")]
    InvalidRequest(usize),

    /// Counts, displacements or buffers that do not line up
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An incoming payload does not fit the posted buffer
    #[error("message of {incoming} bytes truncated into a {capacity} byte buffer")]
    Truncated { incoming: usize, capacity: usize },

    /// A wait exceeded the configured deadline
    #[error("wait timed out after {0:.3} seconds")]
    Timeout(f64),

    /// A header or payload could not be encoded/decoded
    #[error("codec failure: {0}")]
    Codec(String),

    /// The calling task has not called `init`, or has already finalized
    #[error("rank is not initialized")]
    NotInitialized,
}

impl Error {
    /// The numeric status code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Recording { .. } => ErrorCode::ErrorRecording,
            Error::Completing(_) => ErrorCode::ErrorCompleting,
            _ => ErrorCode::Error,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

/// Collapse a result into its status code, the shape the classic interface returns through an out-parameter.
pub fn status_code<T>(res: &Result<T>) -> ErrorCode {
    match res {
        Ok(_) => ErrorCode::Success,
        Err(e) => e.code(),
    }
}
