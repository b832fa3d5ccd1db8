//! Request error taxonomy.
//!
//! The split mirrors the job completion codes: non-terminal errors tell the
//! caller the same request may succeed later; terminal ones mean this request
//! instance is dead.

use thiserror::Error;

use gneiss_broker::BrokerError;
use gneiss_extent::ExtentError;
use gneiss_types::{JobErrorCode, ObjectId};

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("extent {0} is not registered")]
    UnknownExtent(ObjectId),

    /// Malformed input; rejected synchronously, no job created.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// Non-terminal: the extent cannot take the request yet.
    #[error("extent {0} is not ready")]
    NotReady(ObjectId),

    /// Non-terminal: the primary edge is not usable right now.
    #[error("extent {0} is degraded")]
    Degraded(ObjectId),

    /// Non-terminal: no edge is usable right now.
    #[error("extent {0} has no usable edge")]
    Broken(ObjectId),

    /// Non-terminal: another copy or swap is already in flight.
    #[error("a copy or swap is already in progress on extent {0}")]
    CopyInProgress(ObjectId),

    /// Terminal for this request: a swap precondition failed.
    #[error("swap validation failed: {0}")]
    ValidationFailed(&'static str),

    #[error(transparent)]
    Wait(#[from] BrokerError),

    #[error("metadata store: {0}")]
    Store(#[from] StoreError),
}

impl ControlError {
    /// The completion code this error maps to at the job API boundary.
    pub fn error_code(&self) -> JobErrorCode {
        match self {
            ControlError::UnknownExtent(_) | ControlError::InvalidRequest(_) => {
                JobErrorCode::InvalidRequest
            }
            ControlError::NotReady(_) => JobErrorCode::NotReady,
            ControlError::Degraded(_) => JobErrorCode::Degraded,
            ControlError::Broken(_) => JobErrorCode::Broken,
            ControlError::CopyInProgress(_) => JobErrorCode::CopyInProgress,
            ControlError::ValidationFailed(_) => JobErrorCode::ValidationFailed,
            ControlError::Wait(err) => err.error_code(),
            ControlError::Store(_) => JobErrorCode::InternalError,
        }
    }

    /// True when the caller may safely resubmit the same request later.
    pub fn is_retryable(&self) -> bool {
        self.error_code().is_retryable()
    }
}

/// Translates kernel rejections of a swap request into the request taxonomy.
pub(crate) fn from_extent(err: ExtentError, object_id: ObjectId) -> ControlError {
    match err {
        ExtentError::SwapInProgress => ControlError::CopyInProgress(object_id),
        ExtentError::ModeUnknown => ControlError::NotReady(object_id),
        ExtentError::ModeMismatch { .. } => {
            ControlError::ValidationFailed("configuration mode does not support the command")
        }
        ExtentError::WrongSwapEdge { .. } => ControlError::InvalidRequest("wrong edge for command"),
        ExtentError::QueryUnsupported { .. } => {
            ControlError::InvalidRequest("query unsupported in current mode")
        }
        ExtentError::NoTransition => ControlError::NotReady(object_id),
    }
}
