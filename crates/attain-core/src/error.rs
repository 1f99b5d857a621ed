//! Error types.
//!
//! [`BackendError`] describes a failed call to the grading server.
//! [`CoordinatorError`] is what session operations surface to callers;
//! [`CoordinatorError::kind`] folds it onto the four failure classes the
//! UI distinguishes.

use std::fmt;

use thiserror::Error;

use crate::model::{ClassId, DisciplineId};
use crate::session::SessionKey;

/// Errors that can occur when talking to the grading server.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Transport(String),

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// 401 or 403. Session expiry is handled outside this crate.
    #[error("not authorized (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("not found: {0}")]
    NotFound(String),

    /// The server refused the request as inconsistent with its state.
    #[error("rejected by server (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Any other error status.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_auth(&self) -> bool {
        matches!(self, BackendError::Unauthorized { .. })
    }

    /// Returns `true` if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Transport(_) | BackendError::Timeout(_) | BackendError::Server { .. }
        )
    }
}

/// The operation a lock check guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedOperation {
    Write,
    Finalize,
    Reopen,
}

impl fmt::Display for LockedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockedOperation::Write => write!(f, "write"),
            LockedOperation::Finalize => write!(f, "finalize"),
            LockedOperation::Reopen => write!(f, "reopen"),
        }
    }
}

/// Who detected a lock violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationSource {
    /// Rejected locally before any request was sent.
    Client,
    /// The server refused the transition, typically because another
    /// session changed the lock first.
    Server,
}

/// Failure classes surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Auth,
    LockViolation,
    PartialBatch,
    /// The operation targeted something that is not selected or not ready.
    Selection,
}

/// Errors surfaced by session operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinatorError {
    #[error("transport failure: {0}")]
    Transport(BackendError),

    #[error("authentication failure (HTTP {status})")]
    Auth { status: u16 },

    #[error("{operation} not allowed for {key}: {detail}")]
    LockViolation {
        key: SessionKey,
        operation: LockedOperation,
        reported_by: ViolationSource,
        detail: String,
    },

    #[error("{failed} of {total} writes failed; session reloaded from server (first error: {first_error})")]
    PartialBatchFailure {
        failed: usize,
        total: usize,
        first_error: String,
    },

    #[error("no session loaded for {0}")]
    NotSelected(SessionKey),

    #[error("no snapshot exists for class {class_id}, discipline {discipline_id}")]
    SnapshotUnavailable {
        class_id: ClassId,
        discipline_id: DisciplineId,
    },
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::Transport(_) => ErrorKind::Transport,
            CoordinatorError::Auth { .. } => ErrorKind::Auth,
            CoordinatorError::LockViolation { .. } => ErrorKind::LockViolation,
            CoordinatorError::PartialBatchFailure { .. } => ErrorKind::PartialBatch,
            CoordinatorError::NotSelected(_) | CoordinatorError::SnapshotUnavailable { .. } => {
                ErrorKind::Selection
            }
        }
    }

    /// Returns `true` if the user may simply try the same action again.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::Transport(e) => e.is_retryable(),
            CoordinatorError::PartialBatchFailure { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn client_lock(key: SessionKey, operation: LockedOperation, detail: &str) -> Self {
        CoordinatorError::LockViolation {
            key,
            operation,
            reported_by: ViolationSource::Client,
            detail: detail.to_string(),
        }
    }

    /// Classify a failed call that the server refused because of the lock.
    pub(crate) fn from_transition(
        err: BackendError,
        key: SessionKey,
        operation: LockedOperation,
    ) -> Self {
        match err {
            BackendError::Rejected { message, .. } => CoordinatorError::LockViolation {
                key,
                operation,
                reported_by: ViolationSource::Server,
                detail: message,
            },
            other => other.into(),
        }
    }
}

impl From<BackendError> for CoordinatorError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized { status } => CoordinatorError::Auth { status },
            other => CoordinatorError::Transport(other),
        }
    }
}
