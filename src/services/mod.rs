pub(crate) mod answer_sync;
pub(crate) mod eligibility;
pub(crate) mod lifecycle;

use thiserror::Error;

use crate::store::StoreError;

/// Student identity as carried in the platform-issued access token.
#[derive(Debug, Clone)]
pub(crate) struct StudentIdentity {
    pub(crate) id: String,
    pub(crate) email: Option<String>,
}

#[derive(Debug, Error)]
pub(crate) enum ProctorError {
    #[error("Exam not found")]
    ExamNotFound,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Email is not permitted for this exam")]
    EmailNotAllowed,
    #[error("Exam has not started yet")]
    WindowNotOpen,
    #[error("Exam window has closed")]
    WindowClosed,
    #[error("Maximum attempts reached")]
    AttemptLimitReached,
    #[error("Session belongs to another student")]
    NotOwner,
    #[error("Session is not active")]
    SessionNotActive,
    #[error("too much contention on session update")]
    Contention,
    #[error(transparent)]
    Store(#[from] StoreError),
}
