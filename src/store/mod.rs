pub(crate) mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{AnswerEntry, ExamSession, ViolationEvent};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Exam configuration as consumed by this subsystem. Authored elsewhere and
/// read-only here; re-fetched on every call so tutor edits take effect
/// without restarts.
#[derive(Debug, Clone)]
pub(crate) struct ExamConfig {
    pub(crate) id: String,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) max_violations: Option<i32>,
    pub(crate) attempt_limit: i32,
    pub(crate) start_time: Option<PrimitiveDateTime>,
    pub(crate) end_time: Option<PrimitiveDateTime>,
    pub(crate) restrict_by_email: bool,
    pub(crate) allowed_emails: Vec<String>,
    pub(crate) show_results_immediately: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AttemptStats {
    pub(crate) count: i64,
    pub(crate) highest_attempt: i32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AnswerWrite {
    pub(crate) accepted: bool,
    pub(crate) current_version: i64,
}

/// Narrow contract over durable session state. Implementations must never
/// silently overwrite: inserts refuse duplicate active sessions and updates
/// apply only when `expected_version` still matches the stored row.
#[async_trait]
pub(crate) trait SessionStore: Send + Sync {
    async fn find_session(&self, session_id: &str) -> Result<Option<ExamSession>, StoreError>;

    async fn find_active_session(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Option<ExamSession>, StoreError>;

    async fn attempt_stats(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<AttemptStats, StoreError>;

    /// Returns false when an active session for the same exam and student
    /// already exists; the caller re-reads and resumes that one.
    async fn insert_session(&self, session: &ExamSession) -> Result<bool, StoreError>;

    /// Compare-and-swap: writes the row only if its stored `state_version`
    /// still equals `expected_version`. Returns false on conflict.
    async fn update_session(
        &self,
        session: &ExamSession,
        expected_version: i64,
    ) -> Result<bool, StoreError>;

    /// Strictly-greater-version-wins upsert for one question's answer.
    async fn write_answer_if_newer(&self, entry: &AnswerEntry)
        -> Result<AnswerWrite, StoreError>;

    async fn list_answers(&self, session_id: &str) -> Result<Vec<AnswerEntry>, StoreError>;

    async fn record_violation_event(&self, event: &ViolationEvent) -> Result<(), StoreError>;

    async fn list_violation_events(
        &self,
        session_id: &str,
    ) -> Result<Vec<ViolationEvent>, StoreError>;

    async fn list_active_past_deadline(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSession>, StoreError>;

    /// Untimed active sessions whose last sign of life predates the cutoff.
    async fn list_active_idle_untimed(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSession>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub(crate) trait ExamDirectory: Send + Sync {
    async fn fetch(&self, exam_id: &str) -> Result<Option<ExamConfig>, StoreError>;
}
