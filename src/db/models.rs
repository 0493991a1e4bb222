use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{SessionStatus, TerminationReason, ViolationType};

/// One student's attempt at one exam. Every mutation goes through
/// compare-and-swap on `state_version`; `deadline` is fixed at creation and
/// never extended, and `last_heartbeat_at` is advisory only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamSession {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) student_email: Option<String>,
    pub(crate) attempt_number: i32,
    pub(crate) status: SessionStatus,
    pub(crate) termination_reason: Option<TerminationReason>,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) deadline: Option<PrimitiveDateTime>,
    pub(crate) ended_at: Option<PrimitiveDateTime>,
    pub(crate) last_heartbeat_at: Option<PrimitiveDateTime>,
    pub(crate) violation_count: i32,
    pub(crate) state_version: i64,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

/// Stored answer for one question in one session. `client_version` is the
/// highest version ever accepted for that question; lower or equal versions
/// are never applied.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct AnswerEntry {
    pub(crate) session_id: String,
    pub(crate) question_id: String,
    pub(crate) payload: Json<serde_json::Value>,
    pub(crate) client_version: i64,
    pub(crate) stored_at: PrimitiveDateTime,
}

/// Append-only audit record of one reported integrity event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ViolationEvent {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) violation_type: ViolationType,
    pub(crate) detail: Option<String>,
    pub(crate) occurred_at: PrimitiveDateTime,
}

/// Raw exam configuration row as the authoring service writes it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ExamRow {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) max_violations: Option<i32>,
    pub(crate) attempt_limit: i32,
    pub(crate) start_time: Option<PrimitiveDateTime>,
    pub(crate) end_time: Option<PrimitiveDateTime>,
    pub(crate) restrict_by_email: bool,
    pub(crate) allowed_emails: Json<Vec<String>>,
    pub(crate) show_results_immediately: bool,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}
