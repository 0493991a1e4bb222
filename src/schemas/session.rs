use serde::{Deserialize, Serialize};
use validator::Validate;

pub(crate) use crate::core::time::format_primitive;
use crate::db::models::{AnswerEntry, ExamSession, ViolationEvent};
use crate::db::types::{SessionStatus, TerminationReason, ViolationType};
use crate::services::lifecycle::{HeartbeatOutcome, SubmitOutcome, ViolationOutcome};
use crate::store::AnswerWrite;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ViolationCreate {
    #[serde(alias = "violationType")]
    pub(crate) violation_type: ViolationType,
    #[serde(default)]
    #[validate(length(max = 512, message = "detail must be at most 512 characters"))]
    pub(crate) detail: Option<String>,
}

/// Advisory progress report sent with a heartbeat; logged for proctors but
/// never treated as authoritative state.
#[derive(Debug, Deserialize)]
pub(crate) struct HeartbeatPing {
    #[serde(default, alias = "currentQuestion")]
    pub(crate) current_question: Option<String>,
    #[serde(default, alias = "answeredCount")]
    pub(crate) answered_count: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AnswerSync {
    pub(crate) payload: serde_json::Value,
    #[serde(alias = "clientVersion")]
    #[validate(range(min = 1, message = "client_version must be positive"))]
    pub(crate) client_version: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: SessionStatus,
    pub(crate) termination_reason: Option<TerminationReason>,
    pub(crate) started_at: String,
    pub(crate) deadline: Option<String>,
    pub(crate) ended_at: Option<String>,
    pub(crate) violation_count: i32,
    pub(crate) remaining_ms: Option<i64>,
}

impl SessionResponse {
    pub(crate) fn from_session(session: &ExamSession, remaining_ms: Option<i64>) -> Self {
        Self {
            id: session.id.clone(),
            exam_id: session.exam_id.clone(),
            student_id: session.student_id.clone(),
            attempt_number: session.attempt_number,
            status: session.status,
            termination_reason: session.termination_reason,
            started_at: format_primitive(session.started_at),
            deadline: session.deadline.map(format_primitive),
            ended_at: session.ended_at.map(format_primitive),
            violation_count: session.violation_count,
            remaining_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SnapshotResponse {
    #[serde(flatten)]
    pub(crate) session: SessionResponse,
    pub(crate) answers: Vec<AnswerEntryResponse>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerEntryResponse {
    pub(crate) question_id: String,
    pub(crate) payload: serde_json::Value,
    pub(crate) client_version: i64,
    pub(crate) stored_at: String,
}

impl From<AnswerEntry> for AnswerEntryResponse {
    fn from(entry: AnswerEntry) -> Self {
        Self {
            question_id: entry.question_id,
            payload: entry.payload.0,
            client_version: entry.client_version,
            stored_at: format_primitive(entry.stored_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HeartbeatResponse {
    pub(crate) status: SessionStatus,
    pub(crate) termination_reason: Option<TerminationReason>,
    pub(crate) remaining_ms: Option<i64>,
    pub(crate) violation_count: i32,
}

impl From<HeartbeatOutcome> for HeartbeatResponse {
    fn from(outcome: HeartbeatOutcome) -> Self {
        Self {
            status: outcome.status,
            termination_reason: outcome.termination_reason,
            remaining_ms: outcome.remaining_ms,
            violation_count: outcome.violation_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ViolationResponse {
    pub(crate) violation_count: i32,
    pub(crate) status: SessionStatus,
    pub(crate) termination_reason: Option<TerminationReason>,
}

impl From<ViolationOutcome> for ViolationResponse {
    fn from(outcome: ViolationOutcome) -> Self {
        Self {
            violation_count: outcome.violation_count,
            status: outcome.status,
            termination_reason: outcome.termination_reason,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ViolationEventResponse {
    pub(crate) id: String,
    pub(crate) violation_type: ViolationType,
    pub(crate) detail: Option<String>,
    pub(crate) occurred_at: String,
}

impl From<ViolationEvent> for ViolationEventResponse {
    fn from(event: ViolationEvent) -> Self {
        Self {
            id: event.id,
            violation_type: event.violation_type,
            detail: event.detail,
            occurred_at: format_primitive(event.occurred_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerSyncResponse {
    pub(crate) accepted: bool,
    pub(crate) current_version: i64,
}

impl From<AnswerWrite> for AnswerSyncResponse {
    fn from(write: AnswerWrite) -> Self {
        Self { accepted: write.accepted, current_version: write.current_version }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) status: SessionStatus,
    pub(crate) termination_reason: Option<TerminationReason>,
    pub(crate) results_visible: bool,
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        Self {
            status: outcome.status,
            termination_reason: outcome.termination_reason,
            results_visible: outcome.results_visible,
        }
    }
}
