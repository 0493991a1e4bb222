use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentStudent;
use crate::core::state::AppState;
use crate::schemas::session::{
    AnswerSync, AnswerSyncResponse, HeartbeatPing, HeartbeatResponse, SessionResponse,
    SnapshotResponse, SubmitResponse, ViolationCreate, ViolationEventResponse, ViolationResponse,
};


pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/exams/:exam_id/sessions", post(start_session))
        .route("/sessions/:session_id", get(get_session))
        .route("/sessions/:session_id/heartbeat", post(heartbeat))
        .route("/sessions/:session_id/violations", post(report_violation).get(list_violations))
        .route("/sessions/:session_id/answers/:question_id", put(sync_answer))
        .route("/sessions/:session_id/submit", post(submit_session))
}

async fn start_session(
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.coordinator().start_session(&exam_id, &student).await?;
    let remaining_ms = state.coordinator().remaining_ms(&session);
    Ok(Json(SessionResponse::from_session(&session, remaining_ms)))
}

/// Full state restore for a reconnecting client: the session row plus every
/// stored answer, so the client can resume exactly where the server left it.
async fn get_session(
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let session = state.coordinator().snapshot(&session_id, &student).await?;
    let answers = state.coordinator().list_answers(&session_id, &student).await?;
    let remaining_ms = state.coordinator().remaining_ms(&session);

    Ok(Json(SnapshotResponse {
        session: SessionResponse::from_session(&session, remaining_ms),
        answers: answers.into_iter().map(Into::into).collect(),
    }))
}

async fn heartbeat(
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ping: Option<Json<HeartbeatPing>>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    if let Some(Json(ping)) = ping {
        tracing::debug!(
            session_id,
            current_question = ping.current_question.as_deref(),
            answered_count = ping.answered_count,
            "Heartbeat progress report"
        );
    }

    let outcome = state.coordinator().heartbeat(&session_id, &student).await?;
    Ok(Json(outcome.into()))
}

async fn report_violation(
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(payload): Json<ViolationCreate>,
) -> Result<Json<ViolationResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let outcome = state
        .coordinator()
        .log_violation(&session_id, &student, payload.violation_type, payload.detail)
        .await?;
    Ok(Json(outcome.into()))
}

async fn list_violations(
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ViolationEventResponse>>, ApiError> {
    let events = state.coordinator().list_violations(&session_id, &student).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

async fn sync_answer(
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
    Path((session_id, question_id)): Path<(String, String)>,
    Json(payload): Json<AnswerSync>,
) -> Result<Json<AnswerSyncResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let write = state
        .coordinator()
        .sync_answer(&session_id, &student, &question_id, payload.payload, payload.client_version)
        .await?;
    Ok(Json(write.into()))
}

async fn submit_session(
    CurrentStudent(student): CurrentStudent,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let outcome = state.coordinator().submit(&session_id, &student).await?;
    Ok(Json(outcome.into()))
}
