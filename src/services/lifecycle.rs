use std::sync::Arc;

use time::{Duration, PrimitiveDateTime};
use uuid::Uuid;

use crate::core::clock::Clock;
use crate::core::time::to_primitive_utc;
use crate::db::models::{AnswerEntry, ExamSession, ViolationEvent};
use crate::db::types::{SessionStatus, TerminationReason, ViolationType};
use crate::services::{answer_sync, eligibility, ProctorError, StudentIdentity};
use crate::store::{AnswerWrite, ExamConfig, ExamDirectory, SessionStore};


#[derive(Debug)]
pub(crate) struct HeartbeatOutcome {
    pub(crate) remaining_ms: Option<i64>,
    pub(crate) status: SessionStatus,
    pub(crate) termination_reason: Option<TerminationReason>,
    pub(crate) violation_count: i32,
}

#[derive(Debug)]
pub(crate) struct ViolationOutcome {
    pub(crate) violation_count: i32,
    pub(crate) status: SessionStatus,
    pub(crate) termination_reason: Option<TerminationReason>,
}

#[derive(Debug)]
pub(crate) struct SubmitOutcome {
    pub(crate) status: SessionStatus,
    pub(crate) termination_reason: Option<TerminationReason>,
    pub(crate) results_visible: bool,
}

/// Server-authoritative state machine for exam sessions. All mutation paths
/// funnel through compare-and-swap on the session's `state_version`; the
/// first transition out of `Active` wins and every competitor observes that
/// same terminal outcome.
pub(crate) struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    exams: Arc<dyn ExamDirectory>,
    clock: Arc<dyn Clock>,
    cas_retry_limit: u32,
}

impl SessionCoordinator {
    pub(crate) fn new(
        store: Arc<dyn SessionStore>,
        exams: Arc<dyn ExamDirectory>,
        clock: Arc<dyn Clock>,
        cas_retry_limit: u32,
    ) -> Self {
        Self { store, exams, clock, cas_retry_limit: cas_retry_limit.max(1) }
    }

    fn now_primitive(&self) -> PrimitiveDateTime {
        to_primitive_utc(self.clock.now_utc())
    }

    /// Remaining time is always recomputed from the stored deadline and the
    /// server clock; `None` for untimed sessions.
    pub(crate) fn remaining_ms(&self, session: &ExamSession) -> Option<i64> {
        session.deadline.map(|deadline| {
            let left = (deadline.assume_utc() - self.clock.now_utc()).whole_milliseconds();
            left.clamp(0, i64::MAX as i128) as i64
        })
    }

    pub(crate) async fn start_session(
        &self,
        exam_id: &str,
        identity: &StudentIdentity,
    ) -> Result<ExamSession, ProctorError> {
        let config = self.fetch_config(exam_id).await?;

        // Double-clicks and reconnects resume the running attempt instead of
        // creating a second one.
        if let Some(existing) = self.store.find_active_session(exam_id, &identity.id).await? {
            let existing = self.expire_if_overdue(existing).await?;
            if existing.status == SessionStatus::Active {
                return Ok(existing);
            }
        }

        let stats = self.store.attempt_stats(exam_id, &identity.id).await?;
        eligibility::check_start(&config, identity, stats.count, self.clock.now_utc())?;

        let now = self.now_primitive();
        let deadline = config
            .time_limit_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| now + Duration::minutes(i64::from(minutes)));

        let session = ExamSession {
            id: Uuid::new_v4().to_string(),
            exam_id: exam_id.to_string(),
            student_id: identity.id.clone(),
            student_email: identity.email.clone(),
            attempt_number: stats.highest_attempt + 1,
            status: SessionStatus::Active,
            termination_reason: None,
            started_at: now,
            deadline,
            ended_at: None,
            last_heartbeat_at: None,
            violation_count: 0,
            state_version: 1,
            created_at: now,
            updated_at: now,
        };

        if self.store.insert_session(&session).await? {
            metrics::counter!("proctor_sessions_started_total").increment(1);
            tracing::info!(
                session_id = %session.id,
                exam_id,
                student_id = %identity.id,
                attempt = session.attempt_number,
                "Exam session started"
            );
            return Ok(session);
        }

        // Lost a concurrent-start race; resume whichever session won it.
        self.store
            .find_active_session(exam_id, &identity.id)
            .await?
            .ok_or(ProctorError::Contention)
    }

    /// Owner-checked read used for client state restore; runs the lazy expiry
    /// check so no caller ever observes a session as active past deadline.
    pub(crate) async fn snapshot(
        &self,
        session_id: &str,
        identity: &StudentIdentity,
    ) -> Result<ExamSession, ProctorError> {
        let session = self.load_owned(session_id, identity).await?;
        self.expire_if_overdue(session).await
    }

    pub(crate) async fn heartbeat(
        &self,
        session_id: &str,
        identity: &StudentIdentity,
    ) -> Result<HeartbeatOutcome, ProctorError> {
        let mut session = self.load_owned(session_id, identity).await?;

        for _ in 0..self.cas_retry_limit {
            session = self.expire_if_overdue(session).await?;
            if session.status.is_terminal() {
                return Ok(self.heartbeat_outcome(&session));
            }

            let now = self.now_primitive();
            let mut next = session.clone();
            next.last_heartbeat_at = Some(now);
            next.state_version += 1;
            next.updated_at = now;

            if self.store.update_session(&next, session.state_version).await? {
                return Ok(self.heartbeat_outcome(&next));
            }

            metrics::counter!("proctor_cas_conflicts_total", "operation" => "heartbeat")
                .increment(1);
            session = self.reload(session_id).await?;
        }

        Err(ProctorError::Contention)
    }

    pub(crate) async fn log_violation(
        &self,
        session_id: &str,
        identity: &StudentIdentity,
        violation_type: ViolationType,
        detail: Option<String>,
    ) -> Result<ViolationOutcome, ProctorError> {
        let mut session = self.load_owned(session_id, identity).await?;
        let config = self.fetch_config(&session.exam_id).await?;
        let cap = config.max_violations.filter(|max| *max > 0);

        for _ in 0..self.cas_retry_limit {
            session = self.expire_if_overdue(session).await?;
            if session.status.is_terminal() {
                // Reports legitimately race with submission and expiry; hand
                // back the stored terminal truth instead of erroring.
                return Ok(ViolationOutcome {
                    violation_count: session.violation_count,
                    status: session.status,
                    termination_reason: session.termination_reason,
                });
            }

            let now = self.now_primitive();
            let mut next = session.clone();
            next.violation_count += 1;
            let terminates = matches!(cap, Some(max) if next.violation_count >= max);
            if terminates {
                next.status = SessionStatus::TerminatedViolations;
                next.termination_reason = Some(TerminationReason::MaxViolationsExceeded);
                next.ended_at = Some(now);
            }
            next.state_version += 1;
            next.updated_at = now;

            if self.store.update_session(&next, session.state_version).await? {
                metrics::counter!(
                    "proctor_violations_total",
                    "type" => violation_type.as_str()
                )
                .increment(1);

                let event = ViolationEvent {
                    id: Uuid::new_v4().to_string(),
                    session_id: next.id.clone(),
                    violation_type,
                    detail,
                    occurred_at: now,
                };
                self.store.record_violation_event(&event).await?;

                if terminates {
                    metrics::counter!(
                        "proctor_sessions_ended_total",
                        "reason" => TerminationReason::MaxViolationsExceeded.as_str()
                    )
                    .increment(1);
                    tracing::warn!(
                        session_id = %next.id,
                        violation_count = next.violation_count,
                        "Session terminated for exceeding the violation limit"
                    );
                }

                return Ok(ViolationOutcome {
                    violation_count: next.violation_count,
                    status: next.status,
                    termination_reason: next.termination_reason,
                });
            }

            metrics::counter!("proctor_cas_conflicts_total", "operation" => "violation")
                .increment(1);
            session = self.reload(session_id).await?;
        }

        Err(ProctorError::Contention)
    }

    pub(crate) async fn sync_answer(
        &self,
        session_id: &str,
        identity: &StudentIdentity,
        question_id: &str,
        payload: serde_json::Value,
        client_version: i64,
    ) -> Result<AnswerWrite, ProctorError> {
        let session = self.load_owned(session_id, identity).await?;
        let session = self.expire_if_overdue(session).await?;
        if session.status.is_terminal() {
            return Err(ProctorError::SessionNotActive);
        }

        answer_sync::store_answer(
            self.store.as_ref(),
            &session.id,
            question_id,
            payload,
            client_version,
            self.now_primitive(),
        )
        .await
    }

    pub(crate) async fn submit(
        &self,
        session_id: &str,
        identity: &StudentIdentity,
    ) -> Result<SubmitOutcome, ProctorError> {
        let mut session = self.load_owned(session_id, identity).await?;
        let config = self.fetch_config(&session.exam_id).await?;

        for _ in 0..self.cas_retry_limit {
            session = self.expire_if_overdue(session).await?;
            if session.status.is_terminal() {
                // A concurrent expiry or violation cutoff got there first; its
                // recorded reason is authoritative.
                return Ok(SubmitOutcome {
                    status: session.status,
                    termination_reason: session.termination_reason,
                    results_visible: config.show_results_immediately,
                });
            }

            let now = self.now_primitive();
            let mut next = session.clone();
            next.status = SessionStatus::Submitted;
            next.termination_reason = Some(TerminationReason::StudentSubmitted);
            next.ended_at = Some(now);
            next.state_version += 1;
            next.updated_at = now;

            if self.store.update_session(&next, session.state_version).await? {
                metrics::counter!(
                    "proctor_sessions_ended_total",
                    "reason" => TerminationReason::StudentSubmitted.as_str()
                )
                .increment(1);
                tracing::info!(session_id = %next.id, "Session submitted");
                return Ok(SubmitOutcome {
                    status: next.status,
                    termination_reason: next.termination_reason,
                    results_visible: config.show_results_immediately,
                });
            }

            metrics::counter!("proctor_cas_conflicts_total", "operation" => "submit").increment(1);
            session = self.reload(session_id).await?;
        }

        Err(ProctorError::Contention)
    }

    pub(crate) async fn list_answers(
        &self,
        session_id: &str,
        identity: &StudentIdentity,
    ) -> Result<Vec<AnswerEntry>, ProctorError> {
        self.load_owned(session_id, identity).await?;
        Ok(self.store.list_answers(session_id).await?)
    }

    pub(crate) async fn list_violations(
        &self,
        session_id: &str,
        identity: &StudentIdentity,
    ) -> Result<Vec<ViolationEvent>, ProctorError> {
        self.load_owned(session_id, identity).await?;
        Ok(self.store.list_violation_events(session_id).await?)
    }

    /// Lazy expiry, shared by every operation and by the sweep: if the
    /// deadline has passed while the session is still active, transition it
    /// to `Expired` before anything else happens.
    pub(crate) async fn expire_if_overdue(
        &self,
        mut session: ExamSession,
    ) -> Result<ExamSession, ProctorError> {
        for _ in 0..self.cas_retry_limit {
            if session.status.is_terminal() {
                return Ok(session);
            }
            let Some(deadline) = session.deadline else {
                return Ok(session);
            };
            if self.clock.now_utc() < deadline.assume_utc() {
                return Ok(session);
            }

            let now = self.now_primitive();
            let mut next = session.clone();
            next.status = SessionStatus::Expired;
            next.termination_reason = Some(TerminationReason::TimeExpired);
            next.ended_at = Some(now);
            next.state_version += 1;
            next.updated_at = now;

            if self.store.update_session(&next, session.state_version).await? {
                metrics::counter!(
                    "proctor_sessions_ended_total",
                    "reason" => TerminationReason::TimeExpired.as_str()
                )
                .increment(1);
                tracing::info!(session_id = %next.id, "Session expired at deadline");
                return Ok(next);
            }

            metrics::counter!("proctor_cas_conflicts_total", "operation" => "expire").increment(1);
            session = self.reload(&session.id).await?;
        }

        Err(ProctorError::Contention)
    }

    /// Single CAS attempt used by the sweep for idle untimed sessions. A
    /// conflict means the session showed signs of life; skip it this round.
    pub(crate) async fn mark_abandoned(
        &self,
        session: ExamSession,
    ) -> Result<bool, ProctorError> {
        if session.status.is_terminal() || session.deadline.is_some() {
            return Ok(false);
        }

        let now = self.now_primitive();
        let mut next = session.clone();
        next.status = SessionStatus::Abandoned;
        next.termination_reason = Some(TerminationReason::Abandoned);
        next.ended_at = Some(now);
        next.state_version += 1;
        next.updated_at = now;

        if self.store.update_session(&next, session.state_version).await? {
            metrics::counter!(
                "proctor_sessions_ended_total",
                "reason" => TerminationReason::Abandoned.as_str()
            )
            .increment(1);
            tracing::info!(session_id = %next.id, "Idle session marked abandoned");
            return Ok(true);
        }

        Ok(false)
    }

    fn heartbeat_outcome(&self, session: &ExamSession) -> HeartbeatOutcome {
        HeartbeatOutcome {
            remaining_ms: self.remaining_ms(session),
            status: session.status,
            termination_reason: session.termination_reason,
            violation_count: session.violation_count,
        }
    }

    async fn fetch_config(&self, exam_id: &str) -> Result<ExamConfig, ProctorError> {
        self.exams.fetch(exam_id).await?.ok_or(ProctorError::ExamNotFound)
    }

    async fn load_owned(
        &self,
        session_id: &str,
        identity: &StudentIdentity,
    ) -> Result<ExamSession, ProctorError> {
        let session =
            self.store.find_session(session_id).await?.ok_or(ProctorError::SessionNotFound)?;
        if session.student_id != identity.id {
            return Err(ProctorError::NotOwner);
        }
        Ok(session)
    }

    async fn reload(&self, session_id: &str) -> Result<ExamSession, ProctorError> {
        self.store.find_session(session_id).await?.ok_or(ProctorError::SessionNotFound)
    }
}
