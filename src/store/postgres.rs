use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{AnswerEntry, ExamSession, ExamRow, ViolationEvent};
use crate::db::types::SessionStatus;
use crate::store::{
    AnswerWrite, AttemptStats, ExamConfig, ExamDirectory, SessionStore, StoreError,
};

const SESSION_COLUMNS: &str = "\
    id, exam_id, student_id, student_email, attempt_number, status, \
    termination_reason, started_at, deadline, ended_at, last_heartbeat_at, \
    violation_count, state_version, created_at, updated_at";

const ANSWER_COLUMNS: &str = "session_id, question_id, payload, client_version, stored_at";

const EXAM_COLUMNS: &str = "\
    id, title, time_limit_minutes, max_violations, attempt_limit, start_time, \
    end_time, restrict_by_email, allowed_emails, show_results_immediately, \
    created_at, updated_at";

pub(crate) struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_session(&self, session_id: &str) -> Result<Option<ExamSession>, StoreError> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM exam_sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn find_active_session(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Option<ExamSession>, StoreError> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM exam_sessions \
             WHERE exam_id = $1 AND student_id = $2 AND status = $3"
        ))
        .bind(exam_id)
        .bind(student_id)
        .bind(SessionStatus::Active)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn attempt_stats(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<AttemptStats, StoreError> {
        let row: (i64, Option<i32>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(attempt_number) FROM exam_sessions \
             WHERE exam_id = $1 AND student_id = $2",
        )
        .bind(exam_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(AttemptStats { count: row.0, highest_attempt: row.1.unwrap_or(0) })
    }

    async fn insert_session(&self, session: &ExamSession) -> Result<bool, StoreError> {
        // The partial unique index on (exam_id, student_id) WHERE active turns
        // a concurrent duplicate start into a no-op instead of a second row.
        let result = sqlx::query(
            "INSERT INTO exam_sessions (
                id, exam_id, student_id, student_email, attempt_number, status,
                termination_reason, started_at, deadline, ended_at,
                last_heartbeat_at, violation_count, state_version, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            ON CONFLICT DO NOTHING",
        )
        .bind(&session.id)
        .bind(&session.exam_id)
        .bind(&session.student_id)
        .bind(&session.student_email)
        .bind(session.attempt_number)
        .bind(session.status)
        .bind(session.termination_reason)
        .bind(session.started_at)
        .bind(session.deadline)
        .bind(session.ended_at)
        .bind(session.last_heartbeat_at)
        .bind(session.violation_count)
        .bind(session.state_version)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_session(
        &self,
        session: &ExamSession,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE exam_sessions SET
                status = $1, termination_reason = $2, ended_at = $3,
                last_heartbeat_at = $4, violation_count = $5, state_version = $6,
                updated_at = $7
             WHERE id = $8 AND state_version = $9",
        )
        .bind(session.status)
        .bind(session.termination_reason)
        .bind(session.ended_at)
        .bind(session.last_heartbeat_at)
        .bind(session.violation_count)
        .bind(session.state_version)
        .bind(session.updated_at)
        .bind(&session.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn write_answer_if_newer(
        &self,
        entry: &AnswerEntry,
    ) -> Result<AnswerWrite, StoreError> {
        let result = sqlx::query(
            "INSERT INTO answer_entries (session_id, question_id, payload, client_version, stored_at)
             VALUES ($1,$2,$3,$4,$5)
             ON CONFLICT (session_id, question_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                client_version = EXCLUDED.client_version,
                stored_at = EXCLUDED.stored_at
             WHERE answer_entries.client_version < EXCLUDED.client_version",
        )
        .bind(&entry.session_id)
        .bind(&entry.question_id)
        .bind(&entry.payload)
        .bind(entry.client_version)
        .bind(entry.stored_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(AnswerWrite { accepted: true, current_version: entry.client_version });
        }

        let current: i64 = sqlx::query_scalar(
            "SELECT client_version FROM answer_entries WHERE session_id = $1 AND question_id = $2",
        )
        .bind(&entry.session_id)
        .bind(&entry.question_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(AnswerWrite { accepted: false, current_version: current })
    }

    async fn list_answers(&self, session_id: &str) -> Result<Vec<AnswerEntry>, StoreError> {
        let answers = sqlx::query_as::<_, AnswerEntry>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answer_entries WHERE session_id = $1 ORDER BY question_id"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(answers)
    }

    async fn record_violation_event(&self, event: &ViolationEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO session_violations (id, session_id, violation_type, detail, occurred_at)
             VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(&event.id)
        .bind(&event.session_id)
        .bind(event.violation_type)
        .bind(&event.detail)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_violation_events(
        &self,
        session_id: &str,
    ) -> Result<Vec<ViolationEvent>, StoreError> {
        let events = sqlx::query_as::<_, ViolationEvent>(
            "SELECT id, session_id, violation_type, detail, occurred_at \
             FROM session_violations WHERE session_id = $1 ORDER BY occurred_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn list_active_past_deadline(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSession>, StoreError> {
        let sessions = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM exam_sessions \
             WHERE status = $1 AND deadline IS NOT NULL AND deadline <= $2 \
             ORDER BY deadline LIMIT $3"
        ))
        .bind(SessionStatus::Active)
        .bind(now)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn list_active_idle_untimed(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSession>, StoreError> {
        let sessions = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM exam_sessions \
             WHERE status = $1 AND deadline IS NULL \
               AND COALESCE(last_heartbeat_at, started_at) <= $2 \
             ORDER BY started_at LIMIT $3"
        ))
        .bind(SessionStatus::Active)
        .bind(cutoff)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub(crate) struct PgExamDirectory {
    pool: PgPool,
}

impl PgExamDirectory {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamDirectory for PgExamDirectory {
    async fn fetch(&self, exam_id: &str) -> Result<Option<ExamConfig>, StoreError> {
        let row = sqlx::query_as::<_, ExamRow>(&format!(
            "SELECT {EXAM_COLUMNS} FROM exams WHERE id = $1"
        ))
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|exam| ExamConfig {
            id: exam.id,
            time_limit_minutes: exam.time_limit_minutes,
            max_violations: exam.max_violations,
            attempt_limit: exam.attempt_limit,
            start_time: exam.start_time,
            end_time: exam.end_time,
            restrict_by_email: exam.restrict_by_email,
            allowed_emails: exam.allowed_emails.0,
            show_results_immediately: exam.show_results_immediately,
        }))
    }
}
