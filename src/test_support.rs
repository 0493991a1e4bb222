use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::macros::datetime;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use tokio::sync::OwnedMutexGuard;

use crate::api;
use crate::core::{clock::Clock, config::Settings, security, state::AppState};
use crate::db::models::{AnswerEntry, ExamSession, ViolationEvent};
use crate::db::types::SessionStatus;
use crate::store::{
    AnswerWrite, AttemptStats, ExamConfig, ExamDirectory, SessionStore, StoreError,
};

const TEST_SECRET_KEY: &str = "test-secret";

pub(crate) const TEST_EPOCH: OffsetDateTime = datetime!(2025-06-01 10:00).assume_utc();

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) store: Arc<MemorySessionStore>,
    pub(crate) exams: Arc<MemoryExamDirectory>,
    pub(crate) clock: Arc<ManualClock>,
    _guard: Option<OwnedMutexGuard<()>>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<tokio::sync::Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(tokio::sync::Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    dotenvy::dotenv().ok();

    std::env::set_var("PROCTOR_ENV", "test");
    std::env::set_var("PROCTOR_STRICT_CONFIG", "0");
    std::env::set_var("SECRET_KEY", TEST_SECRET_KEY);
    std::env::set_var("PROMETHEUS_ENABLED", "0");
}

/// Builds an application state and router on top of the in-memory store; no
/// external services are touched.
pub(crate) fn test_context(settings: Settings) -> TestContext {
    let store = Arc::new(MemorySessionStore::default());
    let exams = Arc::new(MemoryExamDirectory::default());
    let clock = Arc::new(ManualClock::new(TEST_EPOCH));

    let state = AppState::new(settings, store.clone(), exams.clone(), clock.clone());
    let app = api::router::router(state.clone());

    TestContext { state, app, store, exams, clock, _guard: None }
}

pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let mut ctx = test_context(settings);
    ctx._guard = Some(guard);
    ctx
}

pub(crate) fn exam_config(id: &str) -> ExamConfig {
    ExamConfig {
        id: id.to_string(),
        time_limit_minutes: Some(30),
        max_violations: Some(3),
        attempt_limit: 2,
        start_time: None,
        end_time: None,
        restrict_by_email: false,
        allowed_emails: vec![],
        show_results_immediately: true,
    }
}

pub(crate) fn bearer_token(student_id: &str, email: Option<&str>, settings: &Settings) -> String {
    security::create_access_token(student_id, email, settings, None).expect("token")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

/// Clock whose time only moves when a test tells it to.
pub(crate) struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub(crate) fn new(now: OffsetDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock lock")
    }
}

#[derive(Default)]
pub(crate) struct MemoryExamDirectory {
    exams: Mutex<HashMap<String, ExamConfig>>,
}

impl MemoryExamDirectory {
    pub(crate) fn insert(&self, config: ExamConfig) {
        self.exams.lock().expect("exams lock").insert(config.id.clone(), config);
    }
}

#[async_trait]
impl ExamDirectory for MemoryExamDirectory {
    async fn fetch(&self, exam_id: &str) -> Result<Option<ExamConfig>, StoreError> {
        Ok(self.exams.lock().expect("exams lock").get(exam_id).cloned())
    }
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, ExamSession>,
    answers: HashMap<(String, String), AnswerEntry>,
    events: Vec<ViolationEvent>,
}

/// In-memory stand-in for the Postgres store. Each trait method takes the
/// lock once, so individual calls are as atomic as their SQL counterparts
/// and the optimistic-concurrency paths get exercised for real.
#[derive(Default)]
pub(crate) struct MemorySessionStore {
    inner: Mutex<MemoryState>,
}

impl MemorySessionStore {
    pub(crate) fn session(&self, session_id: &str) -> Option<ExamSession> {
        self.inner.lock().expect("store lock").sessions.get(session_id).cloned()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.inner.lock().expect("store lock").sessions.len()
    }

    pub(crate) fn violation_event_count(&self, session_id: &str) -> usize {
        self.inner
            .lock()
            .expect("store lock")
            .events
            .iter()
            .filter(|event| event.session_id == session_id)
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_session(&self, session_id: &str) -> Result<Option<ExamSession>, StoreError> {
        Ok(self.session(session_id))
    }

    async fn find_active_session(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Option<ExamSession>, StoreError> {
        let state = self.inner.lock().expect("store lock");
        Ok(state
            .sessions
            .values()
            .find(|session| {
                session.exam_id == exam_id
                    && session.student_id == student_id
                    && session.status == SessionStatus::Active
            })
            .cloned())
    }

    async fn attempt_stats(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<AttemptStats, StoreError> {
        let state = self.inner.lock().expect("store lock");
        let mut stats = AttemptStats { count: 0, highest_attempt: 0 };
        for session in state.sessions.values() {
            if session.exam_id == exam_id && session.student_id == student_id {
                stats.count += 1;
                stats.highest_attempt = stats.highest_attempt.max(session.attempt_number);
            }
        }
        Ok(stats)
    }

    async fn insert_session(&self, session: &ExamSession) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().expect("store lock");
        if state.sessions.contains_key(&session.id) {
            return Ok(false);
        }
        let duplicate_active = session.status == SessionStatus::Active
            && state.sessions.values().any(|existing| {
                existing.exam_id == session.exam_id
                    && existing.student_id == session.student_id
                    && existing.status == SessionStatus::Active
            });
        if duplicate_active {
            return Ok(false);
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(true)
    }

    async fn update_session(
        &self,
        session: &ExamSession,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().expect("store lock");
        match state.sessions.get_mut(&session.id) {
            Some(stored) if stored.state_version == expected_version => {
                *stored = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn write_answer_if_newer(
        &self,
        entry: &AnswerEntry,
    ) -> Result<AnswerWrite, StoreError> {
        let mut state = self.inner.lock().expect("store lock");
        let key = (entry.session_id.clone(), entry.question_id.clone());
        match state.answers.get_mut(&key) {
            Some(stored) if stored.client_version >= entry.client_version => {
                Ok(AnswerWrite { accepted: false, current_version: stored.client_version })
            }
            Some(stored) => {
                *stored = entry.clone();
                Ok(AnswerWrite { accepted: true, current_version: entry.client_version })
            }
            None => {
                state.answers.insert(key, entry.clone());
                Ok(AnswerWrite { accepted: true, current_version: entry.client_version })
            }
        }
    }

    async fn list_answers(&self, session_id: &str) -> Result<Vec<AnswerEntry>, StoreError> {
        let state = self.inner.lock().expect("store lock");
        let mut answers: Vec<AnswerEntry> = state
            .answers
            .values()
            .filter(|entry| entry.session_id == session_id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        Ok(answers)
    }

    async fn record_violation_event(&self, event: &ViolationEvent) -> Result<(), StoreError> {
        self.inner.lock().expect("store lock").events.push(event.clone());
        Ok(())
    }

    async fn list_violation_events(
        &self,
        session_id: &str,
    ) -> Result<Vec<ViolationEvent>, StoreError> {
        let state = self.inner.lock().expect("store lock");
        let mut events: Vec<ViolationEvent> = state
            .events
            .iter()
            .filter(|event| event.session_id == session_id)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.occurred_at);
        Ok(events)
    }

    async fn list_active_past_deadline(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSession>, StoreError> {
        let state = self.inner.lock().expect("store lock");
        let mut sessions: Vec<ExamSession> = state
            .sessions
            .values()
            .filter(|session| {
                session.status == SessionStatus::Active
                    && session.deadline.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.deadline);
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }

    async fn list_active_idle_untimed(
        &self,
        cutoff: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSession>, StoreError> {
        let state = self.inner.lock().expect("store lock");
        let mut sessions: Vec<ExamSession> = state
            .sessions
            .values()
            .filter(|session| {
                session.status == SessionStatus::Active
                    && session.deadline.is_none()
                    && session.last_heartbeat_at.unwrap_or(session.started_at) <= cutoff
            })
            .cloned()
            .collect();
        sessions.sort_by_key(|session| session.started_at);
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
