use std::sync::Arc;

use crate::core::{clock::Clock, config::Settings};
use crate::services::lifecycle::SessionCoordinator;
use crate::store::{ExamDirectory, SessionStore};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    coordinator: SessionCoordinator,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn SessionStore>,
        exams: Arc<dyn ExamDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = SessionCoordinator::new(
            store.clone(),
            exams,
            clock.clone(),
            settings.proctor().cas_retry_limit,
        );

        Self { inner: Arc::new(InnerState { settings, store, clock, coordinator }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn coordinator(&self) -> &SessionCoordinator {
        &self.inner.coordinator
    }
}
