pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod store;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::{clock::SystemClock, config::Settings, state::AppState, telemetry};
use crate::store::postgres::{PgExamDirectory, PgSessionStore};

pub async fn run() -> anyhow::Result<()> {
    let state = bootstrap().await?;
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Proctor Rust API listening"
    );

    axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await?;

    Ok(())
}

pub async fn run_sweeper() -> anyhow::Result<()> {
    let state = bootstrap().await?;

    tracing::info!(
        interval_seconds = state.settings().proctor().sweep_interval_seconds,
        "Proctor sweeper running"
    );

    tasks::scheduler::run(state).await
}

async fn bootstrap() -> anyhow::Result<AppState> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let store = Arc::new(PgSessionStore::new(db_pool.clone()));
    let exams = Arc::new(PgExamDirectory::new(db_pool));

    Ok(AppState::new(settings, store, exams, Arc::new(SystemClock)))
}
