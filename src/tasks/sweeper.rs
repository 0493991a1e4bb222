use time::Duration;

use crate::core::state::AppState;
use crate::core::time::to_primitive_utc;
use crate::db::types::SessionStatus;
use crate::services::ProctorError;

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub(crate) expired: usize,
    pub(crate) abandoned: usize,
}

/// Closes sessions whose students never came back. Expiry itself is lazy and
/// already happens on the next request; this pass only catches sessions that
/// stop receiving requests entirely, so dashboards and attempt counts do not
/// show them as running forever.
pub(crate) async fn sweep_once(state: &AppState) -> Result<SweepReport, ProctorError> {
    let proctor = state.settings().proctor();
    let batch = proctor.sweep_batch_size as i64;
    let now = to_primitive_utc(state.clock().now_utc());

    let mut report = SweepReport::default();

    for session in state.store().list_active_past_deadline(now, batch).await? {
        let session_id = session.id.clone();
        match state.coordinator().expire_if_overdue(session).await {
            Ok(session) if session.status == SessionStatus::Expired => report.expired += 1,
            Ok(_) => {}
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "Sweep expiry failed")
            }
        }
    }

    let cutoff = now - Duration::minutes(proctor.abandoned_after_minutes as i64);
    for session in state.store().list_active_idle_untimed(cutoff, batch).await? {
        let session_id = session.id.clone();
        match state.coordinator().mark_abandoned(session).await {
            Ok(true) => report.abandoned += 1,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "Sweep abandon failed")
            }
        }
    }

    if report.expired > 0 || report.abandoned > 0 {
        tracing::info!(
            expired = report.expired,
            abandoned = report.abandoned,
            "Sweep closed stale sessions"
        );
    }

    Ok(report)
}
