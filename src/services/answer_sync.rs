use sqlx::types::Json;
use time::PrimitiveDateTime;

use crate::db::models::AnswerEntry;
use crate::services::ProctorError;
use crate::store::{AnswerWrite, SessionStore};

/// Last-writer-wins merge for one question: the write lands only when its
/// `client_version` is strictly greater than what is stored, so at-least-once
/// delivery with duplicates and reordering is safe to replay. Stale writes
/// are not errors; the caller gets back `accepted = false` plus the version
/// that currently holds.
pub(crate) async fn store_answer(
    store: &dyn SessionStore,
    session_id: &str,
    question_id: &str,
    payload: serde_json::Value,
    client_version: i64,
    now: PrimitiveDateTime,
) -> Result<AnswerWrite, ProctorError> {
    let entry = AnswerEntry {
        session_id: session_id.to_string(),
        question_id: question_id.to_string(),
        payload: Json(payload),
        client_version,
        stored_at: now,
    };

    let write = store.write_answer_if_newer(&entry).await?;

    let outcome = if write.accepted { "accepted" } else { "stale" };
    metrics::counter!("proctor_answer_writes_total", "outcome" => outcome).increment(1);
    if !write.accepted {
        tracing::debug!(
            session_id,
            question_id,
            client_version,
            current_version = write.current_version,
            "Ignored stale answer write"
        );
    }

    Ok(write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemorySessionStore;
    use time::macros::datetime;

    const NOW: PrimitiveDateTime = datetime!(2025-06-01 10:00);

    #[tokio::test]
    async fn replay_of_same_version_is_ignored() {
        let store = MemorySessionStore::default();

        let first = store_answer(&store, "s1", "q1", serde_json::json!("A"), 1, NOW)
            .await
            .expect("first write");
        assert!(first.accepted);
        assert_eq!(first.current_version, 1);

        let replay = store_answer(&store, "s1", "q1", serde_json::json!("A"), 1, NOW)
            .await
            .expect("replay");
        assert!(!replay.accepted);
        assert_eq!(replay.current_version, 1);

        let answers = store.list_answers("s1").await.expect("answers");
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].payload.0, serde_json::json!("A"));
    }

    #[tokio::test]
    async fn late_stale_write_leaves_newer_payload() {
        let store = MemorySessionStore::default();

        store_answer(&store, "s1", "q1", serde_json::json!("A"), 1, NOW).await.expect("v1");
        store_answer(&store, "s1", "q1", serde_json::json!("B"), 2, NOW).await.expect("v2");

        let late = store_answer(&store, "s1", "q1", serde_json::json!("A"), 1, NOW)
            .await
            .expect("late v1");
        assert!(!late.accepted);
        assert_eq!(late.current_version, 2);

        let answers = store.list_answers("s1").await.expect("answers");
        assert_eq!(answers[0].payload.0, serde_json::json!("B"));
        assert_eq!(answers[0].client_version, 2);
    }

    #[tokio::test]
    async fn questions_are_versioned_independently() {
        let store = MemorySessionStore::default();

        store_answer(&store, "s1", "q1", serde_json::json!("A"), 5, NOW).await.expect("q1");
        let other = store_answer(&store, "s1", "q2", serde_json::json!("B"), 1, NOW)
            .await
            .expect("q2");
        assert!(other.accepted);

        let answers = store.list_answers("s1").await.expect("answers");
        assert_eq!(answers.len(), 2);
    }
}
