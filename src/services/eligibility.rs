use time::OffsetDateTime;

use crate::services::{ProctorError, StudentIdentity};
use crate::store::ExamConfig;

/// Pure start-request validation: availability window, then email allowlist,
/// then attempt limit. Returns the first failing precondition. Evaluated
/// against freshly fetched configuration on every start call, never cached.
pub(crate) fn check_start(
    config: &ExamConfig,
    identity: &StudentIdentity,
    prior_attempts: i64,
    now: OffsetDateTime,
) -> Result<(), ProctorError> {
    if let Some(start) = config.start_time {
        if now < start.assume_utc() {
            return Err(ProctorError::WindowNotOpen);
        }
    }
    if let Some(end) = config.end_time {
        if now >= end.assume_utc() {
            return Err(ProctorError::WindowClosed);
        }
    }

    if config.restrict_by_email {
        let Some(email) = identity.email.as_deref() else {
            return Err(ProctorError::EmailNotAllowed);
        };
        let email = email.trim().to_ascii_lowercase();
        let allowed = config
            .allowed_emails
            .iter()
            .any(|candidate| candidate.trim().to_ascii_lowercase() == email);
        if !allowed {
            return Err(ProctorError::EmailNotAllowed);
        }
    }

    // attempt_limit <= 0 means the tutor did not cap attempts.
    if config.attempt_limit > 0 && prior_attempts >= i64::from(config.attempt_limit) {
        return Err(ProctorError::AttemptLimitReached);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn config() -> ExamConfig {
        ExamConfig {
            id: "exam-1".to_string(),
            time_limit_minutes: Some(30),
            max_violations: Some(3),
            attempt_limit: 2,
            start_time: Some(datetime!(2025-06-01 09:00)),
            end_time: Some(datetime!(2025-06-01 18:00)),
            restrict_by_email: false,
            allowed_emails: vec![],
            show_results_immediately: true,
        }
    }

    fn identity(email: Option<&str>) -> StudentIdentity {
        StudentIdentity {
            id: "student-1".to_string(),
            email: email.map(|value| value.to_string()),
        }
    }

    #[test]
    fn passes_inside_window() {
        let now = datetime!(2025-06-01 10:00).assume_utc();
        assert!(check_start(&config(), &identity(None), 0, now).is_ok());
    }

    #[test]
    fn rejects_before_window_opens() {
        let now = datetime!(2025-06-01 08:59).assume_utc();
        let err = check_start(&config(), &identity(None), 0, now).unwrap_err();
        assert!(matches!(err, ProctorError::WindowNotOpen));
    }

    #[test]
    fn rejects_after_window_closes() {
        let now = datetime!(2025-06-01 18:00).assume_utc();
        let err = check_start(&config(), &identity(None), 0, now).unwrap_err();
        assert!(matches!(err, ProctorError::WindowClosed));
    }

    #[test]
    fn allowlist_is_case_insensitive() {
        let mut config = config();
        config.restrict_by_email = true;
        config.allowed_emails = vec!["X@Y.com".to_string()];
        let now = datetime!(2025-06-01 10:00).assume_utc();

        assert!(check_start(&config, &identity(Some("x@y.COM")), 0, now).is_ok());

        let err = check_start(&config, &identity(Some("z@y.com")), 0, now).unwrap_err();
        assert!(matches!(err, ProctorError::EmailNotAllowed));
    }

    #[test]
    fn allowlist_rejects_missing_email() {
        let mut config = config();
        config.restrict_by_email = true;
        config.allowed_emails = vec!["x@y.com".to_string()];
        let now = datetime!(2025-06-01 10:00).assume_utc();

        let err = check_start(&config, &identity(None), 0, now).unwrap_err();
        assert!(matches!(err, ProctorError::EmailNotAllowed));
    }

    #[test]
    fn rejects_when_attempts_exhausted() {
        let now = datetime!(2025-06-01 10:00).assume_utc();
        let err = check_start(&config(), &identity(None), 2, now).unwrap_err();
        assert!(matches!(err, ProctorError::AttemptLimitReached));
    }

    #[test]
    fn zero_attempt_limit_means_uncapped() {
        let mut config = config();
        config.attempt_limit = 0;
        let now = datetime!(2025-06-01 10:00).assume_utc();
        assert!(check_start(&config, &identity(None), 99, now).is_ok());
    }

    #[test]
    fn window_failure_reported_before_allowlist() {
        let mut config = config();
        config.restrict_by_email = true;
        config.allowed_emails = vec![];
        let now = datetime!(2025-06-01 08:00).assume_utc();

        let err = check_start(&config, &identity(None), 0, now).unwrap_err();
        assert!(matches!(err, ProctorError::WindowNotOpen));
    }
}
