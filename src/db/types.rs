use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "sessionstatus", rename_all = "snake_case")]
pub(crate) enum SessionStatus {
    Active,
    Submitted,
    Expired,
    TerminatedViolations,
    Abandoned,
}

impl SessionStatus {
    pub(crate) fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "terminationreason", rename_all = "snake_case")]
pub(crate) enum TerminationReason {
    StudentSubmitted,
    TimeExpired,
    MaxViolationsExceeded,
    Abandoned,
}

impl TerminationReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TerminationReason::StudentSubmitted => "student_submitted",
            TerminationReason::TimeExpired => "time_expired",
            TerminationReason::MaxViolationsExceeded => "max_violations_exceeded",
            TerminationReason::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "violationtype", rename_all = "snake_case")]
pub(crate) enum ViolationType {
    TabSwitch,
    FullscreenExit,
    CopyPaste,
    Other,
}

impl ViolationType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ViolationType::TabSwitch => "tab_switch",
            ViolationType::FullscreenExit => "fullscreen_exit",
            ViolationType::CopyPaste => "copy_paste",
            ViolationType::Other => "other",
        }
    }
}
