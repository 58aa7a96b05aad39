//! Request trigger codes and outcome labels.
//!
//! The `request` field on a managed server doubles as a trigger (a caller asks
//! for an upgrade or an initial provision) and as the single-flight sentinel
//! while that operation runs. Completion is learned later through an outcome
//! label written to `request_status`.

use serde::{Deserialize, Serialize};

/// Integer-coded request trigger stored on every managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum RequestCode {
    /// An operation has been dispatched and has not reported completion.
    InFlight,
    /// Nothing requested
    #[default]
    Idle,
    /// Rebuild/upgrade the running instance.
    Upgrade,
    /// Create the host from scratch.
    Provision,
}

impl RequestCode {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::InFlight => -1,
            Self::Idle => 0,
            Self::Upgrade => 1,
            Self::Provision => 2,
        }
    }

    /// Parse a stored or submitted code. Anything outside {-1, 0, 1, 2} is `None`.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Self::InFlight),
            0 => Some(Self::Idle),
            1 => Some(Self::Upgrade),
            2 => Some(Self::Provision),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight)
    }

    /// Whether this code starts an external operation when submitted.
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Upgrade | Self::Provision)
    }
}

impl From<RequestCode> for i64 {
    fn from(code: RequestCode) -> Self {
        code.as_i64()
    }
}

impl TryFrom<i64> for RequestCode {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_i64(value).ok_or_else(|| format!("invalid request code {}", value))
    }
}

impl std::fmt::Display for RequestCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Terminal (or running) result derived from the outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestResult {
    Ok,
    Running,
    Failed,
}

impl RequestResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "running" => Some(Self::Running),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Outcome labels understood by the reconciliation step.
pub mod labels {
    /// Set when a trigger is accepted.
    pub const PROCESSING: &str = "Processing";
    pub const PROCESSING_REBUILD: &str = "Processing rebuild";
    pub const SUCCESS: &str = "Success";
    pub const FAILED: &str = "Failed";
}

/// What a recognised outcome label does to the request machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelOutcome {
    pub result: RequestResult,
    /// Reset `request` to idle (clears the in-flight sentinel).
    pub clears_request: bool,
    /// Refresh the cached remote status document.
    pub refreshes_status: bool,
}

/// Map an outcome label to its effect. Matching is exact and case-sensitive;
/// unrecognised labels return `None` and leave `request_result` untouched.
pub fn outcome_for_label(label: &str) -> Option<LabelOutcome> {
    match label {
        labels::SUCCESS => Some(LabelOutcome {
            result: RequestResult::Ok,
            clears_request: true,
            refreshes_status: true,
        }),
        labels::PROCESSING_REBUILD => Some(LabelOutcome {
            result: RequestResult::Running,
            clears_request: false,
            refreshes_status: false,
        }),
        labels::FAILED => Some(LabelOutcome {
            result: RequestResult::Failed,
            clears_request: true,
            refreshes_status: false,
        }),
        _ => None,
    }
}
