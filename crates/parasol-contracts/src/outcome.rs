use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one user-initiated generate action. A single request is in
/// flight at a time; re-submission is refused while `Generating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingState {
    Idle,
    Generating,
    Success,
    Error,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "IDLE",
            Self::Generating => "GENERATING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// A provider failure classified into the small set of outcomes the studio
/// reacts to. The message is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderFailure {
    QuotaExceeded { message: String },
    Misconfigured { message: String },
    Generic { message: String },
}

impl RenderFailure {
    pub fn message(&self) -> &str {
        match self {
            Self::QuotaExceeded { message }
            | Self::Misconfigured { message }
            | Self::Generic { message } => message,
        }
    }

    /// Quota and misconfiguration outcomes nudge the user through the
    /// credential-reselection flow; generic failures do not.
    pub fn needs_credential_reselection(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. } | Self::Misconfigured { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Misconfigured { .. } => "misconfigured",
            Self::Generic { .. } => "generic",
        }
    }
}

impl fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for RenderFailure {}
