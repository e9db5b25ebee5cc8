use std::fmt;

use parasol_contracts::outcome::RenderFailure;

pub const QUOTA_MESSAGE: &str =
    "Quota limit reached. An API key from a paid project is required.";
pub const MISCONFIGURED_MESSAGE: &str = "The API configuration is incorrect.";
pub const GENERIC_FALLBACK_MESSAGE: &str = "Unexpected rendering engine failure.";

/// A raw transport-level failure. `status` carries the HTTP status when the
/// provider answered at all; connect and send failures leave it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportFailure {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "({status}) {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransportFailure {}

/// Map a raw failure to a user-facing outcome. The structured HTTP status is
/// consulted first; the ordered, case-sensitive substring table remains the
/// fallback for providers that only surface message text.
pub fn classify_failure(failure: &TransportFailure) -> RenderFailure {
    match failure.status {
        Some(429) => {
            return RenderFailure::QuotaExceeded {
                message: QUOTA_MESSAGE.to_string(),
            }
        }
        Some(401) | Some(403) | Some(404) => {
            return RenderFailure::Misconfigured {
                message: MISCONFIGURED_MESSAGE.to_string(),
            }
        }
        _ => {}
    }

    let message = failure.message.as_str();
    if ["429", "RESOURCE_EXHAUSTED", "quota"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        return RenderFailure::QuotaExceeded {
            message: QUOTA_MESSAGE.to_string(),
        };
    }
    if message.contains("Requested entity was not found") {
        return RenderFailure::Misconfigured {
            message: MISCONFIGURED_MESSAGE.to_string(),
        };
    }

    let trimmed = message.trim();
    RenderFailure::Generic {
        message: if trimmed.is_empty() {
            GENERIC_FALLBACK_MESSAGE.to_string()
        } else {
            message.to_string()
        },
    }
}
