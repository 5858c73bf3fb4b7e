//! Error taxonomy for calls against the inference backend.
//!
//! Every failure is either **transient** (worth retrying: quota/rate-limit, 5xx,
//! transport) or **fatal** (validation, malformed request, unparseable response).
//! The governor retries only the former.

use thiserror::Error;

/// Result type alias for inference operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Markers that identify a quota / rate-limit failure in a status line or error body.
pub const QUOTA_MARKERS: &[&str] = &["429", "RESOURCE_EXHAUSTED"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Retryable failure. `quota` is set when the failure carried the quota signature.
    #[error("transient service error (quota: {quota}): {message}")]
    Transient { message: String, quota: bool },

    /// Non-retryable failure; surfaced to the caller immediately.
    #[error("fatal service error: {0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        let message = message.into();
        let quota = has_quota_marker(&message);
        ServiceError::Transient { message, quota }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        ServiceError::Transient {
            message: message.into(),
            quota: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ServiceError::Fatal(message.into())
    }

    /// Classify an HTTP failure. 429 and anything carrying a quota marker is a quota
    /// signal; 5xx is transient; every other status is fatal.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());
        if status == 429 || has_quota_marker(body) {
            ServiceError::quota(message)
        } else if (500..600).contains(&status) {
            ServiceError::Transient {
                message,
                quota: false,
            }
        } else {
            ServiceError::Fatal(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient { .. })
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, ServiceError::Transient { quota: true, .. })
    }
}

fn has_quota_marker(text: &str) -> bool {
    QUOTA_MARKERS.iter().any(|m| text.contains(m))
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ServiceError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_decode() || err.is_builder() {
            ServiceError::Fatal(err.to_string())
        } else {
            // connect, timeout, body/transport failures
            ServiceError::Transient {
                message: err.to_string(),
                quota: false,
            }
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Fatal(format!("response did not match schema: {}", err))
    }
}

impl From<config::ConfigError> for ServiceError {
    fn from(err: config::ConfigError) -> Self {
        ServiceError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ServiceError::from_status(429, "slow down").is_quota());
        assert!(ServiceError::from_status(400, "{\"status\":\"RESOURCE_EXHAUSTED\"}").is_quota());

        let unavailable = ServiceError::from_status(503, "unavailable");
        assert!(unavailable.is_transient());
        assert!(!unavailable.is_quota());

        let invalid = ServiceError::from_status(400, "INVALID_ARGUMENT");
        assert!(!invalid.is_transient());
    }

    #[test]
    fn test_transient_detects_quota_marker() {
        assert!(ServiceError::transient("RESOURCE_EXHAUSTED: per-minute").is_quota());
        assert!(!ServiceError::transient("connection reset").is_quota());
    }

    #[test]
    fn test_display_marks_quota() {
        let msg = ServiceError::quota("429").to_string();
        assert!(msg.contains("quota: true"));
    }
}
