//! # Error Handling
//!
//! Error taxonomy for the promo-code sync engine. Every variant is caught at the
//! run boundary and downgraded to a ledger state change plus a log line; none of
//! them is allowed to take the host process down.

use thiserror::Error;
use uuid::Uuid;

/// Reason recorded on a job that lost the single-flight race.
pub const GATE_REJECTED_REASON: &str = "another sync already running";

/// Reason recorded on a job reclaimed by the lease.
pub const LEASE_EXPIRED_REASON: &str = "abandoned: lease expired";

/// Errors produced while fetching, walking, writing or recording a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run holds the gate. Expected contention, not a system failure.
    #[error("{}", GATE_REJECTED_REASON)]
    GateRejected { job_id: Uuid },

    /// The remote kept answering 429 after the retry budget was spent.
    #[error("rate limit exceeded after {attempts} attempts: {url}")]
    RateLimitExceeded { url: String, attempts: u32 },

    /// Non-2xx, non-429 response, or a body that does not decode.
    #[error("upstream error {status} from {url}: {message}")]
    Upstream {
        url: String,
        status: u16,
        message: String,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),

    #[error("sync job {0} not found")]
    JobNotFound(Uuid),

    /// A ledger transition was requested from a state that does not allow it.
    #[error("sync job {job_id} cannot transition from {status}")]
    InvalidTransition { job_id: Uuid, status: String },

    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl SyncError {
    /// Stable snake_case code used as a log field and metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::GateRejected { .. } => "gate_rejected",
            SyncError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            SyncError::Upstream { .. } => "upstream_error",
            SyncError::Network(_) => "network_error",
            SyncError::Storage(_) => "storage_error",
            SyncError::JobNotFound(_) => "job_not_found",
            SyncError::InvalidTransition { .. } => "invalid_transition",
            SyncError::InvalidUrl(_) => "invalid_url",
        }
    }

    /// Whether this is the expected single-flight contention outcome.
    pub fn is_gate_rejection(&self) -> bool {
        matches!(self, SyncError::GateRejected { .. })
    }

    pub(crate) fn upstream<S: Into<String>>(url: &str, status: u16, message: S) -> Self {
        SyncError::Upstream {
            url: url.to_string(),
            status,
            message: message.into(),
        }
    }
}

/// Truncate an upstream body on a char boundary so error messages stay bounded.
pub(crate) fn truncate_body(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }
    let mut end = max_bytes;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_rejection_message_is_the_ledger_reason() {
        let err = SyncError::GateRejected {
            job_id: Uuid::new_v4(),
        };
        assert_eq!(err.to_string(), GATE_REJECTED_REASON);
        assert!(err.is_gate_rejection());
        assert_eq!(err.kind(), "gate_rejected");
    }

    #[test]
    fn upstream_error_carries_status_and_url() {
        let err = SyncError::upstream("https://shop.test/price_rules.json", 502, "bad gateway");
        assert_eq!(err.kind(), "upstream_error");
        let message = err.to_string();
        assert!(message.contains("502"));
        assert!(message.contains("price_rules.json"));
        assert!(!err.is_gate_rejection());
    }

    #[test]
    fn rate_limit_error_reports_attempts() {
        let err = SyncError::RateLimitExceeded {
            url: "https://shop.test/x".to_string(),
            attempts: 6,
        };
        assert_eq!(
            err.to_string(),
            "rate limit exceeded after 6 attempts: https://shop.test/x"
        );
    }

    #[test]
    fn utf8_safe_truncation() {
        let body = "ééééé";
        let truncated = truncate_body(body, 3);
        assert_eq!(truncated, "é...");
        assert_eq!(truncate_body("short", 64), "short");
    }
}
