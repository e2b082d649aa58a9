//! Error taxonomy for the broker client layer.
//!
//! Every transport or protocol failure is converted into one of these
//! variants before it reaches the strategy engine. The engine treats
//! anything except `Auth` as "skip this item for this cycle".

use thiserror::Error;

/// Maximum number of body bytes kept in a `Protocol` error.
const MAX_BODY_SNIPPET: usize = 256;

/// Classified failure from the broker client.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Credential-fatal: bad keys, or two consecutive refresh failures.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Retries exhausted on 5xx or network faults. Treated as "no data".
    #[error("transient failure on {endpoint} after {attempts} attempts: {message}")]
    Transient {
        endpoint: String,
        attempts: u32,
        message: String,
    },

    /// Unexpected non-auth status. Deterministic client-side mistake, not retried.
    #[error("unexpected response {status} from {endpoint}: {body}")]
    Protocol {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Broker accepted the request but rejected the operation
    /// (insufficient funds, unknown symbol, ...). Not retried.
    #[error("broker rejected request: [{code}] {message}")]
    Rejected { code: String, message: String },

    /// The response body did not match the expected shape.
    #[error("malformed response from {endpoint}: {message}")]
    Parse { endpoint: String, message: String },
}

impl BrokerError {
    /// Whether this failure invalidates the session credential.
    pub fn is_auth(&self) -> bool {
        matches!(self, BrokerError::Auth(_))
    }

    pub(crate) fn protocol(endpoint: &str, status: u16, body: &str) -> Self {
        BrokerError::Protocol {
            endpoint: endpoint.to_string(),
            status,
            body: truncate_body(body),
        }
    }
}

/// Truncate a response body for inclusion in an error message.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_BODY_SNIPPET {
        body.to_string()
    } else {
        let mut end = MAX_BODY_SNIPPET;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_classification() {
        let err = BrokerError::Auth("bad keys".into());
        assert!(err.is_auth());

        let err = BrokerError::Rejected {
            code: "40310000".into(),
            message: "insufficient funds".into(),
        };
        assert!(!err.is_auth());
    }

    #[test]
    fn test_body_truncation() {
        let long = "x".repeat(1000);
        let snippet = truncate_body(&long);
        assert!(snippet.len() <= MAX_BODY_SNIPPET + 3);
        assert!(snippet.ends_with("..."));

        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // Multi-byte characters around the cut point must not panic.
        let body = "가".repeat(200);
        let snippet = truncate_body(&body);
        assert!(snippet.ends_with("..."));
    }
}
