use std::sync::Arc;

use thiserror::Error;

/// Maximum length for identity backend error bodies kept in errors
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failures of sign-in and refresh exchanges.
///
/// `Clone` so that one failed exchange can be delivered to every request
/// that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Identity backend rejected the request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Identity backend unreachable: {0}")]
    Network(Arc<reqwest::Error>),

    #[error("Invalid identity backend response: {0}")]
    InvalidResponse(String),

    #[error("Token refresh ended without a result")]
    Abandoned,
}

impl AuthError {
    pub fn rejected(status: reqwest::StatusCode, body: &str) -> Self {
        AuthError::Rejected {
            status: status.as_u16(),
            body: truncate_body(body, MAX_ERROR_BODY_LENGTH),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(Arc::new(err))
    }
}

/// Truncate a response body to avoid carrying excessive data in errors
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(truncate_body("invalid_grant", 500), "invalid_grant");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(600);
        let truncated = truncate_body(&body, 500);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        // 'é' is two bytes; cutting at 3 would split it
        let truncated = truncate_body("aaé", 3);
        assert!(truncated.starts_with("aa..."));
    }

    #[test]
    fn test_rejected_keeps_status() {
        let err = AuthError::rejected(reqwest::StatusCode::BAD_REQUEST, "invalid_grant");
        assert!(matches!(err, AuthError::Rejected { status: 400, .. }));
        assert_eq!(
            err.to_string(),
            "Identity backend rejected the request (status 400): invalid_grant"
        );
    }
}
