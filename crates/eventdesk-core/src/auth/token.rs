//! Access token inspection.
//!
//! Reads the `exp` claim out of a JWT payload without verifying the
//! signature; the identity backend owns verification. Anything that cannot
//! be decoded is classified as expired.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token is not a three-part JWT")]
    Format,

    #[error("Token payload is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Token payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token payload has no usable exp claim")]
    MissingExpiry,
}

/// Freshness of an access token relative to a proactive refresh window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    ExpiringSoon,
    Expired,
}

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<serde_json::Number>,
}

/// Decode the `exp` claim of a JWT into a UTC timestamp.
pub fn expires_at(token: &str) -> Result<DateTime<Utc>, TokenError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(TokenError::Format),
    };

    // Some issuers keep the base64 padding
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let claims: Claims = serde_json::from_slice(&bytes)?;

    let exp = claims.exp.ok_or(TokenError::MissingExpiry)?;
    let exp_ms = match exp.as_i64() {
        Some(secs) => secs.checked_mul(1000),
        None => exp
            .as_f64()
            .filter(|secs| secs.is_finite())
            .map(|secs| (secs * 1000.0) as i64),
    }
    .ok_or(TokenError::MissingExpiry)?;

    DateTime::from_timestamp_millis(exp_ms).ok_or(TokenError::MissingExpiry)
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match expires_at(token) {
        Ok(exp) => now >= exp,
        Err(_) => true,
    }
}

/// True when the token expires within `window` of now (or already has).
pub fn expires_within(token: &str, window: Duration) -> bool {
    expires_within_at(token, window, Utc::now())
}

pub fn expires_within_at(token: &str, window: Duration, now: DateTime<Utc>) -> bool {
    match expires_at(token) {
        Ok(exp) => exp.checked_sub_signed(window).map_or(true, |at| now >= at),
        Err(_) => true,
    }
}

pub fn classify(token: &str, window: Duration) -> TokenStatus {
    classify_at(token, window, Utc::now())
}

pub fn classify_at(token: &str, window: Duration, now: DateTime<Utc>) -> TokenStatus {
    if is_expired_at(token, now) {
        TokenStatus::Expired
    } else if expires_within_at(token, window, now) {
        TokenStatus::ExpiringSoon
    } else {
        TokenStatus::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }

    #[test]
    fn test_expires_at_reads_exp_seconds() {
        let token = jwt(r#"{"sub":"42","exp":1700000300}"#);
        let exp = expires_at(&token).expect("decodes");
        assert_eq!(exp.timestamp(), 1_700_000_300);
    }

    #[test]
    fn test_expires_at_accepts_fractional_exp() {
        let token = jwt(r#"{"exp":1700000300.5}"#);
        let exp = expires_at(&token).expect("decodes");
        assert_eq!(exp.timestamp_millis(), 1_700_000_300_500);
    }

    #[test]
    fn test_expires_at_tolerates_padding() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1700000300}"#);
        let token = format!("h.{}.s", payload);
        assert!(expires_at(&token).is_ok());
    }

    #[test]
    fn test_is_expired_boundary() {
        let token = jwt(r#"{"exp":1700000000}"#);
        // now == exp counts as expired
        assert!(is_expired_at(&token, now()));
        assert!(!is_expired_at(&token, now() - Duration::milliseconds(1)));
    }

    #[test]
    fn test_expires_within_window() {
        // 3 minutes out, 5 minute window
        let token = jwt(r#"{"exp":1700000180}"#);
        assert!(expires_within_at(&token, Duration::minutes(5), now()));
        assert!(!expires_within_at(&token, Duration::minutes(2), now()));
    }

    #[test]
    fn test_malformed_tokens_fail_closed() {
        let long_ago = now() - Duration::days(365);
        let tokens = vec![
            String::new(),
            "not-a-jwt".to_string(),
            "a.b".to_string(),
            "a.b.c.d".to_string(),
            "a.!!!.c".to_string(),
            "a..c".to_string(),
            jwt("not json"),
            jwt(r#"{"sub":"no exp"}"#),
            jwt(r#"{"exp":"1700000300"}"#),
        ];
        for token in &tokens {
            assert!(is_expired_at(token, long_ago), "{token:?} should be expired");
            assert!(expires_within_at(token, Duration::zero(), long_ago));
            assert_eq!(classify_at(token, Duration::minutes(5), long_ago), TokenStatus::Expired);
        }
    }

    #[test]
    fn test_classify() {
        let window = Duration::minutes(5);
        assert_eq!(classify_at(&jwt(r#"{"exp":1700003600}"#), window, now()), TokenStatus::Valid);
        assert_eq!(classify_at(&jwt(r#"{"exp":1700000120}"#), window, now()), TokenStatus::ExpiringSoon);
        assert_eq!(classify_at(&jwt(r#"{"exp":1699999000}"#), window, now()), TokenStatus::Expired);
    }
}
