//! Maps wire-level failures onto [`ErrorKind`].

use errors::{ErrorKind, ProviderError};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Provider error codes that mean the content itself was refused.
const POLICY_CODES: &[&str] = &["content_filter", "content_policy_violation"];

/// Classifies a non-success HTTP response.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> ProviderError {
    let detail = error_detail(body);
    let message = format!("HTTP {}: {}", status.as_u16(), detail.message);

    let kind = match status.as_u16() {
        429 => ErrorKind::QuotaExceeded,
        401 | 403 => ErrorKind::Unauthorized,
        408 | 504 => ErrorKind::Timeout,
        400..=499 if detail.is_policy() => ErrorKind::ContentPolicyBlocked,
        400..=499 => ErrorKind::InvalidRequest,
        _ => ErrorKind::ServiceUnavailable
    };

    let error = ProviderError::new(kind, message);
    match retry_after(headers) {
        Some(delay) if kind == ErrorKind::QuotaExceeded => error.with_retry_after(delay),
        _ => error
    }
}

/// Classifies a transport-level failure.
pub fn classify_transport(err: &reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_decode() {
        ErrorKind::MalformedResponse
    } else if err.is_builder() {
        ErrorKind::InvalidRequest
    } else {
        ErrorKind::NetworkFailure
    };
    ProviderError::new(kind, err.to_string())
}

/// `Retry-After` in whole seconds. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

struct ErrorDetail {
    message: String,
    code: Option<String>
}

impl ErrorDetail {
    fn is_policy(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| POLICY_CODES.contains(&code))
    }
}

/// Pulls `error.message` and `error.code` out of an OpenAI-style error body,
/// falling back to the raw body.
fn error_detail(body: &str) -> ErrorDetail {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().chars().take(300).collect());
    let code = error
        .and_then(|e| e.get("code").or_else(|| e.get("type")))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    ErrorDetail { message, code }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn kind_of(status: u16, body: &str) -> ErrorKind {
        classify_status(
            StatusCode::from_u16(status).unwrap(),
            &HeaderMap::new(),
            body
        )
        .kind
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(kind_of(429, ""), ErrorKind::QuotaExceeded);
        assert_eq!(kind_of(500, ""), ErrorKind::ServiceUnavailable);
        assert_eq!(kind_of(502, ""), ErrorKind::ServiceUnavailable);
        assert_eq!(kind_of(503, ""), ErrorKind::ServiceUnavailable);
        assert_eq!(kind_of(504, ""), ErrorKind::Timeout);
        assert_eq!(kind_of(401, ""), ErrorKind::Unauthorized);
        assert_eq!(kind_of(403, ""), ErrorKind::Unauthorized);
        assert_eq!(kind_of(400, "bad"), ErrorKind::InvalidRequest);
        assert_eq!(kind_of(404, ""), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_policy_code_in_body() {
        let body = r#"{"error":{"message":"refused","code":"content_policy_violation"}}"#;
        assert_eq!(kind_of(400, body), ErrorKind::ContentPolicyBlocked);
    }

    #[test]
    fn test_message_from_error_body() {
        let body = r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#;
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), body);
        assert_eq!(err.message, "HTTP 429: Rate limit reached");
    }

    #[test]
    fn test_retry_after_only_for_quota() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));

        let quota = classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert_eq!(quota.retry_after, Some(Duration::from_secs(12)));

        let unavailable = classify_status(StatusCode::SERVICE_UNAVAILABLE, &headers, "");
        assert_eq!(unavailable.retry_after, None);
    }
}
