//! Retry policy shared by the blocking HTTP clients.

use std::time::Duration;

use reqwest::blocking::Response;
use reqwest::StatusCode;

/// Rate limits and server errors are worth another attempt.
pub(crate) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Transport failures that usually clear up on their own.
pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

/// `base * 2^attempt`, with the exponent capped at 5.
pub(crate) fn retry_backoff(base: Duration, attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    base * (1 << capped)
}

/// Reads an error response body for the failure message.
pub(crate) fn error_body(resp: Response) -> String {
    resp.text()
        .unwrap_or_else(|_| "<body unavailable>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_rate_limits_and_server_errors_only() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!should_retry(StatusCode::NOT_FOUND));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(10);
        assert_eq!(retry_backoff(base, 1), Duration::from_millis(20));
        assert_eq!(retry_backoff(base, 3), Duration::from_millis(80));
        assert_eq!(retry_backoff(base, 5), Duration::from_millis(320));
        assert_eq!(retry_backoff(base, 9), Duration::from_millis(320));
    }
}
