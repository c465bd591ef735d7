//! Generic HTTP retry wrapper, shared by the pack client and the provider
//! clients.
//!
//! Retries network errors and 429/503/509 responses, capped exponential
//! back-off (base 1s, max 30s), up to 10 attempts. Only retried when the
//! request carries no body, since a body cannot be safely re-sent without
//! knowing the server never observed it.

use std::thread;
use std::time::Duration;

use reqwest::blocking::{Request, Response};
use reqwest::StatusCode;

use crate::error::{Error, Result};

const MAX_ATTEMPTS: u32 = 10;
const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        429 | 503 | 509
    )
}

fn backoff_delay(attempt: u32) -> Duration {
    let scaled = BASE_DELAY.saturating_mul(1 << attempt.min(8));
    scaled.min(MAX_DELAY)
}

/// execute `client.execute(request)`, retrying per the policy above.
/// `request` is only retried when it has no body (`request.body().is_none()`).
pub fn execute_with_retry(
    client: &reqwest::blocking::Client,
    request: Request,
) -> Result<Response> {
    let retryable_request = request.body().is_none();
    let mut attempt = 0u32;
    let mut last_error: Option<Error> = None;

    loop {
        let attempt_request = request
            .try_clone()
            .ok_or_else(|| Error::Transport("request body cannot be cloned for retry".into()))?;

        match client.execute(attempt_request) {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || !is_retryable_status(status) {
                    return Ok(response);
                }
                if !retryable_request || attempt + 1 >= MAX_ATTEMPTS {
                    return Err(Error::Transport(format!(
                        "request failed with status {status} after {} attempts",
                        attempt + 1
                    )));
                }
                last_error = Some(Error::Transport(format!("retryable status {status}")));
            }
            Err(e) => {
                if !retryable_request || attempt + 1 >= MAX_ATTEMPTS {
                    return Err(Error::Transport(e.to_string()));
                }
                last_error = Some(Error::Transport(e.to_string()));
            }
        }

        tracing::debug!(attempt, "retrying http request after backoff");
        thread::sleep(backoff_delay(attempt));
        attempt += 1;
        let _ = &last_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_capped_at_max_delay() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(10), MAX_DELAY);
    }

    #[test]
    fn retryable_statuses_cover_429_503_and_509() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::from_u16(509).unwrap()));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::OK));
    }
}
