//! Retry/backoff policy wrapping [`crate::runtime::execute`].
//!
//! Exponential backoff with a cap, early-abandon when the computed delay
//! would exceed a threshold rather than sleeping through it, and a small
//! allow-list of transport/status conditions worth retrying at all.

use std::time::Duration;

use thiserror::Error;

use crate::request::HttpRequest;
use crate::runtime::{HttpResponse, execute};

const RETRYABLE_STATUSES: [u16; 6] = [429, 500, 502, 503, 504, 408];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub timeout_cap: Duration,
    pub max_retries: u32,
    pub early_abandon_threshold: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            timeout_cap: Duration::from_secs(10),
            max_retries: 3,
            early_abandon_threshold: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `delay = base * 2^attempt`, capped at `self.cap`. `attempt` is 0 for
    /// the first retry (i.e. the delay before the second overall try).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.cap)
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("request failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("abandoned before retry {attempt}: next backoff {delay:?} exceeds threshold {threshold:?}")]
    EarlyAbandoned {
        attempt: u32,
        delay: Duration,
        threshold: Duration,
    },
}

impl RetryError {
    pub fn kind(&self) -> speakcore_core::types::ErrorKind {
        use speakcore_core::types::ErrorKind;
        match self {
            RetryError::Exhausted { .. } => ErrorKind::CloudTransient,
            RetryError::EarlyAbandoned { .. } => ErrorKind::Timeout,
        }
    }
}

/// Outcome of [`execute_with_retry`], including how many attempts it took.
#[derive(Debug, Clone)]
pub struct RetryObservation {
    pub attempts: u32,
}

fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// True for the connection/timeout failure modes a retry can plausibly fix.
/// `execute`'s errors are `anyhow`-wrapped reqwest errors; we match on the
/// message rather than downcasting, since `execute` intentionally doesn't
/// leak a `reqwest::Error` through its signature.
fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("timed out")
        || msg.contains("timeout")
        || msg.contains("connect")
        || msg.contains("connection")
}

/// Executes `req` via [`crate::runtime::execute`], retrying on the status
/// codes and transport errors this module considers transient, up to
/// `policy.max_retries` additional attempts.
///
/// Before sleeping for a retry, the *next* computed delay is compared
/// against `policy.early_abandon_threshold`; if it would exceed the
/// threshold, the call gives up immediately with
/// [`RetryError::EarlyAbandoned`] instead of sleeping (the computed delay is
/// already capped at `policy.cap` by this point, and the default threshold
/// is strictly below the default cap, so this produces the same behavior as
/// checking the pre-cap delay would for the defaults).
pub async fn execute_with_retry(
    req: &HttpRequest,
    policy: &RetryPolicy,
) -> Result<(HttpResponse, RetryObservation), RetryError> {
    let mut attempt = 0u32;
    loop {
        let outcome = execute(req).await;
        match outcome {
            Ok(response) if !is_retryable_status(response.status) => {
                return Ok((response, RetryObservation { attempts: attempt + 1 }));
            }
            Ok(response) => {
                if attempt >= policy.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        source: anyhow::anyhow!("retryable status {} exhausted retries", response.status),
                    });
                }
            }
            Err(err) if is_retryable_transport_error(&err) => {
                if attempt >= policy.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        source: err,
                    });
                }
            }
            Err(err) => {
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    source: err,
                });
            }
        }

        let delay = policy.delay_for_attempt(attempt);
        if delay > policy.early_abandon_threshold {
            return Err(RetryError::EarlyAbandoned {
                attempt: attempt + 1,
                delay,
                threshold: policy.early_abandon_threshold,
            });
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), policy.cap);
    }

    #[test]
    fn retryable_statuses_cover_known_transient_codes() {
        for status in [429, 500, 502, 503, 504, 408] {
            assert!(is_retryable_status(status));
        }
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(200));
    }

    #[test]
    fn early_abandon_threshold_below_cap_by_default() {
        let policy = RetryPolicy::default();
        assert!(policy.early_abandon_threshold < policy.cap);
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_ok_status() {
        let req = HttpRequest {
            method: "GET".into(),
            url: "http://127.0.0.1:9/unreachable".into(),
            headers: vec![],
            body: crate::request::Body::Empty,
        };
        // Connection refused is retryable; with max_retries=0 it should exhaust
        // immediately rather than loop.
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let result = execute_with_retry(&req, &policy).await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    }

    #[test]
    fn errors_classify_into_expected_kinds() {
        use speakcore_core::types::ErrorKind;
        let exhausted = RetryError::Exhausted {
            attempts: 3,
            source: anyhow::anyhow!("boom"),
        };
        assert_eq!(exhausted.kind(), ErrorKind::CloudTransient);

        let abandoned = RetryError::EarlyAbandoned {
            attempt: 5,
            delay: Duration::from_secs(32),
            threshold: Duration::from_secs(30),
        };
        assert_eq!(abandoned.kind(), ErrorKind::Timeout);
    }
}
