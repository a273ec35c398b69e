//! Generic contract for "submit now, poll later" async ASR backends.
//!
//! Some hosted transcription APIs don't return text synchronously: you submit
//! audio and get a task id back, then poll until it resolves. This module
//! only models that shape; no concrete vendor is wired in here; the
//! provider-specific body formats and endpoints are left to whatever adapter
//! implements [`SubmitPollAsrProvider`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::retry::RetryPolicy;

const POLL_WALL_CLOCK_CAP: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Done(String),
    Failed(String),
}

#[async_trait]
pub trait SubmitPollAsrProvider: Send + Sync {
    /// Submits raw PCM (or provider-specific encoded) audio bytes, returning
    /// a task id to poll.
    async fn submit(&self, audio: &[u8]) -> anyhow::Result<String>;

    /// Polls once for the given task id.
    async fn poll(&self, task_id: &str) -> anyhow::Result<PollOutcome>;
}

#[derive(Debug, Error)]
pub enum SubmitPollError {
    #[error("submit failed: {0}")]
    SubmitFailed(#[source] anyhow::Error),
    #[error("provider reported failure: {0}")]
    ProviderFailed(String),
    #[error("polling exceeded the {0:?} wall-clock cap")]
    TimedOut(Duration),
    #[error("poll failed after retries: {0}")]
    PollExhausted(#[source] anyhow::Error),
}

impl SubmitPollError {
    pub fn kind(&self) -> speakcore_core::types::ErrorKind {
        use speakcore_core::types::ErrorKind;
        match self {
            SubmitPollError::SubmitFailed(_) => ErrorKind::Network,
            SubmitPollError::ProviderFailed(_) => ErrorKind::CloudFatal,
            SubmitPollError::TimedOut(_) => ErrorKind::Timeout,
            SubmitPollError::PollExhausted(_) => ErrorKind::CloudTransient,
        }
    }
}

/// Submits `audio` and polls until done, failed, or the wall-clock cap
/// elapses. Transient poll errors (the `Err` variant of `poll`, as opposed to
/// a provider-reported `PollOutcome::Failed`) are retried up to
/// `policy.max_retries` times before giving up.
pub async fn run_submit_poll(
    provider: &dyn SubmitPollAsrProvider,
    audio: &[u8],
    policy: &RetryPolicy,
) -> Result<String, SubmitPollError> {
    let task_id = provider
        .submit(audio)
        .await
        .map_err(SubmitPollError::SubmitFailed)?;

    let deadline = Instant::now() + POLL_WALL_CLOCK_CAP;
    let mut poll_failures = 0u32;

    loop {
        if Instant::now() >= deadline {
            return Err(SubmitPollError::TimedOut(POLL_WALL_CLOCK_CAP));
        }

        match provider.poll(&task_id).await {
            Ok(PollOutcome::Done(text)) => return Ok(text),
            Ok(PollOutcome::Failed(reason)) => return Err(SubmitPollError::ProviderFailed(reason)),
            Ok(PollOutcome::Pending) => {
                poll_failures = 0;
            }
            Err(e) => {
                poll_failures += 1;
                if poll_failures > policy.max_retries {
                    return Err(SubmitPollError::PollExhausted(e));
                }
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<Vec<anyhow::Result<PollOutcome>>>,
        submit_calls: AtomicU32,
    }

    #[async_trait]
    impl SubmitPollAsrProvider for ScriptedProvider {
        async fn submit(&self, _audio: &[u8]) -> anyhow::Result<String> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            Ok("task-1".into())
        }

        async fn poll(&self, _task_id: &str) -> anyhow::Result<PollOutcome> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(PollOutcome::Pending);
            }
            responses.remove(0)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_once_provider_reports_done() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![Ok(PollOutcome::Pending), Ok(PollOutcome::Done("hi".into()))]),
            submit_calls: AtomicU32::new(0),
        };

        let result = run_submit_poll(&provider, b"audio", &fast_policy()).await.unwrap();
        assert_eq!(result, "hi");
        assert_eq!(provider.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_reported_failure_is_not_retried() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![Ok(PollOutcome::Failed("bad audio".into()))]),
            submit_calls: AtomicU32::new(0),
        };

        let err = run_submit_poll(&provider, b"audio", &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitPollError::ProviderFailed(msg) if msg == "bad audio"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_errors_are_retried_then_exhausted() {
        let provider = ScriptedProvider {
            responses: Mutex::new(vec![
                Err(anyhow::anyhow!("transient 1")),
                Err(anyhow::anyhow!("transient 2")),
                Err(anyhow::anyhow!("transient 3")),
            ]),
            submit_calls: AtomicU32::new(0),
        };

        let err = run_submit_poll(&provider, b"audio", &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitPollError::PollExhausted(_)));
    }

    #[test]
    fn errors_classify_into_expected_kinds() {
        use speakcore_core::types::ErrorKind;
        assert_eq!(
            SubmitPollError::SubmitFailed(anyhow::anyhow!("x")).kind(),
            ErrorKind::Network
        );
        assert_eq!(
            SubmitPollError::ProviderFailed("bad audio".into()).kind(),
            ErrorKind::CloudFatal
        );
        assert_eq!(SubmitPollError::TimedOut(Duration::from_secs(120)).kind(), ErrorKind::Timeout);
        assert_eq!(
            SubmitPollError::PollExhausted(anyhow::anyhow!("x")).kind(),
            ErrorKind::CloudTransient
        );
    }
}
