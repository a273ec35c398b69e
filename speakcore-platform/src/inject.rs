//! Cross-platform injection strategy selection and failure tracking.
//!
//! The OS-specific `Inserter` impls (`WindowsInserter`, `MacosInserter`) only
//! ever use a clipboard-paste strategy today. This module adds the
//! strategy-selection and failure-tracking layer described in the text
//! injector design, and wraps any `Inserter` with auto-switching between a
//! "clipboard" and a "keystroke" implementation when both are available.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use speakcore_core::types::InsertMode;
use speakcore_engine::traits::Inserter;

const FAILURE_WINDOW: Duration = Duration::from_secs(5 * 60);
const FAILURE_THRESHOLD: usize = 3;
const QUIESCENCE_RESET: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionStrategy {
    Clipboard,
    Keystroke,
    Smart,
}

/// Tracks failures for one injection method in a sliding window and decides
/// when to prefer the other method.
///
/// After [`FAILURE_THRESHOLD`] failures within [`FAILURE_WINDOW`], the tracker
/// reports itself as degraded. If nothing happens (success or failure) for
/// [`QUIESCENCE_RESET`], the window is cleared and the method is given
/// another chance.
pub struct FailureTracker {
    failures: Mutex<VecDeque<Instant>>,
    last_activity: Mutex<Option<Instant>>,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            last_activity: Mutex::new(None),
        }
    }
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(&self, failures: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = failures.front() {
            if now.duration_since(front) > FAILURE_WINDOW {
                failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn maybe_reset_for_quiescence(&self, failures: &mut VecDeque<Instant>, now: Instant) {
        let mut last = self.last_activity.lock().expect("failure tracker poisoned");
        if let Some(prev) = *last {
            if now.duration_since(prev) > QUIESCENCE_RESET {
                failures.clear();
            }
        }
        *last = Some(now);
    }

    pub fn record_success(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock().expect("failure tracker poisoned");
        self.maybe_reset_for_quiescence(&mut failures, now);
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock().expect("failure tracker poisoned");
        self.maybe_reset_for_quiescence(&mut failures, now);
        self.prune(&mut failures, now);
        failures.push_back(now);
    }

    /// True once [`FAILURE_THRESHOLD`] failures have landed within the
    /// trailing [`FAILURE_WINDOW`].
    pub fn is_degraded(&self) -> bool {
        let now = Instant::now();
        let mut failures = self.failures.lock().expect("failure tracker poisoned");
        self.prune(&mut failures, now);
        failures.len() >= FAILURE_THRESHOLD
    }
}

/// Wraps a "clipboard" and an optional "keystroke" `Inserter`, choosing
/// between them based on [`FailureTracker`] state when `strategy` is
/// [`InjectionStrategy::Smart`].
///
/// `set_recording_mode(true)` tells the clipboard path to skip its own
/// save/restore, on the assumption the caller already snapshotted the
/// clipboard itself (see the orchestrator's recording-mode handshake).
pub struct SmartInjector {
    strategy: InjectionStrategy,
    clipboard: Arc<dyn Inserter>,
    keystroke: Option<Arc<dyn Inserter>>,
    clipboard_tracker: FailureTracker,
    keystroke_tracker: FailureTracker,
    recording_mode: AtomicBool,
}

impl SmartInjector {
    pub fn new(strategy: InjectionStrategy, clipboard: Arc<dyn Inserter>) -> Self {
        Self {
            strategy,
            clipboard,
            keystroke: None,
            clipboard_tracker: FailureTracker::new(),
            keystroke_tracker: FailureTracker::new(),
            recording_mode: AtomicBool::new(false),
        }
    }

    pub fn with_keystroke(mut self, keystroke: Arc<dyn Inserter>) -> Self {
        self.keystroke = Some(keystroke);
        self
    }

    pub fn set_recording_mode(&self, enabled: bool) {
        self.recording_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn is_recording_mode(&self) -> bool {
        self.recording_mode.load(Ordering::SeqCst)
    }

    fn prefers_keystroke(&self) -> bool {
        self.keystroke.is_some() && self.clipboard_tracker.is_degraded() && !self.keystroke_tracker.is_degraded()
    }

    fn truncated_for_log(text: &str) -> String {
        text.chars().take(50).collect()
    }
}

#[async_trait]
impl Inserter for SmartInjector {
    async fn insert(&self, text: &str, mode: InsertMode) -> anyhow::Result<()> {
        let use_keystroke = match self.strategy {
            InjectionStrategy::Clipboard => false,
            InjectionStrategy::Keystroke => self.keystroke.is_some(),
            InjectionStrategy::Smart => self.prefers_keystroke(),
        };

        let (inserter, tracker) = if use_keystroke {
            (self.keystroke.as_ref().expect("checked above"), &self.keystroke_tracker)
        } else {
            (&self.clipboard, &self.clipboard_tracker)
        };

        match inserter.insert(text, mode).await {
            Ok(()) => {
                tracker.record_success();
                Ok(())
            }
            Err(e) => {
                tracker.record_failure();
                log::warn!(
                    "text injection failed for \"{}...\": {e}",
                    Self::truncated_for_log(text)
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingInserter {
        fail: bool,
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Inserter for RecordingInserter {
        async fn insert(&self, text: &str, _mode: InsertMode) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fail {
                anyhow::bail!("synthetic insert failure");
            }
            Ok(())
        }
    }

    #[test]
    fn failure_tracker_degrades_after_threshold() {
        let tracker = FailureTracker::new();
        assert!(!tracker.is_degraded());
        tracker.record_failure();
        tracker.record_failure();
        assert!(!tracker.is_degraded());
        tracker.record_failure();
        assert!(tracker.is_degraded());
    }

    #[tokio::test]
    async fn smart_strategy_switches_to_keystroke_after_clipboard_degrades() {
        let clipboard = Arc::new(RecordingInserter {
            fail: true,
            calls: StdMutex::new(Vec::new()),
        });
        let keystroke = Arc::new(RecordingInserter {
            fail: false,
            calls: StdMutex::new(Vec::new()),
        });

        let injector = SmartInjector::new(InjectionStrategy::Smart, clipboard.clone())
            .with_keystroke(keystroke.clone());

        for _ in 0..3 {
            let _ = injector.insert("hello", InsertMode::Paste).await;
        }
        assert_eq!(clipboard.calls.lock().unwrap().len(), 3);
        assert_eq!(keystroke.calls.lock().unwrap().len(), 0);

        // Fourth call should have switched to keystroke since clipboard is degraded.
        injector.insert("hello", InsertMode::Paste).await.unwrap();
        assert_eq!(keystroke.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clipboard_only_strategy_never_uses_keystroke() {
        let clipboard = Arc::new(RecordingInserter {
            fail: true,
            calls: StdMutex::new(Vec::new()),
        });
        let keystroke = Arc::new(RecordingInserter {
            fail: false,
            calls: StdMutex::new(Vec::new()),
        });

        let injector = SmartInjector::new(InjectionStrategy::Clipboard, clipboard.clone())
            .with_keystroke(keystroke.clone());

        for _ in 0..5 {
            let _ = injector.insert("hello", InsertMode::Paste).await;
        }
        assert_eq!(keystroke.calls.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn recording_mode_flag_round_trips() {
        let clipboard = Arc::new(RecordingInserter {
            fail: false,
            calls: StdMutex::new(Vec::new()),
        });
        let injector = SmartInjector::new(InjectionStrategy::Clipboard, clipboard);
        assert!(!injector.is_recording_mode());
        injector.set_recording_mode(true);
        assert!(injector.is_recording_mode());
    }
}
