//! Transcription worker: a single background task that owns STT model state
//! and serializes access to it through a bounded channel.
//!
//! `whisper-rs` contexts are not cheap to share across concurrent inference
//! calls (see [`crate::local_stt::LocalWhisperSttProvider`]'s internal mutex),
//! so rather than taking a lock per call we hand the provider to one task and
//! let everyone else talk to it through requests. This also gives the worker
//! a single place to track which model is currently loaded, enforce
//! streaming chunk ordering and per-chunk timeouts, and drain in-flight work
//! cleanly on shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use speakcore_core::types::ErrorKind;
use speakcore_engine::traits::{AudioInput, SttProvider, Transcript};
use speakcore_registry::EventBus;

use crate::local_stt::classify_load_error;

const DEFAULT_QUEUE_DEPTH: usize = 50;
const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

fn chunk_failure_placeholder(chunk_id: u64) -> String {
    format!(" [transcription failed: chunk {chunk_id}] ")
}

fn service_stopping() -> anyhow::Error {
    anyhow::anyhow!("service stopping")
}

/// Emitted on the event bus after a model finishes loading.
#[derive(Debug, Clone)]
pub struct ModelLoadedEvent {
    pub provider: String,
    pub model: String,
    pub device: String,
    pub latency_ms: u128,
}

/// Emitted on the event bus when a `load_model`/`reload_model` call fails,
/// classified by [`classify_load_error`] so subscribers (UI toasts, history)
/// can show a recovery suggestion without string-matching the error.
#[derive(Debug, Clone)]
pub struct ModelLoadFailedEvent {
    pub provider: String,
    pub model: String,
    pub kind: ErrorKind,
    pub suggestions: &'static [&'static str],
}

fn publish_load_failure(events: &Option<EventBus>, provider: &str, model: &str, err: &anyhow::Error) {
    if let Some(bus) = events {
        let kind = classify_load_error(err);
        bus.publish(
            "model.load_failed",
            &ModelLoadFailedEvent {
                provider: provider.to_string(),
                model: model.to_string(),
                kind,
                suggestions: kind.suggestions(),
            },
        );
    }
}

enum Job {
    Transcribe {
        audio: AudioInput,
        provider: String,
        model: String,
        language: String,
        reply: oneshot::Sender<anyhow::Result<Transcript>>,
    },
    LoadModel {
        provider: String,
        model: String,
        device: String,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    UnloadModel {
        provider: String,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    ReloadModel {
        provider: String,
        model: String,
        device: String,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Fails a queued job in place of running it, used when the worker is
/// draining its queue on shutdown.
fn fail_with_shutdown(job: Job) {
    match job {
        Job::Transcribe { reply, .. } => {
            let _ = reply.send(Err(service_stopping()));
        }
        Job::LoadModel { reply, .. } => {
            let _ = reply.send(Err(service_stopping()));
        }
        Job::UnloadModel { reply, .. } => {
            let _ = reply.send(Err(service_stopping()));
        }
        Job::ReloadModel { reply, .. } => {
            let _ = reply.send(Err(service_stopping()));
        }
        Job::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

/// Which model (if any) the worker currently believes is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadedModel {
    provider: String,
    model: String,
    device: String,
}

/// Handle to a running transcription worker. Cloning shares the same
/// underlying task and STT provider.
#[derive(Clone)]
pub struct TranscriptionWorker {
    tx: mpsc::Sender<Job>,
}

impl TranscriptionWorker {
    /// Spawns the worker task and returns a handle to it. The provider is
    /// moved into the task and is only ever touched from there.
    pub fn spawn(stt: Arc<dyn SttProvider>) -> Self {
        Self::spawn_with_queue_depth(stt, DEFAULT_QUEUE_DEPTH)
    }

    pub fn spawn_with_queue_depth(stt: Arc<dyn SttProvider>, queue_depth: usize) -> Self {
        Self::spawn_inner(stt, queue_depth, None)
    }

    /// Like [`spawn`](Self::spawn), but publishes `transcription.failed` on
    /// transcribe errors and `model.loaded` after a successful model load,
    /// so callers (history recording, UI toasts, status bar) can react
    /// without threading a result channel through every caller.
    pub fn spawn_with_events(stt: Arc<dyn SttProvider>, events: EventBus) -> Self {
        Self::spawn_inner(stt, DEFAULT_QUEUE_DEPTH, Some(events))
    }

    fn spawn_inner(stt: Arc<dyn SttProvider>, queue_depth: usize, events: Option<EventBus>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_depth);

        tokio::spawn(async move {
            let mut loaded: Option<LoadedModel> = None;

            while let Some(job) = rx.recv().await {
                match job {
                    Job::Transcribe {
                        audio,
                        provider,
                        model,
                        language,
                        reply,
                    } => {
                        let result = stt.transcribe(&audio, &provider, &model, &language).await;
                        if let (Err(err), Some(bus)) = (&result, &events) {
                            bus.publish("transcription.failed", &err.to_string());
                        }
                        // The caller may have dropped its receiver (e.g. it timed out);
                        // ignore the send failure rather than treat it as a worker error.
                        let _ = reply.send(result);
                    }
                    Job::LoadModel {
                        provider,
                        model,
                        device,
                        reply,
                    } => {
                        let wanted = LoadedModel {
                            provider: provider.clone(),
                            model: model.clone(),
                            device: device.clone(),
                        };
                        if loaded.as_ref() == Some(&wanted) {
                            // Already loaded: idempotent no-op success.
                            let _ = reply.send(Ok(()));
                            continue;
                        }

                        let started = Instant::now();
                        let result = stt.load_model(&provider, &model).await;
                        match &result {
                            Ok(()) => {
                                loaded = Some(wanted);
                                if let Some(bus) = &events {
                                    bus.publish(
                                        "model.loaded",
                                        &ModelLoadedEvent {
                                            provider,
                                            model,
                                            device,
                                            latency_ms: started.elapsed().as_millis(),
                                        },
                                    );
                                }
                            }
                            Err(err) => publish_load_failure(&events, &provider, &model, err),
                        }
                        let _ = reply.send(result);
                    }
                    Job::UnloadModel { provider, reply } => {
                        let result = stt.unload_model(&provider).await;
                        if result.is_ok() {
                            loaded = None;
                        }
                        let _ = reply.send(result);
                    }
                    Job::ReloadModel {
                        provider,
                        model,
                        device,
                        reply,
                    } => {
                        let unload_result = stt.unload_model(&provider).await;
                        if let Err(err) = unload_result {
                            let _ = reply.send(Err(err));
                            continue;
                        }
                        loaded = None;

                        let started = Instant::now();
                        let result = stt.load_model(&provider, &model).await;
                        match &result {
                            Ok(()) => {
                                loaded = Some(LoadedModel {
                                    provider: provider.clone(),
                                    model: model.clone(),
                                    device: device.clone(),
                                });
                                if let Some(bus) = &events {
                                    bus.publish(
                                        "model.loaded",
                                        &ModelLoadedEvent {
                                            provider,
                                            model,
                                            device,
                                            latency_ms: started.elapsed().as_millis(),
                                        },
                                    );
                                }
                            }
                            Err(err) => publish_load_failure(&events, &provider, &model, err),
                        }
                        let _ = reply.send(result);
                    }
                    Job::Shutdown { reply } => {
                        while let Ok(pending) = rx.try_recv() {
                            fail_with_shutdown(pending);
                        }
                        let _ = reply.send(());
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Transcribes a single, complete utterance.
    pub async fn transcribe(
        &self,
        audio: AudioInput,
        provider: &str,
        model: &str,
        language: &str,
    ) -> anyhow::Result<Transcript> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Transcribe {
                audio,
                provider: provider.to_string(),
                model: model.to_string(),
                language: language.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("transcription worker has shut down"))?;

        rx.await
            .map_err(|_| anyhow::anyhow!("transcription worker dropped the reply channel"))?
    }

    /// Loads `model` for `provider` on `device` (e.g. `"cpu"`, `"cuda:0"`).
    /// Calling this twice in a row with the same `(provider, model, device)`
    /// is a no-op that still returns success.
    pub async fn load_model(&self, provider: &str, model: &str, device: &str) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::LoadModel {
                provider: provider.to_string(),
                model: model.to_string(),
                device: device.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("transcription worker has shut down"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("transcription worker dropped the reply channel"))?
    }

    /// Unloads whatever model is currently loaded for `provider`, if any.
    pub async fn unload_model(&self, provider: &str) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::UnloadModel {
                provider: provider.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("transcription worker has shut down"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("transcription worker dropped the reply channel"))?
    }

    /// Unconditionally unloads then reloads `model`, even if it's already
    /// the loaded model (unlike [`load_model`](Self::load_model), this is
    /// never a no-op — use it when the underlying weights changed on disk).
    pub async fn reload_model(&self, provider: &str, model: &str, device: &str) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::ReloadModel {
                provider: provider.to_string(),
                model: model.to_string(),
                device: device.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("transcription worker has shut down"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("transcription worker dropped the reply channel"))?
    }

    /// Drains any jobs still queued behind this one with a "service
    /// stopping" error, then stops the worker task. Jobs submitted after
    /// this call returns will fail immediately because the task has exited
    /// and dropped its receiver.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Shutdown { reply })
            .await
            .map_err(|_| anyhow::anyhow!("transcription worker has already shut down"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("transcription worker dropped the shutdown ack"))
    }

    /// Submits one chunk of a streaming utterance for transcription, without
    /// waiting for the result. The returned receiver resolves once the
    /// worker gets to it; chunks are processed strictly in submission order
    /// because they all funnel through the same task.
    pub async fn submit_chunk(
        &self,
        audio: AudioInput,
        provider: &str,
        model: &str,
        language: &str,
    ) -> anyhow::Result<oneshot::Receiver<anyhow::Result<Transcript>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Transcribe {
                audio,
                provider: provider.to_string(),
                model: model.to_string(),
                language: language.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("transcription worker has shut down"))?;
        Ok(rx)
    }
}

/// Accumulates out-of-order streaming chunk results and finalizes them into a
/// single ordered transcript.
///
/// Each chunk gets a per-chunk timeout; a chunk that times out or whose
/// worker call failed is replaced with a placeholder string rather than
/// dropped, so the final transcript keeps its chunk positions legible.
pub struct StreamingFinalizer {
    pending: BTreeMap<u64, oneshot::Receiver<anyhow::Result<Transcript>>>,
    chunk_timeout: Duration,
}

impl StreamingFinalizer {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    pub fn with_chunk_timeout(chunk_timeout: Duration) -> Self {
        Self {
            pending: BTreeMap::new(),
            chunk_timeout,
        }
    }

    /// Registers the receiver for `chunk_id`. Chunk ids must be assigned by
    /// the caller in recording order; gaps are fine (e.g. a chunk that was
    /// dropped by VAD), duplicates overwrite the previous registration.
    pub fn register(&mut self, chunk_id: u64, rx: oneshot::Receiver<anyhow::Result<Transcript>>) {
        self.pending.insert(chunk_id, rx);
    }

    /// Awaits every registered chunk in ascending chunk-id order and joins
    /// their text with a single space, substituting a failure placeholder
    /// for any chunk that errored or timed out.
    pub async fn finalize(mut self) -> String {
        let mut parts = Vec::with_capacity(self.pending.len());
        for (chunk_id, rx) in std::mem::take(&mut self.pending) {
            let text = match tokio::time::timeout(self.chunk_timeout, rx).await {
                Ok(Ok(Ok(transcript))) => transcript.text,
                Ok(Ok(Err(_))) | Ok(Err(_)) | Err(_) => chunk_failure_placeholder(chunk_id),
            };
            parts.push(text);
        }
        parts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl Default for StreamingFinalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct SlowEchoStt {
        calls: AtomicUsize,
        delay: Duration,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl SttProvider for SlowEchoStt {
        async fn transcribe(
            &self,
            audio: &AudioInput,
            provider: &str,
            model: &str,
            _language: &str,
        ) -> anyhow::Result<Transcript> {
            let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_on_call == Some(call_index) {
                return Err(anyhow::anyhow!("synthetic failure"));
            }
            Ok(Transcript {
                text: format!("chunk-{}", audio.samples.len()),
                provider: provider.to_string(),
                model: model.to_string(),
            })
        }
    }

    fn audio_of_len(n: usize) -> AudioInput {
        AudioInput {
            sample_rate_hz: 16_000,
            samples: vec![0.0; n],
        }
    }

    #[tokio::test]
    async fn transcribe_round_trips_through_worker() {
        let stt = Arc::new(SlowEchoStt {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_on_call: None,
        });
        let worker = TranscriptionWorker::spawn(stt);

        let result = worker
            .transcribe(audio_of_len(3), "local", "model.bin", "en")
            .await
            .unwrap();
        assert_eq!(result.text, "chunk-3");
    }

    #[tokio::test]
    async fn jobs_are_serialized_through_one_task() {
        let order = Arc::new(Mutex::new(Vec::new()));
        struct OrderTrackingStt {
            order: Arc<Mutex<Vec<usize>>>,
        }
        #[async_trait]
        impl SttProvider for OrderTrackingStt {
            async fn transcribe(
                &self,
                audio: &AudioInput,
                provider: &str,
                model: &str,
                _language: &str,
            ) -> anyhow::Result<Transcript> {
                let id = audio.samples.len();
                self.order.lock().unwrap().push(id);
                Ok(Transcript {
                    text: id.to_string(),
                    provider: provider.to_string(),
                    model: model.to_string(),
                })
            }
        }
        let stt = Arc::new(OrderTrackingStt {
            order: order.clone(),
        });
        let worker = TranscriptionWorker::spawn(stt);

        for i in 1..=5 {
            worker
                .transcribe(audio_of_len(i), "local", "m", "en")
                .await
                .unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn streaming_finalizer_orders_by_chunk_id_not_completion_order() {
        let stt = Arc::new(SlowEchoStt {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_on_call: None,
        });
        let worker = TranscriptionWorker::spawn(stt);

        let mut finalizer = StreamingFinalizer::new();
        let rx0 = worker
            .submit_chunk(audio_of_len(1), "local", "m", "en")
            .await
            .unwrap();
        let rx1 = worker
            .submit_chunk(audio_of_len(2), "local", "m", "en")
            .await
            .unwrap();
        finalizer.register(1, rx1);
        finalizer.register(0, rx0);

        let text = finalizer.finalize().await;
        assert_eq!(text, "chunk-1 chunk-2");
    }

    #[tokio::test]
    async fn failed_chunk_becomes_placeholder_without_dropping_others() {
        let stt = Arc::new(SlowEchoStt {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_on_call: Some(0),
        });
        let worker = TranscriptionWorker::spawn(stt);

        let mut finalizer = StreamingFinalizer::new();
        let rx0 = worker
            .submit_chunk(audio_of_len(1), "local", "m", "en")
            .await
            .unwrap();
        let rx1 = worker
            .submit_chunk(audio_of_len(2), "local", "m", "en")
            .await
            .unwrap();
        finalizer.register(0, rx0);
        finalizer.register(1, rx1);

        let text = finalizer.finalize().await;
        assert!(text.contains("transcription failed: chunk 0"));
        assert!(text.contains("chunk-2"));
    }

    #[tokio::test]
    async fn failed_job_publishes_transcription_failed_event() {
        let stt = Arc::new(SlowEchoStt {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_on_call: Some(0),
        });
        let events = speakcore_registry::EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.subscribe("transcription.failed", move |payload| {
            if let Some(msg) = payload.downcast_ref::<String>() {
                seen_clone.lock().unwrap().push(msg.clone());
            }
        });

        let worker = TranscriptionWorker::spawn_with_events(stt, events);
        let result = worker.transcribe(audio_of_len(1), "local", "m", "en").await;
        assert!(result.is_err());

        // The event is published from inside the worker task before the reply
        // is sent back to us, so by the time `transcribe` returns the
        // subscriber has already run.
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chunk_timeout_becomes_placeholder() {
        let stt = Arc::new(SlowEchoStt {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
            fail_on_call: None,
        });
        let worker = TranscriptionWorker::spawn(stt);

        let mut finalizer = StreamingFinalizer::with_chunk_timeout(Duration::from_millis(5));
        let rx0 = worker
            .submit_chunk(audio_of_len(1), "local", "m", "en")
            .await
            .unwrap();
        finalizer.register(0, rx0);

        let text = finalizer.finalize().await;
        assert!(text.contains("transcription failed: chunk 0"));
    }

    struct CountingLoadStt {
        load_calls: AtomicUsize,
    }

    #[async_trait]
    impl SttProvider for CountingLoadStt {
        async fn transcribe(
            &self,
            _audio: &AudioInput,
            provider: &str,
            model: &str,
            _language: &str,
        ) -> anyhow::Result<Transcript> {
            Ok(Transcript {
                text: "ok".to_string(),
                provider: provider.to_string(),
                model: model.to_string(),
            })
        }

        async fn load_model(&self, _provider: &str, _model: &str) -> anyhow::Result<()> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn load_model_twice_with_same_name_is_idempotent() {
        let stt = Arc::new(CountingLoadStt {
            load_calls: AtomicUsize::new(0),
        });
        let worker = TranscriptionWorker::spawn(stt.clone());

        worker.load_model("local", "m", "cpu").await.unwrap();
        worker.load_model("local", "m", "cpu").await.unwrap();

        assert_eq!(stt.load_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reload_model_always_reloads_even_if_already_loaded() {
        let stt = Arc::new(CountingLoadStt {
            load_calls: AtomicUsize::new(0),
        });
        let worker = TranscriptionWorker::spawn(stt.clone());

        worker.load_model("local", "m", "cpu").await.unwrap();
        worker.reload_model("local", "m", "cpu").await.unwrap();

        assert_eq!(stt.load_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_model_publishes_model_loaded_event() {
        let stt = Arc::new(CountingLoadStt {
            load_calls: AtomicUsize::new(0),
        });
        let events = speakcore_registry::EventBus::default();
        let seen: Arc<Mutex<Vec<ModelLoadedEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.subscribe("model.loaded", move |payload| {
            if let Some(evt) = payload.downcast_ref::<ModelLoadedEvent>() {
                seen_clone.lock().unwrap().push(evt.clone());
            }
        });

        let worker = TranscriptionWorker::spawn_with_events(stt, events);
        worker.load_model("local", "m", "cpu").await.unwrap();

        let events_seen = seen.lock().unwrap();
        assert_eq!(events_seen.len(), 1);
        assert_eq!(events_seen[0].provider, "local");
        assert_eq!(events_seen[0].model, "m");
        assert_eq!(events_seen[0].device, "cpu");
    }

    struct FailingLoadStt;

    #[async_trait]
    impl SttProvider for FailingLoadStt {
        async fn transcribe(
            &self,
            _audio: &AudioInput,
            provider: &str,
            model: &str,
            _language: &str,
        ) -> anyhow::Result<Transcript> {
            Ok(Transcript {
                text: "ok".to_string(),
                provider: provider.to_string(),
                model: model.to_string(),
            })
        }

        async fn load_model(&self, _provider: &str, _model: &str) -> anyhow::Result<()> {
            Err(crate::local_stt::ModelLoadError::NotFound("/nope.bin".into()).into())
        }
    }

    #[tokio::test]
    async fn load_model_failure_publishes_classified_event() {
        let events = speakcore_registry::EventBus::default();
        let seen: Arc<Mutex<Vec<ModelLoadFailedEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.subscribe("model.load_failed", move |payload| {
            if let Some(evt) = payload.downcast_ref::<ModelLoadFailedEvent>() {
                seen_clone.lock().unwrap().push(evt.clone());
            }
        });

        let worker = TranscriptionWorker::spawn_with_events(Arc::new(FailingLoadStt), events);
        let result = worker.load_model("local", "m", "cpu").await;
        assert!(result.is_err());

        let events_seen = seen.lock().unwrap();
        assert_eq!(events_seen.len(), 1);
        assert_eq!(events_seen[0].kind, ErrorKind::ModelLoad);
        assert!(!events_seen[0].suggestions.is_empty());
    }

    #[tokio::test]
    async fn shutdown_drains_queued_jobs_with_service_stopping_error() {
        let stt = Arc::new(SlowEchoStt {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
            fail_on_call: None,
        });
        let worker = TranscriptionWorker::spawn_with_queue_depth(stt, 4);

        // Job 1 gets popped into processing immediately and sleeps for
        // 50ms. While it's in flight, queue the shutdown request and a job
        // behind it directly (bypassing the public API, which would block on
        // the bounded channel) so the ordering in the channel is exactly
        // [shutdown, job3] by the time job1 finishes.
        let in_flight = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.transcribe(audio_of_len(1), "local", "m", "en").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let (shutdown_reply, shutdown_rx) = oneshot::channel();
        worker.tx.send(Job::Shutdown { reply: shutdown_reply }).await.unwrap();

        let (job3_reply, job3_rx) = oneshot::channel();
        worker
            .tx
            .send(Job::Transcribe {
                audio: audio_of_len(2),
                provider: "local".to_string(),
                model: "m".to_string(),
                language: "en".to_string(),
                reply: job3_reply,
            })
            .await
            .unwrap();

        let in_flight_result = in_flight.await.unwrap();
        assert!(in_flight_result.is_ok());

        shutdown_rx.await.unwrap();

        let job3_result = job3_rx.await.unwrap();
        let err = job3_result.unwrap_err();
        assert!(err.to_string().contains("service stopping"));
    }

    #[tokio::test]
    async fn jobs_submitted_after_shutdown_fail() {
        let stt = Arc::new(SlowEchoStt {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_on_call: None,
        });
        let worker = TranscriptionWorker::spawn(stt);

        worker.shutdown().await.unwrap();

        let err = worker
            .transcribe(audio_of_len(1), "local", "m", "en")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shut down"));
    }
}
