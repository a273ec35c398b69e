//
// Minimal CPAL-based audio recorder.
//
// Supported platforms:
// - Windows
// - macOS
//
// Linux support is intentionally not enabled yet because we don't want to introduce
// new platform dependencies without committing to a full Linux UX.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream};

use crate::chunking::ChunkAccumulator;
use crate::resample::resample_mono_f32;

/// Default streaming chunk duration when none is configured: 15 seconds.
pub const DEFAULT_CHUNK_DURATION: Duration = Duration::from_secs(15);

type ChunkCallback = Arc<dyn Fn(u64, &[f32]) + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum AudioCaptureError {
    #[error("no input device found")]
    NoInputDevice,

    #[error("failed to list input devices: {0}")]
    ListDevices(#[from] cpal::DevicesError),

    #[error("failed to query supported configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("failed to get default config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to play stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio worker failed: {0}")]
    Worker(String),

    #[error("audio worker startup timeout")]
    WorkerTimeout,

    #[error("recording stop timed out")]
    StopTimeout,

    #[error("failed to resample: {0}")]
    Resample(#[from] anyhow::Error),

    #[error("recording not started")]
    NotStarted,

    #[error("internal channel error")]
    Channel,
}

impl AudioCaptureError {
    pub fn kind(&self) -> speakcore_core::types::ErrorKind {
        use speakcore_core::types::ErrorKind;
        match self {
            AudioCaptureError::NoInputDevice
            | AudioCaptureError::ListDevices(_)
            | AudioCaptureError::SupportedConfigs(_)
            | AudioCaptureError::DefaultConfig(_)
            | AudioCaptureError::BuildStream(_)
            | AudioCaptureError::PlayStream(_) => ErrorKind::AudioDevice,
            AudioCaptureError::WorkerTimeout | AudioCaptureError::StopTimeout => ErrorKind::Timeout,
            AudioCaptureError::NotStarted => ErrorKind::ValidationFailure,
            AudioCaptureError::Worker(_) | AudioCaptureError::Channel | AudioCaptureError::Resample(_) => {
                ErrorKind::Unknown
            }
        }
    }
}

pub struct CapturedAudio {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

/// Lifecycle of an [`AudioRecorder`]. `Idle` is only observed before a
/// device is opened (the public constructors return an already-`Armed`
/// recorder); `start()`/`stop()` drive `Armed` <-> `Recording`, passing
/// through `Stopping` while the stop command is in flight so a concurrent
/// `start()` can't race the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Armed,
    Recording,
    Stopping,
}

pub struct AudioRecorder {
    cmd_tx: mpsc::Sender<Cmd>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
    sample_rate_hz: u32,
    device_name: String,
    level_cb: Arc<Mutex<Option<Arc<dyn Fn(&[f32]) + Send + Sync + 'static>>>>,
    chunk_cb: Arc<Mutex<Option<ChunkCallback>>>,
    chunk_duration: Arc<Mutex<Duration>>,
    state: Arc<Mutex<RecorderState>>,
}

impl AudioRecorder {
    /// Name of the input device actually opened. When `open_named` falls
    /// back to the system default because the requested device could not
    /// be found, this reflects the device that was actually used, not the
    /// one requested.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn state(&self) -> RecorderState {
        *self.state.lock().unwrap()
    }

    pub fn set_level_callback<F>(&self, cb: F)
    where
        F: Fn(&[f32]) + Send + Sync + 'static,
    {
        let mut guard = self.level_cb.lock().unwrap();
        *guard = Some(Arc::new(cb));
    }

    /// Registers a callback invoked with `(chunk_id, frames)` every time a
    /// full chunk of `chunk_duration` worth of audio has accumulated during
    /// an active recording. `chunk_id` starts at 0 per session and is
    /// strictly ascending. The frames emitted this way, concatenated with
    /// whatever remains when `stop()` is called, reconstruct the exact
    /// buffer `stop()` returns.
    pub fn set_chunk_callback<F>(&self, chunk_duration: Duration, cb: F)
    where
        F: Fn(u64, &[f32]) + Send + Sync + 'static,
    {
        *self.chunk_duration.lock().unwrap() = chunk_duration;
        *self.chunk_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    pub fn clear_chunk_callback(&self) {
        *self.chunk_cb.lock().unwrap() = None;
    }
}

enum Cmd {
    Start,
    Stop(mpsc::Sender<Vec<f32>>),
    Shutdown,
}

enum WorkerMsg {
    Ready,
    Error(String),
}

impl AudioRecorder {
    pub fn list_input_device_names() -> Result<Vec<String>, AudioCaptureError> {
        let host = cpal::default_host();
        let mut out = Vec::new();
        for dev in host.input_devices()? {
            if let Ok(name) = dev.name() {
                out.push(name);
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    pub fn open_named(device_name: Option<&str>) -> Result<Self, AudioCaptureError> {
        let host = cpal::default_host();

        if let Some(needle) = device_name {
            let needle = needle.trim();
            if !needle.is_empty() {
                if let Ok(devices) = host.input_devices() {
                    for dev in devices {
                        if let Ok(name) = dev.name() {
                            if name == needle {
                                log::info!("Using input device: {name}");
                                return Self::open(Some(dev));
                            }
                        }
                    }
                }

                log::warn!(
                    "Preferred input device not found, falling back to default: {needle}"
                );
            }
        }

        Self::open_default()
    }

    pub fn open_default() -> Result<Self, AudioCaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioCaptureError::NoInputDevice)?;
        Self::open(Some(device))
    }

    pub fn open(device: Option<Device>) -> Result<Self, AudioCaptureError> {
        let host = cpal::default_host();
        let device = match device {
            Some(d) => d,
            None => host
                .default_input_device()
                .ok_or(AudioCaptureError::NoInputDevice)?,
        };

        // Prefer the device's default input config first.
        // We'll resample to 16k later if needed.
        let default_cfg = device.default_input_config()?;
        let sample_rate_hz = default_cfg.sample_rate().0;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let (sample_tx, sample_rx) = mpsc::channel::<Vec<f32>>();
        let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        let level_cb: Arc<Mutex<Option<Arc<dyn Fn(&[f32]) + Send + Sync + 'static>>>> =
            Arc::new(Mutex::new(None));
        let level_cb_worker = level_cb.clone();
        let chunk_cb: Arc<Mutex<Option<ChunkCallback>>> = Arc::new(Mutex::new(None));
        let chunk_cb_worker = chunk_cb.clone();
        let chunk_duration = Arc::new(Mutex::new(DEFAULT_CHUNK_DURATION));
        let chunk_duration_worker = chunk_duration.clone();

        let worker_handle = std::thread::spawn(move || {
            let config = default_cfg;
            let sample_format = config.sample_format();
            let channels = config.channels() as usize;

            let stream = match sample_format {
                SampleFormat::F32 => {
                    build_input_stream::<f32>(&device, &config.clone().into(), channels, sample_tx)
                }
                SampleFormat::I16 => {
                    build_input_stream::<i16>(&device, &config.clone().into(), channels, sample_tx)
                }
                SampleFormat::U16 => {
                    build_input_stream::<u16>(&device, &config.clone().into(), channels, sample_tx)
                }
                SampleFormat::I8 => {
                    build_input_stream::<i8>(&device, &config.clone().into(), channels, sample_tx)
                }
                SampleFormat::U8 => {
                    build_input_stream::<u8>(&device, &config.clone().into(), channels, sample_tx)
                }
                SampleFormat::I32 => {
                    build_input_stream::<i32>(&device, &config.clone().into(), channels, sample_tx)
                }
                SampleFormat::U32 => {
                    build_input_stream::<u32>(&device, &config.clone().into(), channels, sample_tx)
                }
                SampleFormat::F64 => {
                    build_input_stream::<f64>(&device, &config.clone().into(), channels, sample_tx)
                }
                _ => build_input_stream::<f32>(&device, &config.clone().into(), channels, sample_tx),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = worker_tx.send(WorkerMsg::Error(format!("build stream: {e}")));
                    log::error!("Audio stream build failed: {e}");
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = worker_tx.send(WorkerMsg::Error(format!("play stream: {e}")));
                log::error!("Audio stream play failed: {e}");
                return;
            }

            let _ = worker_tx.send(WorkerMsg::Ready);

            run_consumer(
                sample_rx,
                cmd_rx,
                level_cb_worker,
                chunk_cb_worker,
                chunk_duration_worker,
                sample_rate_hz,
            );
            drop(stream);
        });

        // Block briefly until the worker has either started the stream or failed.
        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(AudioCaptureError::Worker(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(AudioCaptureError::WorkerTimeout),
            Err(_) => return Err(AudioCaptureError::Channel),
        }

        Ok(Self {
            cmd_tx,
            worker_handle: Some(worker_handle),
            sample_rate_hz,
            device_name,
            level_cb,
            chunk_cb,
            chunk_duration,
            state: Arc::new(Mutex::new(RecorderState::Armed)),
        })
    }

    /// Arms/re-arms the capture into `Recording`. A no-op (`Ok`) if already
    /// `Recording`; rejected while a `stop()` is draining.
    pub fn start(&self) -> Result<(), AudioCaptureError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                RecorderState::Recording => return Ok(()),
                RecorderState::Stopping => return Err(AudioCaptureError::NotStarted),
                RecorderState::Idle | RecorderState::Armed => *state = RecorderState::Recording,
            }
        }

        if let Err(e) = self.cmd_tx.send(Cmd::Start).map_err(|_| AudioCaptureError::Channel) {
            *self.state.lock().unwrap() = RecorderState::Armed;
            return Err(e);
        }
        Ok(())
    }

    /// Drains the current recording and returns to `Armed`. Returns
    /// [`AudioCaptureError::NotStarted`] if no recording is in progress.
    pub fn stop(&self) -> Result<Vec<f32>, AudioCaptureError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != RecorderState::Recording {
                return Err(AudioCaptureError::NotStarted);
            }
            *state = RecorderState::Stopping;
        }

        let (resp_tx, resp_rx) = mpsc::channel();
        let result = self
            .cmd_tx
            .send(Cmd::Stop(resp_tx))
            .map_err(|_| AudioCaptureError::Channel)
            .and_then(|()| {
                resp_rx.recv_timeout(Duration::from_secs(3)).map_err(|e| match e {
                    mpsc::RecvTimeoutError::Timeout => AudioCaptureError::StopTimeout,
                    mpsc::RecvTimeoutError::Disconnected => AudioCaptureError::Channel,
                })
            });

        *self.state.lock().unwrap() = RecorderState::Armed;
        result
    }

    pub fn close(mut self) -> Result<(), AudioCaptureError> {
        let _ = self.cmd_tx.send(Cmd::Shutdown);
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
        Ok(())
    }

    pub fn stop_captured(&self) -> Result<CapturedAudio, AudioCaptureError> {
        let samples = self.stop()?;
        Ok(CapturedAudio {
            sample_rate_hz: self.sample_rate_hz,
            samples,
        })
    }

    pub fn resample_to_16k(samples: &[f32], input_rate_hz: u32) -> Result<Vec<f32>, AudioCaptureError> {
        Ok(resample_mono_f32(samples, input_rate_hz, 16_000).map_err(AudioCaptureError::Resample)?)
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sample_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let output_buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let out_buf = output_buffer.clone();

    let cb = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let mut buf = out_buf.lock().unwrap();
        buf.clear();

        if channels == 1 {
            buf.extend(data.iter().map(|&s| s.to_sample::<f32>()));
        } else {
            for frame in data.chunks_exact(channels) {
                let mono = frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32;
                buf.push(mono);
            }
        }

        let _ = sample_tx.send(buf.clone());
    };

    device.build_input_stream(
        config,
        cb,
        |err| {
            // These errors are crucial to debug “recording started but silent”.
            log::error!("Audio stream error: {err}");
        },
        None,
    )
}

fn run_consumer(
    sample_rx: mpsc::Receiver<Vec<f32>>,
    cmd_rx: mpsc::Receiver<Cmd>,
    level_cb: Arc<Mutex<Option<Arc<dyn Fn(&[f32]) + Send + Sync + 'static>>>>,
    chunk_cb: Arc<Mutex<Option<ChunkCallback>>>,
    chunk_duration: Arc<Mutex<Duration>>,
    sample_rate_hz: u32,
) {
    let mut recording = false;
    let mut captured: Vec<f32> = Vec::new();
    let mut chunker: Option<ChunkAccumulator> = None;

    loop {
        // Always drain commands promptly, even if the stream is stalled.
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Cmd::Start => {
                    recording = true;
                    captured.clear();
                    let duration = *chunk_duration.lock().unwrap();
                    chunker = Some(ChunkAccumulator::new(duration, sample_rate_hz));
                }
                Cmd::Stop(resp) => {
                    recording = false;
                    chunker = None;
                    let out = std::mem::take(&mut captured);
                    let _ = resp.send(out);
                }
                Cmd::Shutdown => return,
            }
        }

        match sample_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(samples) => {
                if let Some(cb) = level_cb.lock().unwrap().as_ref() {
                    cb(&samples);
                }
                if recording {
                    captured.extend_from_slice(&samples);

                    // Emit any chunks that just became complete. The callback
                    // runs here, on the capture thread; callers that need to
                    // hand off to another thread (e.g. the transcription
                    // worker) are responsible for doing so without blocking
                    // this loop for long, matching the contract that a
                    // callback exception must not interrupt capture.
                    if let Some(acc) = chunker.as_mut() {
                        for (chunk_id, start, end) in acc.poll(captured.len()) {
                            if let Some(cb) = chunk_cb.lock().unwrap().as_ref() {
                                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                                    || cb(chunk_id, &captured[start..end]),
                                ));
                                if result.is_err() {
                                    log::error!("chunk callback panicked for chunk {chunk_id}");
                                }
                            }
                        }
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // No audio chunk yet; loop around to check commands again.
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Drives [`run_consumer`] directly over plain channels, with no cpal
    /// device involved, so the chunk-cutting and buffer-conservation
    /// behavior can be exercised deterministically.
    fn run_session(
        reads: Vec<Vec<f32>>,
        chunk_duration: Duration,
        sample_rate_hz: u32,
    ) -> (Vec<(u64, Vec<f32>)>, Vec<f32>) {
        let (sample_tx, sample_rx) = mpsc::channel::<Vec<f32>>();
        let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
        let level_cb: Arc<Mutex<Option<Arc<dyn Fn(&[f32]) + Send + Sync + 'static>>>> =
            Arc::new(Mutex::new(None));
        let chunk_cb: Arc<Mutex<Option<ChunkCallback>>> = Arc::new(Mutex::new(None));
        let chunk_duration_cell = Arc::new(Mutex::new(chunk_duration));

        let emitted: Arc<StdMutex<Vec<(u64, Vec<f32>)>>> = Arc::new(StdMutex::new(Vec::new()));
        let emitted_cb = emitted.clone();
        *chunk_cb.lock().unwrap() = Some(Arc::new(move |chunk_id, frames: &[f32]| {
            emitted_cb.lock().unwrap().push((chunk_id, frames.to_vec()));
        }));

        let consumer = std::thread::spawn(move || {
            run_consumer(sample_rx, cmd_rx, level_cb, chunk_cb, chunk_duration_cell, sample_rate_hz);
        });

        cmd_tx.send(Cmd::Start).unwrap();
        for read in reads {
            sample_tx.send(read).unwrap();
        }
        // Give the consumer a moment to drain the sample channel before stopping.
        std::thread::sleep(Duration::from_millis(20));

        let (resp_tx, resp_rx) = mpsc::channel();
        cmd_tx.send(Cmd::Stop(resp_tx)).unwrap();
        let tail = resp_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        cmd_tx.send(Cmd::Shutdown).unwrap();
        consumer.join().unwrap();

        let chunks = emitted.lock().unwrap().clone();
        (chunks, tail)
    }

    #[test]
    fn chunks_plus_tail_reconstruct_full_buffer() {
        // 16kHz, 100ms chunks => 1600 samples/chunk. Feed reads of 700
        // samples each (smaller than a chunk, so cuts land mid-read).
        let reads: Vec<Vec<f32>> = (0..10)
            .map(|i| (0..700).map(|j| (i * 700 + j) as f32).collect())
            .collect();
        let total: Vec<f32> = reads.iter().flatten().copied().collect();

        let (chunks, tail) = run_session(reads, Duration::from_millis(100), 16_000);

        let mut reconstructed = Vec::new();
        for (idx, (chunk_id, frames)) in chunks.iter().enumerate() {
            assert_eq!(*chunk_id, idx as u64);
            reconstructed.extend_from_slice(frames);
        }
        reconstructed.extend_from_slice(&tail);

        assert_eq!(reconstructed, total);
        // With 7000 samples total and 1600/chunk, expect 4 full chunks and a tail.
        assert_eq!(chunks.len(), 4);
        assert_eq!(tail.len(), 7000 - 4 * 1600);
    }

    #[test]
    fn stopping_before_a_full_chunk_emits_no_chunks() {
        let reads = vec![vec![1.0_f32; 100]];
        let (chunks, tail) = run_session(reads, Duration::from_secs(15), 16_000);
        assert!(chunks.is_empty());
        assert_eq!(tail.len(), 100);
    }

    #[test]
    fn error_kinds_classify_as_expected() {
        use speakcore_core::types::ErrorKind;
        assert_eq!(AudioCaptureError::NoInputDevice.kind(), ErrorKind::AudioDevice);
        assert_eq!(AudioCaptureError::WorkerTimeout.kind(), ErrorKind::Timeout);
        assert_eq!(AudioCaptureError::NotStarted.kind(), ErrorKind::ValidationFailure);
        assert_eq!(AudioCaptureError::Channel.kind(), ErrorKind::Unknown);
    }
}
