mod chunking;
mod resample;

#[cfg(any(windows, target_os = "macos"))]
mod recorder;

pub use chunking::ChunkAccumulator;

#[cfg(any(windows, target_os = "macos"))]
pub use recorder::{
    AudioCaptureError, AudioRecorder, CapturedAudio, DEFAULT_CHUNK_DURATION, RecorderState,
};
