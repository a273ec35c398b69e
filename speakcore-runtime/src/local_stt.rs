use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use speakcore_core::types::ErrorKind;
use speakcore_engine::traits::{AudioInput, Transcript};

/// Categorized model-load failure, downcastable out of the `anyhow::Error`
/// chain so callers (the transcription worker, `AppService`) can attach
/// `ErrorKind::suggestions()` without string-matching the message.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("local whisper model does not exist: {0:?}")]
    NotFound(PathBuf),

    #[error("local whisper model is GGUF (.gguf), but the local engine requires whisper.cpp GGML (.bin) models: {0:?}")]
    UnsupportedFormat(PathBuf),

    #[error("failed to load whisper model: {0}")]
    LoadFailed(String),
}

impl ModelLoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelLoadError::NotFound(_) => ErrorKind::ModelLoad,
            ModelLoadError::UnsupportedFormat(_) => ErrorKind::ModelLoad,
            ModelLoadError::LoadFailed(msg) => classify_load_failure_message(msg),
        }
    }
}

/// Heuristic classification of the whisper.cpp load failure text into the
/// GPU/memory/download/format buckets spec'd for model-load recovery
/// suggestions. whisper-rs surfaces these as plain strings, not typed
/// errors, so this is a best-effort substring match, same approach as
/// `speakcore_appcore::service::user_facing_audio_error`.
fn classify_load_failure_message(msg: &str) -> ErrorKind {
    let lower = msg.to_lowercase();
    if lower.contains("out of memory") || lower.contains("oom") || lower.contains("cublas") && lower.contains("alloc") {
        ErrorKind::GpuMemory
    } else if lower.contains("cuda") || lower.contains("cublas") || lower.contains("metal") || lower.contains("gpu") {
        ErrorKind::GpuUnavailable
    } else {
        ErrorKind::ModelLoad
    }
}

/// Downcasts a model-load error returned by any [`speakcore_engine::traits::SttProvider`]
/// into its [`ErrorKind`], falling back to [`ErrorKind::Unknown`] for
/// providers (e.g. cloud ASR) that don't surface a [`ModelLoadError`].
pub fn classify_load_error(err: &anyhow::Error) -> ErrorKind {
    err.downcast_ref::<ModelLoadError>()
        .map(ModelLoadError::kind)
        .unwrap_or(ErrorKind::Unknown)
}

#[derive(Clone)]
pub struct LocalWhisperSttProvider {
    cache: Arc<Mutex<Option<CachedModel>>>,
}

struct CachedModel {
    model_path: PathBuf,
    ctx: Arc<WhisperContext>,
}

impl Default for LocalWhisperSttProvider {
    fn default() -> Self {
        Self {
            cache: Arc::new(Mutex::new(None)),
        }
    }
}

impl LocalWhisperSttProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_load_context(&self, model_path: &PathBuf) -> anyhow::Result<Arc<WhisperContext>> {
        let mut guard = self.cache.lock().unwrap();

        if let Some(cached) = guard.as_ref() {
            if cached.model_path == *model_path {
                return Ok(cached.ctx.clone());
            }
        }

        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path.clone()).into());
        }

        // User-friendly error: whisper-rs (whisper.cpp) expects the legacy GGML `.bin` format.
        // Our app previously used GGUF models; detect that early so the error is actionable.
        if crate::models::has_gguf_magic(model_path.as_path()).unwrap_or(false) {
            return Err(ModelLoadError::UnsupportedFormat(model_path.clone()).into());
        }

        let ctx = WhisperContext::new_with_params(
            model_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("invalid model path"))?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| ModelLoadError::LoadFailed(e.to_string()))?;

        let ctx = Arc::new(ctx);
        *guard = Some(CachedModel {
            model_path: model_path.clone(),
            ctx: ctx.clone(),
        });
        Ok(ctx)
    }

    fn transcribe_blocking(
        &self,
        audio: &AudioInput,
        model_path: PathBuf,
        language: &str,
    ) -> anyhow::Result<String> {
        if audio.sample_rate_hz != 16_000 {
            return Err(anyhow::anyhow!(
                "unsupported sample rate {} (expected 16000)",
                audio.sample_rate_hz
            ));
        }

        let ctx = self.get_or_load_context(&model_path)?;
        let mut state = ctx
            .create_state()
            .map_err(|e| anyhow::anyhow!("failed to create whisper state: {e}"))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        if language != "auto" {
            params.set_language(Some(language));
        }

        // Keep console output disabled.
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio.samples)
            .map_err(|e| anyhow::anyhow!("whisper inference failed: {e}"))?;

        let n = state.full_n_segments();

        let mut out = String::new();
        for i in 0..n {
            let seg = state
                .get_segment(i)
                .ok_or_else(|| anyhow::anyhow!("failed reading whisper segment {i}: out of bounds"))?;
            let text = seg
                .to_str_lossy()
                .map_err(|e| anyhow::anyhow!("failed reading whisper segment {i}: {e}"))?;
            out.push_str(text.trim());
            if i + 1 < n {
                out.push(' ');
            }
        }

        Ok(out.trim().to_string())
    }
}

#[async_trait::async_trait]
impl speakcore_engine::traits::SttProvider for LocalWhisperSttProvider {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        provider: &str,
        model: &str,
        language: &str,
    ) -> anyhow::Result<Transcript> {
        if provider != "local" {
            return Err(anyhow::anyhow!("unsupported STT provider: {provider}"));
        }

        // MVP convention: for local whisper, `model` is a filesystem path to a whisper.cpp GGML `.bin` model.
        let model_path = PathBuf::from(model);

        let text = tokio::task::spawn_blocking({
            let this = self.clone();
            let audio = audio.clone();
            let language = language.to_string();
            move || this.transcribe_blocking(&audio, model_path, &language)
        })
        .await
        .map_err(|e| anyhow::anyhow!("whisper task join failed: {e}"))??;

        Ok(Transcript {
            text,
            provider: provider.into(),
            model: model.into(),
        })
    }

    async fn load_model(&self, _provider: &str, model: &str) -> anyhow::Result<()> {
        let model_path = PathBuf::from(model);
        tokio::task::spawn_blocking({
            let this = self.clone();
            move || this.get_or_load_context(&model_path).map(|_| ())
        })
        .await
        .map_err(|e| anyhow::anyhow!("whisper model load task join failed: {e}"))?
    }

    async fn unload_model(&self, _provider: &str) -> anyhow::Result<()> {
        *self.cache.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speakcore_engine::traits::SttProvider;

    #[tokio::test]
    async fn rejects_missing_model_path() {
        let stt = LocalWhisperSttProvider::new();
        let audio = AudioInput {
            sample_rate_hz: 16_000,
            samples: vec![0.0; 160],
        };

        let err = stt
            .transcribe(&audio, "local", "/definitely/does/not/exist.bin", "en")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn rejects_non_16khz_audio() {
        let stt = LocalWhisperSttProvider::new();
        let audio = AudioInput {
            sample_rate_hz: 48_000,
            samples: vec![0.0; 160],
        };

        let err = stt.transcribe(&audio, "local", "./model.bin", "en").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn missing_model_load_classifies_as_model_load() {
        let stt = LocalWhisperSttProvider::new();
        let err = stt.load_model("local", "/definitely/does/not/exist.bin").await.unwrap_err();
        assert_eq!(classify_load_error(&err), ErrorKind::ModelLoad);
    }

    #[test]
    fn classifies_gpu_and_memory_failure_text() {
        assert_eq!(
            classify_load_failure_message("CUDA error: no device"),
            ErrorKind::GpuUnavailable
        );
        assert_eq!(
            classify_load_failure_message("ggml_backend_cuda out of memory"),
            ErrorKind::GpuMemory
        );
        assert_eq!(
            classify_load_failure_message("failed to parse header"),
            ErrorKind::ModelLoad
        );
    }

    #[test]
    fn classify_load_error_falls_back_to_unknown_for_foreign_errors() {
        let err = anyhow::anyhow!("some unrelated cloud provider error");
        assert_eq!(classify_load_error(&err), ErrorKind::Unknown);
    }
}
