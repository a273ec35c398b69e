use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use speakcore_core::types::AppIdentity;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioInput {
    // Audio is mono PCM samples at `sample_rate_hz`.
    // The engine expects that capture/resampling happened at the boundary.
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancedText {
    pub text: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub clipboard: Option<String>,
    pub selected_text: Option<String>,
    pub window_context: Option<String>,
    pub custom_vocabulary: Option<String>,
}

#[async_trait]
pub trait AppContextProvider: Send + Sync {
    async fn foreground_app(&self) -> anyhow::Result<AppIdentity>;
    async fn snapshot_context(&self) -> anyhow::Result<ContextSnapshot>;
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        provider: &str,
        model: &str,
        language: &str,
    ) -> anyhow::Result<Transcript>;

    /// Loads `model` so the first real `transcribe` call doesn't pay the
    /// load latency. `provider` carries the same routing hint `transcribe`
    /// takes. Providers with no real loading step (cloud APIs) can leave
    /// this as a no-op; providers that hold local model state (whisper.cpp
    /// contexts) should make this eager and idempotent.
    async fn load_model(&self, _provider: &str, _model: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Releases whatever `load_model` acquired. A no-op for providers with
    /// no local model state.
    async fn unload_model(&self, _provider: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn enhance(
        &self,
        base_url: &str,
        api_key: &str,
        model: &str,
        system_message: &str,
        user_message: &str,
    ) -> anyhow::Result<EnhancedText>;

    /// Exercises the same `enhance` path with a minimal one-token prompt, so
    /// a "test connection" button in the UI goes through the real retry and
    /// error-handling logic instead of a bespoke healthcheck call.
    async fn test_connection(&self, base_url: &str, api_key: &str, model: &str) -> anyhow::Result<()> {
        self.enhance(base_url, api_key, model, "ok", "ok").await?;
        Ok(())
    }
}

#[async_trait]
pub trait Inserter: Send + Sync {
    async fn insert(
        &self,
        text: &str,
        mode: speakcore_core::types::InsertMode,
    ) -> anyhow::Result<()>;

    /// Like `insert`, but `recording_mode` tells a clipboard-based inserter
    /// whether the caller already snapshotted the clipboard itself and will
    /// restore it, so the inserter must not also save-and-restore around
    /// its own paste (doing so would race the caller's restore and clobber
    /// it). Inserters with no clipboard state of their own (keystroke-only,
    /// test doubles) can ignore `recording_mode` and just delegate.
    async fn insert_with_recording_mode(
        &self,
        text: &str,
        mode: speakcore_core::types::InsertMode,
        _recording_mode: bool,
    ) -> anyhow::Result<()> {
        self.insert(text, mode).await
    }
}
