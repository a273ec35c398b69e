use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptId(pub Uuid);

impl PromptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExePath(pub String);

impl ExePath {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessName(pub String);

impl ProcessName {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowTitle(pub String);

impl WindowTitle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub exe_path: Option<ExePath>,
    pub process_name: Option<ProcessName>,
    pub window_title: Option<WindowTitle>,
}

impl AppIdentity {
    pub fn new() -> Self {
        Self {
            exe_path: None,
            process_name: None,
            window_title: None,
        }
    }

    pub fn with_exe_path(mut self, exe_path: impl Into<String>) -> Self {
        self.exe_path = Some(ExePath::new(exe_path));
        self
    }

    pub fn with_process_name(mut self, process_name: impl Into<String>) -> Self {
        self.process_name = Some(ProcessName::new(process_name));
        self
    }

    pub fn with_window_title(mut self, window_title: impl Into<String>) -> Self {
        self.window_title = Some(WindowTitle::new(window_title));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertMode {
    Paste,
    PasteAndEnter,
    ShiftInsert,
}

/// The 20 error kinds surfaced to callers, grouped by the three-tier propagation
/// policy: recovered locally, surfaced to the user, or fatal to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AudioDevice,
    AudioOverflow,
    ModelLoad,
    Transcription,
    CloudAuth,
    CloudRateLimit,
    CloudTransient,
    CloudFatal,
    Network,
    Timeout,
    ClipboardBusy,
    InputInjection,
    ConfigInvalid,
    ConfigCorrupt,
    HotkeyConflict,
    Permission,
    ValidationFailure,
    GpuUnavailable,
    GpuMemory,
    Unknown,
}

impl ErrorKind {
    /// Short, user-facing recovery suggestions. Every kind has 2-6 entries.
    pub fn suggestions(self) -> &'static [&'static str] {
        match self {
            ErrorKind::AudioDevice => &[
                "Check that a microphone is connected.",
                "Choose a specific input device in Settings.",
                "Grant microphone permission to the app.",
            ],
            ErrorKind::AudioOverflow => &[
                "Try a shorter recording.",
                "Close other apps that use the microphone.",
            ],
            ErrorKind::ModelLoad => &[
                "Re-download the selected model.",
                "Check available disk space.",
                "Pick a different model in Settings.",
                "Verify the model file isn't corrupted.",
            ],
            ErrorKind::Transcription => &[
                "Retry the recording.",
                "Switch to a different speech-to-text provider.",
                "Check the audio input level.",
            ],
            ErrorKind::CloudAuth => &[
                "Re-enter the API key in Settings.",
                "Verify the key hasn't been revoked.",
                "Check the account has an active subscription.",
            ],
            ErrorKind::CloudRateLimit => &[
                "Wait a moment and try again.",
                "Reduce request frequency.",
                "Upgrade the account plan if this persists.",
            ],
            ErrorKind::CloudTransient => &[
                "Retry the request.",
                "Check the provider's status page.",
            ],
            ErrorKind::CloudFatal => &[
                "Check the request payload against provider docs.",
                "Contact support if this persists.",
            ],
            ErrorKind::Network => &[
                "Check the network connection.",
                "Verify a firewall or proxy isn't blocking the request.",
                "Retry once connectivity is restored.",
            ],
            ErrorKind::Timeout => &[
                "Retry the request.",
                "Check network latency.",
                "Increase the configured timeout if this persists.",
            ],
            ErrorKind::ClipboardBusy => &[
                "Close the app holding the clipboard and retry.",
                "Retry the paste manually.",
            ],
            ErrorKind::InputInjection => &[
                "Click into the target text field and retry.",
                "Switch to clipboard-only insertion in Settings.",
                "Grant accessibility/input permission to the app.",
            ],
            ErrorKind::ConfigInvalid => &[
                "Check the edited configuration value.",
                "Reset the offending section to defaults.",
            ],
            ErrorKind::ConfigCorrupt => &[
                "A backup of the corrupted file was kept alongside it.",
                "Defaults were loaded so the app can keep running.",
                "Restore the backup manually if it is recoverable.",
            ],
            ErrorKind::HotkeyConflict => &[
                "Choose a different hotkey in Settings.",
                "Close the other app using that hotkey.",
            ],
            ErrorKind::Permission => &[
                "Grant the requested OS permission.",
                "Restart the app after granting permission.",
            ],
            ErrorKind::ValidationFailure => &[
                "Check the value against the field's constraints.",
                "Use the default value instead.",
            ],
            ErrorKind::GpuUnavailable => &[
                "Fall back to CPU transcription in Settings.",
                "Update GPU drivers.",
            ],
            ErrorKind::GpuMemory => &[
                "Pick a smaller model.",
                "Close other GPU-heavy applications.",
                "Fall back to CPU transcription in Settings.",
            ],
            ErrorKind::Unknown => &[
                "Retry the action.",
                "Check logs for details.",
                "Report the issue if it persists.",
            ],
        }
    }
}
