pub mod engine;
pub mod session;
pub mod traits;

pub use engine::{EngineConfig, EngineError, SpeakcoreEngine};
pub use session::{SessionResult, SessionStage, SessionTimings};
pub use traits::{
    AppContextProvider, AudioInput, ContextSnapshot, EnhancedText, Inserter, LlmProvider,
    SttProvider, Transcript,
};
