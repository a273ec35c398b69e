pub mod config_store;
pub mod defaults;
pub mod history;
pub mod ipc;
pub mod llm;
pub mod local_stt;
pub mod models;
pub mod reload;
pub mod runtime_engine;
pub mod secrets;
pub mod stt;
pub mod stt_router;
pub mod worker;

pub use config_store::ConfigStore;
pub use history::{HistoryRecord, HistoryStore};
pub use runtime_engine::build_engine_from_config;
