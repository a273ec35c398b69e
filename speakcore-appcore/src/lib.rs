pub mod service;

pub use service::{AppService, user_facing_audio_error};
