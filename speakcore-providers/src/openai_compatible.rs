use crate::request::{Body, HttpRequest};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiCompatibleChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

pub fn build_chat_completions_request(
    cfg: &OpenAiCompatibleChatConfig,
    messages: &[ChatMessage],
) -> HttpRequest {
    build_chat_completions_request_with_max_tokens(cfg, messages, None)
}

/// Same as [`build_chat_completions_request`], but lets the caller cap
/// `max_tokens` (e.g. the test-connection path uses a tiny budget).
pub fn build_chat_completions_request_with_max_tokens(
    cfg: &OpenAiCompatibleChatConfig,
    messages: &[ChatMessage],
    max_tokens: Option<u32>,
) -> HttpRequest {
    let url = join_url(&cfg.base_url, "/chat/completions");

    let mut payload = json!({
        "model": cfg.model,
        "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
        "temperature": 0.3,
        "top_p": 0.9,
    });
    if let Some(max_tokens) = max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }

    HttpRequest {
        method: "POST".into(),
        url,
        headers: vec![
            ("Content-Type".into(), "application/json".into()),
            ("Authorization".into(), format!("Bearer {}", cfg.api_key)),
        ],
        body: Body::Json(payload.to_string()),
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}
