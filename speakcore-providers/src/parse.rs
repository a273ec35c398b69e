use anyhow::{Context, anyhow};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ElevenLabsTranscriptionResponse {
    pub text: String,
}

pub fn parse_elevenlabs_transcription(body: &[u8]) -> anyhow::Result<String> {
    let resp: ElevenLabsTranscriptionResponse =
        serde_json::from_slice(body).context("decode ElevenLabs JSON")?;
    Ok(resp.text)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

pub fn parse_openai_chat_completion(body: &[u8]) -> anyhow::Result<String> {
    parse_openai_chat_completion_with_usage(body).map(|(text, _)| text)
}

/// Same as [`parse_openai_chat_completion`], but also returns token usage when
/// the response includes a `usage` object (absent entirely for some
/// OpenAI-compatible backends, in which case it comes back zeroed).
pub fn parse_openai_chat_completion_with_usage(body: &[u8]) -> anyhow::Result<(String, Usage)> {
    let resp: OpenAiChatResponse = serde_json::from_slice(body).context("decode chat JSON")?;
    let usage = resp
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("no content in chat completion response"))?;
    Ok((content, usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_elevenlabs_text() {
        let body = br#"{"text":"hello"}"#;
        assert_eq!(parse_elevenlabs_transcription(body).unwrap(), "hello");
    }

    #[test]
    fn parses_openai_chat_content() {
        let body = br#"{"choices":[{"message":{"content":"hi"}}]}"#;
        assert_eq!(parse_openai_chat_completion(body).unwrap(), "hi");
    }

    #[test]
    fn openai_missing_content_errors() {
        let body = br#"{"choices":[{"message":{}}]}"#;
        assert!(parse_openai_chat_completion(body).is_err());
    }

    #[test]
    fn parses_usage_when_present() {
        let body = br#"{"choices":[{"message":{"content":"hi"}}],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#;
        let (text, usage) = parse_openai_chat_completion_with_usage(body).unwrap();
        assert_eq!(text, "hi");
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 3);
    }

    #[test]
    fn usage_defaults_to_zero_when_absent() {
        let body = br#"{"choices":[{"message":{"content":"hi"}}]}"#;
        let (_, usage) = parse_openai_chat_completion_with_usage(body).unwrap();
        assert_eq!(usage, Usage::default());
    }
}
