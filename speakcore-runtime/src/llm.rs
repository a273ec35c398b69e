use speakcore_engine::traits::EnhancedText;

#[derive(Clone)]
pub struct OpenAiCompatibleLlmProvider {
    api_key: String,
}

impl std::fmt::Debug for OpenAiCompatibleLlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleLlmProvider")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiCompatibleLlmProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl speakcore_engine::traits::LlmProvider for OpenAiCompatibleLlmProvider {
    async fn enhance(
        &self,
        base_url: &str,
        _api_key: &str,
        model: &str,
        system_message: &str,
        user_message: &str,
    ) -> anyhow::Result<EnhancedText> {
        let cfg = speakcore_providers::openai_compatible::OpenAiCompatibleChatConfig {
            base_url: base_url.to_string(),
            api_key: self.api_key.clone(),
            model: model.to_string(),
        };

        let messages = vec![
            speakcore_providers::openai_compatible::ChatMessage {
                role: "system".into(),
                content: system_message.to_string(),
            },
            speakcore_providers::openai_compatible::ChatMessage {
                role: "user".into(),
                content: user_message.to_string(),
            },
        ];

        let req =
            speakcore_providers::openai_compatible::build_chat_completions_request(&cfg, &messages);
        let (resp, _observation) = speakcore_providers::retry::execute_with_retry(
            &req,
            &speakcore_providers::retry::RetryPolicy::default(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("OpenAI-compatible request failed: {e}"))?;

        if !(200..=299).contains(&resp.status) {
            return Err(anyhow::anyhow!(
                "OpenAI-compatible request failed: status={} body={}",
                resp.status,
                String::from_utf8_lossy(&resp.body)
            ));
        }

        let text = speakcore_providers::parse::parse_openai_chat_completion(&resp.body)?;
        Ok(EnhancedText {
            text,
            provider: "openai-compatible".into(),
            model: model.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speakcore_engine::traits::LlmProvider;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn enhance_parses_chat_completion_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"choices":[{"message":{"content":"polished text"}}]}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleLlmProvider::new("sk-test");
        let result = provider
            .enhance(&server.uri(), "sk-test", "gpt-4o-mini", "system", "user")
            .await
            .unwrap();

        assert_eq!(result.text, "polished text");
        assert_eq!(result.provider, "openai-compatible");
    }

    #[tokio::test]
    async fn enhance_surfaces_non_2xx_status_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_raw(
                r#"{"error":"invalid api key"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let provider = OpenAiCompatibleLlmProvider::new("sk-bad");
        let err = provider
            .enhance(&server.uri(), "sk-bad", "gpt-4o-mini", "system", "user")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("status=401"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let provider = OpenAiCompatibleLlmProvider::new("super-secret-key");
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("super-secret-key"));
        assert!(debug.contains("REDACTED"));
    }
}
