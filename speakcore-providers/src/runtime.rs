use crate::request::{Body, HttpRequest};
use anyhow::{Context, anyhow};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Process-wide HTTP client, built once and reused across every provider call
/// so TCP/TLS connections get pooled instead of torn down per request.
fn shared_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(reqwest::Client::new)
}

pub async fn execute(req: &HttpRequest) -> anyhow::Result<HttpResponse> {
    let client = shared_client();

    let mut headers = HeaderMap::new();
    for (k, v) in &req.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name: {k}"))?;
        let value =
            HeaderValue::from_str(v).with_context(|| format!("invalid header value for {k}"))?;
        headers.insert(name, value);
    }

    let builder = match req.method.as_str() {
        "GET" => client.get(&req.url),
        "POST" => client.post(&req.url),
        "PUT" => client.put(&req.url),
        "DELETE" => client.delete(&req.url),
        other => return Err(anyhow!("unsupported method: {other}")),
    }
    .headers(headers);

    let builder = match &req.body {
        Body::Empty => builder,
        Body::Json(s) => builder.body(s.clone()),
        Body::MultipartFormData { bytes, .. } => builder.body(bytes.clone()),
    };

    let resp = builder.send().await.context("http request failed")?;
    let status = resp.status().as_u16();
    let body = resp
        .bytes()
        .await
        .context("failed reading response body")?
        .to_vec();

    Ok(HttpResponse { status, body })
}

/// Latency and token accounting for a single `execute` call, attached
/// best-effort: `prompt_tokens`/`completion_tokens` are only populated when
/// the caller already knows how to parse the body (OpenAI-compatible chat
/// responses), so this stays a plain struct the caller fills in rather than
/// `execute_observed` trying to parse every possible provider's body shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestObservation {
    pub attempts: u32,
    pub status: u16,
    pub latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Like [`execute`], but times the call and returns a [`RequestObservation`]
/// alongside the response. `attempts` is always 1 here; callers that also use
/// [`crate::retry::execute_with_retry`] should prefer its observation instead,
/// which tracks the real attempt count.
pub async fn execute_observed(
    req: &HttpRequest,
) -> anyhow::Result<(HttpResponse, RequestObservation)> {
    let start = std::time::Instant::now();
    let response = execute(req).await?;
    let observation = RequestObservation {
        attempts: 1,
        status: response.status,
        latency_ms: start.elapsed().as_millis() as u64,
        prompt_tokens: 0,
        completion_tokens: 0,
    };
    Ok((response, observation))
}

/// Masks an API key for logging, keeping only a handful of trailing
/// characters so a log line stays useful for "is this the right key" checks
/// without being able to reconstruct the secret from logs.
pub fn mask_key(key: &str) -> String {
    const VISIBLE_SUFFIX: usize = 4;
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= VISIBLE_SUFFIX {
        return "xxxx\u{2026}xxxx".to_string();
    }
    let suffix: String = chars[chars.len() - VISIBLE_SUFFIX..].iter().collect();
    format!("xxxx\u{2026}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_key_keeps_trailing_chars() {
        assert_eq!(mask_key("sk-abcdef1234"), "xxxx\u{2026}1234");
    }

    #[test]
    fn mask_key_fully_masks_short_keys() {
        assert_eq!(mask_key("abc"), "xxxx\u{2026}xxxx");
    }
}
