use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use jett_core::config::RouterConfig;
use jett_core::error::BackendError;
use jett_core::interfaces::{LlmBackend, TokenStream};

use super::{classify_send_error, classify_status, spawn_line_stream, LineEvent};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// How long the backend reports itself unavailable after a connection failure.
const UNAVAILABLE_COOLDOWN: Duration = Duration::from_secs(30);
/// How long after the API rejected the key.
const UNAUTHENTICATED_COOLDOWN: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Cloud generation through the Anthropic Messages API (SSE streaming).
pub struct AnthropicBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    down_until: Mutex<Option<Instant>>,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    stream: bool,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct SseEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl AnthropicBackend {
    pub fn new(url: &str, api_key: String, model: &str, system_prompt: &str, max_tokens: u32) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self {
            client,
            url: url.to_string(),
            api_key,
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
            max_tokens,
            down_until: Mutex::new(None),
        }
    }

    /// `None` when no API key is present in the configured variable.
    pub fn from_config(cfg: &RouterConfig) -> Option<Self> {
        let key = std::env::var(&cfg.cloud_api_key_env).ok()?;
        if key.trim().is_empty() {
            return None;
        }
        Some(Self::new(
            &cfg.cloud_url,
            key,
            &cfg.cloud_model,
            &cfg.system_prompt,
            cfg.max_tokens,
        ))
    }

    fn mark_down(&self, err: &BackendError) {
        let cooldown = match err {
            BackendError::Unauthenticated(_) => UNAUTHENTICATED_COOLDOWN,
            BackendError::Unavailable(_) => UNAVAILABLE_COOLDOWN,
            _ => return,
        };
        let mut down = self.down_until.lock().unwrap_or_else(|e| e.into_inner());
        *down = Some(Instant::now() + cooldown);
    }
}

/// One line of the SSE body. Only `data:` lines carry payloads.
fn parse_sse_line(line: &str) -> Result<LineEvent, BackendError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(LineEvent::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let event: SseEvent = serde_json::from_str(data)
        .map_err(|e| BackendError::Stream(format!("bad SSE payload: {e}")))?;
    match event.kind.as_str() {
        "content_block_delta" => match event.delta {
            Some(d) if d.kind == "text_delta" && !d.text.is_empty() => Ok(LineEvent::Token(d.text)),
            _ => Ok(LineEvent::Skip),
        },
        "message_stop" => Ok(LineEvent::Done),
        "error" => Err(BackendError::Stream(
            event.error.map(|e| e.message).unwrap_or_else(|| "unknown".into()),
        )),
        _ => Ok(LineEvent::Skip),
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_available(&self) -> bool {
        let down = self.down_until.lock().unwrap_or_else(|e| e.into_inner());
        down.map_or(true, |until| Instant::now() >= until)
    }

    fn mark_unavailable(&self, reason: &BackendError) {
        self.mark_down(reason);
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream, BackendError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &self.system_prompt,
            stream: true,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let result = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error);

        let resp = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                let status = r.status();
                let body = r.text().await.unwrap_or_default();
                let err = classify_status(status, &body);
                self.mark_down(&err);
                return Err(err);
            }
            Err(err) => {
                self.mark_down(&err);
                return Err(err);
            }
        };

        tracing::debug!(model = %self.model, "Anthropic stream opened");
        Ok(spawn_line_stream(resp.bytes_stream(), parse_sse_line))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::TryStreamExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn parse_text_delta() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        assert!(matches!(parse_sse_line(line), Ok(LineEvent::Token(t)) if t == "Hello"));
    }

    #[test]
    fn parse_control_lines() {
        assert!(matches!(parse_sse_line("event: ping"), Ok(LineEvent::Skip)));
        assert!(matches!(parse_sse_line(""), Ok(LineEvent::Skip)));
        assert!(matches!(
            parse_sse_line(r#"data: {"type":"message_stop"}"#),
            Ok(LineEvent::Done)
        ));
        assert!(parse_sse_line(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#).is_err());
    }

    #[test]
    fn missing_key_means_no_backend() {
        let cfg = RouterConfig {
            cloud_api_key_env: "JETT_TEST_KEY_THAT_IS_NOT_SET".into(),
            ..RouterConfig::default()
        };
        assert!(AnthropicBackend::from_config(&cfg).is_none());
    }

    #[tokio::test]
    async fn streams_sse_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Eventual \"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"consistency.\"}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(
            &format!("{}/v1/messages", server.uri()),
            "sk-test".into(),
            "claude",
            "sys",
            150,
        );
        let tokens: Vec<String> = backend
            .stream("explain")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(tokens.concat(), "Eventual consistency.");
    }

    #[tokio::test]
    async fn rejected_key_is_unauthenticated_and_marks_down() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(&server.uri(), "bad".into(), "claude", "sys", 150);
        assert!(backend.is_available());
        assert!(matches!(
            backend.stream("explain").await.err(),
            Some(BackendError::Unauthenticated(_))
        ));
        assert!(!backend.is_available());
    }
}
