use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use jett_core::config::RouterConfig;
use jett_core::error::BackendError;
use jett_core::interfaces::{LlmBackend, TokenStream};

use super::{classify_send_error, classify_status, spawn_line_stream, LineEvent};

/// Local generation through an Ollama server (`/api/chat`, NDJSON streaming).
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    system_prompt: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    think: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str, system_prompt: &str, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
            max_tokens,
        }
    }

    pub fn from_config(cfg: &RouterConfig) -> Self {
        Self::new(
            &cfg.ollama_url,
            &cfg.local_model,
            &cfg.system_prompt,
            cfg.local_max_tokens,
        )
    }
}

/// One NDJSON line of an `/api/chat` stream.
fn parse_chunk(line: &str) -> Result<LineEvent, BackendError> {
    if line.trim().is_empty() {
        return Ok(LineEvent::Skip);
    }
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| BackendError::Stream(format!("bad ollama chunk: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(BackendError::Stream(err));
    }
    if chunk.done {
        return Ok(LineEvent::Done);
    }
    match chunk.message {
        Some(m) if !m.content.is_empty() => Ok(LineEvent::Token(m.content)),
        _ => Ok(LineEvent::Skip),
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream, BackendError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream: true,
            think: false,
            options: ChatOptions {
                num_predict: self.max_tokens,
            },
        };

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        tracing::debug!(model = %self.model, "Ollama stream opened");
        Ok(spawn_line_stream(resp.bytes_stream(), parse_chunk))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::TryStreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn parse_content_and_done() {
        assert!(matches!(
            parse_chunk(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#),
            Ok(LineEvent::Token(t)) if t == "Hi"
        ));
        assert!(matches!(
            parse_chunk(r#"{"message":{"role":"assistant","content":""},"done":true}"#),
            Ok(LineEvent::Done)
        ));
        assert!(matches!(parse_chunk(""), Ok(LineEvent::Skip)));
        assert!(parse_chunk(r#"{"error":"model not found"}"#).is_err());
        assert!(parse_chunk("not json").is_err());
    }

    #[tokio::test]
    async fn streams_tokens_from_server() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"It is \"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"noon.\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "jett-qwen3",
                "stream": true,
                "options": {"num_predict": 80}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri(), "jett-qwen3", "sys", 80);
        let tokens: Vec<String> = backend
            .stream("what time is it")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(tokens.concat(), "It is noon.");
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let backend = OllamaBackend::new(&server.uri(), "m", "sys", 10);
        assert!(matches!(
            backend.stream("hi").await.err(),
            Some(BackendError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let backend = OllamaBackend::new("http://127.0.0.1:9", "m", "sys", 10);
        assert!(matches!(
            backend.stream("hi").await.err(),
            Some(BackendError::Unavailable(_))
        ));
    }
}
