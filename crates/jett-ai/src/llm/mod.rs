pub mod anthropic;
pub mod ollama;

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use jett_core::config::RouterConfig;
use jett_core::error::BackendError;
use jett_core::interfaces::{LlmBackend, TokenStream};

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;

/// Tokens buffered between the HTTP reader task and the consumer.
const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// Local backend plus the cloud backend, if one is configured.
pub fn build_backends(cfg: &RouterConfig) -> (Arc<dyn LlmBackend>, Option<Arc<dyn LlmBackend>>) {
    let local: Arc<dyn LlmBackend> = Arc::new(OllamaBackend::from_config(cfg));
    let cloud = AnthropicBackend::from_config(cfg).map(|c| Arc::new(c) as Arc<dyn LlmBackend>);
    if cloud.is_none() {
        tracing::info!(
            "No cloud API key in ${}, cloud queries will be served locally",
            cfg.cloud_api_key_env
        );
    }
    (local, cloud)
}

/// Splits a byte stream into complete text lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            lines.push(line);
        }
        lines
    }

    /// Whatever is left after the body ends without a final newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

/// What a backend-specific line parser found.
pub(crate) enum LineEvent {
    Token(String),
    Done,
    Skip,
}

/// Drive an HTTP body through `parse` on a reader task and expose the tokens
/// as a [`TokenStream`]. The task stops when the consumer drops the stream.
pub(crate) fn spawn_line_stream<S, B, E, F>(body: S, mut parse: F) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
    F: FnMut(&str) -> Result<LineEvent, BackendError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut body = Box::pin(body);
        let mut lines = LineBuffer::default();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tx.send(Err(BackendError::Stream(e.to_string()))).await;
                    return;
                }
            };
            for line in lines.push(chunk.as_ref()) {
                match parse(&line) {
                    Ok(LineEvent::Token(t)) => {
                        if tx.send(Ok(t)).await.is_err() {
                            return;
                        }
                    }
                    Ok(LineEvent::Done) => return,
                    Ok(LineEvent::Skip) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        }
        if let Some(line) = lines.finish() {
            if let Ok(LineEvent::Token(t)) = parse(&line) {
                let _ = tx.send(Ok(t)).await;
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

/// Map a request failure to the backend taxonomy.
pub(crate) fn classify_send_error(e: reqwest::Error) -> BackendError {
    if e.is_connect() || e.is_timeout() {
        BackendError::Unavailable(e.to_string())
    } else {
        BackendError::Http(e.to_string())
    }
}

/// Map a non-success status to the backend taxonomy.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> BackendError {
    let detail = format!("{status}: {}", body.chars().take(200).collect::<String>());
    match status.as_u16() {
        401 | 403 => BackendError::Unauthenticated(detail),
        429 | 500..=599 => BackendError::Unavailable(detail),
        _ => BackendError::Http(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_joins_split_chunks() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"{\"a\":").is_empty());
        assert_eq!(buf.push(b"1}\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(buf.push(b":2}\r\n"), vec!["{\"b\":2}"]);
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn line_buffer_keeps_unterminated_tail() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"last line").is_empty());
        assert_eq!(buf.finish().as_deref(), Some("last line"));
    }

    #[test]
    fn status_mapping() {
        use reqwest::StatusCode;
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            BackendError::Unauthenticated(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad"),
            BackendError::Http(_)
        ));
    }

    #[tokio::test]
    async fn line_stream_stops_at_done() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"a\nb\n".to_vec()),
            Ok(b"END\nc\n".to_vec()),
        ];
        let tokens = spawn_line_stream(futures_util::stream::iter(chunks), |line| {
            Ok(match line {
                "END" => LineEvent::Done,
                other => LineEvent::Token(other.to_string()),
            })
        });
        let out: Vec<String> = tokens.map(|t| t.unwrap()).collect().await;
        assert_eq!(out, vec!["a", "b"]);
    }
}
