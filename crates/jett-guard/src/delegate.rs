//! Delegates that perform the container effect once the governor allows it.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use jett_core::config::GovernorConfig;
use jett_core::interfaces::OperationDelegate;
use jett_core::security::{Operation, OperationKind};

/// Build the delegate named in config.
pub fn build_delegate(cfg: &GovernorConfig) -> Result<Arc<dyn OperationDelegate>> {
    match cfg.delegate.as_str() {
        "dry-run" => Ok(Arc::new(DryRunDelegate)),
        "portainer" => Ok(Arc::new(PortainerDelegate::from_config(cfg)?)),
        other => bail!("Unknown delegate '{other}'"),
    }
}

/// Reports a simulated success without touching any infrastructure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunDelegate;

#[async_trait]
impl OperationDelegate for DryRunDelegate {
    async fn execute(&self, operation: &Operation) -> Result<String> {
        tracing::info!("[dry-run] {} {}", operation.kind, operation.target);
        Ok(format!(
            "[dry-run] {} on {} simulated",
            operation.kind, operation.target
        ))
    }
}

/// Talks to the Docker proxy of a Portainer endpoint.
pub struct PortainerDelegate {
    client: reqwest::Client,
    base_url: reqwest::Url,
    endpoint: u32,
    api_key: String,
    logs_tail: u32,
}

#[derive(Deserialize)]
struct ContainerInspect {
    #[serde(rename = "State")]
    state: ContainerState,
}

#[derive(Deserialize)]
struct ContainerState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "StartedAt", default)]
    started_at: String,
}

impl PortainerDelegate {
    pub fn new(base_url: &str, endpoint: u32, api_key: String, logs_tail: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = reqwest::Url::parse(base_url)
            .with_context(|| format!("Invalid Portainer URL '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            bail!("Portainer URL '{base_url}' cannot carry a path");
        }
        Ok(Self {
            client,
            base_url,
            endpoint,
            api_key,
            logs_tail,
        })
    }

    pub fn from_config(cfg: &GovernorConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.portainer_token_env).with_context(|| {
            format!("Portainer token not set in ${}", cfg.portainer_token_env)
        })?;
        Self::new(&cfg.portainer_url, cfg.portainer_endpoint, api_key, cfg.logs_tail)
    }

    /// Each piece is pushed as its own percent-encoded path segment.
    fn container_url(&self, target: &str, suffix: &str) -> Result<reqwest::Url> {
        let endpoint = self.endpoint.to_string();
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("Portainer URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["api", "endpoints", endpoint.as_str(), "docker", "containers"])
            .push(target)
            .push(suffix);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = request
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .context("Portainer request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Portainer returned {status}: {body}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl OperationDelegate for PortainerDelegate {
    async fn execute(&self, operation: &Operation) -> Result<String> {
        let target = operation.target.as_str();
        match operation.kind {
            OperationKind::Start | OperationKind::Stop | OperationKind::Restart => {
                let url = self.container_url(target, operation.kind.as_str())?;
                self.send(self.client.post(url)).await?;
                Ok(format!("{} {} done", operation.kind, target))
            }
            OperationKind::Logs => {
                let url = self.container_url(target, "logs")?;
                let tail = self.logs_tail.to_string();
                let resp = self
                    .send(self.client.get(url).query(&[
                        ("stdout", "true"),
                        ("stderr", "true"),
                        ("tail", tail.as_str()),
                    ]))
                    .await?;
                let bytes = resp.bytes().await.context("Reading log body")?;
                Ok(demux_docker_logs(&bytes))
            }
            OperationKind::Status => {
                let url = self.container_url(target, "json")?;
                let resp = self.send(self.client.get(url)).await?;
                let inspect: ContainerInspect =
                    resp.json().await.context("Parsing container inspect")?;
                Ok(format!(
                    "{target} is {} (since {})",
                    inspect.state.status, inspect.state.started_at
                ))
            }
        }
    }
}

/// Strip Docker's 8-byte stream multiplexing headers from a non-TTY log body.
/// Bodies that do not look multiplexed are returned as lossy UTF-8.
pub fn demux_docker_logs(body: &[u8]) -> String {
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;
    while rest.len() >= 8 {
        let stream = rest[0];
        if !(stream <= 2 && rest[1] == 0 && rest[2] == 0 && rest[3] == 0) {
            return String::from_utf8_lossy(body).into_owned();
        }
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        return String::from_utf8_lossy(body).into_owned();
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_names_kind_and_target() {
        let op = Operation::new(OperationKind::Restart, "n8n", "console");
        let out = DryRunDelegate.execute(&op).await.unwrap();
        assert_eq!(out, "[dry-run] restart on n8n simulated");
    }

    #[test]
    fn build_default_is_dry_run() {
        let cfg = GovernorConfig::default();
        assert!(build_delegate(&cfg).is_ok());
    }

    #[test]
    fn build_unknown_delegate_fails() {
        let cfg = GovernorConfig {
            delegate: "kubectl".into(),
            ..GovernorConfig::default()
        };
        assert!(build_delegate(&cfg).is_err());
    }

    #[test]
    fn portainer_without_token_fails() {
        let cfg = GovernorConfig {
            delegate: "portainer".into(),
            portainer_token_env: "JETT_TEST_TOKEN_THAT_IS_NOT_SET".into(),
            ..GovernorConfig::default()
        };
        assert!(build_delegate(&cfg).is_err());
    }

    #[test]
    fn container_url_shape() {
        let d = PortainerDelegate::new("https://vps:9443/", 2, "k".into(), 50).unwrap();
        assert_eq!(
            d.container_url("redis", "restart").unwrap().as_str(),
            "https://vps:9443/api/endpoints/2/docker/containers/redis/restart"
        );

        let nested = PortainerDelegate::new("https://vps/portainer", 2, "k".into(), 50).unwrap();
        assert_eq!(
            nested.container_url("redis", "json").unwrap().as_str(),
            "https://vps/portainer/api/endpoints/2/docker/containers/redis/json"
        );
    }

    #[test]
    fn container_url_encodes_target_as_one_segment() {
        let d = PortainerDelegate::new("https://vps:9443", 2, "k".into(), 50).unwrap();
        let url = d.container_url("../../../../users", "json").unwrap();
        assert!(url.path().starts_with("/api/endpoints/2/docker/containers/"), "{url}");
        assert!(url.path().ends_with("/json"), "{url}");
        assert!(!url.path().contains("/users/"), "{url}");
        assert_eq!(url.path_segments().unwrap().count(), 7, "{url}");
    }

    #[test]
    fn invalid_base_url_rejected() {
        assert!(PortainerDelegate::new("not a url", 1, "k".into(), 50).is_err());
    }

    #[test]
    fn demux_strips_frame_headers() {
        let mut body = vec![1, 0, 0, 0, 0, 0, 0, 6];
        body.extend_from_slice(b"hello\n");
        body.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 4]);
        body.extend_from_slice(b"err\n");
        assert_eq!(demux_docker_logs(&body), "hello\nerr\n");
    }

    #[test]
    fn demux_passes_through_tty_logs() {
        assert_eq!(demux_docker_logs(b"plain log line\n"), "plain log line\n");
    }

    mod portainer {
        use wiremock::matchers::{header, method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        use super::*;

        async fn delegate(server: &MockServer) -> PortainerDelegate {
            PortainerDelegate::new(&server.uri(), 1, "ptr_test".into(), 20).unwrap()
        }

        #[tokio::test]
        async fn restart_posts_with_api_key() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/endpoints/1/docker/containers/n8n/restart"))
                .and(header("X-API-Key", "ptr_test"))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;

            let op = Operation::new(OperationKind::Restart, "n8n", "voice-session");
            let out = delegate(&server).await.execute(&op).await.unwrap();
            assert_eq!(out, "restart n8n done");
        }

        #[tokio::test]
        async fn logs_are_tailed_and_demuxed() {
            let server = MockServer::start().await;
            let mut body = vec![1, 0, 0, 0, 0, 0, 0, 9];
            body.extend_from_slice(b"started\n\n");
            Mock::given(method("GET"))
                .and(path("/api/endpoints/1/docker/containers/redis/logs"))
                .and(query_param("tail", "20"))
                .and(query_param("stdout", "true"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
                .mount(&server)
                .await;

            let op = Operation::new(OperationKind::Logs, "redis", "voice-session");
            let out = delegate(&server).await.execute(&op).await.unwrap();
            assert_eq!(out, "started\n\n");
        }

        #[tokio::test]
        async fn status_reads_container_state() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/endpoints/1/docker/containers/postgres/json"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "Id": "abc",
                    "State": {"Status": "running", "StartedAt": "2026-10-01T08:00:00Z"}
                })))
                .mount(&server)
                .await;

            let op = Operation::new(OperationKind::Status, "postgres", "voice-session");
            let out = delegate(&server).await.execute(&op).await.unwrap();
            assert_eq!(out, "postgres is running (since 2026-10-01T08:00:00Z)");
        }

        #[tokio::test]
        async fn wildcard_status_cannot_leave_the_container_path() {
            use std::time::Duration;

            use jett_core::error::GovernorError;
            use jett_core::security::AuditStatus;

            use crate::audit::MemoryAuditLog;
            use crate::rate_limit::{RateLimiter, Window};
            use crate::{ActionGovernor, PolicyAllowlist};

            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "State": {"Status": "running", "StartedAt": "x"}
                })))
                .expect(0)
                .mount(&server)
                .await;

            let log = Arc::new(MemoryAuditLog::new());
            let governor = ActionGovernor::new(
                PolicyAllowlist::new([(OperationKind::Status, "*")]).unwrap(),
                RateLimiter::new(vec![Window::new(10, Duration::from_secs(60))]).unwrap(),
                log.clone(),
                Arc::new(delegate(&server).await),
                "voice-session",
            );

            let op = Operation::new(OperationKind::Status, "../../../../users", "voice-session");
            let err = governor.authorize(&op).await.unwrap_err();
            assert!(matches!(err, GovernorError::PolicyDenied(_)), "{err}");
            let statuses: Vec<_> = log.records().iter().map(|r| r.status).collect();
            assert_eq!(statuses, vec![AuditStatus::Attempt, AuditStatus::Denied]);
        }

        #[tokio::test]
        async fn target_is_sent_percent_encoded() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/api/endpoints/1/docker/containers/a%2Fb/json"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "State": {"Status": "exited", "StartedAt": "x"}
                })))
                .expect(1)
                .mount(&server)
                .await;

            let op = Operation::new(OperationKind::Status, "a/b", "voice-session");
            let out = delegate(&server).await.execute(&op).await.unwrap();
            assert_eq!(out, "a/b is exited (since x)");
        }

        #[tokio::test]
        async fn error_status_fails_with_body() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(404).set_body_string("No such container: ghost"))
                .mount(&server)
                .await;

            let op = Operation::new(OperationKind::Stop, "ghost", "voice-session");
            let err = delegate(&server).await.execute(&op).await.unwrap_err();
            let msg = format!("{err:#}");
            assert!(msg.contains("404"), "{msg}");
            assert!(msg.contains("No such container"), "{msg}");
        }
    }
}
