//! Execution environment: the collaborator that performs command side
//! effects (network fetch, DOM reads) on behalf of the agent loop.
//!
//! [`HostEnvironment`] handles `FETCH` itself, fanning the URLs out in
//! parallel with one result per URL. Every other action is forwarded to
//! the [`ContentBridge`] as a plain request/response call with a timeout,
//! so the loop reads as ordinary sequential code.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::command::Command;

/// Opaque handle to the context commands act on (e.g. a browser tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionTarget(pub i64);

impl ExecutionTarget {
    /// Target for commands the host executes itself, with no tab involved.
    pub const LOCAL: ExecutionTarget = ExecutionTarget(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// One result entry per sub-target of a command (one per URL for FETCH).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResultItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultItem {
    pub fn html(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            html: Some(html.into()),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn error_for(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub results: Vec<ResultItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(results: Vec<ResultItem>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            results,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            results: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Performs one command against a resolved target.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    /// Resolve the context commands should act on, once per turn.
    async fn resolve_target(&self) -> Option<ExecutionTarget>;

    /// Execute a single command. Failures are reported in the result,
    /// never as a panic or error type, so one bad command cannot abort
    /// the rest of the turn.
    async fn execute(&self, target: ExecutionTarget, command: &Command) -> ExecutionResult;
}

/// Fetches one URL, returning the raw body or a display error.
#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, String>;
}

/// Default fetcher backed by reqwest.
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("request failed with status {status}"));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}

/// Forwards non-FETCH commands (DOM reads etc.) to wherever the page
/// content lives. Returning `None` means the other side never answered.
#[async_trait]
pub trait ContentBridge: Send + Sync {
    /// The context the bridge would act on right now, if any.
    async fn active_target(&self) -> Option<ExecutionTarget>;

    async fn dispatch(&self, target: ExecutionTarget, command: &Command)
        -> Option<ExecutionResult>;
}

const BRIDGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Host-side execution environment.
pub struct HostEnvironment {
    fetcher: Arc<dyn UrlFetcher>,
    bridge: Option<Arc<dyn ContentBridge>>,
    bridge_timeout: Duration,
}

impl HostEnvironment {
    pub fn new() -> Self {
        Self {
            fetcher: Arc::new(HttpFetcher::new()),
            bridge: None,
            bridge_timeout: BRIDGE_TIMEOUT,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn UrlFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn ContentBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_bridge_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_timeout = timeout;
        self
    }

    /// Fan the FETCH URLs out in parallel. Every URL reports its own
    /// outcome; one failure does not short-circuit the others.
    async fn fetch_all(&self, urls: &[String]) -> Vec<ResultItem> {
        let fetches = urls.iter().map(|url| {
            let fetcher = Arc::clone(&self.fetcher);
            async move {
                match fetcher.fetch(url).await {
                    Ok(body) => ResultItem::html(url.clone(), body),
                    Err(e) => ResultItem::error_for(url.clone(), e),
                }
            }
        });
        join_all(fetches).await
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionEnvironment for HostEnvironment {
    async fn resolve_target(&self) -> Option<ExecutionTarget> {
        match &self.bridge {
            Some(bridge) => bridge.active_target().await,
            None => Some(ExecutionTarget::LOCAL),
        }
    }

    async fn execute(&self, target: ExecutionTarget, command: &Command) -> ExecutionResult {
        debug!(action = %command.action, "executing command");

        if command.action == "FETCH" {
            let urls = command.urls();
            if urls.is_empty() {
                return ExecutionResult::failure("FETCH command is missing urls");
            }
            return ExecutionResult::success(self.fetch_all(&urls).await);
        }

        let Some(bridge) = &self.bridge else {
            return ExecutionResult::failure(format!(
                "no content bridge available for action {}",
                command.action
            ));
        };

        match tokio::time::timeout(self.bridge_timeout, bridge.dispatch(target, command)).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!(action = %command.action, "no response from content bridge");
                ExecutionResult::failure("no response from execution environment")
            }
            Err(_) => ExecutionResult::failure(format!(
                "execution environment timed out after {:?}",
                self.bridge_timeout
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StubFetcher {
        pages: HashMap<String, Result<String, String>>,
    }

    #[async_trait]
    impl UrlFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<String, String> {
            self.pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err("unknown url".to_string()))
        }
    }

    fn fetch_command(urls: &[&str]) -> Command {
        let mut args = serde_json::Map::new();
        args.insert("urls".into(), serde_json::json!(urls));
        Command {
            action: "FETCH".into(),
            args,
        }
    }

    #[tokio::test]
    async fn fetch_fans_out_and_reports_each_url() {
        let mut pages = HashMap::new();
        pages.insert("http://a".to_string(), Ok("<html>a</html>".to_string()));
        pages.insert("http://b".to_string(), Ok("<html>b</html>".to_string()));
        pages.insert("http://c".to_string(), Err("connection refused".to_string()));

        let env = HostEnvironment::new().with_fetcher(Arc::new(StubFetcher { pages }));
        let result = env
            .execute(
                ExecutionTarget::LOCAL,
                &fetch_command(&["http://a", "http://b", "http://c"]),
            )
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.results[0].html.as_deref(), Some("<html>a</html>"));
        assert_eq!(result.results[1].html.as_deref(), Some("<html>b</html>"));
        assert_eq!(
            result.results[2].error.as_deref(),
            Some("connection refused")
        );
        assert_eq!(result.results[2].url.as_deref(), Some("http://c"));
    }

    #[tokio::test]
    async fn fetch_without_urls_fails() {
        let env = HostEnvironment::new();
        let result = env
            .execute(
                ExecutionTarget::LOCAL,
                &Command {
                    action: "FETCH".into(),
                    args: serde_json::Map::new(),
                },
            )
            .await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error.unwrap().contains("missing urls"));
    }

    #[tokio::test]
    async fn non_fetch_without_bridge_fails() {
        let env = HostEnvironment::new();
        let result = env
            .execute(
                ExecutionTarget::LOCAL,
                &Command {
                    action: "READ_DOM".into(),
                    args: serde_json::Map::new(),
                },
            )
            .await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error.unwrap().contains("no content bridge"));
    }

    struct SilentBridge;

    #[async_trait]
    impl ContentBridge for SilentBridge {
        async fn active_target(&self) -> Option<ExecutionTarget> {
            Some(ExecutionTarget(7))
        }

        async fn dispatch(
            &self,
            _target: ExecutionTarget,
            _command: &Command,
        ) -> Option<ExecutionResult> {
            None
        }
    }

    #[tokio::test]
    async fn bridge_with_no_response_is_an_explicit_error() {
        let env = HostEnvironment::new().with_bridge(Arc::new(SilentBridge));
        assert_eq!(env.resolve_target().await, Some(ExecutionTarget(7)));

        let result = env
            .execute(
                ExecutionTarget(7),
                &Command {
                    action: "READ_DOM".into(),
                    args: serde_json::Map::new(),
                },
            )
            .await;
        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.error.unwrap().contains("no response"));
    }
}
