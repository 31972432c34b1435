//! xAI Grok chat-completions client.
//!
//! Wire-compatible with the OpenAI chat-completions shape, including the
//! `data: {json}` / `[DONE]` streaming framing, but served from the x.ai
//! endpoint.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sse::scan_data_lines;
use crate::{ChatProvider, ChatRequest, Reply, StreamCallbacks};
use sidecar_common::{ProviderError, ProviderKind};

const GROK_API_URL: &str = "https://api.x.ai/v1/chat/completions";

pub struct GrokProvider {
    http: reqwest::Client,
}

impl GrokProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn build_request_body(request: &ChatRequest<'_>) -> serde_json::Value {
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        serde_json::json!({
            "model": request.model,
            "stream": request.stream,
            "temperature": request.temperature,
            "messages": messages,
        })
    }

    fn parse_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
        let json: serde_json::Value = serde_json::from_str(payload)?;
        Ok(json["choices"][0]["delta"]["content"]
            .as_str()
            .filter(|delta| !delta.is_empty())
            .map(String::from))
    }
}

impl Default for GrokProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for GrokProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Grok
    }

    async fn ask(
        &self,
        request: ChatRequest<'_>,
        callbacks: &StreamCallbacks,
        cancel: &CancellationToken,
    ) -> Result<Reply, ProviderError> {
        let body = Self::build_request_body(&request);

        debug!(model = %request.model, stream = request.stream, "Grok API request");

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                callbacks.abort("");
                return Ok(Reply::cancelled(String::new()));
            }
            result = self
                .http
                .post(GROK_API_URL)
                .bearer_auth(request.api_key)
                .header("content-type", "application/json")
                .json(&body)
                .send() =>
            {
                result.map_err(|e| ProviderError::Network(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request {
                status: status.as_u16(),
                body,
            });
        }

        if !request.stream {
            let json: serde_json::Value = tokio::select! {
                _ = cancel.cancelled() => {
                    callbacks.abort("");
                    return Ok(Reply::cancelled(String::new()));
                }
                result = response.json() => {
                    result.map_err(|e| ProviderError::Parse(e.to_string()))?
                }
            };
            let text = json["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            return Ok(Reply::complete(text));
        }

        let mut stream = response.bytes_stream();
        let mut full = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    callbacks.abort(&full);
                    return Ok(Reply::cancelled(full));
                }
                next = stream.next() => match next {
                    None => break,
                    Some(Err(e)) => return Err(ProviderError::Network(e.to_string())),
                    Some(Ok(bytes)) => {
                        let chunk = String::from_utf8_lossy(&bytes);
                        for payload in scan_data_lines(&chunk) {
                            match Self::parse_delta(payload) {
                                Ok(Some(delta)) => {
                                    full.push_str(&delta);
                                    callbacks.delta(&delta);
                                }
                                Ok(None) => {}
                                Err(e) => warn!("Grok stream frame parse error: {e}"),
                            }
                        }
                    }
                }
            }
        }

        callbacks.finish(&full);
        Ok(Reply::complete(full))
    }
}
