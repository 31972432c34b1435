//! DeepSeek chat-completions client.
//!
//! The reply shape matches the OpenAI chat-completions format, but the
//! stream frames events with blank-line separators and a frame can span
//! several network reads, so decoding goes through [`FrameDecoder`].

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sse::FrameDecoder;
use crate::{ChatProvider, ChatRequest, Reply, StreamCallbacks};
use sidecar_common::{ProviderError, ProviderKind};

const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";

pub struct DeepSeekProvider {
    http: reqwest::Client,
}

impl DeepSeekProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn build_request_body(request: &ChatRequest<'_>) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": request.stream,
            "temperature": request.temperature,
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

impl Default for DeepSeekProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for DeepSeekProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    async fn ask(
        &self,
        request: ChatRequest<'_>,
        callbacks: &StreamCallbacks,
        cancel: &CancellationToken,
    ) -> Result<Reply, ProviderError> {
        let body = Self::build_request_body(&request);

        debug!(model = %request.model, stream = request.stream, "DeepSeek API request");

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                callbacks.abort("");
                return Ok(Reply::cancelled(String::new()));
            }
            result = self
                .http
                .post(DEEPSEEK_API_URL)
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
        let mut decoder = FrameDecoder::new();
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
                        for payload in decoder.push(&chunk) {
                            match Self::parse_delta(&payload) {
                                Ok(Some(delta)) => {
                                    full.push_str(&delta);
                                    callbacks.delta(&delta);
                                }
                                Ok(None) => {}
                                Err(e) => warn!("DeepSeek SSE parse error: {e}"),
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
