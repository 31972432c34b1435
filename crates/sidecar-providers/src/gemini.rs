//! Google Gemini client via the Generative Language API.
//!
//! Gemini has no streaming path here: `ask` always performs a single
//! request and ignores the stream flag and temperature. Only user-role
//! turns are sent (the generateContent endpoint rejects the other roles
//! in this request shape), and the API key travels as a query parameter
//! rather than a bearer header.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{ChatProvider, ChatRequest, Reply, StreamCallbacks};
use sidecar_common::{ProviderError, ProviderKind, Role};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiProvider {
    http: reqwest::Client,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn api_url(model: &str, api_key: &str) -> String {
        format!("{GEMINI_API_BASE}/{model}:generateContent?key={api_key}")
    }

    fn build_request_body(request: &ChatRequest<'_>) -> serde_json::Value {
        let contents: Vec<_> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        serde_json::json!({ "contents": contents })
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn ask(
        &self,
        request: ChatRequest<'_>,
        callbacks: &StreamCallbacks,
        cancel: &CancellationToken,
    ) -> Result<Reply, ProviderError> {
        let body = Self::build_request_body(&request);
        let url = Self::api_url(request.model, request.api_key);

        debug!(model = %request.model, "Gemini API request");

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                callbacks.abort("");
                return Ok(Reply::cancelled(String::new()));
            }
            result = self
                .http
                .post(&url)
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

        let json: serde_json::Value = tokio::select! {
            _ = cancel.cancelled() => {
                callbacks.abort("");
                return Ok(Reply::cancelled(String::new()));
            }
            result = response.json() => {
                result.map_err(|e| ProviderError::Parse(e.to_string()))?
            }
        };

        let text = json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(Reply::complete(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecar_common::Message;

    #[test]
    fn request_body_keeps_only_user_turns() {
        let messages = vec![
            Message::system("sys prompt"),
            Message::user("first"),
            Message::assistant("a reply"),
            Message::user("second"),
        ];
        let request = ChatRequest {
            messages: &messages,
            api_key: "key",
            model: "gemini-2.0-flash",
            temperature: 0.7,
            stream: true,
        };

        let body = GeminiProvider::build_request_body(&request);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["parts"][0]["text"], "first");
        assert_eq!(contents[1]["parts"][0]["text"], "second");
    }

    #[test]
    fn api_key_travels_as_query_param() {
        let url = GeminiProvider::api_url("gemini-2.0-flash", "secret");
        assert!(url.ends_with("gemini-2.0-flash:generateContent?key=secret"));
        assert!(url.starts_with("https://generativelanguage.googleapis.com/"));
    }
}
