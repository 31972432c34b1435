//! Provider adapters for the sidecar agent.
//!
//! Each vendor implements the [`ChatProvider`] capability: send a message
//! list, get a full or incrementally streamed reply, honor cancellation.
//! Adapters normalize request bodies and vendor-specific SSE framing so
//! the agent loop never sees wire differences.
//!
//! Cancellation is not an error: a cancelled call resolves with whatever
//! text was accumulated so far and `FinishReason::Cancelled`.

pub mod deepseek;
pub mod gemini;
pub mod grok;
pub mod openai;
pub mod registry;
pub mod sse;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use deepseek::DeepSeekProvider;
pub use gemini::GeminiProvider;
pub use grok::GrokProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;
pub use sidecar_common::{Message, ProviderError, ProviderKind, Role};

/// One chat exchange: the trimmed message window plus per-turn parameters.
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    pub api_key: &'a str,
    pub model: &'a str,
    pub temperature: f64,
    /// Request incremental delivery where the vendor supports it.
    pub stream: bool,
}

/// How a reply terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The provider delivered the whole reply.
    Complete,
    /// The caller cancelled mid-flight; `text` holds the partial reply.
    Cancelled,
}

/// A resolved reply, complete or partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub finish: FinishReason,
}

impl Reply {
    pub fn complete(text: String) -> Self {
        Self {
            text,
            finish: FinishReason::Complete,
        }
    }

    pub fn cancelled(text: String) -> Self {
        Self {
            text,
            finish: FinishReason::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.finish == FinishReason::Cancelled
    }
}

type TextFn = Box<dyn Fn(&str) + Send + Sync>;

/// Optional observers for streamed replies.
///
/// `on_delta` fires once per incremental fragment, `on_finish` with the
/// full text on normal end, `on_abort` with the accumulated partial when
/// the call is cancelled. All default to no-ops.
#[derive(Default)]
pub struct StreamCallbacks {
    pub on_delta: Option<TextFn>,
    pub on_abort: Option<TextFn>,
    pub on_finish: Option<TextFn>,
}

impl StreamCallbacks {
    pub fn on_delta(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_delta = Some(Box::new(f));
        self
    }

    pub fn on_abort(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_abort = Some(Box::new(f));
        self
    }

    pub fn on_finish(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_finish = Some(Box::new(f));
        self
    }

    /// Notify of one incremental fragment. For adapter implementors.
    pub fn delta(&self, text: &str) {
        if let Some(f) = &self.on_delta {
            f(text);
        }
    }

    /// Notify of a cancelled call with the accumulated partial.
    pub fn abort(&self, partial: &str) {
        if let Some(f) = &self.on_abort {
            f(partial);
        }
    }

    /// Notify of a normally finished call with the full text.
    pub fn finish(&self, full: &str) {
        if let Some(f) = &self.on_finish {
            f(full);
        }
    }
}

/// A vendor chat API, normalized.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Send `request` and resolve the reply text.
    ///
    /// Non-2xx responses fail with [`ProviderError::Request`]. Cancellation
    /// via `cancel` resolves with a [`FinishReason::Cancelled`] reply
    /// carrying the partial text rather than an error.
    async fn ask(
        &self,
        request: ChatRequest<'_>,
        callbacks: &StreamCallbacks,
        cancel: &CancellationToken,
    ) -> Result<Reply, ProviderError>;
}
