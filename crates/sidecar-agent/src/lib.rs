//! Agent core for sidecar.
//!
//! Ties the provider adapters, settings store, and execution environment
//! together into the session loop: append the user turn, trim the
//! context window, ask the model, detect command-shaped replies, execute
//! commands against the environment, and re-ask with the results.

pub mod command;
pub mod context;
pub mod environment;
pub mod extract;
pub mod session;

pub use command::{classify, Classification, Command};
pub use context::{estimate_tokens, trim_context, MAX_TOKEN_WINDOW};
pub use environment::{
    ContentBridge, ExecutionEnvironment, ExecutionResult, ExecutionStatus, ExecutionTarget,
    HostEnvironment, ResultItem, UrlFetcher,
};
pub use extract::{ContentExtractor, RawExtractor};
pub use session::Session;
pub use sidecar_common::{AgentError, Message, ProviderKind, Role};
