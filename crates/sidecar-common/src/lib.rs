//! Shared types for the sidecar workspace.
//!
//! Holds the conversation data model (messages, roles, provider ids) and
//! the error taxonomy used across the provider, config, and agent crates.

pub mod errors;
pub mod types;

pub use errors::{AgentError, ProviderError, SettingsError};
pub use types::{Message, ProviderKind, Role};
