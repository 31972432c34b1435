//! Settings schema with built-in defaults.

use std::collections::HashMap;

use sidecar_common::ProviderKind;

/// User settings: provider credentials, default provider, per-provider
/// model names, and the UI theme.
///
/// Every field defaults, so a settings file only needs to name what it
/// overrides. The serde shape is the on-disk TOML format.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    /// API key per provider. Empty string means "not configured".
    pub api_keys: HashMap<ProviderKind, String>,
    /// Provider used when the session does not pick one explicitly.
    pub default_provider: ProviderKind,
    /// Model name per provider.
    pub models: HashMap<ProviderKind, String>,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        let api_keys = ProviderKind::ALL
            .into_iter()
            .map(|kind| (kind, String::new()))
            .collect();
        let models = ProviderKind::ALL
            .into_iter()
            .map(|kind| (kind, kind.default_model().to_string()))
            .collect();
        Self {
            api_keys,
            default_provider: ProviderKind::OpenAi,
            models,
            theme: Theme::Light,
        }
    }
}

impl Settings {
    /// API key for a provider, empty if unset.
    pub fn api_key(&self, kind: ProviderKind) -> &str {
        self.api_keys.get(&kind).map(String::as_str).unwrap_or("")
    }

    /// Model name for a provider, falling back to the built-in default.
    pub fn model(&self, kind: ProviderKind) -> &str {
        self.models
            .get(&kind)
            .map(String::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| kind.default_model())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}
