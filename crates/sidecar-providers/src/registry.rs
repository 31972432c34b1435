//! Provider lookup table.
//!
//! A pure mapping from [`ProviderKind`] to an adapter. Unknown or
//! unregistered kinds fail fast with an unsupported-provider error
//! instead of silently falling back.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{ChatProvider, DeepSeekProvider, GeminiProvider, GrokProvider, OpenAiProvider};
use sidecar_common::{ProviderError, ProviderKind};

pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    /// Empty registry; register adapters explicitly (used by tests and
    /// embedders that bring their own providers).
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry with all built-in adapters.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(OpenAiProvider::new()));
        registry.register(Arc::new(GrokProvider::new()));
        registry.register(Arc::new(GeminiProvider::new()));
        registry.register(Arc::new(DeepSeekProvider::new()));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<&Arc<dyn ChatProvider>, ProviderError> {
        self.providers
            .get(&kind)
            .ok_or_else(|| ProviderError::Unsupported(kind.to_string()))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
