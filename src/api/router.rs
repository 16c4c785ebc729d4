//! Adapter selection by provider kind

use super::dashscope::DashScopeAdapter;
use super::openai::OpenAIStyleAdapter;
use super::template::TemplateAdapter;
use super::transport::Transport;
use super::{ChatProvider, ModelConfig, ProviderKind};
use std::sync::Arc;
use tracing::debug;

/// Picks the adapter for a model configuration
///
/// An override replaces every provider, so tests and offline runs never touch
/// the network. Building with the `template-providers` feature installs the
/// template adapter as that override.
pub struct ProviderRouter {
    openai_style: Arc<dyn ChatProvider>,
    dashscope: Arc<dyn ChatProvider>,
    override_provider: Option<Arc<dyn ChatProvider>>,
}

impl ProviderRouter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let override_provider: Option<Arc<dyn ChatProvider>> = if cfg!(feature = "template-providers") {
            Some(Arc::new(TemplateAdapter::default()))
        } else {
            None
        };

        Self {
            openai_style: Arc::new(OpenAIStyleAdapter::new(transport.clone())),
            dashscope: Arc::new(DashScopeAdapter::new(transport)),
            override_provider,
        }
    }

    /// Route every request to `provider`
    pub fn with_override(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.override_provider = Some(provider);
        self
    }

    /// Router whose every provider is `provider`
    pub fn single(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            openai_style: provider.clone(),
            dashscope: provider.clone(),
            override_provider: Some(provider),
        }
    }

    pub fn adapter_for(&self, config: &ModelConfig) -> Arc<dyn ChatProvider> {
        if let Some(provider) = &self.override_provider {
            debug!(provider = provider.name(), "Using provider override");
            return provider.clone();
        }

        match config.provider {
            ProviderKind::OpenAIStyle => self.openai_style.clone(),
            ProviderKind::DashScope => self.dashscope.clone(),
        }
    }
}
