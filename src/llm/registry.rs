use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ModelConfig, ProviderEntry};
use crate::errors::{DroidPilotError, DroidPilotResult};
use crate::llm::provider::ModelProvider;
use crate::llm::providers::dashscope::DashScopeProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all configured model backends, keyed by their config.toml
/// identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    active: String,
    model_config: ModelConfig,
}

impl ProviderRegistry {
    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn list_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// The active provider together with its resolved call parameters.
    pub fn active_call(&self) -> DroidPilotResult<(Arc<dyn ModelProvider>, CallConfig)> {
        let provider = self.providers.get(&self.active).cloned().ok_or_else(|| {
            DroidPilotError::Config(format!(
                "Active provider '{}' not found in registry",
                self.active
            ))
        })?;
        let entry = self.model_config.providers.get(&self.active).ok_or_else(|| {
            DroidPilotError::Config(format!(
                "Active provider '{}' has no config entry",
                self.active
            ))
        })?;
        Ok((
            provider,
            CallConfig {
                model: entry.model.clone(),
                temperature: entry.temperature,
            },
        ))
    }

    /// Build a registry from the loaded model config. API keys are read from
    /// environment variables named `DROIDPILOT_<ID>_API_KEY`, falling back to
    /// the key stored in config.toml.
    pub fn from_config(config: &ModelConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.active_provider.clone(),
            model_config: config.clone(),
        };
        for (id, entry) in &config.providers {
            let api_key = std::env::var(format!("DROIDPILOT_{}_API_KEY", id.to_uppercase()))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            registry.register(build_provider(id, entry, api_key));
            tracing::debug!(
                provider = %id,
                adapter = entry.adapter.as_deref().unwrap_or("openai"),
                "provider registered"
            );
        }
        registry
    }
}

fn build_provider(id: &str, entry: &ProviderEntry, api_key: String) -> Arc<dyn ModelProvider> {
    match entry.adapter.as_deref() {
        Some("dashscope") => Arc::new(DashScopeProvider::new(
            id.to_string(),
            entry.api_base.clone(),
            api_key,
        )),
        _ => Arc::new(OpenAiCompatibleProvider::new(
            id.to_string(),
            entry.api_base.clone(),
            api_key,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    #[test]
    fn test_registry_from_default_config() {
        let config = ModelConfig::default();
        let registry = ProviderRegistry::from_config(&config);
        assert!(registry.list_names().contains(&"local".to_string()));
        let (provider, call) = registry.active_call().expect("active provider resolves");
        assert_eq!(provider.name(), "local");
        assert!(!call.model.is_empty());
    }
}
