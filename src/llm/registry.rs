//! Process-wide per-agent backend configuration.
//!
//! Every agent (orchestrator, analyzer, extractor, ...) can run against its
//! own backend, model, and temperature. The mapping is resolved at call
//! time, not bound at construction, so reconfiguration takes effect on the
//! next call. Updates replace the whole per-agent block atomically.

use crate::llm::provider::ChatProvider;
use crate::utils::error::PlanweaveError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Backend settings for a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Backend name: "openai" or "ollama".
    pub provider: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Override for the backend's API base URL (OpenAI-compatible hosts).
    pub api_base: Option<String>,
    /// API key; falls back to the backend's conventional environment variable.
    pub api_key: Option<String>,
    pub max_tokens: Option<usize>,
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: default_temperature(),
            api_base: None,
            api_key: None,
            max_tokens: None,
        }
    }
}

/// Call-time registry mapping agent keys to backend settings.
#[derive(Debug)]
pub struct AgentRegistry {
    defaults: AgentSettings,
    overrides: RwLock<HashMap<String, AgentSettings>>,
}

impl AgentRegistry {
    pub fn new(defaults: AgentSettings) -> Self {
        Self {
            defaults,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_overrides(defaults: AgentSettings, overrides: HashMap<String, AgentSettings>) -> Self {
        Self {
            defaults,
            overrides: RwLock::new(overrides),
        }
    }

    /// Resolve the settings for an agent, falling back to the defaults
    /// when no per-agent block exists.
    pub fn resolve(&self, agent: &str) -> AgentSettings {
        self.overrides
            .read()
            .ok()
            .and_then(|map| map.get(agent).cloned())
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Replace an agent's settings; takes effect on that agent's next call.
    pub fn set(&self, agent: &str, settings: AgentSettings) {
        if let Ok(mut map) = self.overrides.write() {
            map.insert(agent.to_string(), settings);
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new(AgentSettings::default())
    }
}

/// Builds a chat provider from resolved agent settings.
///
/// Injected so tests can swap the whole backend layer for a scripted stub.
pub type ProviderFactory =
    Arc<dyn Fn(&AgentSettings) -> Result<Arc<dyn ChatProvider>, PlanweaveError> + Send + Sync>;

/// The default factory, dispatching on the settings' backend name.
pub fn default_provider_factory() -> ProviderFactory {
    Arc::new(|settings: &AgentSettings| build_chat_provider(settings))
}

#[allow(unreachable_code, unused_variables)]
fn build_chat_provider(
    settings: &AgentSettings,
) -> Result<Arc<dyn ChatProvider>, PlanweaveError> {
    match settings.provider.to_lowercase().as_str() {
        #[cfg(feature = "openai")]
        "openai" => {
            use crate::llm::providers::openai::OpenAiProvider;

            let api_key = match settings.api_key.clone() {
                Some(key) => key,
                None => std::env::var("OPENAI_API_KEY")
                    .map_err(|_| PlanweaveError::missing_api_key("openai"))?,
            };

            let provider = match settings.api_base.clone() {
                Some(base) => {
                    OpenAiProvider::with_api_base(api_key, settings.model.clone(), base)?
                }
                None => OpenAiProvider::new(api_key, settings.model.clone())?,
            };
            Ok(Arc::new(provider))
        }
        #[cfg(feature = "ollama")]
        "ollama" => {
            use crate::llm::providers::ollama::OllamaProvider;

            let host = settings
                .api_base
                .clone()
                .or_else(|| std::env::var("OLLAMA_HOST").ok())
                .unwrap_or_else(|| "http://localhost:11434".to_string());

            Ok(Arc::new(OllamaProvider::new(host, settings.model.clone())?))
        }
        other => Err(PlanweaveError::Config(format!(
            "Unsupported backend '{}'. Supported backends: openai, ollama",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let registry = AgentRegistry::default();
        let settings = registry.resolve("selector");
        assert_eq!(settings.provider, "openai");
        assert_eq!(settings.model, "gpt-4o-mini");
    }

    #[test]
    fn test_set_takes_effect_on_next_resolve() {
        let registry = AgentRegistry::default();
        registry.set(
            "timing",
            AgentSettings {
                provider: "ollama".to_string(),
                model: "llama3.1:8b".to_string(),
                temperature: 0.0,
                api_base: None,
                api_key: None,
                max_tokens: Some(2048),
            },
        );

        let settings = registry.resolve("timing");
        assert_eq!(settings.provider, "ollama");
        assert_eq!(settings.temperature, 0.0);

        // Other agents keep the defaults
        assert_eq!(registry.resolve("assigner").provider, "openai");
    }

    #[test]
    fn test_unsupported_backend_is_config_error() {
        let settings = AgentSettings {
            provider: "palm".to_string(),
            ..AgentSettings::default()
        };
        let err = match build_chat_provider(&settings) {
            Ok(_) => panic!("expected build_chat_provider to fail for unsupported backend"),
            Err(err) => err,
        };
        assert!(matches!(err, PlanweaveError::Config(_)));
    }
}
