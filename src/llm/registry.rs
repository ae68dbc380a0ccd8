//! Model registry for the configured Gemini models

use super::models::{all_models, find_model, ModelDef};
use super::{GeminiService, LlmService, LoggingService};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for the model provider
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Gemini API key, supplied once for the process lifetime
    pub api_key: Option<String>,
    /// Alternative API base (e.g. a proxy), defaults to the public endpoint
    pub base_url: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
}

impl LlmConfig {
    /// Build from an arbitrary variable lookup
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = var("GOOGLE_API_KEY")
            .or_else(|| var("GEMINI_API_KEY"))
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        Self {
            api_key,
            base_url: var("CHATGEMINI_API_BASE").filter(|v| !v.trim().is_empty()),
            default_model: var("CHATGEMINI_MODEL").filter(|v| !v.trim().is_empty()),
        }
    }
}

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    /// Create an empty registry (no credentials)
    #[cfg(test)]
    pub fn new_empty() -> Self {
        Self {
            services: HashMap::new(),
            default_model: all_models()[0].id.to_string(),
        }
    }

    /// Create a registry around a single service
    #[cfg(test)]
    pub fn with_service(service: Arc<dyn LlmService>) -> Self {
        let id = service.model_id().to_string();
        let mut services = HashMap::new();
        services.insert(id.clone(), service);
        Self {
            services,
            default_model: id,
        }
    }

    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        if let Some(api_key) = &config.api_key {
            for model_def in all_models() {
                if let Some(service) = Self::try_create_model(model_def, api_key, config) {
                    services.insert(model_def.id.to_string(), service);
                }
            }
        }

        let default_model = match config.default_model.as_deref() {
            Some(id) if find_model(id).is_some() => id.to_string(),
            Some(id) => {
                tracing::warn!(model = %id, "Unknown default model, falling back");
                all_models()[0].id.to_string()
            }
            None => all_models()[0].id.to_string(),
        };

        Self {
            services,
            default_model,
        }
    }

    fn try_create_model(
        model_def: &'static ModelDef,
        api_key: &str,
        config: &LlmConfig,
    ) -> Option<Arc<dyn LlmService>> {
        match GeminiService::new(api_key.to_string(), model_def, config.base_url.as_deref()) {
            Ok(service) => Some(Arc::new(LoggingService::new(Arc::new(service)))),
            Err(e) => {
                tracing::warn!(model = %model_def.id, error = %e, "Failed to create model service");
                None
            }
        }
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    /// Get the default model ID
    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    /// List all available model IDs
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    /// Get detailed information about available models
    pub fn available_model_info(&self) -> Vec<crate::api::ModelInfo> {
        all_models()
            .iter()
            .filter_map(|m| {
                let service = self.services.get(m.id)?;
                Some(crate::api::ModelInfo {
                    id: m.id.to_string(),
                    description: m.description.to_string(),
                    context_window: service.context_window(),
                })
            })
            .collect()
    }

    /// Check if any models are available
    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }
}
