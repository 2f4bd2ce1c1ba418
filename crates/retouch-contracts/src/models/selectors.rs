use thiserror::Error;

use super::registry::{ModelRegistry, ModelSpec};

pub const EDIT_CAPABILITY: &str = "edit";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no models registered for capability '{0}'")]
    NoModelFor(String),
}

/// The model an edit will run on, plus why it differs from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolves `requested` for `capability`. Unknown or unsuitable models
    /// fall back to the first registered model with the capability.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, SelectionError> {
        let requested = requested.map(str::trim).filter(|name| !name.is_empty());
        let fallback_reason = match requested {
            None => "No model specified; using default.".to_string(),
            Some(name) => match self.registry.get(name) {
                Some(model) if model.supports(capability) => {
                    return Ok(ModelSelection {
                        model: model.clone(),
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                Some(model) => format!(
                    "Model '{name}' ({}) does not support '{capability}'.",
                    model.name
                ),
                None => format!("Model '{name}' is not known."),
            },
        };

        let model = self
            .registry
            .list()
            .find(|model| model.supports(capability))
            .cloned()
            .ok_or_else(|| SelectionError::NoModelFor(capability.to_string()))?;
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }

    pub fn select_edit(&self, requested: Option<&str>) -> Result<ModelSelection, SelectionError> {
        self.select(requested, EDIT_CAPABILITY)
    }
}
