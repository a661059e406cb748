use crate::config::BackendConfig;
use crate::error::GatewayError;
use crate::prompt::Modality;

use super::ModelInfo;

/// Maps a request's modality to the configured model identifier.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    text_model: String,
    vision_model: String,
}

impl ModelRouter {
    pub fn new(text_model: impl Into<String>, vision_model: impl Into<String>) -> Self {
        Self {
            text_model: text_model.into(),
            vision_model: vision_model.into(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.text_model.clone(), config.vision_model.clone())
    }

    pub fn select(&self, modality: Modality) -> Result<&str, GatewayError> {
        let (model, key) = match modality {
            Modality::Text => (&self.text_model, "text_model"),
            Modality::Vision => (&self.vision_model, "vision_model"),
        };
        let model = model.trim();
        if model.is_empty() {
            return Err(GatewayError::Config(format!("backend.{key} is not configured")));
        }
        Ok(model)
    }

    /// Configured models, skipping unset ones.
    pub fn models(&self, provider: &str) -> Vec<ModelInfo> {
        [Modality::Text, Modality::Vision]
            .into_iter()
            .filter_map(|modality| {
                let id = self.select(modality).ok()?;
                Some(ModelInfo {
                    id: id.to_string(),
                    name: format!("{id} ({})", modality_label(modality)),
                    provider: provider.to_string(),
                })
            })
            .collect()
    }
}

fn modality_label(modality: Modality) -> &'static str {
    match modality {
        Modality::Text => "text",
        Modality::Vision => "vision",
    }
}
