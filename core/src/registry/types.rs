use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{RegistryError, Result};

pub const DEFAULT_PROVIDER_TYPE: &str = "openai_compatible";
pub const PROVIDER_TYPES: &[&str] = &["openai_compatible", "custom"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Chat,
    Embedding,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Chat, ModelType::Embedding];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embedding => "embedding",
        }
    }

    /// Model id handed out when nothing at all is configured.
    pub fn fallback_model_id(&self) -> &'static str {
        match self {
            Self::Chat => "gpt-4",
            Self::Embedding => "text-embedding-3-small",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chat" => Ok(Self::Chat),
            "embedding" => Ok(Self::Embedding),
            other => Err(RegistryError::InvalidInput(format!(
                "unknown model type '{other}', expected 'chat' or 'embedding'"
            ))),
        }
    }
}

/// A configured upstream endpoint. `api_key` holds the decrypted secret and
/// only ever lives in memory; the table stores the ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub requires_api_key: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_provider_type")]
    pub provider_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

impl Provider {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            display_name: display_name.into(),
            base_url: None,
            api_key: None,
            requires_api_key: true,
            is_active: true,
            provider_type: DEFAULT_PROVIDER_TYPE.to_string(),
            description: None,
            configuration: Map::new(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(RegistryError::InvalidInput(format!(
                "provider name '{}' must be a lowercase slug",
                self.name
            )));
        }
        if self.display_name.trim().is_empty() {
            return Err(RegistryError::InvalidInput(
                "provider display_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderModel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub provider_id: String,
    pub model_id: String,
    pub model_name: String,
    pub model_type: ModelType,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub cost_per_token_input: Option<f64>,
    #[serde(default)]
    pub cost_per_token_output: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

impl ProviderModel {
    pub fn new(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        model_name: impl Into<String>,
        model_type: ModelType,
    ) -> Self {
        Self {
            id: String::new(),
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            model_name: model_name.into(),
            model_type,
            is_default: false,
            is_active: true,
            max_tokens: None,
            cost_per_token_input: None,
            cost_per_token_output: None,
            description: None,
            configuration: Map::new(),
        }
    }

    pub fn default_model(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.provider_id.trim().is_empty() {
            return Err(RegistryError::InvalidInput("model provider_id must not be empty".into()));
        }
        if self.model_id.trim().is_empty() || self.model_name.trim().is_empty() {
            return Err(RegistryError::InvalidInput(
                "model_id and model_name must not be empty".into(),
            ));
        }
        if self.max_tokens.is_some_and(|t| t < 0) {
            return Err(RegistryError::InvalidInput("max_tokens must not be negative".into()));
        }
        for cost in [self.cost_per_token_input, self.cost_per_token_output]
            .into_iter()
            .flatten()
        {
            if !cost.is_finite() || cost < 0.0 {
                return Err(RegistryError::InvalidInput(
                    "token costs must be finite and non-negative".into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_provider_type() -> String {
    DEFAULT_PROVIDER_TYPE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_type_parses_closed_set() {
        assert_eq!("chat".parse::<ModelType>().unwrap(), ModelType::Chat);
        assert_eq!("embedding".parse::<ModelType>().unwrap(), ModelType::Embedding);
        assert!("Chat".parse::<ModelType>().is_err());
        assert!("rerank".parse::<ModelType>().is_err());
        assert_eq!(serde_json::to_string(&ModelType::Embedding).unwrap(), "\"embedding\"");
    }

    #[test]
    fn provider_name_must_be_slug() {
        assert!(Provider::new("openai", "OpenAI").validate().is_ok());
        assert!(Provider::new("local-llm_2", "Local").validate().is_ok());
        assert!(Provider::new("OpenAI", "OpenAI").validate().is_err());
        assert!(Provider::new("open ai", "OpenAI").validate().is_err());
        assert!(Provider::new("", "OpenAI").validate().is_err());
        assert!(Provider::new("openai", " ").validate().is_err());
    }

    #[test]
    fn provider_deserializes_with_defaults_and_hides_key() {
        let provider: Provider = serde_json::from_str(
            r#"{"name":"ollama","display_name":"Ollama","api_key":"k"}"#,
        )
        .unwrap();
        assert!(provider.requires_api_key);
        assert!(provider.is_active);
        assert_eq!(provider.provider_type, DEFAULT_PROVIDER_TYPE);
        assert!(provider.configuration.is_empty());

        let json = serde_json::to_value(&provider).unwrap();
        assert!(json.get("api_key").is_none());
    }

    #[test]
    fn model_validation_rejects_bad_numbers() {
        let mut model = ProviderModel::new("p", "gpt-4", "GPT-4", ModelType::Chat);
        assert!(model.validate().is_ok());
        model.cost_per_token_input = Some(f64::NAN);
        assert!(model.validate().is_err());
        model.cost_per_token_input = Some(0.0);
        model.max_tokens = Some(-1);
        assert!(model.validate().is_err());
    }
}
