//! Construction of API clients for a resolved provider/model.
//!
//! The registry does not care what a client is; it only hands a base URL
//! and a credential to a [`ClientFactory`]. [`OpenAiClientFactory`] is the
//! factory used by the app.

pub mod openai;

use serde::Serialize;

use crate::errors::Result;
use crate::registry::{ActiveModel, ModelType};

pub use openai::{OpenAiClient, OpenAiClientFactory, DEFAULT_BASE_URL};

/// Credential handed to the factory for providers that do not need a key.
pub const PLACEHOLDER_API_KEY: &str = "sk-no-key-required";

pub trait ClientFactory {
    type Handle;

    fn build(&self, base_url: Option<&str>, api_key: &str) -> Result<Self::Handle>;
}

/// Descriptive metadata returned alongside a client handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub model_name: String,
    pub provider_name: String,
    pub provider_display_name: String,
    pub max_tokens: Option<i64>,
    pub model_type: ModelType,
}

impl From<&ActiveModel> for ModelInfo {
    fn from(active: &ActiveModel) -> Self {
        Self {
            model_id: active.model.model_id.clone(),
            model_name: active.model.model_name.clone(),
            provider_name: active.provider.name.clone(),
            provider_display_name: active.provider.display_name.clone(),
            max_tokens: active.model.max_tokens,
            model_type: active.model.model_type,
        }
    }
}
