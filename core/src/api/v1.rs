//! Version 1 of the registry API.
//!
//! Handlers are thin wrappers over [`ModelManager`]: they shape input into
//! registry records, translate "no row matched" into a not-found error and
//! return JSON-friendly payloads. Provider views never carry the API key,
//! only whether one is stored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::errors::RegistryError;
use crate::logging::{list_events, EventRecord};
use crate::model_manager::{ActiveProviderInfo, ModelManager};
use crate::registry::{
    ActiveModel, ModelType, Provider, ProviderModel, DEFAULT_PROVIDER_TYPE, PROVIDER_TYPES,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<ModelManager>,
}

impl ApiState {
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self { manager }
    }
}

/// Error payload with the catalogue code and explanation of the failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub explain: &'static str,
}

impl ApiError {
    /// HTTP-style status a transport should answer with.
    pub fn status(&self) -> u16 {
        match self.code {
            "REG-1404" => 404,
            "REG-1409" => 409,
            "REG-1400" | "SEC-1401" => 400,
            "SEL-1001" => 422,
            _ => 500,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            explain: err.explain(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = Result<T, ApiError>;

fn not_found(what: String) -> ApiError {
    RegistryError::NotFound(what).into()
}

fn default_true() -> bool {
    true
}

fn default_provider_type() -> String {
    DEFAULT_PROVIDER_TYPE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInput {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
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

impl ProviderInput {
    fn into_provider(self, id: String) -> Provider {
        Provider {
            id,
            name: self.name,
            display_name: self.display_name,
            base_url: self.base_url,
            api_key: self.api_key,
            requires_api_key: self.requires_api_key,
            is_active: self.is_active,
            provider_type: self.provider_type,
            description: self.description,
            configuration: self.configuration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderView {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub base_url: Option<String>,
    pub has_api_key: bool,
    pub requires_api_key: bool,
    pub is_active: bool,
    pub provider_type: String,
    pub description: Option<String>,
    pub configuration: Map<String, Value>,
}

impl From<Provider> for ProviderView {
    fn from(p: Provider) -> Self {
        Self {
            has_api_key: p.has_api_key(),
            id: p.id,
            name: p.name,
            display_name: p.display_name,
            base_url: p.base_url,
            requires_api_key: p.requires_api_key,
            is_active: p.is_active,
            provider_type: p.provider_type,
            description: p.description,
            configuration: p.configuration,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInput {
    pub model_id: String,
    pub model_name: String,
    pub model_type: String,
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

impl ModelInput {
    fn into_model(self, id: String, provider_id: &str) -> Result<ProviderModel, RegistryError> {
        Ok(ProviderModel {
            id,
            provider_id: provider_id.to_string(),
            model_type: self.model_type.parse()?,
            model_id: self.model_id,
            model_name: self.model_name,
            is_default: self.is_default,
            is_active: self.is_active,
            max_tokens: self.max_tokens,
            cost_per_token_input: self.cost_per_token_input,
            cost_per_token_output: self.cost_per_token_output,
            description: self.description,
            configuration: self.configuration,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedView {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionInput {
    pub chat_provider_id: String,
    pub chat_model_id: String,
    pub embedding_provider_id: String,
    pub embedding_model_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectedModelsView {
    pub chat_provider: Option<ProviderView>,
    pub chat_model: Option<ProviderModel>,
    pub embedding_provider: Option<ProviderView>,
    pub embedding_model: Option<ProviderModel>,
}

fn split(active: Option<ActiveModel>) -> (Option<ProviderView>, Option<ProviderModel>) {
    match active {
        Some(ActiveModel { provider, model }) => (Some(provider.into()), Some(model)),
        None => (None, None),
    }
}

/// Liveness probe for transports.
pub fn ping() -> Value {
    serde_json::json!({
        "ok": true,
        "ts": OffsetDateTime::now_utc().unix_timestamp(),
    })
}

pub fn providers_list(state: &ApiState, include_inactive: bool) -> ApiResult<Vec<ProviderView>> {
    let providers = state.manager.list_providers(include_inactive)?;
    Ok(providers.into_iter().map(ProviderView::from).collect())
}

pub fn providers_get(state: &ApiState, provider_id: &str) -> ApiResult<ProviderView> {
    state
        .manager
        .get_provider(provider_id)?
        .map(ProviderView::from)
        .ok_or_else(|| not_found(format!("provider {provider_id}")))
}

pub fn providers_create(state: &ApiState, input: ProviderInput) -> ApiResult<CreatedView> {
    let id = state.manager.create_provider(input.into_provider(String::new()))?;
    Ok(CreatedView { id })
}

/// Full replace of the provider's fields; omitting `api_key` clears it.
pub fn providers_update(
    state: &ApiState,
    provider_id: &str,
    input: ProviderInput,
) -> ApiResult<()> {
    if state.manager.get_provider(provider_id)?.is_none() {
        return Err(not_found(format!("provider {provider_id}")));
    }
    let provider = input.into_provider(provider_id.to_string());
    if !state.manager.update_provider(&provider)? {
        return Err(not_found(format!("provider {provider_id}")));
    }
    Ok(())
}

pub fn providers_delete(state: &ApiState, provider_id: &str) -> ApiResult<()> {
    if !state.manager.delete_provider(provider_id)? {
        return Err(not_found(format!("provider {provider_id}")));
    }
    Ok(())
}

pub fn models_list(
    state: &ApiState,
    provider_id: &str,
    model_type: Option<&str>,
    include_inactive: bool,
) -> ApiResult<Vec<ProviderModel>> {
    let model_type = model_type
        .map(str::parse::<ModelType>)
        .transpose()?;
    Ok(state
        .manager
        .list_models(provider_id, model_type, include_inactive)?)
}

pub fn models_create(
    state: &ApiState,
    provider_id: &str,
    input: ModelInput,
) -> ApiResult<CreatedView> {
    if state.manager.get_provider(provider_id)?.is_none() {
        return Err(not_found(format!("provider {provider_id}")));
    }
    let model = input.into_model(String::new(), provider_id)?;
    let id = state.manager.create_model(model)?;
    Ok(CreatedView { id })
}

fn owned_model(state: &ApiState, provider_id: &str, model_id: &str) -> ApiResult<ProviderModel> {
    state
        .manager
        .get_model(model_id)?
        .filter(|m| m.provider_id == provider_id)
        .ok_or_else(|| not_found(format!("model {model_id} of provider {provider_id}")))
}

pub fn models_update(
    state: &ApiState,
    provider_id: &str,
    model_id: &str,
    input: ModelInput,
) -> ApiResult<()> {
    owned_model(state, provider_id, model_id)?;
    let model = input.into_model(model_id.to_string(), provider_id)?;
    if !state.manager.update_model(&model)? {
        return Err(not_found(format!("model {model_id}")));
    }
    Ok(())
}

pub fn models_delete(state: &ApiState, provider_id: &str, model_id: &str) -> ApiResult<()> {
    owned_model(state, provider_id, model_id)?;
    if !state.manager.delete_model(model_id)? {
        return Err(not_found(format!("model {model_id}")));
    }
    Ok(())
}

pub fn selection_current(state: &ApiState) -> SelectedModelsView {
    let current = state.manager.current_selection();
    let (chat_provider, chat_model) = split(current.chat);
    let (embedding_provider, embedding_model) = split(current.embedding);
    SelectedModelsView {
        chat_provider,
        chat_model,
        embedding_provider,
        embedding_model,
    }
}

pub fn selection_set(state: &ApiState, input: SelectionInput) -> ApiResult<()> {
    let written = state.manager.set_selection(
        &input.chat_provider_id,
        &input.chat_model_id,
        &input.embedding_provider_id,
        &input.embedding_model_id,
    );
    if !written {
        return Err(RegistryError::Persistence("failed to update model selection".into()).into());
    }
    Ok(())
}

pub fn selection_active(state: &ApiState, model_type: &str) -> ApiResult<ActiveProviderInfo> {
    let model_type: ModelType = model_type.parse()?;
    Ok(state.manager.active_provider_info(model_type))
}

/// Recent audit events of one module (`providers`, `provider_models`, `selection`).
pub fn events_list(
    state: &ApiState,
    module: &str,
    limit: Option<usize>,
) -> ApiResult<Vec<EventRecord>> {
    let conn = state.manager.pool().get().map_err(RegistryError::from)?;
    list_events(&conn, module, limit.unwrap_or(50))
        .map_err(|err| RegistryError::from(err).into())
}

pub fn model_types() -> Vec<&'static str> {
    ModelType::ALL.iter().map(ModelType::as_str).collect()
}

pub fn provider_types() -> Vec<&'static str> {
    PROVIDER_TYPES.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AesGcmCodec;
    use crate::db::test_pool;

    fn state() -> (tempfile::TempDir, ApiState) {
        let (dir, pool) = test_pool();
        let manager =
            ModelManager::with_sqlite_settings(pool, Arc::new(AesGcmCodec::from_passphrase("api")));
        (dir, ApiState::new(manager))
    }

    fn provider_input(name: &str, key: Option<&str>) -> ProviderInput {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "display_name": name.to_uppercase(),
            "api_key": key,
        }))
        .unwrap()
    }

    fn model_input(model_id: &str, model_type: &str, default: bool) -> ModelInput {
        serde_json::from_value(serde_json::json!({
            "model_id": model_id,
            "model_name": model_id,
            "model_type": model_type,
            "is_default": default,
        }))
        .unwrap()
    }

    #[test]
    fn provider_views_expose_key_presence_only() {
        let (_dir, state) = state();
        let id = providers_create(&state, provider_input("openai", Some("sk-hidden")))
            .unwrap()
            .id;

        let view = providers_get(&state, &id).unwrap();
        assert!(view.has_api_key);
        assert!(view.requires_api_key);
        assert_eq!(view.provider_type, "openai_compatible");
        let body = serde_json::to_string(&providers_list(&state, false).unwrap()).unwrap();
        assert!(!body.contains("sk-hidden"));
    }

    #[test]
    fn missing_rows_map_to_not_found() {
        let (_dir, state) = state();
        let err = providers_get(&state, "nope").unwrap_err();
        assert_eq!(err.code, "REG-1404");
        assert_eq!(err.status(), 404);

        let err = providers_update(&state, "nope", provider_input("x", None)).unwrap_err();
        assert_eq!(err.status(), 404);
        assert_eq!(providers_delete(&state, "nope").unwrap_err().status(), 404);
        assert_eq!(
            models_create(&state, "nope", model_input("m", "chat", false))
                .unwrap_err()
                .status(),
            404
        );
    }

    #[test]
    fn duplicate_name_and_bad_input_are_client_errors() {
        let (_dir, state) = state();
        providers_create(&state, provider_input("openai", None)).unwrap();

        let dup = providers_create(&state, provider_input("openai", None)).unwrap_err();
        assert_eq!(dup.status(), 409);
        let bad = providers_create(&state, provider_input("Not A Slug", None)).unwrap_err();
        assert_eq!(bad.status(), 400);
    }

    #[test]
    fn update_replaces_the_whole_record() {
        let (_dir, state) = state();
        let id = providers_create(&state, provider_input("openai", Some("sk-1")))
            .unwrap()
            .id;

        let mut input = provider_input("openai", None);
        input.display_name = "OpenAI Platform".into();
        providers_update(&state, &id, input).unwrap();

        let view = providers_get(&state, &id).unwrap();
        assert_eq!(view.display_name, "OpenAI Platform");
        assert!(!view.has_api_key);
    }

    #[test]
    fn model_endpoints_are_scoped_to_their_provider() {
        let (_dir, state) = state();
        let a = providers_create(&state, provider_input("alpha", None)).unwrap().id;
        let b = providers_create(&state, provider_input("beta", None)).unwrap().id;
        let model = models_create(&state, &a, model_input("a-chat", "chat", true)).unwrap().id;
        models_create(&state, &a, model_input("a-embed", "embedding", true)).unwrap();

        assert_eq!(models_list(&state, &a, None, false).unwrap().len(), 2);
        assert_eq!(models_list(&state, &a, Some("chat"), false).unwrap().len(), 1);
        assert_eq!(models_list(&state, &a, Some("vision"), false).unwrap_err().status(), 400);

        let err = models_delete(&state, &b, &model).unwrap_err();
        assert_eq!(err.status(), 404);

        let mut renamed = model_input("a-chat", "chat", true);
        renamed.model_name = "Alpha Chat".into();
        models_update(&state, &a, &model, renamed).unwrap();
        let listed = models_list(&state, &a, Some("chat"), false).unwrap();
        assert_eq!(listed[0].model_name, "Alpha Chat");

        models_delete(&state, &a, &model).unwrap();
        assert!(models_list(&state, &a, Some("chat"), true).unwrap().is_empty());
    }

    #[test]
    fn unknown_model_type_is_rejected_on_create() {
        let (_dir, state) = state();
        let id = providers_create(&state, provider_input("alpha", None)).unwrap().id;
        let err = models_create(&state, &id, model_input("m", "vision", false)).unwrap_err();
        assert_eq!(err.code, "REG-1400");
    }

    #[test]
    fn selection_set_then_current() {
        let (_dir, state) = state();
        assert_eq!(selection_current(&state), SelectedModelsView::default());

        let id = providers_create(&state, provider_input("alpha", Some("k"))).unwrap().id;
        models_create(&state, &id, model_input("chat-1", "chat", true)).unwrap();
        models_create(&state, &id, model_input("chat-2", "chat", false)).unwrap();
        models_create(&state, &id, model_input("embed-1", "embedding", false)).unwrap();

        selection_set(
            &state,
            SelectionInput {
                chat_provider_id: id.clone(),
                chat_model_id: "chat-2".into(),
                embedding_provider_id: id.clone(),
                embedding_model_id: "embed-1".into(),
            },
        )
        .unwrap();

        let current = selection_current(&state);
        assert_eq!(current.chat_model.unwrap().model_id, "chat-2");
        assert_eq!(current.embedding_provider.unwrap().name, "alpha");
        assert_eq!(selection_active(&state, "chat").unwrap().model, "chat-2");
        assert_eq!(events_list(&state, "selection", None).unwrap().len(), 2);
    }

    #[test]
    fn type_catalogues() {
        assert_eq!(model_types(), vec!["chat", "embedding"]);
        assert_eq!(provider_types(), vec!["openai_compatible", "custom"]);
        assert_eq!(ping()["ok"], true);
    }
}
