//! Facade over the registries, the selection resolver and client
//! construction.
//!
//! The manager owns the connection pool, the secret codec and the settings
//! store so that callers (the `api::v1` handlers, the CLI) only deal in
//! providers, models and model types. Every method checks out its own pooled
//! connection; nothing is cached here beyond what the injected settings
//! store memoizes.

use std::sync::Arc;

use log::{error, info, warn};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;
use serde_json::json;

use crate::clients::{ClientFactory, ModelInfo, PLACEHOLDER_API_KEY};
use crate::codec::SecretCodec;
use crate::db::DbPool;
use crate::errors::{RegistryError, Result};
use crate::logging::audit;
use crate::registry::{models, providers, selection};
use crate::registry::{ActiveModel, ModelType, Provider, ProviderModel};
use crate::settings::{CachedSettings, SettingsStore, SqliteSettings};

const FALLBACK_PROVIDER: &str = "openai";

/// Resolved chat and embedding models, as returned by [`ModelManager::current_selection`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedModels {
    pub chat: Option<ActiveModel>,
    pub embedding: Option<ActiveModel>,
}

/// Summary of the provider/model a model type currently resolves to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveProviderInfo {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub has_api_key: bool,
    pub provider_display_name: Option<String>,
    pub model_display_name: Option<String>,
}

impl ActiveProviderInfo {
    fn fallback(model_type: ModelType) -> Self {
        Self {
            provider: FALLBACK_PROVIDER.to_string(),
            model: model_type.fallback_model_id().to_string(),
            base_url: None,
            has_api_key: false,
            provider_display_name: None,
            model_display_name: None,
        }
    }
}

impl From<&ActiveModel> for ActiveProviderInfo {
    fn from(active: &ActiveModel) -> Self {
        Self {
            provider: active.provider.name.clone(),
            model: active.model.model_id.clone(),
            base_url: active.provider.base_url.clone(),
            has_api_key: active.provider.has_api_key(),
            provider_display_name: Some(active.provider.display_name.clone()),
            model_display_name: Some(active.model.model_name.clone()),
        }
    }
}

pub struct ModelManager {
    pool: DbPool,
    codec: Arc<dyn SecretCodec>,
    settings: Arc<dyn SettingsStore>,
}

impl ModelManager {
    /// Construct a manager from explicit collaborators.
    pub fn new(
        pool: DbPool,
        codec: Arc<dyn SecretCodec>,
        settings: Arc<dyn SettingsStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            codec,
            settings,
        })
    }

    /// Construct a manager whose selection lives in `app_settings`, memoized
    /// for the default TTL.
    pub fn with_sqlite_settings(pool: DbPool, codec: Arc<dyn SecretCodec>) -> Arc<Self> {
        let settings = CachedSettings::new(SqliteSettings::new(pool.clone()));
        Self::new(pool, codec, Arc::new(settings))
    }

    /// Return a clone of the underlying connection pool.
    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    pub fn codec(&self) -> &dyn SecretCodec {
        self.codec.as_ref()
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn list_providers(&self, include_inactive: bool) -> Result<Vec<Provider>> {
        providers::list_providers(&*self.conn()?, self.codec(), include_inactive)
    }

    pub fn get_provider(&self, provider_id: &str) -> Result<Option<Provider>> {
        providers::get_provider(&*self.conn()?, self.codec(), provider_id)
    }

    pub fn get_provider_by_name(&self, name: &str) -> Result<Option<Provider>> {
        providers::get_provider_by_name(&*self.conn()?, self.codec(), name)
    }

    pub fn create_provider(&self, provider: Provider) -> Result<String> {
        providers::create_provider(&*self.conn()?, self.codec(), provider)
    }

    pub fn update_provider(&self, provider: &Provider) -> Result<bool> {
        providers::update_provider(&*self.conn()?, self.codec(), provider)
    }

    pub fn delete_provider(&self, provider_id: &str) -> Result<bool> {
        providers::delete_provider(&*self.conn()?, provider_id)
    }

    pub fn list_models(
        &self,
        provider_id: &str,
        model_type: Option<ModelType>,
        include_inactive: bool,
    ) -> Result<Vec<ProviderModel>> {
        models::list_models(&*self.conn()?, provider_id, model_type, include_inactive)
    }

    pub fn get_model(&self, model_id: &str) -> Result<Option<ProviderModel>> {
        models::get_model(&*self.conn()?, model_id)
    }

    pub fn create_model(&self, model: ProviderModel) -> Result<String> {
        models::create_model(&*self.conn()?, model)
    }

    pub fn update_model(&self, model: &ProviderModel) -> Result<bool> {
        models::update_model(&*self.conn()?, model)
    }

    pub fn delete_model(&self, model_id: &str) -> Result<bool> {
        models::delete_model(&*self.conn()?, model_id)
    }

    /// Resolve the active model for `model_type`. Never fails; a pool
    /// failure is logged and treated as "nothing configured".
    pub fn resolve_selected(&self, model_type: ModelType) -> Option<ActiveModel> {
        let conn = match self.conn() {
            Ok(conn) => conn,
            Err(err) => {
                error!("failed to resolve selected {model_type} model: {err}");
                return None;
            }
        };
        selection::resolve_selected(&conn, self.codec(), self.settings.as_ref(), model_type)
    }

    pub fn set_selected(&self, model_type: ModelType, provider_id: &str, model_id: &str) -> bool {
        if !selection::set_selected(self.settings.as_ref(), model_type, provider_id, model_id) {
            return false;
        }
        match self.conn() {
            Ok(conn) => audit(
                &conn,
                "SEL-0001",
                "selection",
                &format!("selected {model_type} model {model_id}"),
                json!({
                    "model_type": model_type,
                    "provider_id": provider_id,
                    "model_id": model_id,
                }),
            ),
            Err(err) => warn!("failed to write selection audit event: {err}"),
        }
        true
    }

    pub fn current_selection(&self) -> SelectedModels {
        SelectedModels {
            chat: self.resolve_selected(ModelType::Chat),
            embedding: self.resolve_selected(ModelType::Embedding),
        }
    }

    /// Write both selections. Both writes are attempted; the result is false
    /// if either failed.
    pub fn set_selection(
        &self,
        chat_provider_id: &str,
        chat_model_id: &str,
        embedding_provider_id: &str,
        embedding_model_id: &str,
    ) -> bool {
        let chat = self.set_selected(ModelType::Chat, chat_provider_id, chat_model_id);
        let embedding =
            self.set_selected(ModelType::Embedding, embedding_provider_id, embedding_model_id);
        chat && embedding
    }

    /// Build a client for the selected model of `model_type`, or for the
    /// default model of an explicitly named provider.
    pub fn get_client<F: ClientFactory>(
        &self,
        factory: &F,
        model_type: ModelType,
        explicit_provider: Option<&str>,
    ) -> Result<(F::Handle, ModelInfo)> {
        let active = match explicit_provider {
            Some(name) => self.named_provider_model(name, model_type)?,
            None => self.resolve_selected(model_type).ok_or_else(|| {
                RegistryError::NotConfigured(format!("no {model_type} provider/model selected"))
            })?,
        };
        let provider = &active.provider;

        if provider.requires_api_key && !provider.has_api_key() {
            return Err(RegistryError::MissingCredential(provider.display_name.clone()));
        }
        let api_key = provider
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(PLACEHOLDER_API_KEY);

        let handle = factory.build(provider.base_url.as_deref(), api_key)?;
        info!(
            "built {model_type} client for {}/{}",
            provider.name, active.model.model_id
        );
        Ok((handle, ModelInfo::from(&active)))
    }

    fn named_provider_model(&self, name: &str, model_type: ModelType) -> Result<ActiveModel> {
        let conn = self.conn()?;
        let provider = providers::get_provider_by_name(&conn, self.codec(), name)?
            .ok_or_else(|| RegistryError::NotFound(format!("provider '{name}'")))?;
        let models = models::list_models(&conn, &provider.id, Some(model_type), false)?;
        let model = default_or_first(models).ok_or_else(|| {
            RegistryError::NotConfigured(format!(
                "provider '{name}' has no active {model_type} model"
            ))
        })?;
        Ok(ActiveModel { provider, model })
    }

    /// Model id to call for `model_type`. Prefers the named provider's
    /// default model, then the resolved selection, then a built-in literal.
    pub fn model_id_for(&self, model_type: ModelType, provider_name: Option<&str>) -> String {
        match self.lookup_model_id(model_type, provider_name) {
            Ok(Some(model_id)) => model_id,
            Ok(None) => {
                warn!("no {model_type} model configured, using {}", model_type.fallback_model_id());
                model_type.fallback_model_id().to_string()
            }
            Err(err) => {
                error!("failed to look up {model_type} model id: {err}");
                model_type.fallback_model_id().to_string()
            }
        }
    }

    fn lookup_model_id(
        &self,
        model_type: ModelType,
        provider_name: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(name) = provider_name {
            let conn = self.conn()?;
            if let Some(provider) = providers::get_provider_by_name(&conn, self.codec(), name)? {
                let models = models::list_models(&conn, &provider.id, Some(model_type), false)?;
                return Ok(default_or_first(models).map(|m| m.model_id));
            }
            warn!("provider '{name}' not found, using the selected {model_type} model");
        }
        Ok(self.resolve_selected(model_type).map(|active| active.model.model_id))
    }

    pub fn chat_model_id(&self) -> String {
        self.model_id_for(ModelType::Chat, None)
    }

    pub fn embedding_model_id(&self) -> String {
        self.model_id_for(ModelType::Embedding, None)
    }

    pub fn active_provider_info(&self, model_type: ModelType) -> ActiveProviderInfo {
        self.resolve_selected(model_type)
            .map(|active| ActiveProviderInfo::from(&active))
            .unwrap_or_else(|| ActiveProviderInfo::fallback(model_type))
    }
}

fn default_or_first(models: Vec<ProviderModel>) -> Option<ProviderModel> {
    let index = models.iter().position(|m| m.is_default).unwrap_or(0);
    models.into_iter().nth(index)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::codec::AesGcmCodec;
    use crate::db::test_pool;
    use crate::logging::list_events;

    #[derive(Default)]
    struct RecordingFactory {
        calls: Mutex<Vec<(Option<String>, String)>>,
    }

    impl ClientFactory for RecordingFactory {
        type Handle = String;

        fn build(&self, base_url: Option<&str>, api_key: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((base_url.map(str::to_string), api_key.to_string()));
            Ok(format!("client:{}", base_url.unwrap_or("default")))
        }
    }

    fn manager() -> (tempfile::TempDir, Arc<ModelManager>) {
        let (dir, pool) = test_pool();
        let codec = Arc::new(AesGcmCodec::from_passphrase("manager"));
        (dir, ModelManager::with_sqlite_settings(pool, codec))
    }

    fn add_provider(mgr: &ModelManager, name: &str, display: &str, key: Option<&str>) -> String {
        let mut provider = Provider::new(name, display);
        provider.api_key = key.map(str::to_string);
        mgr.create_provider(provider).unwrap()
    }

    fn add_model(
        mgr: &ModelManager,
        provider_id: &str,
        model_id: &str,
        kind: ModelType,
        default: bool,
    ) {
        let mut model = ProviderModel::new(provider_id, model_id, model_id, kind);
        model.is_default = default;
        mgr.create_model(model).unwrap();
    }

    #[test]
    fn default_model_resolves_across_providers() {
        let (_dir, mgr) = manager();
        let openai = add_provider(&mgr, "openai", "OpenAI", Some("sk-1"));
        add_model(&mgr, &openai, "gpt-4", ModelType::Chat, true);
        let anthropic = add_provider(&mgr, "anthropic", "Anthropic", Some("sk-2"));
        add_model(&mgr, &anthropic, "claude-3", ModelType::Chat, false);

        let active = mgr.resolve_selected(ModelType::Chat).unwrap();
        assert_eq!(active.provider.name, "openai");
        assert_eq!(active.model.model_id, "gpt-4");
        assert_eq!(mgr.chat_model_id(), "gpt-4");
    }

    #[test]
    fn get_client_uses_stored_key_and_reports_metadata() {
        let (_dir, mgr) = manager();
        let mut provider = Provider::new("openai", "OpenAI");
        provider.api_key = Some("sk-live".into());
        provider.base_url = Some("https://example.test/v1".into());
        let id = mgr.create_provider(provider).unwrap();
        let mut model =
            ProviderModel::new(&id, "gpt-4o", "GPT-4o", ModelType::Chat).default_model();
        model.max_tokens = Some(128_000);
        mgr.create_model(model).unwrap();

        let factory = RecordingFactory::default();
        let (handle, info) = mgr.get_client(&factory, ModelType::Chat, None).unwrap();
        assert_eq!(handle, "client:https://example.test/v1");
        assert_eq!(info.model_name, "GPT-4o");
        assert_eq!(info.provider_display_name, "OpenAI");
        assert_eq!(info.max_tokens, Some(128_000));
        assert_eq!(
            factory.calls.lock().unwrap().as_slice(),
            &[(Some("https://example.test/v1".to_string()), "sk-live".to_string())]
        );
    }

    #[test]
    fn get_client_requires_a_key_only_when_the_provider_does() {
        let (_dir, mgr) = manager();
        let locked = add_provider(&mgr, "locked", "Locked", None);
        add_model(&mgr, &locked, "m", ModelType::Chat, true);

        let factory = RecordingFactory::default();
        let err = mgr.get_client(&factory, ModelType::Chat, None).unwrap_err();
        assert!(matches!(err, RegistryError::MissingCredential(_)));
        assert!(factory.calls.lock().unwrap().is_empty());

        let mut open = Provider::new("local", "Local");
        open.requires_api_key = false;
        let open_id = mgr.create_provider(open).unwrap();
        add_model(&mgr, &open_id, "llama", ModelType::Chat, true);

        let (_, info) = mgr.get_client(&factory, ModelType::Chat, Some("local")).unwrap();
        assert_eq!(info.model_id, "llama");
        assert_eq!(factory.calls.lock().unwrap()[0].1, PLACEHOLDER_API_KEY);
    }

    #[test]
    fn explicit_provider_errors_are_distinct() {
        let (_dir, mgr) = manager();
        let factory = RecordingFactory::default();

        let missing = mgr.get_client(&factory, ModelType::Chat, Some("nope")).unwrap_err();
        assert!(matches!(missing, RegistryError::NotFound(_)));

        let id = add_provider(&mgr, "empty", "Empty", Some("k"));
        add_model(&mgr, &id, "embed", ModelType::Embedding, true);
        let unconfigured = mgr.get_client(&factory, ModelType::Chat, Some("empty")).unwrap_err();
        assert!(matches!(unconfigured, RegistryError::NotConfigured(_)));

        let none = mgr.get_client(&factory, ModelType::Chat, None).unwrap_err();
        assert_eq!(none.code(), "SEL-1001");
    }

    #[test]
    fn explicit_provider_may_be_inactive() {
        let (_dir, mgr) = manager();
        let mut dormant = Provider::new("dormant", "Dormant");
        dormant.api_key = Some("sk-dormant".into());
        dormant.is_active = false;
        let id = mgr.create_provider(dormant).unwrap();
        add_model(&mgr, &id, "d-chat", ModelType::Chat, true);

        let factory = RecordingFactory::default();
        let none = mgr.get_client(&factory, ModelType::Chat, None).unwrap_err();
        assert!(matches!(none, RegistryError::NotConfigured(_)));

        let (_, info) = mgr.get_client(&factory, ModelType::Chat, Some("dormant")).unwrap();
        assert_eq!(info.provider_name, "dormant");
        assert_eq!(info.model_id, "d-chat");
        assert_eq!(factory.calls.lock().unwrap()[0].1, "sk-dormant");
    }

    #[test]
    fn explicit_provider_prefers_default_then_first() {
        let (_dir, mgr) = manager();
        let id = add_provider(&mgr, "acme", "Acme", Some("k"));
        add_model(&mgr, &id, "b-model", ModelType::Chat, false);
        add_model(&mgr, &id, "a-model", ModelType::Chat, false);
        assert_eq!(mgr.model_id_for(ModelType::Chat, Some("acme")), "a-model");

        add_model(&mgr, &id, "z-model", ModelType::Chat, true);
        assert_eq!(mgr.model_id_for(ModelType::Chat, Some("acme")), "z-model");
    }

    #[test]
    fn model_id_falls_back_to_selection_then_literal() {
        let (_dir, mgr) = manager();
        assert_eq!(mgr.chat_model_id(), "gpt-4");
        assert_eq!(mgr.embedding_model_id(), "text-embedding-3-small");

        let id = add_provider(&mgr, "acme", "Acme", Some("k"));
        add_model(&mgr, &id, "acme-embed", ModelType::Embedding, false);
        assert_eq!(mgr.model_id_for(ModelType::Embedding, Some("unknown")), "acme-embed");
        assert_eq!(mgr.model_id_for(ModelType::Chat, Some("acme")), "gpt-4");
    }

    #[test]
    fn selection_round_trip_and_audit() {
        let (_dir, mgr) = manager();
        let id = add_provider(&mgr, "acme", "Acme", Some("k"));
        add_model(&mgr, &id, "chat-a", ModelType::Chat, true);
        add_model(&mgr, &id, "chat-b", ModelType::Chat, false);
        add_model(&mgr, &id, "embed-a", ModelType::Embedding, true);

        assert!(mgr.set_selection(&id, "chat-b", &id, "embed-a"));
        let current = mgr.current_selection();
        assert_eq!(current.chat.unwrap().model.model_id, "chat-b");
        assert_eq!(current.embedding.unwrap().model.model_id, "embed-a");

        let events = list_events(&mgr.pool().get().unwrap(), "selection", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.code.as_deref() == Some("SEL-0001")));
    }

    #[test]
    fn active_provider_info_hides_key_and_has_literal_fallback() {
        let (_dir, mgr) = manager();
        let fallback = mgr.active_provider_info(ModelType::Embedding);
        assert_eq!(fallback.provider, "openai");
        assert_eq!(fallback.model, "text-embedding-3-small");
        assert!(!fallback.has_api_key);
        assert!(fallback.provider_display_name.is_none());

        let id = add_provider(&mgr, "acme", "Acme", Some("sk-secret"));
        add_model(&mgr, &id, "chat-a", ModelType::Chat, true);
        let info = mgr.active_provider_info(ModelType::Chat);
        assert_eq!(info.provider, "acme");
        assert!(info.has_api_key);
        assert_eq!(info.model_display_name.as_deref(), Some("chat-a"));
        assert!(!serde_json::to_string(&info).unwrap().contains("sk-secret"));
    }
}
