//! Resolution of the "active" chat and embedding models.
//!
//! The stored selection is a `(provider id, model id)` pair per model type in
//! the settings store. It may be missing, or point at a provider or model
//! that has since been removed or deactivated. Resolution never fails:
//!
//! 1. a stored selection that still matches an active model of the type wins;
//! 2. otherwise the first `is_default` model found scanning active providers by
//!    `display_name` and their active models by `model_name`;
//! 3. otherwise the first model seen in that same scan;
//! 4. otherwise nothing.

use log::{debug, error, info, warn};
use rusqlite::Connection;
use serde::Serialize;

use super::models::list_models;
use super::providers::{get_provider, list_providers};
use super::types::{ModelType, Provider, ProviderModel};
use crate::codec::SecretCodec;
use crate::errors::Result;
use crate::settings::SettingsStore;

pub const SELECTION_CATEGORY: &str = "rag_strategy";

/// Settings keys holding the selected provider id and provider model id.
pub fn selection_keys(model_type: ModelType) -> (&'static str, &'static str) {
    match model_type {
        ModelType::Chat => ("SELECTED_CHAT_PROVIDER_ID", "SELECTED_CHAT_MODEL_ID"),
        ModelType::Embedding => ("SELECTED_EMBEDDING_PROVIDER_ID", "SELECTED_EMBEDDING_MODEL_ID"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveModel {
    pub provider: Provider,
    pub model: ProviderModel,
}

pub fn resolve_selected(
    conn: &Connection,
    codec: &dyn SecretCodec,
    settings: &dyn SettingsStore,
    model_type: ModelType,
) -> Option<ActiveModel> {
    match stored_selection(conn, codec, settings, model_type) {
        Ok(Some(active)) => return Some(active),
        Ok(None) => {}
        Err(err) => warn!("failed to read selected {model_type} model, using default: {err}"),
    }

    match default_model(conn, codec, model_type) {
        Ok(found) => found,
        Err(err) => {
            error!("failed to find a default {model_type} model: {err}");
            None
        }
    }
}

fn stored_selection(
    conn: &Connection,
    codec: &dyn SecretCodec,
    settings: &dyn SettingsStore,
    model_type: ModelType,
) -> Result<Option<ActiveModel>> {
    let (provider_key, model_key) = selection_keys(model_type);
    let provider_id = settings.get(provider_key)?.filter(|v| !v.is_empty());
    let model_id = settings.get(model_key)?.filter(|v| !v.is_empty());
    let (Some(provider_id), Some(model_id)) = (provider_id, model_id) else {
        debug!("no {model_type} selection stored");
        return Ok(None);
    };

    let Some(provider) = get_provider(conn, codec, &provider_id)? else {
        info!("selected {model_type} provider {provider_id} no longer exists");
        return Ok(None);
    };

    let selected = list_models(conn, &provider.id, Some(model_type), false)?
        .into_iter()
        .find(|m| m.model_id == model_id);
    match selected {
        Some(model) => Ok(Some(ActiveModel { provider, model })),
        None => {
            info!(
                "selected {model_type} model {model_id} is not an active model of {}",
                provider.name
            );
            Ok(None)
        }
    }
}

/// Scan active providers for a default-marked model, remembering the first
/// model seen in case no provider marks one.
pub fn default_model(
    conn: &Connection,
    codec: &dyn SecretCodec,
    model_type: ModelType,
) -> Result<Option<ActiveModel>> {
    let mut first_seen: Option<ActiveModel> = None;

    for provider in list_providers(conn, codec, false)? {
        let models = list_models(conn, &provider.id, Some(model_type), false)?;
        if let Some(model) = models.iter().find(|m| m.is_default) {
            return Ok(Some(ActiveModel {
                model: model.clone(),
                provider,
            }));
        }
        if first_seen.is_none() {
            if let Some(model) = models.into_iter().next() {
                first_seen = Some(ActiveModel { provider, model });
            }
        }
    }

    Ok(first_seen)
}

/// Overwrite both selection keys. The pair is not validated; resolution
/// falls back later if it does not match anything.
pub fn set_selected(
    settings: &dyn SettingsStore,
    model_type: ModelType,
    provider_id: &str,
    model_id: &str,
) -> bool {
    let (provider_key, model_key) = selection_keys(model_type);
    let written = settings
        .set(provider_key, provider_id, SELECTION_CATEGORY)
        .and_then(|_| settings.set(model_key, model_id, SELECTION_CATEGORY));
    match written {
        Ok(()) => {
            info!("set selected {model_type} model: {provider_id}/{model_id}");
            true
        }
        Err(err) => {
            error!("failed to set selected {model_type} model: {err}");
            false
        }
    }
}
