use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::Provider;
use crate::codec::SecretCodec;
use crate::errors::{RegistryError, Result};
use crate::logging::audit;

const MODULE: &str = "providers";

const SELECT_PROVIDER: &str = "SELECT id, name, display_name, base_url, api_key_encrypted, requires_api_key, is_active, provider_type, description, configuration FROM model_providers";

/// A provider as stored: the key is still ciphertext.
struct ProviderRow {
    provider: Provider,
    api_key_encrypted: Option<String>,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<ProviderRow> {
    let configuration: Option<String> = row.get(9)?;
    Ok(ProviderRow {
        provider: Provider {
            id: row.get(0)?,
            name: row.get(1)?,
            display_name: row.get(2)?,
            base_url: row.get(3)?,
            api_key: None,
            requires_api_key: row.get(5)?,
            is_active: row.get(6)?,
            provider_type: row.get(7)?,
            description: row.get(8)?,
            configuration: parse_configuration(configuration.as_deref()),
        },
        api_key_encrypted: row.get(4)?,
    })
}

pub(crate) fn parse_configuration(raw: Option<&str>) -> Map<String, Value> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

fn decrypt_api_key(codec: &dyn SecretCodec, cipher: Option<&str>) -> Result<Option<String>> {
    match cipher {
        None | Some("") => Ok(None),
        Some(c) => codec.decrypt(c).map(Some).map_err(|e| e.into_decrypt()),
    }
}

/// Decrypt the stored key. A row whose key cannot be decrypted is still
/// returned, with the key treated as absent.
fn reveal(row: ProviderRow, codec: &dyn SecretCodec) -> Provider {
    let ProviderRow {
        mut provider,
        api_key_encrypted,
    } = row;
    provider.api_key = match decrypt_api_key(codec, api_key_encrypted.as_deref()) {
        Ok(key) => key,
        Err(err) => {
            warn!("failed to decrypt API key for provider {}: {err}", provider.name);
            None
        }
    };
    provider
}

fn encrypt_api_key(codec: &dyn SecretCodec, key: Option<&str>) -> Result<Option<String>> {
    match key {
        None | Some("") => Ok(None),
        Some(k) => codec.encrypt(k).map(Some).map_err(|e| e.into_encrypt()),
    }
}

pub fn list_providers(
    conn: &Connection,
    codec: &dyn SecretCodec,
    include_inactive: bool,
) -> Result<Vec<Provider>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_PROVIDER} WHERE (?1 OR is_active = 1) ORDER BY display_name COLLATE NOCASE, id"
    ))?;
    let rows = stmt.query_map(params![include_inactive], map_row)?;

    let mut providers = Vec::new();
    for row in rows {
        providers.push(reveal(row?, codec));
    }
    Ok(providers)
}

pub fn get_provider(
    conn: &Connection,
    codec: &dyn SecretCodec,
    provider_id: &str,
) -> Result<Option<Provider>> {
    let row = conn
        .query_row(&format!("{SELECT_PROVIDER} WHERE id = ?1"), params![provider_id], map_row)
        .optional()?;
    Ok(row.map(|r| reveal(r, codec)))
}

/// Exact, case-sensitive lookup by slug, including inactive providers.
pub fn get_provider_by_name(
    conn: &Connection,
    codec: &dyn SecretCodec,
    name: &str,
) -> Result<Option<Provider>> {
    let row = conn
        .query_row(&format!("{SELECT_PROVIDER} WHERE name = ?1"), params![name], map_row)
        .optional()?;
    Ok(row.map(|r| reveal(r, codec)))
}

pub fn create_provider(
    conn: &Connection,
    codec: &dyn SecretCodec,
    mut provider: Provider,
) -> Result<String> {
    provider.validate()?;
    if provider.id.is_empty() {
        provider.id = Uuid::new_v4().to_string();
    }
    let api_key_encrypted = encrypt_api_key(codec, provider.api_key.as_deref())?;
    let now = OffsetDateTime::now_utc().unix_timestamp();

    conn.execute(
        "INSERT INTO model_providers (id, name, display_name, base_url, api_key_encrypted, requires_api_key, is_active, provider_type, description, configuration, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            provider.id,
            provider.name,
            provider.display_name,
            provider.base_url,
            api_key_encrypted,
            provider.requires_api_key,
            provider.is_active,
            provider.provider_type,
            provider.description,
            Value::Object(provider.configuration.clone()).to_string(),
            now,
        ],
    )
    .map_err(|err| match RegistryError::from(err) {
        RegistryError::Conflict(_) => {
            RegistryError::Conflict(format!("provider '{}' already exists", provider.name))
        }
        other => other,
    })?;

    info!("created model provider {} ({})", provider.name, provider.id);
    audit(
        conn,
        "PRV-0001",
        MODULE,
        "provider created",
        json!({ "id": provider.id, "name": provider.name }),
    );
    Ok(provider.id)
}

/// Replace every mutable field of the provider. The stored key is replaced
/// by `provider.api_key`, so passing no key clears it. Returns `false` when
/// no row matched the id.
pub fn update_provider(
    conn: &Connection,
    codec: &dyn SecretCodec,
    provider: &Provider,
) -> Result<bool> {
    provider.validate()?;
    let api_key_encrypted = encrypt_api_key(codec, provider.api_key.as_deref())?;
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let changed = conn
        .execute(
            "UPDATE model_providers SET name = ?1, display_name = ?2, base_url = ?3, api_key_encrypted = ?4, requires_api_key = ?5,
                 is_active = ?6, provider_type = ?7, description = ?8, configuration = ?9, updated_at = ?10
             WHERE id = ?11",
            params![
                provider.name,
                provider.display_name,
                provider.base_url,
                api_key_encrypted,
                provider.requires_api_key,
                provider.is_active,
                provider.provider_type,
                provider.description,
                Value::Object(provider.configuration.clone()).to_string(),
                now,
                provider.id,
            ],
        )
        .map_err(|err| match RegistryError::from(err) {
            RegistryError::Conflict(_) => {
                RegistryError::Conflict(format!("provider '{}' already exists", provider.name))
            }
            other => other,
        })?;

    if changed == 0 {
        warn!("update of provider {} matched no rows", provider.id);
        return Ok(false);
    }
    info!("updated model provider {}", provider.name);
    audit(
        conn,
        "PRV-0002",
        MODULE,
        "provider updated",
        json!({
            "id": provider.id,
            "name": provider.name,
            "has_api_key": api_key_encrypted.is_some(),
        }),
    );
    Ok(true)
}

/// Hard delete. Models that reference the provider are left untouched.
pub fn delete_provider(conn: &Connection, provider_id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM model_providers WHERE id = ?1", params![provider_id])?;
    if changed == 0 {
        return Ok(false);
    }
    info!("deleted model provider {provider_id}");
    audit(conn, "PRV-0003", MODULE, "provider deleted", json!({ "id": provider_id }));
    Ok(true)
}
