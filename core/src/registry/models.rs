use log::{info, warn};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::providers::parse_configuration;
use super::types::{ModelType, ProviderModel};
use crate::errors::Result;
use crate::logging::audit;

const MODULE: &str = "provider_models";

const SELECT_MODEL: &str = "SELECT id, provider_id, model_id, model_name, model_type, is_default, is_active, max_tokens, cost_per_token_input, cost_per_token_output, description, configuration FROM provider_models";

/// Costs may come back as REAL, INTEGER or decimal TEXT depending on how the
/// row was written; all of them read as `f64`. NULL stays absent.
pub(crate) fn coerce_cost(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(raw) => std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok()),
        ValueRef::Blob(_) => None,
    }
}

/// Outcome of reading one model row. Rows carrying a `model_type` outside
/// the known set are reported instead of failing the whole query.
enum ModelRow {
    Valid(ProviderModel),
    UnknownType { id: String, model_type: String },
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<ModelRow> {
    let id: String = row.get(0)?;
    let raw_type: String = row.get(4)?;
    let Ok(model_type) = raw_type.parse::<ModelType>() else {
        return Ok(ModelRow::UnknownType { id, model_type: raw_type });
    };
    let configuration: Option<String> = row.get(11)?;
    Ok(ModelRow::Valid(ProviderModel {
        id,
        provider_id: row.get(1)?,
        model_id: row.get(2)?,
        model_name: row.get(3)?,
        model_type,
        is_default: row.get(5)?,
        is_active: row.get(6)?,
        max_tokens: row.get(7)?,
        cost_per_token_input: coerce_cost(row.get_ref(8)?),
        cost_per_token_output: coerce_cost(row.get_ref(9)?),
        description: row.get(10)?,
        configuration: parse_configuration(configuration.as_deref()),
    }))
}

fn keep_valid(row: ModelRow) -> Option<ProviderModel> {
    match row {
        ModelRow::Valid(model) => Some(model),
        ModelRow::UnknownType { id, model_type } => {
            warn!("skipping model {id}: unknown model type '{model_type}'");
            None
        }
    }
}

/// Models of one provider ordered by `model_name`.
pub fn list_models(
    conn: &Connection,
    provider_id: &str,
    model_type: Option<ModelType>,
    include_inactive: bool,
) -> Result<Vec<ProviderModel>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_MODEL} WHERE provider_id = ?1 AND (?2 IS NULL OR model_type = ?2) AND (?3 OR is_active = 1)
         ORDER BY model_name COLLATE NOCASE, id"
    ))?;
    let rows = stmt.query_map(
        params![provider_id, model_type.map(|t| t.as_str()), include_inactive],
        map_row,
    )?;

    let mut models = Vec::new();
    for row in rows {
        if let Some(model) = keep_valid(row?) {
            models.push(model);
        }
    }
    Ok(models)
}

pub fn get_model(conn: &Connection, id: &str) -> Result<Option<ProviderModel>> {
    let row = conn
        .query_row(&format!("{SELECT_MODEL} WHERE id = ?1"), params![id], map_row)
        .optional()?;
    Ok(row.and_then(keep_valid))
}

pub fn create_model(conn: &Connection, mut model: ProviderModel) -> Result<String> {
    model.validate()?;
    if model.id.is_empty() {
        model.id = Uuid::new_v4().to_string();
    }
    let now = OffsetDateTime::now_utc().unix_timestamp();

    conn.execute(
        "INSERT INTO provider_models (id, provider_id, model_id, model_name, model_type, is_default, is_active, max_tokens, cost_per_token_input, cost_per_token_output, description, configuration, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            model.id,
            model.provider_id,
            model.model_id,
            model.model_name,
            model.model_type.as_str(),
            model.is_default,
            model.is_active,
            model.max_tokens,
            model.cost_per_token_input,
            model.cost_per_token_output,
            model.description,
            Value::Object(model.configuration.clone()).to_string(),
            now,
        ],
    )?;

    info!("created model {} for provider {}", model.model_name, model.provider_id);
    audit(
        conn,
        "MDL-0001",
        MODULE,
        "model created",
        json!({ "id": model.id, "provider_id": model.provider_id, "model_id": model.model_id }),
    );
    Ok(model.id)
}

/// Replace every mutable field; `provider_id` is fixed at creation.
pub fn update_model(conn: &Connection, model: &ProviderModel) -> Result<bool> {
    model.validate()?;
    let now = OffsetDateTime::now_utc().unix_timestamp();

    let changed = conn.execute(
        "UPDATE provider_models SET model_id = ?1, model_name = ?2, model_type = ?3, is_default = ?4, is_active = ?5, max_tokens = ?6,
             cost_per_token_input = ?7, cost_per_token_output = ?8, description = ?9, configuration = ?10, updated_at = ?11
         WHERE id = ?12",
        params![
            model.model_id,
            model.model_name,
            model.model_type.as_str(),
            model.is_default,
            model.is_active,
            model.max_tokens,
            model.cost_per_token_input,
            model.cost_per_token_output,
            model.description,
            Value::Object(model.configuration.clone()).to_string(),
            now,
            model.id,
        ],
    )?;

    if changed == 0 {
        warn!("update of model {} matched no rows", model.id);
        return Ok(false);
    }
    info!("updated model {}", model.model_name);
    audit(
        conn,
        "MDL-0002",
        MODULE,
        "model updated",
        json!({ "id": model.id, "model_id": model.model_id }),
    );
    Ok(true)
}

pub fn delete_model(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM provider_models WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Ok(false);
    }
    info!("deleted model {id}");
    audit(conn, "MDL-0003", MODULE, "model deleted", json!({ "id": id }));
    Ok(true)
}
