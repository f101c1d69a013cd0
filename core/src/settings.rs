use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, OptionalExtension};
use time::OffsetDateTime;

use crate::cache::{Clock, TtlCache, DEFAULT_TTL};
use crate::db::DbPool;
use crate::errors::Result;

/// Key/value configuration store that persists the model selection.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str, category: &str) -> Result<()>;
}

/// Settings persisted in the `app_settings` table.
#[derive(Clone)]
pub struct SqliteSettings {
    pool: DbPool,
}

impl SqliteSettings {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl SettingsStore for SqliteSettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT value FROM app_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, category: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        conn.execute(
            "INSERT INTO app_settings (key, value, category, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, category = excluded.category, updated_at = excluded.updated_at",
            params![key, value, category, now],
        )?;
        Ok(())
    }
}

/// Memoizes reads of an inner store, including misses, for a fixed TTL.
/// Writes go through to the inner store and refresh the cached entry.
pub struct CachedSettings<S> {
    inner: S,
    cache: TtlCache<Option<String>>,
}

impl<S: SettingsStore> CachedSettings<S> {
    pub fn new(inner: S) -> Self {
        Self::with_ttl(inner, DEFAULT_TTL)
    }

    pub fn with_ttl(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    pub fn with_clock(inner: S, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            cache: TtlCache::with_clock(ttl, clock),
        }
    }
}

impl<S: SettingsStore> SettingsStore for CachedSettings<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(hit) = self.cache.get(key) {
            return Ok(hit);
        }
        let value = self.inner.get(key)?;
        self.cache.set(key, value.clone());
        Ok(value)
    }

    fn set(&self, key: &str, value: &str, category: &str) -> Result<()> {
        if let Err(err) = self.inner.set(key, value, category) {
            self.cache.evict(key);
            return Err(err);
        }
        self.cache.set(key, Some(value.to_string()));
        Ok(())
    }
}
