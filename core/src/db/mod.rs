use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

pub type DbPool = Pool<SqliteConnectionManager>;

pub const DB_FILE_NAME: &str = "modelhub.db";

pub fn init_db(workspace_dir: PathBuf) -> Result<DbPool> {
    std::fs::create_dir_all(&workspace_dir)
        .with_context(|| format!("failed to create workspace {}", workspace_dir.display()))?;
    let db_path = workspace_dir.join(DB_FILE_NAME);
    let mgr = SqliteConnectionManager::file(&db_path)
        .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
    let pool = Pool::new(mgr)?;
    {
        let conn = pool.get()?;
        apply_migrations(&conn)?;
    }
    Ok(pool)
}

pub fn apply_migrations(conn: &Connection) -> Result<()> {
    let migrations: &[(&str, &str)] = &[
        (
            "0001_init.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0001_init.sql"
            )),
        ),
        (
            "0002_model_providers.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0002_model_providers.sql"
            )),
        ),
    ];

    for (name, sql) in migrations {
        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration {name}"))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_pool() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = init_db(dir.path().to_path_buf()).expect("init db");
    (dir, pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_creates_tables_and_is_rerunnable() {
        let dir = tempfile::tempdir().unwrap();
        init_db(dir.path().to_path_buf()).unwrap();
        let pool = init_db(dir.path().to_path_buf()).unwrap();

        let conn = pool.get().unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        for table in ["app_settings", "event_log", "model_providers", "provider_models"] {
            assert!(names.iter().any(|n| n == table), "missing table {table}");
        }
        assert!(dir.path().join(DB_FILE_NAME).exists());
    }
}
