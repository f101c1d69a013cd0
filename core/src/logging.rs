//! Audit trail written to the `event_log` table.
//!
//! Registry writes record an event here in addition to the `log` facade so
//! that operators can see who changed which provider and when, straight from
//! the database.

use r2d2_sqlite::rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

pub fn log_event(
    conn: &Connection,
    level: &str,
    code: Option<&str>,
    module: &str,
    message: &str,
    explain: Option<&str>,
    data: Option<Value>,
) -> rusqlite::Result<()> {
    let id = Uuid::new_v4().to_string();
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let data_str = data.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO event_log (id, ts, level, code, module, message, explain, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![id, ts, level, code, module, message, explain, data_str],
    )?;
    Ok(())
}

/// Record an audit event, downgrading a failed insert to a warning.
pub(crate) fn audit(conn: &Connection, code: &str, module: &str, message: &str, data: Value) {
    if let Err(err) = log_event(conn, "info", Some(code), module, message, None, Some(data)) {
        log::warn!("failed to write audit event {code}: {err}");
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: String,
    pub ts: i64,
    pub level: String,
    pub code: Option<String>,
    pub module: String,
    pub message: String,
    pub explain: Option<String>,
    pub data: Option<Value>,
}

/// Most recent events for a module, newest first.
pub fn list_events(
    conn: &Connection,
    module: &str,
    limit: usize,
) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, ts, level, code, module, message, explain, data FROM event_log
         WHERE module = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![module, limit as i64], |row| {
        let data: Option<String> = row.get(7)?;
        Ok(EventRecord {
            id: row.get(0)?,
            ts: row.get(1)?,
            level: row.get(2)?,
            code: row.get(3)?,
            module: row.get(4)?,
            message: row.get(5)?,
            explain: row.get(6)?,
            data: data.and_then(|raw| serde_json::from_str(&raw).ok()),
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::apply_migrations;
    use serde_json::json;

    #[test]
    fn events_are_listed_newest_first_per_module() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();

        audit(&conn, "PRV-0001", "providers", "first", json!({ "n": 1 }));
        audit(&conn, "PRV-0002", "providers", "second", json!({ "n": 2 }));
        audit(&conn, "SEL-0001", "selection", "other", json!({}));

        let events = list_events(&conn, "providers", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "second");
        assert_eq!(events[0].data, Some(json!({ "n": 2 })));
        assert_eq!(events[1].code.as_deref(), Some("PRV-0001"));
    }

    #[test]
    fn audit_swallows_missing_table() {
        let conn = Connection::open_in_memory().unwrap();
        audit(&conn, "PRV-0001", "providers", "no table", json!({}));
    }
}
