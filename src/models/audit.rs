use chrono::NaiveDateTime;
use rusqlite::params;
use serde::Serialize;

use crate::db::DbPool;

#[derive(Debug, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub entity_title: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Who did something and from where. Passed to every audit write.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub ip: Option<String>,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn log(
        pool: &DbPool,
        actor: &Actor,
        action: &str,
        entity_type: Option<&str>,
        entity_id: Option<i64>,
        entity_title: Option<&str>,
        details: Option<&str>,
    ) {
        if let Ok(conn) = pool.get() {
            if let Err(e) = conn.execute(
                "INSERT INTO audit_log (user_id, user_name, action, entity_type, entity_id, entity_title, details, ip_address)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    actor.user_id,
                    actor.user_name,
                    action,
                    entity_type,
                    entity_id,
                    entity_title,
                    details,
                    actor.ip
                ],
            ) {
                log::warn!("[audit] Failed to record {}: {}", action, e);
            }
        }
    }

    pub fn list(
        pool: &DbPool,
        action_filter: Option<&str>,
        entity_filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<Self> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };

        conn.prepare(
            "SELECT id, user_id, user_name, action, entity_type, entity_id, entity_title, details, ip_address, created_at
             FROM audit_log
             WHERE (?1 IS NULL OR action = ?1) AND (?2 IS NULL OR entity_type = ?2)
             ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
        )
        .and_then(|mut stmt| {
            stmt.query_map(params![action_filter, entity_filter, limit, offset], |row| {
                Ok(AuditEntry {
                    id: row.get("id")?,
                    user_id: row.get("user_id")?,
                    user_name: row.get("user_name")?,
                    action: row.get("action")?,
                    entity_type: row.get("entity_type")?,
                    entity_id: row.get("entity_id")?,
                    entity_title: row.get("entity_title")?,
                    details: row.get("details")?,
                    ip_address: row.get("ip_address")?,
                    created_at: row.get("created_at")?,
                })
            })
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
        })
        .unwrap_or_default()
    }

    pub fn count(pool: &DbPool, action_filter: Option<&str>, entity_filter: Option<&str>) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE (?1 IS NULL OR action = ?1) AND (?2 IS NULL OR entity_type = ?2)",
            params![action_filter, entity_filter],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    pub fn cleanup(pool: &DbPool, max_age_days: i64) -> Result<usize, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM audit_log WHERE created_at < datetime('now', ?1)",
            params![format!("-{} days", max_age_days)],
        )
        .map_err(|e| e.to_string())
    }
}
