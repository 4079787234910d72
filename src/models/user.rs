use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;

pub const ROLES: &[&str] = &["admin", "editor", "viewer"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub role: String,   // admin, editor, viewer
    pub status: String, // active, locked
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            display_name: row.get(3)?,
            role: row.get(4)?,
            status: row.get(5)?,
            last_login_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    const SELECT_COLS: &'static str =
        "id, email, password_hash, display_name, role, status, last_login_at, created_at, updated_at";

    // ── Lookups ──

    pub fn get_by_id(pool: &DbPool, id: i64) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::SELECT_COLS),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn get_by_email(pool: &DbPool, email: &str) -> Option<User> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", Self::SELECT_COLS),
            params![normalize_email(email)],
            Self::from_row,
        )
        .ok()
    }

    pub fn list_paginated(pool: &DbPool, role: Option<&str>, limit: i64, offset: i64) -> Vec<User> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let sql = format!(
            "SELECT {} FROM users WHERE (?1 IS NULL OR role = ?1) ORDER BY id ASC LIMIT ?2 OFFSET ?3",
            Self::SELECT_COLS
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![role, limit, offset], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn count_filtered(pool: &DbPool, role: Option<&str>) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM users WHERE (?1 IS NULL OR role = ?1)",
            params![role],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    // ── Create ──

    pub fn create(
        pool: &DbPool,
        email: &str,
        password_hash: &str,
        display_name: &str,
        role: &str,
    ) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO users (email, password_hash, display_name, role, status)
             VALUES (?1, ?2, ?3, ?4, 'active')",
            params![normalize_email(email), password_hash, display_name, role],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                "A user with that email already exists".to_string()
            } else {
                e.to_string()
            }
        })?;
        Ok(conn.last_insert_rowid())
    }

    // ── Update ──

    pub fn update_profile(pool: &DbPool, id: i64, display_name: &str, email: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET display_name = ?1, email = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
            params![display_name, normalize_email(email), id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn update_role(pool: &DbPool, id: i64, role: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET role = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![role, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn update_password(pool: &DbPool, id: i64, password_hash: &str) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET password_hash = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![password_hash, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn touch_last_login(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET last_login_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // ── Status management ──

    pub fn lock(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET status = 'locked', updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id],
        )
        .map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn unlock(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE users SET status = 'active', updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    // ── Delete ──

    pub fn delete(pool: &DbPool, id: i64) -> Result<(), String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        // Campaigns outlive their author
        tx.execute(
            "UPDATE campaigns SET created_by = NULL WHERE created_by = ?1",
            params![id],
        )
        .map_err(|e| e.to_string())?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        tx.commit().map_err(|e| e.to_string())
    }

    // ── Helpers ──

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn is_editor_or_above(&self) -> bool {
        self.role == "admin" || self.role == "editor"
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// Return a safe version without password_hash for API responses
    pub fn safe_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "email": self.email,
            "display_name": self.display_name,
            "role": self.role,
            "status": self.status,
            "last_login_at": self.last_login_at,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
