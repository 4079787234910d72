use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::models::contact::Contact;

#[derive(Debug, Serialize, Clone)]
pub struct ContactList {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub member_count: i64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactListForm {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ContactList {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(ContactList {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            member_count: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    const SELECT: &'static str = "SELECT l.id, l.name, l.description,
            (SELECT COUNT(*) FROM contact_list_members m WHERE m.list_id = l.id),
            l.created_at
         FROM contact_lists l";

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<ContactList> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("{} WHERE l.id = ?1", Self::SELECT),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn list(pool: &DbPool) -> Vec<ContactList> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(&format!("{} ORDER BY l.name ASC", Self::SELECT)) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map([], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn create(pool: &DbPool, form: &ContactListForm) -> Result<i64, String> {
        let name = form.name.trim();
        if name.is_empty() {
            return Err("List name is required".into());
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO contact_lists (name, description) VALUES (?1, ?2)",
            params![name, form.description.trim()],
        )
        .map_err(map_unique)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update(pool: &DbPool, id: i64, form: &ContactListForm) -> Result<(), String> {
        let name = form.name.trim();
        if name.is_empty() {
            return Err("List name is required".into());
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE contact_lists SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, form.description.trim(), id],
            )
            .map_err(map_unique)?;
        if changed == 0 {
            return Err("List not found".into());
        }
        Ok(())
    }

    /// Campaigns targeting the list fall back to all contacts (`ON DELETE SET NULL`),
    /// so deletion is refused while a scheduled or running campaign points at it.
    pub fn delete(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let busy: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM campaigns WHERE list_id = ?1 AND status IN ('scheduled', 'sending')",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| e.to_string())?;
        if busy > 0 {
            return Err("List is used by a scheduled campaign".into());
        }
        conn.execute("DELETE FROM contact_lists WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Returns the number of contacts newly added.
    pub fn add_members(pool: &DbPool, list_id: i64, contact_ids: &[i64]) -> Result<usize, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        let mut added = 0;
        for cid in contact_ids {
            added += tx
                .execute(
                    "INSERT OR IGNORE INTO contact_list_members (list_id, contact_id)
                     SELECT ?1, id FROM contacts WHERE id = ?2",
                    params![list_id, cid],
                )
                .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())?;
        Ok(added)
    }

    pub fn remove_members(pool: &DbPool, list_id: i64, contact_ids: &[i64]) -> Result<usize, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        let mut removed = 0;
        for cid in contact_ids {
            removed += tx
                .execute(
                    "DELETE FROM contact_list_members WHERE list_id = ?1 AND contact_id = ?2",
                    params![list_id, cid],
                )
                .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())?;
        Ok(removed)
    }

    pub fn members(pool: &DbPool, list_id: i64, limit: i64, offset: i64) -> Vec<Contact> {
        let ids: Vec<i64> = {
            let conn = match pool.get() {
                Ok(c) => c,
                Err(_) => return vec![],
            };
            let mut stmt = match conn.prepare(
                "SELECT contact_id FROM contact_list_members WHERE list_id = ?1
                 ORDER BY contact_id ASC LIMIT ?2 OFFSET ?3",
            ) {
                Ok(s) => s,
                Err(_) => return vec![],
            };
            stmt.query_map(params![list_id, limit, offset], |row| row.get(0))
                .map(|rows| rows.filter_map(|r| r.ok()).collect())
                .unwrap_or_default()
        };
        ids.into_iter()
            .filter_map(|id| Contact::find_by_id(pool, id))
            .collect()
    }
}

fn map_unique(e: rusqlite::Error) -> String {
    if e.to_string().contains("UNIQUE") {
        "A list with that name already exists".to_string()
    } else {
        e.to_string()
    }
}
