use std::sync::OnceLock;

use regex::Regex;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::models::user::normalize_email;

pub const STATUSES: &[&str] = &["active", "unsubscribed", "bounced"];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Contact {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub phone: String,
    pub notes: String,
    pub status: String,
    #[serde(skip_serializing)]
    pub unsubscribe_token: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContactForm {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub notes: String,
}

/// Outcome of a bulk create: ids created plus `(email, reason)` for each row skipped.
#[derive(Debug, Serialize, Default)]
pub struct BulkResult {
    pub created: Vec<i64>,
    pub skipped: Vec<(String, String)>,
}

pub fn is_valid_email(email: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-']+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
            .expect("email regex")
    });
    email.len() <= 254 && re.is_match(email)
}

pub fn new_unsubscribe_token() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

impl ContactForm {
    pub fn validate(&self) -> Result<(), String> {
        let email = normalize_email(&self.email);
        if email.is_empty() {
            return Err("Email is required".into());
        }
        if !is_valid_email(&email) {
            return Err(format!("Invalid email address: {}", self.email.trim()));
        }
        Ok(())
    }
}

impl Contact {
    const SELECT_COLS: &'static str =
        "id, email, first_name, last_name, company, phone, notes, status, unsubscribe_token, created_at, updated_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Contact {
            id: row.get(0)?,
            email: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            company: row.get(4)?,
            phone: row.get(5)?,
            notes: row.get(6)?,
            status: row.get(7)?,
            unsubscribe_token: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    // ── Lookups ──

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Contact> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM contacts WHERE id = ?1", Self::SELECT_COLS),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn find_by_email(pool: &DbPool, email: &str) -> Option<Contact> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM contacts WHERE email = ?1", Self::SELECT_COLS),
            params![normalize_email(email)],
            Self::from_row,
        )
        .ok()
    }

    pub fn find_by_token(pool: &DbPool, token: &str) -> Option<Contact> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM contacts WHERE unsubscribe_token = ?1", Self::SELECT_COLS),
            params![token],
            Self::from_row,
        )
        .ok()
    }

    /// Case-insensitive search over email, names and company.
    pub fn list(
        pool: &DbPool,
        query: Option<&str>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<Contact> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let pattern = like_pattern(query);
        let sql = format!(
            "SELECT {} FROM contacts
             WHERE (?1 IS NULL OR lower(email) LIKE ?1 ESCAPE '\\' OR lower(first_name) LIKE ?1 ESCAPE '\\'
                    OR lower(last_name) LIKE ?1 ESCAPE '\\' OR lower(company) LIKE ?1 ESCAPE '\\')
               AND (?2 IS NULL OR status = ?2)
             ORDER BY id DESC LIMIT ?3 OFFSET ?4",
            Self::SELECT_COLS
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![pattern, status, limit, offset], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn count(pool: &DbPool, query: Option<&str>, status: Option<&str>) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM contacts
             WHERE (?1 IS NULL OR lower(email) LIKE ?1 ESCAPE '\\' OR lower(first_name) LIKE ?1 ESCAPE '\\'
                    OR lower(last_name) LIKE ?1 ESCAPE '\\' OR lower(company) LIKE ?1 ESCAPE '\\')
               AND (?2 IS NULL OR status = ?2)",
            params![like_pattern(query), status],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    /// Active contacts a campaign would send to: members of `list_id`, or everyone.
    pub fn recipients(pool: &DbPool, list_id: Option<i64>) -> Vec<Contact> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let sql = format!(
            "SELECT {} FROM contacts
             WHERE status = 'active'
               AND (?1 IS NULL OR id IN (SELECT contact_id FROM contact_list_members WHERE list_id = ?1))
             ORDER BY id ASC",
            Self::SELECT_COLS
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(params![list_id], Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    pub fn count_recipients(pool: &DbPool, list_id: Option<i64>) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM contacts
             WHERE status = 'active'
               AND (?1 IS NULL OR id IN (SELECT contact_id FROM contact_list_members WHERE list_id = ?1))",
            params![list_id],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    // ── Create / update ──

    pub fn create(pool: &DbPool, form: &ContactForm) -> Result<i64, String> {
        form.validate()?;
        let conn = pool.get().map_err(|e| e.to_string())?;
        insert(&conn, form)
    }

    /// Insert many contacts in one transaction. Invalid or duplicate rows are
    /// skipped and reported; they never abort the batch.
    pub fn create_many(pool: &DbPool, forms: &[ContactForm]) -> Result<BulkResult, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        let mut result = BulkResult::default();
        for form in forms {
            if let Err(e) = form.validate() {
                result.skipped.push((form.email.clone(), e));
                continue;
            }
            match insert(&tx, form) {
                Ok(id) => result.created.push(id),
                Err(e) => result.skipped.push((normalize_email(&form.email), e)),
            }
        }
        tx.commit().map_err(|e| e.to_string())?;
        Ok(result)
    }

    pub fn update(pool: &DbPool, id: i64, form: &ContactForm) -> Result<(), String> {
        form.validate()?;
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE contacts SET email = ?1, first_name = ?2, last_name = ?3, company = ?4,
                 phone = ?5, notes = ?6, updated_at = CURRENT_TIMESTAMP WHERE id = ?7",
                params![
                    normalize_email(&form.email),
                    form.first_name.trim(),
                    form.last_name.trim(),
                    form.company.trim(),
                    form.phone.trim(),
                    form.notes,
                    id
                ],
            )
            .map_err(map_unique)?;
        if changed == 0 {
            return Err("Contact not found".into());
        }
        Ok(())
    }

    pub fn update_status(pool: &DbPool, id: i64, status: &str) -> Result<(), String> {
        if !STATUSES.contains(&status) {
            return Err(format!("Invalid contact status: {}", status));
        }
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE contacts SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![status, id],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Mark the token's owner unsubscribed. Returns the contact, already
    /// unsubscribed or not; unknown tokens are an error.
    pub fn unsubscribe(pool: &DbPool, token: &str) -> Result<Contact, String> {
        let contact = Self::find_by_token(pool, token).ok_or("Unknown unsubscribe link")?;
        if contact.status != "unsubscribed" {
            Self::update_status(pool, contact.id, "unsubscribed")?;
        }
        Self::find_by_id(pool, contact.id).ok_or_else(|| "Contact not found".to_string())
    }

    pub fn delete(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM contacts WHERE id = ?1", params![id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn insert(conn: &rusqlite::Connection, form: &ContactForm) -> Result<i64, String> {
    conn.execute(
        "INSERT INTO contacts (email, first_name, last_name, company, phone, notes, status, unsubscribe_token)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7)",
        params![
            normalize_email(&form.email),
            form.first_name.trim(),
            form.last_name.trim(),
            form.company.trim(),
            form.phone.trim(),
            form.notes,
            new_unsubscribe_token()
        ],
    )
    .map_err(map_unique)?;
    Ok(conn.last_insert_rowid())
}

fn map_unique(e: rusqlite::Error) -> String {
    if e.to_string().contains("UNIQUE") {
        "A contact with that email already exists".to_string()
    } else {
        e.to_string()
    }
}

fn like_pattern(query: Option<&str>) -> Option<String> {
    query
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty())
        .map(|q| {
            let escaped = q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
            format!("%{}%", escaped)
        })
}
