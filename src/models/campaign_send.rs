use chrono::NaiveDateTime;
use rusqlite::params;
use serde::Serialize;

use crate::db::DbPool;
use crate::models::contact::Contact;
use crate::models::fmt_ts;

#[derive(Debug, Serialize, Clone)]
pub struct CampaignSend {
    pub id: i64,
    pub campaign_id: i64,
    pub contact_id: Option<i64>,
    pub email: String,
    pub run_number: i64,
    pub status: String, // pending, sent, failed, skipped
    pub error: Option<String>,
    pub sent_at: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
    pub skipped: i64,
    pub total: i64,
}

impl CampaignSend {
    const SELECT_COLS: &'static str =
        "id, campaign_id, contact_id, email, run_number, status, error, sent_at, created_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(CampaignSend {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            contact_id: row.get(2)?,
            email: row.get(3)?,
            run_number: row.get(4)?,
            status: row.get(5)?,
            error: row.get(6)?,
            sent_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// Create one pending row per recipient for this run. Rows that already
    /// exist (an interrupted run being resumed) are left alone. Returns the
    /// number of rows created.
    pub fn enqueue_run(
        pool: &DbPool,
        campaign_id: i64,
        run_number: i64,
        recipients: &[Contact],
    ) -> Result<usize, String> {
        let mut conn = pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        let mut created = 0;
        for c in recipients {
            created += tx
                .execute(
                    "INSERT OR IGNORE INTO campaign_sends (campaign_id, contact_id, email, run_number, status)
                     VALUES (?1, ?2, ?3, ?4, 'pending')",
                    params![campaign_id, c.id, c.email, run_number],
                )
                .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())?;
        Ok(created)
    }

    pub fn run_started(pool: &DbPool, campaign_id: i64, run_number: i64) -> bool {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return false,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM campaign_sends WHERE campaign_id = ?1 AND run_number = ?2",
            params![campaign_id, run_number],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .unwrap_or(false)
    }

    pub fn pending_for_run(pool: &DbPool, campaign_id: i64, run_number: i64, limit: i64) -> Vec<CampaignSend> {
        Self::query(
            pool,
            &format!(
                "SELECT {} FROM campaign_sends
                 WHERE campaign_id = ?1 AND run_number = ?2 AND status = 'pending'
                 ORDER BY id ASC LIMIT ?3",
                Self::SELECT_COLS
            ),
            params![campaign_id, run_number, limit],
        )
    }

    pub fn mark_sent(pool: &DbPool, id: i64, at: &NaiveDateTime) -> Result<(), String> {
        Self::set_status(pool, id, "sent", None, Some(at))
    }

    pub fn mark_failed(pool: &DbPool, id: i64, error: &str) -> Result<(), String> {
        Self::set_status(pool, id, "failed", Some(error), None)
    }

    pub fn mark_skipped(pool: &DbPool, id: i64, reason: &str) -> Result<(), String> {
        Self::set_status(pool, id, "skipped", Some(reason), None)
    }

    fn set_status(
        pool: &DbPool,
        id: i64,
        status: &str,
        error: Option<&str>,
        sent_at: Option<&NaiveDateTime>,
    ) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE campaign_sends SET status = ?1, error = ?2, sent_at = ?3 WHERE id = ?4",
                params![status, error, sent_at.map(fmt_ts), id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err(format!("Send #{} not found", id));
        }
        Ok(())
    }

    /// Counts for one run, or for every run when `run_number` is None.
    pub fn stats(pool: &DbPool, campaign_id: i64, run_number: Option<i64>) -> SendStats {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return SendStats::default(),
        };
        conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0),
                COUNT(*)
             FROM campaign_sends WHERE campaign_id = ?1 AND (?2 IS NULL OR run_number = ?2)",
            params![campaign_id, run_number],
            |r| {
                Ok(SendStats {
                    pending: r.get(0)?,
                    sent: r.get(1)?,
                    failed: r.get(2)?,
                    skipped: r.get(3)?,
                    total: r.get(4)?,
                })
            },
        )
        .unwrap_or_default()
    }

    /// Most recent error recorded for a run.
    pub fn last_error(pool: &DbPool, campaign_id: i64, run_number: i64) -> Option<String> {
        let conn = pool.get().ok()?;
        conn.query_row(
            "SELECT error FROM campaign_sends
             WHERE campaign_id = ?1 AND run_number = ?2 AND status = 'failed' AND error IS NOT NULL
             ORDER BY id DESC LIMIT 1",
            params![campaign_id, run_number],
            |row| row.get(0),
        )
        .ok()
    }

    pub fn list_for_campaign(
        pool: &DbPool,
        campaign_id: i64,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<CampaignSend> {
        Self::query(
            pool,
            &format!(
                "SELECT {} FROM campaign_sends WHERE campaign_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY run_number DESC, id ASC LIMIT ?3 OFFSET ?4",
                Self::SELECT_COLS
            ),
            params![campaign_id, status, limit, offset],
        )
    }

    pub fn list_for_contact(pool: &DbPool, contact_id: i64, limit: i64) -> Vec<CampaignSend> {
        Self::query(
            pool,
            &format!(
                "SELECT {} FROM campaign_sends WHERE contact_id = ?1 ORDER BY id DESC LIMIT ?2",
                Self::SELECT_COLS
            ),
            params![contact_id, limit],
        )
    }

    fn query<P: rusqlite::Params>(pool: &DbPool, sql: &str, p: P) -> Vec<CampaignSend> {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return vec![],
        };
        let mut stmt = match conn.prepare(sql) {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        stmt.query_map(p, Self::from_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }
}
