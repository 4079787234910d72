use chrono::NaiveDateTime;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::models::fmt_ts;

#[derive(Debug, Serialize, Clone)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub from_email: String,
    pub from_name: String,
    pub schedule_type: String, // immediate, scheduled, recurring
    pub send_at: Option<NaiveDateTime>,
    pub recurrence: Option<String>, // daily, weekly, monthly
    pub recurrence_end_at: Option<NaiveDateTime>,
    pub list_id: Option<i64>,
    pub status: String, // draft, scheduled, sending, completed, failed, cancelled
    pub next_run_at: Option<NaiveDateTime>,
    pub last_run_at: Option<NaiveDateTime>,
    pub run_count: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub last_error: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Campaign fields as submitted by API clients. Timestamps are strings here and
/// parsed during validation.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CampaignForm {
    pub name: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default = "default_schedule_type")]
    pub schedule_type: String,
    pub send_at: Option<String>,
    pub recurrence: Option<String>,
    pub recurrence_end_at: Option<String>,
    pub list_id: Option<i64>,
}

fn default_schedule_type() -> String {
    "immediate".to_string()
}

/// A form that passed validation, with timestamps parsed.
#[derive(Debug, Clone)]
pub struct CampaignInput {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub from_email: String,
    pub from_name: String,
    pub schedule_type: String,
    pub send_at: Option<NaiveDateTime>,
    pub recurrence: Option<String>,
    pub recurrence_end_at: Option<NaiveDateTime>,
    pub list_id: Option<i64>,
}

/// Final state of one run, written back by the processor.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: String,
    pub next_run_at: Option<NaiveDateTime>,
    pub finished_at: NaiveDateTime,
    pub sent: i64,
    pub failed: i64,
    pub error: Option<String>,
}

impl Campaign {
    const SELECT_COLS: &'static str = "id, name, subject, body, from_email, from_name, schedule_type, send_at, \
         recurrence, recurrence_end_at, list_id, status, next_run_at, last_run_at, run_count, \
         sent_count, failed_count, last_error, created_by, created_at, updated_at";

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Campaign {
            id: row.get(0)?,
            name: row.get(1)?,
            subject: row.get(2)?,
            body: row.get(3)?,
            from_email: row.get(4)?,
            from_name: row.get(5)?,
            schedule_type: row.get(6)?,
            send_at: row.get(7)?,
            recurrence: row.get(8)?,
            recurrence_end_at: row.get(9)?,
            list_id: row.get(10)?,
            status: row.get(11)?,
            next_run_at: row.get(12)?,
            last_run_at: row.get(13)?,
            run_count: row.get(14)?,
            sent_count: row.get(15)?,
            failed_count: row.get(16)?,
            last_error: row.get(17)?,
            created_by: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        })
    }

    pub fn is_editable(&self) -> bool {
        self.status == "draft" || self.status == "cancelled"
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule_type == "recurring"
    }

    /// Back to form shape, for re-validation before scheduling.
    pub fn to_form(&self) -> CampaignForm {
        CampaignForm {
            name: self.name.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            from_email: self.from_email.clone(),
            from_name: self.from_name.clone(),
            schedule_type: self.schedule_type.clone(),
            send_at: self.send_at.as_ref().map(fmt_ts),
            recurrence: self.recurrence.clone(),
            recurrence_end_at: self.recurrence_end_at.as_ref().map(fmt_ts),
            list_id: self.list_id,
        }
    }

    // ── Lookups ──

    pub fn find_by_id(pool: &DbPool, id: i64) -> Option<Campaign> {
        let conn = pool.get().ok()?;
        conn.query_row(
            &format!("SELECT {} FROM campaigns WHERE id = ?1", Self::SELECT_COLS),
            params![id],
            Self::from_row,
        )
        .ok()
    }

    pub fn list(pool: &DbPool, status: Option<&str>, limit: i64, offset: i64) -> Vec<Campaign> {
        Self::query(
            pool,
            &format!(
                "SELECT {} FROM campaigns WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                Self::SELECT_COLS
            ),
            params![status, limit, offset],
        )
    }

    pub fn count(pool: &DbPool, status: Option<&str>) -> i64 {
        let conn = match pool.get() {
            Ok(c) => c,
            Err(_) => return 0,
        };
        conn.query_row(
            "SELECT COUNT(*) FROM campaigns WHERE (?1 IS NULL OR status = ?1)",
            params![status],
            |row| row.get(0),
        )
        .unwrap_or(0)
    }

    /// Scheduled campaigns whose next run is at or before `now`, oldest first.
    pub fn due(pool: &DbPool, now: &NaiveDateTime) -> Vec<Campaign> {
        Self::query(
            pool,
            &format!(
                "SELECT {} FROM campaigns
                 WHERE status = 'scheduled' AND next_run_at IS NOT NULL AND next_run_at <= ?1
                 ORDER BY next_run_at ASC, id ASC",
                Self::SELECT_COLS
            ),
            params![fmt_ts(now)],
        )
    }

    /// Campaigns claimed by an earlier tick that still have sends outstanding.
    pub fn in_progress(pool: &DbPool) -> Vec<Campaign> {
        Self::query(
            pool,
            &format!(
                "SELECT {} FROM campaigns WHERE status = 'sending' ORDER BY id ASC",
                Self::SELECT_COLS
            ),
            [],
        )
    }

    fn query<P: rusqlite::Params>(pool: &DbPool, sql: &str, p: P) -> Vec<Campaign> {
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

    // ── Create / update / delete ──

    pub fn create(pool: &DbPool, input: &CampaignInput, created_by: Option<i64>) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO campaigns (name, subject, body, from_email, from_name, schedule_type, send_at,
                                    recurrence, recurrence_end_at, list_id, status, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'draft', ?11)",
            params![
                input.name,
                input.subject,
                input.body,
                input.from_email,
                input.from_name,
                input.schedule_type,
                input.send_at.as_ref().map(fmt_ts),
                input.recurrence,
                input.recurrence_end_at.as_ref().map(fmt_ts),
                input.list_id,
                created_by
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    /// Only drafts and cancelled campaigns can be edited.
    pub fn update(pool: &DbPool, id: i64, input: &CampaignInput) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET name = ?1, subject = ?2, body = ?3, from_email = ?4, from_name = ?5,
                     schedule_type = ?6, send_at = ?7, recurrence = ?8, recurrence_end_at = ?9, list_id = ?10,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?11 AND status IN ('draft', 'cancelled')",
                params![
                    input.name,
                    input.subject,
                    input.body,
                    input.from_email,
                    input.from_name,
                    input.schedule_type,
                    input.send_at.as_ref().map(fmt_ts),
                    input.recurrence,
                    input.recurrence_end_at.as_ref().map(fmt_ts),
                    input.list_id,
                    id
                ],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Only draft or cancelled campaigns can be edited".into());
        }
        Ok(())
    }

    /// Sends cascade with the campaign. A campaign mid-run cannot be deleted.
    pub fn delete(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "DELETE FROM campaigns WHERE id = ?1 AND status != 'sending'",
                params![id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Campaign not found or currently sending".into());
        }
        Ok(())
    }

    pub fn duplicate(pool: &DbPool, id: i64, created_by: Option<i64>) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "INSERT INTO campaigns (name, subject, body, from_email, from_name, schedule_type, send_at,
                                        recurrence, recurrence_end_at, list_id, status, created_by)
                 SELECT name || ' (copy)', subject, body, from_email, from_name, schedule_type, send_at,
                        recurrence, recurrence_end_at, list_id, 'draft', ?2
                 FROM campaigns WHERE id = ?1",
                params![id, created_by],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Campaign not found".into());
        }
        Ok(conn.last_insert_rowid())
    }

    // ── Status transitions ──

    /// `draft | cancelled | failed → scheduled`.
    pub fn mark_scheduled(pool: &DbPool, id: i64, next_run_at: &NaiveDateTime) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET status = 'scheduled', next_run_at = ?1, last_error = NULL,
                     updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?2 AND status IN ('draft', 'cancelled', 'failed')",
                params![fmt_ts(next_run_at), id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Only draft, cancelled or failed campaigns can be scheduled".into());
        }
        Ok(())
    }

    /// `scheduled → cancelled`.
    pub fn mark_cancelled(pool: &DbPool, id: i64) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET status = 'cancelled', next_run_at = NULL, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1 AND status = 'scheduled'",
                params![id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Only scheduled campaigns can be cancelled".into());
        }
        Ok(())
    }

    /// Move the next run of a scheduled campaign.
    pub fn set_next_run(pool: &DbPool, id: i64, next_run_at: &NaiveDateTime) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET next_run_at = ?1, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?2 AND status = 'scheduled'",
                params![fmt_ts(next_run_at), id],
            )
            .map_err(|e| e.to_string())?;
        if changed == 0 {
            return Err("Campaign is not scheduled".into());
        }
        Ok(())
    }

    /// `scheduled → sending`. Returns false when another worker got there first
    /// or the campaign was cancelled in the meantime.
    pub fn claim(pool: &DbPool, id: i64) -> Result<bool, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET status = 'sending', updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?1 AND status = 'scheduled'",
                params![id],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed == 1)
    }

    /// `sending → completed | failed | scheduled` with the run's counters folded in.
    pub fn finish_run(pool: &DbPool, id: i64, outcome: &RunOutcome) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "UPDATE campaigns SET status = ?1, next_run_at = ?2, last_run_at = ?3,
                 run_count = run_count + 1, sent_count = sent_count + ?4, failed_count = failed_count + ?5,
                 last_error = ?6, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?7 AND status = 'sending'",
            params![
                outcome.status,
                outcome.next_run_at.as_ref().map(fmt_ts),
                fmt_ts(&outcome.finished_at),
                outcome.sent,
                outcome.failed,
                outcome.error,
                id
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}
