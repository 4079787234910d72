use std::collections::HashMap;

use chrono::NaiveDateTime;
use rusqlite::params;

use crate::models::audit::{Actor, AuditEntry};
use crate::models::campaign::{Campaign, CampaignInput, RunOutcome};
use crate::models::campaign_send::{CampaignSend, SendStats};
use crate::models::contact::{BulkResult, Contact, ContactForm};
use crate::models::contact_list::{ContactList, ContactListForm};
use crate::models::settings::Setting;
use crate::models::user::User;

use super::Store;

pub use crate::db::DbPool;

/// SQLite-backed implementation of the Store trait.
/// Wraps the r2d2 connection pool and delegates to model methods.
pub struct SqliteStore {
    pub pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl Store for SqliteStore {
    // ── Lifecycle ───────────────────────────────────────────────────

    fn run_migrations(&self) -> Result<(), String> {
        crate::db::run_migrations(&self.pool).map_err(|e| e.to_string())
    }

    fn seed_defaults(&self) -> Result<(), String> {
        crate::db::seed_defaults(&self.pool).map_err(|e| e.to_string())
    }

    fn ping(&self) -> Result<(), String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    // ── Settings ────────────────────────────────────────────────────

    fn setting_get(&self, key: &str) -> Option<String> {
        Setting::get(&self.pool, key)
    }

    fn setting_set(&self, key: &str, value: &str) -> Result<(), String> {
        Setting::set(&self.pool, key, value)
    }

    fn setting_set_many(&self, settings: &HashMap<String, String>) -> Result<(), String> {
        Setting::set_many(&self.pool, settings)
    }

    fn setting_get_group(&self, prefix: &str) -> HashMap<String, String> {
        Setting::get_group(&self.pool, prefix)
    }

    fn setting_all(&self) -> HashMap<String, String> {
        Setting::all(&self.pool)
    }

    fn setting_delete(&self, key: &str) -> Result<(), String> {
        Setting::delete(&self.pool, key)
    }

    // ── Users ───────────────────────────────────────────────────────

    fn user_get_by_id(&self, id: i64) -> Option<User> {
        User::get_by_id(&self.pool, id)
    }

    fn user_get_by_email(&self, email: &str) -> Option<User> {
        User::get_by_email(&self.pool, email)
    }

    fn user_list_paginated(&self, role: Option<&str>, limit: i64, offset: i64) -> Vec<User> {
        User::list_paginated(&self.pool, role, limit, offset)
    }

    fn user_count_filtered(&self, role: Option<&str>) -> i64 {
        User::count_filtered(&self.pool, role)
    }

    fn user_create(
        &self,
        email: &str,
        password_hash: &str,
        display_name: &str,
        role: &str,
    ) -> Result<i64, String> {
        User::create(&self.pool, email, password_hash, display_name, role)
    }

    fn user_update_profile(&self, id: i64, display_name: &str, email: &str) -> Result<(), String> {
        User::update_profile(&self.pool, id, display_name, email)
    }

    fn user_update_role(&self, id: i64, role: &str) -> Result<(), String> {
        User::update_role(&self.pool, id, role)
    }

    fn user_update_password(&self, id: i64, password_hash: &str) -> Result<(), String> {
        User::update_password(&self.pool, id, password_hash)
    }

    fn user_touch_last_login(&self, id: i64) -> Result<(), String> {
        User::touch_last_login(&self.pool, id)
    }

    fn user_lock(&self, id: i64) -> Result<(), String> {
        User::lock(&self.pool, id)
    }

    fn user_unlock(&self, id: i64) -> Result<(), String> {
        User::unlock(&self.pool, id)
    }

    fn user_delete(&self, id: i64) -> Result<(), String> {
        User::delete(&self.pool, id)
    }

    // ── Sessions ────────────────────────────────────────────────────

    fn session_create_full(
        &self,
        user_id: i64,
        token: &str,
        expires_at: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at, expires_at, ip_address, user_agent)
             VALUES (?1, ?2, datetime('now'), ?3, ?4, ?5)",
            params![token, user_id, expires_at, ip, user_agent],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn session_get_user_id(&self, token: &str) -> Option<i64> {
        let conn = self.pool.get().ok()?;
        conn.query_row(
            "SELECT user_id FROM sessions WHERE id = ?1 AND expires_at > datetime('now')",
            params![token],
            |row| row.get(0),
        )
        .ok()
    }

    fn session_delete(&self, token: &str) -> Result<(), String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![token])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn session_delete_for_user(&self, user_id: i64) -> Result<(), String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    // ── Contacts ────────────────────────────────────────────────────

    fn contact_find_by_id(&self, id: i64) -> Option<Contact> {
        Contact::find_by_id(&self.pool, id)
    }

    fn contact_find_by_email(&self, email: &str) -> Option<Contact> {
        Contact::find_by_email(&self.pool, email)
    }

    fn contact_find_by_token(&self, token: &str) -> Option<Contact> {
        Contact::find_by_token(&self.pool, token)
    }

    fn contact_list(
        &self,
        query: Option<&str>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<Contact> {
        Contact::list(&self.pool, query, status, limit, offset)
    }

    fn contact_count(&self, query: Option<&str>, status: Option<&str>) -> i64 {
        Contact::count(&self.pool, query, status)
    }

    fn contact_create(&self, form: &ContactForm) -> Result<i64, String> {
        Contact::create(&self.pool, form)
    }

    fn contact_create_many(&self, forms: &[ContactForm]) -> Result<BulkResult, String> {
        Contact::create_many(&self.pool, forms)
    }

    fn contact_update(&self, id: i64, form: &ContactForm) -> Result<(), String> {
        Contact::update(&self.pool, id, form)
    }

    fn contact_update_status(&self, id: i64, status: &str) -> Result<(), String> {
        Contact::update_status(&self.pool, id, status)
    }

    fn contact_unsubscribe(&self, token: &str) -> Result<Contact, String> {
        Contact::unsubscribe(&self.pool, token)
    }

    fn contact_delete(&self, id: i64) -> Result<(), String> {
        Contact::delete(&self.pool, id)
    }

    fn contact_recipients(&self, list_id: Option<i64>) -> Vec<Contact> {
        Contact::recipients(&self.pool, list_id)
    }

    fn contact_count_recipients(&self, list_id: Option<i64>) -> i64 {
        Contact::count_recipients(&self.pool, list_id)
    }

    // ── Contact lists ───────────────────────────────────────────────

    fn list_find_by_id(&self, id: i64) -> Option<ContactList> {
        ContactList::find_by_id(&self.pool, id)
    }

    fn list_all(&self) -> Vec<ContactList> {
        ContactList::list(&self.pool)
    }

    fn list_create(&self, form: &ContactListForm) -> Result<i64, String> {
        ContactList::create(&self.pool, form)
    }

    fn list_update(&self, id: i64, form: &ContactListForm) -> Result<(), String> {
        ContactList::update(&self.pool, id, form)
    }

    fn list_delete(&self, id: i64) -> Result<(), String> {
        ContactList::delete(&self.pool, id)
    }

    fn list_add_members(&self, list_id: i64, contact_ids: &[i64]) -> Result<usize, String> {
        ContactList::add_members(&self.pool, list_id, contact_ids)
    }

    fn list_remove_members(&self, list_id: i64, contact_ids: &[i64]) -> Result<usize, String> {
        ContactList::remove_members(&self.pool, list_id, contact_ids)
    }

    fn list_members(&self, list_id: i64, limit: i64, offset: i64) -> Vec<Contact> {
        ContactList::members(&self.pool, list_id, limit, offset)
    }

    // ── Campaigns ───────────────────────────────────────────────────

    fn campaign_find_by_id(&self, id: i64) -> Option<Campaign> {
        Campaign::find_by_id(&self.pool, id)
    }

    fn campaign_list(&self, status: Option<&str>, limit: i64, offset: i64) -> Vec<Campaign> {
        Campaign::list(&self.pool, status, limit, offset)
    }

    fn campaign_count(&self, status: Option<&str>) -> i64 {
        Campaign::count(&self.pool, status)
    }

    fn campaign_due(&self, now: &NaiveDateTime) -> Vec<Campaign> {
        Campaign::due(&self.pool, now)
    }

    fn campaign_in_progress(&self) -> Vec<Campaign> {
        Campaign::in_progress(&self.pool)
    }

    fn campaign_create(&self, input: &CampaignInput, created_by: Option<i64>) -> Result<i64, String> {
        Campaign::create(&self.pool, input, created_by)
    }

    fn campaign_update(&self, id: i64, input: &CampaignInput) -> Result<(), String> {
        Campaign::update(&self.pool, id, input)
    }

    fn campaign_delete(&self, id: i64) -> Result<(), String> {
        Campaign::delete(&self.pool, id)
    }

    fn campaign_duplicate(&self, id: i64, created_by: Option<i64>) -> Result<i64, String> {
        Campaign::duplicate(&self.pool, id, created_by)
    }

    fn campaign_mark_scheduled(&self, id: i64, next_run_at: &NaiveDateTime) -> Result<(), String> {
        Campaign::mark_scheduled(&self.pool, id, next_run_at)
    }

    fn campaign_mark_cancelled(&self, id: i64) -> Result<(), String> {
        Campaign::mark_cancelled(&self.pool, id)
    }

    fn campaign_set_next_run(&self, id: i64, next_run_at: &NaiveDateTime) -> Result<(), String> {
        Campaign::set_next_run(&self.pool, id, next_run_at)
    }

    fn campaign_claim(&self, id: i64) -> Result<bool, String> {
        Campaign::claim(&self.pool, id)
    }

    fn campaign_finish_run(&self, id: i64, outcome: &RunOutcome) -> Result<(), String> {
        Campaign::finish_run(&self.pool, id, outcome)
    }

    // ── Campaign sends ──────────────────────────────────────────────

    fn send_enqueue_run(
        &self,
        campaign_id: i64,
        run_number: i64,
        recipients: &[Contact],
    ) -> Result<usize, String> {
        CampaignSend::enqueue_run(&self.pool, campaign_id, run_number, recipients)
    }

    fn send_run_started(&self, campaign_id: i64, run_number: i64) -> bool {
        CampaignSend::run_started(&self.pool, campaign_id, run_number)
    }

    fn send_pending_for_run(&self, campaign_id: i64, run_number: i64, limit: i64) -> Vec<CampaignSend> {
        CampaignSend::pending_for_run(&self.pool, campaign_id, run_number, limit)
    }

    fn send_mark_sent(&self, id: i64, at: &NaiveDateTime) -> Result<(), String> {
        CampaignSend::mark_sent(&self.pool, id, at)
    }

    fn send_mark_failed(&self, id: i64, error: &str) -> Result<(), String> {
        CampaignSend::mark_failed(&self.pool, id, error)
    }

    fn send_mark_skipped(&self, id: i64, reason: &str) -> Result<(), String> {
        CampaignSend::mark_skipped(&self.pool, id, reason)
    }

    fn send_stats(&self, campaign_id: i64, run_number: Option<i64>) -> SendStats {
        CampaignSend::stats(&self.pool, campaign_id, run_number)
    }

    fn send_last_error(&self, campaign_id: i64, run_number: i64) -> Option<String> {
        CampaignSend::last_error(&self.pool, campaign_id, run_number)
    }

    fn send_list_for_campaign(
        &self,
        campaign_id: i64,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<CampaignSend> {
        CampaignSend::list_for_campaign(&self.pool, campaign_id, status, limit, offset)
    }

    fn send_list_for_contact(&self, contact_id: i64, limit: i64) -> Vec<CampaignSend> {
        CampaignSend::list_for_contact(&self.pool, contact_id, limit)
    }

    // ── Audit Log ───────────────────────────────────────────────────

    fn audit_log(
        &self,
        actor: &Actor,
        action: &str,
        entity_type: Option<&str>,
        entity_id: Option<i64>,
        entity_title: Option<&str>,
        details: Option<&str>,
    ) {
        AuditEntry::log(&self.pool, actor, action, entity_type, entity_id, entity_title, details)
    }

    fn audit_list(
        &self,
        action_filter: Option<&str>,
        entity_filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<AuditEntry> {
        AuditEntry::list(&self.pool, action_filter, entity_filter, limit, offset)
    }

    fn audit_count(&self, action_filter: Option<&str>, entity_filter: Option<&str>) -> i64 {
        AuditEntry::count(&self.pool, action_filter, entity_filter)
    }

    fn audit_cleanup(&self, max_age_days: i64) -> Result<usize, String> {
        AuditEntry::cleanup(&self.pool, max_age_days)
    }

    // ── Background tasks ──────────────────────────────────────────────

    fn task_cleanup_sessions(&self, max_age_days: i64) -> Result<usize, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM sessions WHERE expires_at < datetime('now') OR created_at < datetime('now', ?1)",
            params![format!("-{} days", max_age_days)],
        )
        .map_err(|e| e.to_string())
    }
}
