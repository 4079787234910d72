use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::models::audit::{Actor, AuditEntry};
use crate::models::campaign::{Campaign, CampaignInput, RunOutcome};
use crate::models::campaign_send::{CampaignSend, SendStats};
use crate::models::contact::{BulkResult, Contact, ContactForm};
use crate::models::contact_list::{ContactList, ContactListForm};
use crate::models::user::User;

pub mod sqlite;

/// Unified data-access trait. Every database operation goes through here.
/// Implemented by `SqliteStore` (rusqlite behind an r2d2 pool).
pub trait Store: Send + Sync {
    // ── Lifecycle ───────────────────────────────────────────────────
    fn run_migrations(&self) -> Result<(), String>;
    fn seed_defaults(&self) -> Result<(), String>;
    /// Cheap round trip used by the health endpoint.
    fn ping(&self) -> Result<(), String>;

    // ── Settings ────────────────────────────────────────────────────
    fn setting_get(&self, key: &str) -> Option<String>;
    fn setting_get_or(&self, key: &str, default: &str) -> String {
        self.setting_get(key).unwrap_or_else(|| default.to_string())
    }
    fn setting_get_bool(&self, key: &str) -> bool {
        self.setting_get(key)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }
    fn setting_get_i64(&self, key: &str) -> i64 {
        self.setting_get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
    fn setting_set(&self, key: &str, value: &str) -> Result<(), String>;
    fn setting_set_many(&self, settings: &HashMap<String, String>) -> Result<(), String>;
    fn setting_get_group(&self, prefix: &str) -> HashMap<String, String>;
    fn setting_all(&self) -> HashMap<String, String>;
    fn setting_delete(&self, key: &str) -> Result<(), String>;

    // ── Users ───────────────────────────────────────────────────────
    fn user_get_by_id(&self, id: i64) -> Option<User>;
    fn user_get_by_email(&self, email: &str) -> Option<User>;
    fn user_list_paginated(&self, role: Option<&str>, limit: i64, offset: i64) -> Vec<User>;
    fn user_count(&self) -> i64 {
        self.user_count_filtered(None)
    }
    fn user_count_filtered(&self, role: Option<&str>) -> i64;
    fn user_create(
        &self,
        email: &str,
        password_hash: &str,
        display_name: &str,
        role: &str,
    ) -> Result<i64, String>;
    fn user_update_profile(&self, id: i64, display_name: &str, email: &str) -> Result<(), String>;
    fn user_update_role(&self, id: i64, role: &str) -> Result<(), String>;
    fn user_update_password(&self, id: i64, password_hash: &str) -> Result<(), String>;
    fn user_touch_last_login(&self, id: i64) -> Result<(), String>;
    fn user_lock(&self, id: i64) -> Result<(), String>;
    fn user_unlock(&self, id: i64) -> Result<(), String>;
    fn user_delete(&self, id: i64) -> Result<(), String>;

    // ── Sessions ────────────────────────────────────────────────────
    fn session_create_full(
        &self,
        user_id: i64,
        token: &str,
        expires_at: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), String>;
    fn session_get_user_id(&self, token: &str) -> Option<i64>;
    fn session_get_user(&self, token: &str) -> Option<User> {
        let uid = self.session_get_user_id(token)?;
        self.user_get_by_id(uid)
    }
    fn session_delete(&self, token: &str) -> Result<(), String>;
    fn session_delete_for_user(&self, user_id: i64) -> Result<(), String>;

    // ── Contacts ────────────────────────────────────────────────────
    fn contact_find_by_id(&self, id: i64) -> Option<Contact>;
    fn contact_find_by_email(&self, email: &str) -> Option<Contact>;
    fn contact_find_by_token(&self, token: &str) -> Option<Contact>;
    fn contact_list(
        &self,
        query: Option<&str>,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<Contact>;
    fn contact_count(&self, query: Option<&str>, status: Option<&str>) -> i64;
    fn contact_create(&self, form: &ContactForm) -> Result<i64, String>;
    fn contact_create_many(&self, forms: &[ContactForm]) -> Result<BulkResult, String>;
    fn contact_update(&self, id: i64, form: &ContactForm) -> Result<(), String>;
    fn contact_update_status(&self, id: i64, status: &str) -> Result<(), String>;
    fn contact_unsubscribe(&self, token: &str) -> Result<Contact, String>;
    fn contact_delete(&self, id: i64) -> Result<(), String>;
    /// Active contacts in `list_id`, or all active contacts.
    fn contact_recipients(&self, list_id: Option<i64>) -> Vec<Contact>;
    fn contact_count_recipients(&self, list_id: Option<i64>) -> i64;

    // ── Contact lists ───────────────────────────────────────────────
    fn list_find_by_id(&self, id: i64) -> Option<ContactList>;
    fn list_all(&self) -> Vec<ContactList>;
    fn list_create(&self, form: &ContactListForm) -> Result<i64, String>;
    fn list_update(&self, id: i64, form: &ContactListForm) -> Result<(), String>;
    fn list_delete(&self, id: i64) -> Result<(), String>;
    fn list_add_members(&self, list_id: i64, contact_ids: &[i64]) -> Result<usize, String>;
    fn list_remove_members(&self, list_id: i64, contact_ids: &[i64]) -> Result<usize, String>;
    fn list_members(&self, list_id: i64, limit: i64, offset: i64) -> Vec<Contact>;

    // ── Campaigns ───────────────────────────────────────────────────
    fn campaign_find_by_id(&self, id: i64) -> Option<Campaign>;
    fn campaign_list(&self, status: Option<&str>, limit: i64, offset: i64) -> Vec<Campaign>;
    fn campaign_count(&self, status: Option<&str>) -> i64;
    fn campaign_due(&self, now: &NaiveDateTime) -> Vec<Campaign>;
    fn campaign_in_progress(&self) -> Vec<Campaign>;
    fn campaign_create(&self, input: &CampaignInput, created_by: Option<i64>) -> Result<i64, String>;
    fn campaign_update(&self, id: i64, input: &CampaignInput) -> Result<(), String>;
    fn campaign_delete(&self, id: i64) -> Result<(), String>;
    fn campaign_duplicate(&self, id: i64, created_by: Option<i64>) -> Result<i64, String>;
    fn campaign_mark_scheduled(&self, id: i64, next_run_at: &NaiveDateTime) -> Result<(), String>;
    fn campaign_mark_cancelled(&self, id: i64) -> Result<(), String>;
    fn campaign_set_next_run(&self, id: i64, next_run_at: &NaiveDateTime) -> Result<(), String>;
    fn campaign_claim(&self, id: i64) -> Result<bool, String>;
    fn campaign_finish_run(&self, id: i64, outcome: &RunOutcome) -> Result<(), String>;

    // ── Campaign sends ──────────────────────────────────────────────
    fn send_enqueue_run(
        &self,
        campaign_id: i64,
        run_number: i64,
        recipients: &[Contact],
    ) -> Result<usize, String>;
    fn send_run_started(&self, campaign_id: i64, run_number: i64) -> bool;
    fn send_pending_for_run(&self, campaign_id: i64, run_number: i64, limit: i64) -> Vec<CampaignSend>;
    fn send_mark_sent(&self, id: i64, at: &NaiveDateTime) -> Result<(), String>;
    fn send_mark_failed(&self, id: i64, error: &str) -> Result<(), String>;
    fn send_mark_skipped(&self, id: i64, reason: &str) -> Result<(), String>;
    fn send_stats(&self, campaign_id: i64, run_number: Option<i64>) -> SendStats;
    fn send_last_error(&self, campaign_id: i64, run_number: i64) -> Option<String>;
    fn send_list_for_campaign(
        &self,
        campaign_id: i64,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<CampaignSend>;
    fn send_list_for_contact(&self, contact_id: i64, limit: i64) -> Vec<CampaignSend>;

    // ── Audit Log ───────────────────────────────────────────────────
    fn audit_log(
        &self,
        actor: &Actor,
        action: &str,
        entity_type: Option<&str>,
        entity_id: Option<i64>,
        entity_title: Option<&str>,
        details: Option<&str>,
    );
    fn audit_list(
        &self,
        action_filter: Option<&str>,
        entity_filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Vec<AuditEntry>;
    fn audit_count(&self, action_filter: Option<&str>, entity_filter: Option<&str>) -> i64;
    fn audit_cleanup(&self, max_age_days: i64) -> Result<usize, String>;

    // ── Background tasks ────────────────────────────────────────────
    /// Delete sessions older than `max_age_days` or already expired.
    fn task_cleanup_sessions(&self, max_age_days: i64) -> Result<usize, String>;
}
