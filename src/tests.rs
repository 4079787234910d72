#![cfg(test)]

use chrono::{NaiveDate, NaiveDateTime};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::campaigns::processor::{following_run, process_due, recover_stalled};
use crate::campaigns::{self, merge, next_occurrence, CampaignError, Recurrence, ScheduleType};
use crate::db::{column_exists, run_migrations, seed_defaults, DbPool};
use crate::email::{self, EmailSender, OutgoingEmail, ProviderChain};
use crate::models::audit::Actor;
use crate::models::campaign::CampaignForm;
use crate::models::contact::{Contact, ContactForm};
use crate::models::contact_list::ContactListForm;
use crate::models::parse_ts;
use crate::rate_limit::RateLimiter;
use crate::security::auth::{self, ClientIp};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Atomic counter for unique shared-cache DB names so parallel tests don't collide.
static TEST_DB_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Named shared-cache in-memory pool without any schema.
fn bare_pool() -> DbPool {
    let id = TEST_DB_COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    let uri = format!("file:outreach_test_{}?mode=memory&cache=shared", id);
    let manager = SqliteConnectionManager::file(uri)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
    Pool::builder()
        .max_size(2)
        .build(manager)
        .expect("Failed to create test pool")
}

/// Fresh pool with all migrations + seed defaults applied.
fn test_pool() -> DbPool {
    let pool = bare_pool();
    run_migrations(&pool).expect("Failed to run migrations");
    seed_defaults(&pool).expect("Failed to seed defaults");
    pool
}

fn test_store() -> SqliteStore {
    SqliteStore::new(test_pool())
}

/// Store with a sender address configured, ready for campaign runs.
fn campaign_store() -> SqliteStore {
    let s = test_store();
    s.setting_set("email_from_address", "news@example.com").unwrap();
    s.setting_set("app_url", "https://mail.example.com").unwrap();
    s
}

/// Fast bcrypt hash for tests (cost=4 instead of DEFAULT_COST=12).
fn fast_hash(password: &str) -> String {
    bcrypt::hash(password, 4).unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

/// Fixed clock for campaign tests.
fn now() -> NaiveDateTime {
    at(2030, 1, 15, 9, 0)
}

fn actor() -> Actor {
    Actor {
        user_id: None,
        user_name: Some("Tester".into()),
        ip: None,
    }
}

fn add_contact(s: &dyn Store, email: &str, first_name: &str) -> i64 {
    s.contact_create(&ContactForm {
        email: email.into(),
        first_name: first_name.into(),
        ..Default::default()
    })
    .unwrap()
}

fn immediate(name: &str) -> CampaignForm {
    CampaignForm {
        name: name.into(),
        subject: "News for {{first_name}}".into(),
        body: "Hi {{first_name}},\nhere is the news.".into(),
        schedule_type: "immediate".into(),
        ..Default::default()
    }
}

fn recurring(name: &str, recurrence: &str, send_at: &str, end: Option<&str>) -> CampaignForm {
    CampaignForm {
        schedule_type: "recurring".into(),
        recurrence: Some(recurrence.into()),
        send_at: Some(send_at.into()),
        recurrence_end_at: end.map(String::from),
        ..immediate(name)
    }
}

fn sample_contact() -> Contact {
    Contact {
        id: 7,
        email: "ann@example.com".into(),
        first_name: "Ann".into(),
        last_name: "Lee".into(),
        company: "ACME".into(),
        phone: String::new(),
        notes: String::new(),
        status: "active".into(),
        unsubscribe_token: "tok123".into(),
        created_at: String::new(),
        updated_at: String::new(),
    }
}

/// Records delivered messages; rejects the configured recipients.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<OutgoingEmail>>,
    reject: Vec<String>,
    reject_all: bool,
}

impl RecordingSender {
    fn rejecting(addresses: &[&str]) -> Self {
        RecordingSender {
            reject: addresses.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    fn failing() -> Self {
        RecordingSender {
            reject_all: true,
            ..Default::default()
        }
    }

    fn delivered(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

impl EmailSender for RecordingSender {
    fn send(&self, msg: &OutgoingEmail) -> Result<(), String> {
        if self.reject_all || self.reject.contains(&msg.to) {
            return Err(format!("550 mailbox unavailable: {}", msg.to));
        }
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Auth & rate limiting
// ═══════════════════════════════════════════════════════════

#[test]
fn auth_verify_password() {
    let hash = fast_hash("correct horse");
    assert!(auth::verify_password("correct horse", &hash));
    assert!(!auth::verify_password("wrong", &hash));
    assert!(!auth::verify_password("correct horse", "not-a-hash"));
}

#[test]
fn auth_password_strength() {
    assert!(auth::check_password_strength("short").is_err());
    assert!(auth::check_password_strength("longenough").is_ok());
}

#[test]
fn auth_hash_ip_is_stable_hex() {
    let a = auth::hash_ip("203.0.113.9");
    assert_eq!(a.len(), 64);
    assert_eq!(a, auth::hash_ip("203.0.113.9"));
    assert_ne!(a, auth::hash_ip("203.0.113.10"));
}

#[test]
fn auth_actor_hashes_ip() {
    let s = test_store();
    let id = s.user_create("ed@example.com", &fast_hash("password1"), "Ed", "editor").unwrap();
    let user = s.user_get_by_id(id).unwrap();
    let a = auth::actor(&user, &ClientIp("198.51.100.1".into()));
    assert_eq!(a.user_id, Some(id));
    assert_eq!(a.ip, Some(auth::hash_ip("198.51.100.1")));
    assert!(user.safe_json().get("password_hash").is_none());
}

#[test]
fn auth_create_session_resolves_user() {
    let s = test_store();
    let id = s.user_create("viv@example.com", &fast_hash("password1"), "Viv", "viewer").unwrap();
    let token = auth::create_session(&s, id, Some("127.0.0.1"), Some("test-agent")).unwrap();
    assert_eq!(s.session_get_user(&token).map(|u| u.id), Some(id));
    auth::destroy_session(&s, &token).unwrap();
    assert!(s.session_get_user(&token).is_none());
}

#[test]
fn rate_limiter_window() {
    let rl = RateLimiter::new();
    let window = Duration::from_secs(60);
    assert!(rl.check_and_record("login:a", 2, window));
    assert!(rl.check_and_record("login:a", 2, window));
    assert!(!rl.check_and_record("login:a", 2, window));
    assert_eq!(rl.remaining("login:a", 2, window), 0);
    assert_eq!(rl.remaining("login:b", 2, window), 2);
    rl.reset("login:a");
    assert!(rl.check_and_record("login:a", 2, window));
}

#[test]
fn rate_limiter_cleanup_drops_stale_keys() {
    let rl = RateLimiter::new();
    assert!(rl.check_and_record("k", 1, Duration::from_secs(60)));
    rl.cleanup(Duration::from_secs(0));
    assert!(rl.check_and_record("k", 1, Duration::from_secs(60)));
}

// ═══════════════════════════════════════════════════════════
// Timestamps & schedules
// ═══════════════════════════════════════════════════════════

#[test]
fn parse_ts_accepts_common_forms() {
    let expected = at(2030, 3, 1, 14, 30);
    assert_eq!(parse_ts("2030-03-01 14:30:00"), Some(expected));
    assert_eq!(parse_ts("2030-03-01T14:30"), Some(expected));
    assert_eq!(parse_ts("2030-03-01T14:30:00Z"), Some(expected));
    assert_eq!(parse_ts("2030-03-01T16:30:00+02:00"), Some(expected));
    assert_eq!(parse_ts(" "), None);
    assert_eq!(parse_ts("next tuesday"), None);
}

#[test]
fn schedule_enums_parse() {
    assert_eq!(ScheduleType::parse("recurring"), Some(ScheduleType::Recurring));
    assert_eq!(ScheduleType::parse("sometimes"), None);
    assert_eq!(Recurrence::parse(" weekly "), Some(Recurrence::Weekly));
    assert_eq!(Recurrence::Monthly.as_str(), "monthly");
}

#[test]
fn next_occurrence_daily_weekly() {
    let from = at(2030, 1, 15, 9, 0);
    assert_eq!(next_occurrence(&from, Recurrence::Daily), at(2030, 1, 16, 9, 0));
    assert_eq!(next_occurrence(&from, Recurrence::Weekly), at(2030, 1, 22, 9, 0));
}

#[test]
fn next_occurrence_monthly_clamps_to_month_end() {
    assert_eq!(
        next_occurrence(&at(2030, 1, 31, 10, 0), Recurrence::Monthly),
        at(2030, 2, 28, 10, 0)
    );
    assert_eq!(
        next_occurrence(&at(2028, 1, 31, 10, 0), Recurrence::Monthly),
        at(2028, 2, 29, 10, 0)
    );
    assert_eq!(
        next_occurrence(&at(2030, 12, 15, 8, 0), Recurrence::Monthly),
        at(2031, 1, 15, 8, 0)
    );
}

#[test]
fn following_run_skips_missed_occurrences() {
    let scheduled = at(2030, 1, 1, 9, 0);
    let now = at(2030, 1, 5, 12, 0);
    assert_eq!(following_run(scheduled, Recurrence::Daily, &now), at(2030, 1, 6, 9, 0));
    assert_eq!(
        following_run(now, Recurrence::Weekly, &now),
        at(2030, 1, 12, 12, 0)
    );
}

// ═══════════════════════════════════════════════════════════
// Merge tags
// ═══════════════════════════════════════════════════════════

#[test]
fn merge_render_known_and_unknown_tags() {
    let c = sample_contact();
    let out = merge::render(
        "{{first_name}} {{last_name}} / {{full_name}} <{{email}}> at {{company}} {{nickname}}",
        &c,
        "https://x/unsubscribe/tok123",
    );
    assert_eq!(out, "Ann Lee / Ann Lee <ann@example.com> at ACME {{nickname}}");
}

#[test]
fn merge_full_name_without_last_name() {
    let mut c = sample_contact();
    c.last_name = String::new();
    assert_eq!(merge::render("[{{full_name}}]", &c, ""), "[Ann]");
}

#[test]
fn merge_unsubscribe_url_variants() {
    assert_eq!(
        merge::unsubscribe_url("http://localhost:8000", "t1"),
        "http://localhost:8000/unsubscribe/t1"
    );
    assert_eq!(
        merge::unsubscribe_url("https://example.com/app/", "t2"),
        "https://example.com/app/unsubscribe/t2"
    );
}

#[test]
fn merge_personalize_appends_footer_once() {
    let c = sample_contact();
    let (subject, body) = merge::personalize("Hi\n{{first_name}}", "Hello {{first_name}}", &c, "https://m.example.com");
    assert_eq!(subject, "Hi Ann");
    assert!(body.starts_with("Hello Ann"));
    assert!(body.contains("https://m.example.com/unsubscribe/tok123"));

    let (_, body) = merge::personalize(
        "s",
        "Hello. Leave: {{unsubscribe_url}}",
        &c,
        "https://m.example.com",
    );
    assert_eq!(body, "Hello. Leave: https://m.example.com/unsubscribe/tok123");
}

#[test]
fn merge_does_not_expand_tags_inside_contact_data() {
    let mut c = sample_contact();
    c.first_name = "{{email}}".into();
    c.company = "{{unsubscribe_url}}".into();
    let out = merge::render("{{first_name}} at {{company}}", &c, "https://x/unsubscribe/tok123");
    assert_eq!(out, "{{email}} at {{unsubscribe_url}}");
}

// ═══════════════════════════════════════════════════════════
// Campaign validation
// ═══════════════════════════════════════════════════════════

#[test]
fn validate_reports_every_missing_field() {
    let s = test_store();
    let form = CampaignForm {
        schedule_type: "immediate".into(),
        ..Default::default()
    };
    let errors = campaigns::validate(&s, &form, &now()).unwrap_err();
    assert_eq!(errors.len(), 3);
}

#[test]
fn validate_subject_and_from() {
    let s = test_store();
    let mut form = immediate("Long");
    form.subject = "x".repeat(256);
    form.from_email = "not-an-address".into();
    let errors = campaigns::validate(&s, &form, &now()).unwrap_err();
    assert_eq!(errors.len(), 2);

    form.subject = "x".repeat(255);
    form.from_email = " Sales@Example.com ".into();
    let input = campaigns::validate(&s, &form, &now()).unwrap();
    assert_eq!(input.from_email, "sales@example.com");
}

#[test]
fn validate_scheduled_needs_future_send_at() {
    let s = test_store();
    let mut form = immediate("Later");
    form.schedule_type = "scheduled".into();
    assert!(campaigns::validate(&s, &form, &now()).is_err());

    form.send_at = Some("2030-01-15 08:59:00".into());
    let errors = campaigns::validate(&s, &form, &now()).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("future")));

    form.send_at = Some("2030-01-20T10:00".into());
    let input = campaigns::validate(&s, &form, &now()).unwrap();
    assert_eq!(input.send_at, Some(at(2030, 1, 20, 10, 0)));
}

#[test]
fn validate_recurring_rules() {
    let s = test_store();
    let mut form = recurring("Weekly", "weekly", "2030-01-20 09:00:00", None);
    assert!(campaigns::validate(&s, &form, &now()).is_ok());

    form.recurrence = None;
    assert!(campaigns::validate(&s, &form, &now()).is_err());

    form.recurrence = Some("hourly".into());
    assert!(campaigns::validate(&s, &form, &now()).is_err());

    let form = recurring("Ends early", "daily", "2030-01-20 09:00:00", Some("2030-01-19 09:00:00"));
    let errors = campaigns::validate(&s, &form, &now()).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("after the send time")));

    let form = recurring("No first run", "daily", "", None);
    assert!(campaigns::validate(&s, &form, &now()).is_err());
}

#[test]
fn validate_immediate_rejects_recurrence_fields() {
    let s = test_store();
    let mut form = immediate("Now");
    form.recurrence = Some("daily".into());
    assert!(campaigns::validate(&s, &form, &now()).is_err());

    // A send time on an immediate campaign is ignored
    let mut form = immediate("Now");
    form.send_at = Some("2030-01-20 09:00:00".into());
    assert_eq!(campaigns::validate(&s, &form, &now()).unwrap().send_at, None);
}

#[test]
fn validate_unknown_list() {
    let s = test_store();
    let mut form = immediate("Listed");
    form.list_id = Some(999);
    assert!(campaigns::validate(&s, &form, &now()).is_err());

    let list = s
        .list_create(&ContactListForm { name: "Real".into(), description: String::new() })
        .unwrap();
    form.list_id = Some(list);
    assert!(campaigns::validate(&s, &form, &now()).is_ok());
}

// ═══════════════════════════════════════════════════════════
// Campaign lifecycle
// ═══════════════════════════════════════════════════════════

#[test]
fn campaign_schedule_refuses_zero_recipients() {
    let s = campaign_store();
    let id = campaigns::create(&s, &actor(), &immediate("Empty"), &now()).unwrap();
    assert!(matches!(
        campaigns::schedule(&s, &actor(), id, &now()),
        Err(CampaignError::Rejected(_))
    ));

    let cid = add_contact(&s, "gone@example.com", "Gone");
    s.contact_update_status(cid, "unsubscribed").unwrap();
    assert!(campaigns::schedule(&s, &actor(), id, &now()).is_err());
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "draft");
}

#[test]
fn campaign_schedule_sets_next_run() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");

    let id = campaigns::create(&s, &actor(), &immediate("Now"), &now()).unwrap();
    assert_eq!(campaigns::schedule(&s, &actor(), id, &now()).unwrap(), now());

    let mut form = immediate("Later");
    form.schedule_type = "scheduled".into();
    form.send_at = Some("2030-02-01 08:00:00".into());
    let id = campaigns::create(&s, &actor(), &form, &now()).unwrap();
    let next = campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    assert_eq!(next, at(2030, 2, 1, 8, 0));
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "scheduled");
    assert_eq!(c.next_run_at, Some(next));

    // Scheduled campaigns are locked for editing and cannot be scheduled twice
    assert!(campaigns::update(&s, &actor(), id, &form, &now()).is_err());
    assert!(campaigns::schedule(&s, &actor(), id, &now()).is_err());
}

#[test]
fn campaign_cancel_only_from_scheduled() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    let id = campaigns::create(&s, &actor(), &immediate("Stop"), &now()).unwrap();
    assert!(campaigns::cancel(&s, &actor(), id).is_err());

    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    campaigns::cancel(&s, &actor(), id).unwrap();
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "cancelled");
    assert_eq!(c.next_run_at, None);

    let sender = RecordingSender::default();
    assert_eq!(process_due(&s, &sender, &now()).campaigns, 0);

    // Cancelled campaigns are editable and can be scheduled again
    campaigns::update(&s, &actor(), id, &immediate("Stop v2"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
}

#[test]
fn campaign_not_found() {
    let s = campaign_store();
    assert_eq!(campaigns::cancel(&s, &actor(), 404), Err(CampaignError::NotFound));
    assert_eq!(campaigns::delete(&s, &actor(), 404), Err(CampaignError::NotFound));
}

#[test]
fn campaign_duplicate_is_draft_copy() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    let id = campaigns::create(&s, &actor(), &immediate("Original"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    let copy = campaigns::duplicate(&s, &actor(), id).unwrap();
    let c = s.campaign_find_by_id(copy).unwrap();
    assert_eq!(c.name, "Original (copy)");
    assert_eq!(c.status, "draft");
    assert_eq!(c.run_count, 0);
}

#[test]
fn campaign_delete_refused_while_sending() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    let id = campaigns::create(&s, &actor(), &immediate("Busy"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    assert!(s.campaign_claim(id).unwrap());
    assert!(matches!(
        campaigns::delete(&s, &actor(), id),
        Err(CampaignError::Rejected(_))
    ));
}

#[test]
fn campaign_actions_are_audited() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    let id = campaigns::create(&s, &actor(), &immediate("Logged"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    campaigns::cancel(&s, &actor(), id).unwrap();
    assert_eq!(s.audit_count(None, Some("campaign")), 3);
    assert_eq!(s.audit_list(Some("schedule"), None, 10, 0).len(), 1);
}

#[test]
fn campaign_preview_personalises_for_first_recipient() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    let bob = add_contact(&s, "bob@example.com", "Bob");
    let id = campaigns::create(&s, &actor(), &immediate("Peek"), &now()).unwrap();

    let msg = campaigns::preview(&s, id, None).unwrap();
    assert_eq!(msg.to, "ann@example.com");
    assert_eq!(msg.subject, "News for Ann");
    assert_eq!(msg.from, "news@example.com");
    assert!(msg.body.contains("https://mail.example.com/unsubscribe/"));

    let msg = campaigns::preview(&s, id, Some(bob)).unwrap();
    assert_eq!(msg.subject, "News for Bob");
}

// ═══════════════════════════════════════════════════════════
// Campaign processing
// ═══════════════════════════════════════════════════════════

#[test]
fn process_immediate_campaign_completes() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    add_contact(&s, "bob@example.com", "Bob");
    let id = campaigns::create(&s, &actor(), &immediate("Welcome"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let sender = RecordingSender::default();
    let summary = process_due(&s, &sender, &now());
    assert_eq!(summary.campaigns, 1);
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 0);

    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!(c.run_count, 1);
    assert_eq!(c.sent_count, 2);
    assert_eq!(c.last_run_at, Some(now()));
    assert_eq!(c.last_error, None);

    let delivered = sender.delivered();
    assert_eq!(delivered.len(), 2);
    let ann = delivered.iter().find(|m| m.to == "ann@example.com").unwrap();
    assert_eq!(ann.subject, "News for Ann");
    assert!(ann.body.starts_with("Hi Ann,"));
    assert!(ann.body.contains("https://mail.example.com/unsubscribe/"));
    assert_eq!(ann.from, "news@example.com");

    let sends = s.send_list_for_campaign(id, Some("sent"), 10, 0);
    assert_eq!(sends.len(), 2);
    assert!(sends.iter().all(|r| r.sent_at.is_some() && r.run_number == 1));

    // Nothing left to do on the next tick
    let again = process_due(&s, &sender, &at(2030, 1, 15, 9, 5));
    assert_eq!(again.campaigns, 0);
    assert_eq!(sender.delivered().len(), 2);
}

#[test]
fn process_all_failed_marks_campaign_failed() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    add_contact(&s, "bob@example.com", "Bob");
    let id = campaigns::create(&s, &actor(), &immediate("Bounce"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let summary = process_due(&s, &RecordingSender::failing(), &now());
    assert_eq!(summary.failed, 2);
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "failed");
    assert_eq!(c.failed_count, 2);
    assert!(c.last_error.unwrap().contains("550"));

    // A failed campaign can be retried as a new run
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    let sender = RecordingSender::default();
    process_due(&s, &sender, &now());
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!(c.run_count, 2);
    assert_eq!(c.sent_count, 2);
    assert_eq!(c.last_error, None);
    assert_eq!(s.send_stats(id, None).total, 4);
}

#[test]
fn process_partial_failure_completes_with_error() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    add_contact(&s, "bob@example.com", "Bob");
    let id = campaigns::create(&s, &actor(), &immediate("Mixed"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    process_due(&s, &RecordingSender::rejecting(&["bob@example.com"]), &now());
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!((c.sent_count, c.failed_count), (1, 1));
    assert!(c.last_error.unwrap().contains("bob@example.com"));
    let failed = s.send_list_for_campaign(id, Some("failed"), 10, 0);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].email, "bob@example.com");
}

#[test]
fn process_recurring_reschedules_each_run() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    add_contact(&s, "bob@example.com", "Bob");
    let form = recurring("Digest", "weekly", "2030-01-20 09:00:00", None);
    let id = campaigns::create(&s, &actor(), &form, &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let sender = RecordingSender::default();
    assert_eq!(process_due(&s, &sender, &now()).campaigns, 0);

    let first = at(2030, 1, 20, 9, 0);
    assert_eq!(process_due(&s, &sender, &first).sent, 2);
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "scheduled");
    assert_eq!(c.next_run_at, Some(at(2030, 1, 27, 9, 0)));
    assert_eq!(c.run_count, 1);

    let second = at(2030, 1, 27, 9, 1);
    assert_eq!(process_due(&s, &sender, &second).sent, 2);
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "scheduled");
    assert_eq!(c.next_run_at, Some(at(2030, 2, 3, 9, 0)));
    assert_eq!(c.run_count, 2);
    assert_eq!(c.sent_count, 4);
    assert_eq!(s.send_stats(id, Some(2)).sent, 2);
    assert_eq!(sender.delivered().len(), 4);
}

#[test]
fn process_recurring_completes_at_end_date() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    let form = recurring("Short", "daily", "2030-01-16 09:00:00", Some("2030-01-17 08:00:00"));
    let id = campaigns::create(&s, &actor(), &form, &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    process_due(&s, &RecordingSender::default(), &at(2030, 1, 16, 9, 0));
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!(c.next_run_at, None);
}

#[test]
fn process_respects_send_cap_and_resumes() {
    let s = campaign_store();
    s.setting_set("campaign_max_sends_per_run", "2").unwrap();
    add_contact(&s, "a@example.com", "A");
    add_contact(&s, "b@example.com", "B");
    add_contact(&s, "c@example.com", "C");
    let id = campaigns::create(&s, &actor(), &immediate("Capped"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let sender = RecordingSender::default();
    let first = process_due(&s, &sender, &now());
    assert_eq!(first.sent, 2);
    assert_eq!(first.deferred, 1);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "sending");

    let second = process_due(&s, &sender, &at(2030, 1, 15, 9, 1));
    assert_eq!(second.sent, 1);
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!(c.sent_count, 3);
    assert_eq!(c.run_count, 1);

    let mut to: Vec<String> = sender.delivered().into_iter().map(|m| m.to).collect();
    to.sort();
    assert_eq!(to, vec!["a@example.com", "b@example.com", "c@example.com"]);
}

#[test]
fn process_skips_contacts_unsubscribed_mid_run() {
    let s = campaign_store();
    s.setting_set("campaign_max_sends_per_run", "1").unwrap();
    add_contact(&s, "a@example.com", "A");
    add_contact(&s, "b@example.com", "B");
    let id = campaigns::create(&s, &actor(), &immediate("Mid-run"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let sender = RecordingSender::default();
    process_due(&s, &sender, &now());
    let pending = s.send_list_for_campaign(id, Some("pending"), 10, 0);
    assert_eq!(pending.len(), 1);
    let token = s
        .contact_find_by_id(pending[0].contact_id.unwrap())
        .unwrap()
        .unsubscribe_token;
    s.contact_unsubscribe(&token).unwrap();

    let summary = process_due(&s, &sender, &now());
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.sent, 0);
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!((c.sent_count, c.failed_count), (1, 0));
    assert_eq!(s.send_stats(id, Some(1)).skipped, 1);
    assert_eq!(sender.delivered().len(), 1);
}

#[test]
fn process_skips_deleted_contacts() {
    let s = campaign_store();
    s.setting_set("campaign_max_sends_per_run", "1").unwrap();
    add_contact(&s, "a@example.com", "A");
    add_contact(&s, "b@example.com", "B");
    let id = campaigns::create(&s, &actor(), &immediate("Deleted"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let sender = RecordingSender::default();
    process_due(&s, &sender, &now());
    let pending = s.send_list_for_campaign(id, Some("pending"), 10, 0);
    s.contact_delete(pending[0].contact_id.unwrap()).unwrap();

    assert_eq!(process_due(&s, &sender, &now()).skipped, 1);
    let skipped = s.send_list_for_campaign(id, Some("skipped"), 10, 0);
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].contact_id, None);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "completed");
}

#[test]
fn process_zero_recipients_at_run_time_completes() {
    let s = campaign_store();
    let cid = add_contact(&s, "a@example.com", "A");
    let id = campaigns::create(&s, &actor(), &immediate("Vanished"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    s.contact_delete(cid).unwrap();

    let summary = process_due(&s, &RecordingSender::default(), &now());
    assert_eq!(summary.campaigns, 1);
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!(c.run_count, 1);
    assert_eq!(c.sent_count, 0);
}

#[test]
fn process_without_sender_address_fails_run() {
    let s = test_store();
    add_contact(&s, "a@example.com", "A");
    let id = campaigns::create(&s, &actor(), &immediate("No from"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let sender = RecordingSender::default();
    process_due(&s, &sender, &now());
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "failed");
    assert_eq!(c.last_error.as_deref(), Some("No sender address configured"));
    assert!(sender.delivered().is_empty());
}

#[test]
fn process_list_campaign_only_reaches_members() {
    let s = campaign_store();
    let a = add_contact(&s, "a@example.com", "A");
    add_contact(&s, "b@example.com", "B");
    let list = s
        .list_create(&ContactListForm { name: "VIP".into(), description: String::new() })
        .unwrap();
    s.list_add_members(list, &[a]).unwrap();

    let mut form = immediate("VIP only");
    form.list_id = Some(list);
    let id = campaigns::create(&s, &actor(), &form, &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let sender = RecordingSender::default();
    process_due(&s, &sender, &now());
    let delivered = sender.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].to, "a@example.com");
    assert!(s.list_delete(list).is_ok());
}

#[test]
fn send_now_moves_scheduled_run_forward() {
    let s = campaign_store();
    add_contact(&s, "a@example.com", "A");
    let mut form = immediate("Soon");
    form.schedule_type = "scheduled".into();
    form.send_at = Some("2030-02-01 08:00:00".into());
    let id = campaigns::create(&s, &actor(), &form, &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    campaigns::send_now(&s, &actor(), id, &now()).unwrap();
    assert_eq!(s.campaign_find_by_id(id).unwrap().next_run_at, Some(now()));
    assert_eq!(process_due(&s, &RecordingSender::default(), &now()).sent, 1);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "completed");

    // Completed campaigns cannot be sent again
    assert!(campaigns::send_now(&s, &actor(), id, &now()).is_err());
}

#[test]
fn send_now_from_draft() {
    let s = campaign_store();
    add_contact(&s, "a@example.com", "A");
    let id = campaigns::create(&s, &actor(), &immediate("Draft"), &now()).unwrap();
    campaigns::send_now(&s, &actor(), id, &now()).unwrap();
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "scheduled");
    assert_eq!(c.next_run_at, Some(now()));
}

#[test]
fn recover_stalled_campaign_resumes() {
    let s = campaign_store();
    add_contact(&s, "a@example.com", "A");
    add_contact(&s, "b@example.com", "B");
    let id = campaigns::create(&s, &actor(), &immediate("Crashed"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    // Claimed by a process that died before queueing any sends
    assert!(s.campaign_claim(id).unwrap());
    assert_eq!(recover_stalled(&s), 1);

    let sender = RecordingSender::default();
    let summary = process_due(&s, &sender, &now());
    assert_eq!(summary.sent, 2);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "completed");
    assert_eq!(recover_stalled(&s), 0);
}

#[test]
fn resumed_run_does_not_resend() {
    let s = campaign_store();
    let a = add_contact(&s, "a@example.com", "A");
    add_contact(&s, "b@example.com", "B");
    let id = campaigns::create(&s, &actor(), &immediate("Half done"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    // Simulate a run that sent one message before the process stopped
    assert!(s.campaign_claim(id).unwrap());
    s.send_enqueue_run(id, 1, &s.contact_recipients(None)).unwrap();
    let first = s
        .send_list_for_campaign(id, None, 10, 0)
        .into_iter()
        .find(|r| r.contact_id == Some(a))
        .unwrap();
    s.send_mark_sent(first.id, &now()).unwrap();

    let sender = RecordingSender::default();
    process_due(&s, &sender, &now());
    let delivered = sender.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].to, "b@example.com");
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.sent_count, 2);
    assert_eq!(c.status, "completed");
}

/// Make every update of a send row to `status` fail, as a full disk would.
fn refuse_send_status(store: &SqliteStore, status: &str) {
    store
        .pool
        .get()
        .unwrap()
        .execute_batch(&format!(
            "CREATE TRIGGER refuse_{s} BEFORE UPDATE OF status ON campaign_sends
             WHEN NEW.status = '{s}' BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            s = status
        ))
        .unwrap();
}

fn drop_trigger(store: &SqliteStore, name: &str) {
    store
        .pool
        .get()
        .unwrap()
        .execute_batch(&format!("DROP TRIGGER {};", name))
        .unwrap();
}

#[test]
fn process_stops_when_delivery_cannot_be_recorded() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    add_contact(&s, "bob@example.com", "Bob");
    let id = campaigns::create(&s, &actor(), &immediate("Unrecorded"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    refuse_send_status(&s, "sent");

    let sender = RecordingSender::default();
    let summary = process_due(&s, &sender, &now());
    assert_eq!(sender.delivered().len(), 1);
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.interrupted, 1);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "sending");
    assert_eq!(s.send_stats(id, Some(1)).pending, 2);

    drop_trigger(&s, "refuse_sent");
    process_due(&s, &sender, &at(2030, 1, 15, 9, 1));
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!(c.sent_count, 2);
}

#[test]
fn process_stops_when_skip_cannot_be_recorded() {
    let s = campaign_store();
    s.setting_set("campaign_max_sends_per_run", "1").unwrap();
    add_contact(&s, "ann@example.com", "Ann");
    let bob = add_contact(&s, "bob@example.com", "Bob");
    let id = campaigns::create(&s, &actor(), &immediate("Skip"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    let sender = RecordingSender::default();
    process_due(&s, &sender, &now());
    s.contact_update_status(bob, "unsubscribed").unwrap();
    refuse_send_status(&s, "skipped");

    // Returns instead of fetching the same pending row forever
    let summary = process_due(&s, &sender, &now());
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.interrupted, 1);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "sending");

    drop_trigger(&s, "refuse_skipped");
    let summary = process_due(&s, &sender, &now());
    assert_eq!(summary.skipped, 1);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "completed");
    assert_eq!(sender.delivered().len(), 1);
}

#[test]
fn process_stops_when_failure_cannot_be_recorded() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    add_contact(&s, "bob@example.com", "Bob");
    let id = campaigns::create(&s, &actor(), &immediate("Bounce"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    refuse_send_status(&s, "failed");

    let summary = process_due(&s, &RecordingSender::failing(), &now());
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.interrupted, 1);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "sending");
}

#[test]
fn process_retries_enqueue_on_next_tick() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    let id = campaigns::create(&s, &actor(), &immediate("Queue"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    s.pool
        .get()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER refuse_enqueue BEFORE INSERT ON campaign_sends
             BEGIN SELECT RAISE(ABORT, 'database or disk is full'); END;",
        )
        .unwrap();

    let sender = RecordingSender::default();
    let summary = process_due(&s, &sender, &now());
    assert_eq!(summary.interrupted, 1);
    assert!(sender.delivered().is_empty());
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "sending");
    assert_eq!(s.send_stats(id, None).total, 0);

    drop_trigger(&s, "refuse_enqueue");
    assert_eq!(process_due(&s, &sender, &now()).sent, 1);
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "completed");
}

#[test]
fn process_retries_finish_on_next_tick() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    let id = campaigns::create(&s, &actor(), &immediate("Finish"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    s.pool
        .get()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER refuse_finish BEFORE UPDATE OF run_count ON campaigns
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .unwrap();

    let sender = RecordingSender::default();
    let summary = process_due(&s, &sender, &now());
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.interrupted, 1);
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "sending");
    assert_eq!(c.run_count, 0);

    drop_trigger(&s, "refuse_finish");
    let summary = process_due(&s, &sender, &now());
    assert_eq!(summary.sent, 0);
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!(c.run_count, 1);
    assert_eq!(c.sent_count, 1);
    assert_eq!(sender.delivered().len(), 1);
}

#[test]
fn process_failed_campaign_retry_starts_new_run() {
    let s = campaign_store();
    add_contact(&s, "ann@example.com", "Ann");
    add_contact(&s, "bob@example.com", "Bob");
    let id = campaigns::create(&s, &actor(), &immediate("Retry"), &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();
    process_due(&s, &RecordingSender::failing(), &now());
    assert_eq!(s.campaign_find_by_id(id).unwrap().status, "failed");

    let later = at(2030, 1, 15, 10, 0);
    assert_eq!(campaigns::schedule(&s, &actor(), id, &later).unwrap(), later);
    let sender = RecordingSender::default();
    process_due(&s, &sender, &later);

    let first = s.send_stats(id, Some(1));
    assert_eq!((first.failed, first.sent, first.total), (2, 0, 2));
    let second = s.send_stats(id, Some(2));
    assert_eq!((second.sent, second.failed, second.total), (2, 0, 2));
    let c = s.campaign_find_by_id(id).unwrap();
    assert_eq!(c.status, "completed");
    assert_eq!(c.run_count, 2);
    assert_eq!((c.sent_count, c.failed_count), (2, 2));
    assert_eq!(sender.delivered().len(), 2);
}

// ═══════════════════════════════════════════════════════════
// Contacts
// ═══════════════════════════════════════════════════════════

#[test]
fn contacts_bulk_reports_skips() {
    let s = test_store();
    add_contact(&s, "exists@example.com", "E");
    let forms = vec![
        ContactForm { email: "new@example.com".into(), ..Default::default() },
        ContactForm { email: "broken".into(), ..Default::default() },
        ContactForm { email: "EXISTS@example.com".into(), ..Default::default() },
        ContactForm { email: "new@example.com".into(), ..Default::default() },
    ];
    let result = s.contact_create_many(&forms).unwrap();
    assert_eq!(result.created.len(), 1);
    assert_eq!(result.skipped.len(), 3);
    assert_eq!(s.contact_count(None, None), 2);
}

#[test]
fn contacts_unsubscribe_is_idempotent() {
    let s = test_store();
    let id = add_contact(&s, "leaver@example.com", "L");
    let token = s.contact_find_by_id(id).unwrap().unsubscribe_token;
    assert_eq!(token.len(), 32);
    assert_eq!(s.contact_unsubscribe(&token).unwrap().status, "unsubscribed");
    assert_eq!(s.contact_unsubscribe(&token).unwrap().status, "unsubscribed");
    assert!(s.contact_unsubscribe("no-such-token").is_err());
    assert_eq!(s.contact_count_recipients(None), 0);
}

#[test]
fn list_delete_refused_while_campaign_scheduled() {
    let s = campaign_store();
    let a = add_contact(&s, "a@example.com", "A");
    let list = s
        .list_create(&ContactListForm { name: "Busy".into(), description: String::new() })
        .unwrap();
    s.list_add_members(list, &[a]).unwrap();
    let mut form = immediate("Uses list");
    form.list_id = Some(list);
    let id = campaigns::create(&s, &actor(), &form, &now()).unwrap();
    campaigns::schedule(&s, &actor(), id, &now()).unwrap();

    assert!(s.list_delete(list).is_err());
    campaigns::cancel(&s, &actor(), id).unwrap();
    assert!(s.list_delete(list).is_ok());
    assert_eq!(s.campaign_find_by_id(id).unwrap().list_id, None);
}

#[test]
fn contacts_search_treats_wildcards_literally() {
    let s = test_store();
    add_contact(&s, "a_b@example.com", "Under");
    add_contact(&s, "axb@example.com", "Plain");
    assert_eq!(s.contact_count(Some("a_b"), None), 1);
    let found = s.contact_list(Some("A_B"), None, 10, 0);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].email, "a_b@example.com");
    assert_eq!(s.contact_count(Some("%"), None), 0);
}

// ═══════════════════════════════════════════════════════════
// Email providers
// ═══════════════════════════════════════════════════════════

fn email_settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn message() -> OutgoingEmail {
    OutgoingEmail {
        from: "news@example.com".into(),
        from_name: "News".into(),
        to: "ann@example.com".into(),
        subject: "Hello".into(),
        body: "Body".into(),
    }
}

#[test]
fn provider_chain_without_providers_errors() {
    let chain = ProviderChain::from_settings(email_settings(&[]));
    let err = chain.send(&message()).unwrap_err();
    assert!(err.contains("No email provider"));
}

#[test]
fn provider_chain_console_delivers() {
    let chain = ProviderChain::from_settings(email_settings(&[("email_console_enabled", "true")]));
    assert!(chain.send(&message()).is_ok());
    assert_eq!(chain.enabled_providers(), vec!["console".to_string()]);
}

#[test]
fn provider_chain_failover() {
    let base = [
        ("email_smtp_enabled", "true"),
        ("email_console_enabled", "true"),
        ("email_failover_chain", "smtp, console"),
    ];
    let chain = ProviderChain::from_settings(email_settings(&base));
    let err = chain.send(&message()).unwrap_err();
    assert!(err.contains("SMTP host"));

    let mut with_failover = base.to_vec();
    with_failover.push(("email_failover_enabled", "true"));
    let chain = ProviderChain::from_settings(email_settings(&with_failover));
    assert!(chain.send(&message()).is_ok());
}

#[test]
fn provider_chain_reports_last_error() {
    let chain = ProviderChain::from_settings(email_settings(&[
        ("email_failover_enabled", "true"),
        ("email_smtp_enabled", "true"),
        ("email_resend_enabled", "true"),
    ]));
    let err = chain.send(&message()).unwrap_err();
    assert!(err.starts_with("All email providers failed"));
    assert!(err.contains("Resend API key"));
}

#[test]
fn resend_requires_non_blank_key() {
    let settings = email_settings(&[("email_resend_api_key", "   ")]);
    let err = email::resend::send(&settings, &message()).unwrap_err();
    assert_eq!(err, "Resend API key not configured");
}

#[test]
fn default_from_address_fallbacks() {
    assert_eq!(
        email::default_from_address(&email_settings(&[("email_from_address", " a@example.com ")])),
        Some("a@example.com".into())
    );
    assert_eq!(
        email::default_from_address(&email_settings(&[
            ("email_gmail_enabled", "true"),
            ("email_gmail_address", "me@gmail.com"),
        ])),
        Some("me@gmail.com".into())
    );
    assert_eq!(email::default_from_address(&email_settings(&[])), None);
}

#[test]
fn build_message_rejects_bad_addresses() {
    assert!(email::build_message(&message()).is_ok());
    let mut bad = message();
    bad.to = "nobody".into();
    assert!(email::build_message(&bad).is_err());
}

#[test]
fn send_test_email_via_console() {
    let settings = email_settings(&[
        ("email_console_enabled", "true"),
        ("email_from_address", "ops@example.com"),
    ]);
    assert!(email::send_test_email(settings, "admin@example.com").is_ok());
    let no_from = email_settings(&[("email_console_enabled", "true")]);
    assert!(email::send_test_email(no_from, "admin@example.com").is_err());
}

// ═══════════════════════════════════════════════════════════
// Schema repair
// ═══════════════════════════════════════════════════════════

/// Tables as an early build created them: campaign_sends without run tracking,
/// a nullable campaign id and no foreign key.
const LEGACY_TABLES: &str = "CREATE TABLE campaigns (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        from_email TEXT NOT NULL DEFAULT '',
        schedule_type TEXT NOT NULL DEFAULT 'immediate',
        send_at DATETIME,
        recurrence TEXT,
        list_id INTEGER,
        status TEXT NOT NULL DEFAULT 'draft',
        created_by INTEGER,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE campaign_sends (
        id INTEGER PRIMARY KEY,
        campaign_id INTEGER,
        contact_id INTEGER,
        email TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending'
    );
    INSERT INTO campaigns (id, name, subject, body, status) VALUES (1, 'Old', 'S', 'B', 'completed');
    INSERT INTO campaign_sends (campaign_id, email, status) VALUES (1, 'a@example.com', 'sent');
    INSERT INTO campaign_sends (campaign_id, email, status) VALUES (NULL, 'orphan@example.com', 'sent');
    INSERT INTO campaign_sends (campaign_id, email, status) VALUES (99, 'gone@example.com', 'sent');";

#[test]
fn repair_schema_upgrades_legacy_tables() {
    let pool = bare_pool();
    {
        let conn = pool.get().unwrap();
        conn.execute_batch(LEGACY_TABLES).unwrap();
    }

    run_migrations(&pool).expect("migrations should repair legacy schema");
    // Second run is a no-op
    run_migrations(&pool).expect("repair is idempotent");
    seed_defaults(&pool).unwrap();

    {
        let conn = pool.get().unwrap();
        assert!(column_exists(&conn, "campaigns", "run_count").unwrap());
        assert!(column_exists(&conn, "campaigns", "recurrence_end_at").unwrap());
        assert!(column_exists(&conn, "campaign_sends", "run_number").unwrap());
        assert!(column_exists(&conn, "campaign_sends", "sent_at").unwrap());
    }

    let s = SqliteStore::new(pool);
    let c = s.campaign_find_by_id(1).expect("legacy campaign readable");
    assert_eq!(c.run_count, 0);
    let sends = s.send_list_for_campaign(1, None, 10, 0);
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].run_number, 1);

    s.campaign_delete(1).unwrap();
    assert!(s.send_list_for_campaign(1, None, 10, 0).is_empty());
}

#[test]
fn failed_rebuild_rolls_back_and_restores_foreign_keys() {
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON;"));
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        conn.execute_batch(LEGACY_TABLES).unwrap();
        // Left over from an earlier attempt; makes the rebuild fail
        conn.execute_batch("CREATE TABLE campaign_sends_new (id INTEGER PRIMARY KEY);")
            .unwrap();
    }

    assert!(run_migrations(&pool).is_err());

    let conn = pool.get().unwrap();
    assert!(conn.is_autocommit());
    let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
    assert_eq!(fk, 1);
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM campaign_sends", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 3);
}
