pub mod merge;
pub mod processor;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};

use crate::email::OutgoingEmail;
use crate::models::audit::Actor;
use crate::models::campaign::{Campaign, CampaignForm, CampaignInput};
use crate::models::contact::is_valid_email;
use crate::models::{fmt_ts, parse_ts};
use crate::store::Store;

pub const MAX_SUBJECT_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleType {
    Immediate,
    Scheduled,
    Recurring,
}

impl ScheduleType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "immediate" => Some(Self::Immediate),
            "scheduled" => Some(Self::Scheduled),
            "recurring" => Some(Self::Recurring),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Scheduled => "scheduled",
            Self::Recurring => "recurring",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// Why a campaign operation was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum CampaignError {
    NotFound,
    /// Field-level validation problems, all reported at once.
    Invalid(Vec<String>),
    /// The operation does not apply to the campaign in its current state.
    Rejected(String),
}

impl std::fmt::Display for CampaignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignError::NotFound => write!(f, "Campaign not found"),
            CampaignError::Invalid(errors) => write!(f, "{}", errors.join("; ")),
            CampaignError::Rejected(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<String> for CampaignError {
    fn from(e: String) -> Self {
        CampaignError::Rejected(e)
    }
}

/// Next run after `from`. Monthly runs land on the same day of the next
/// month, or that month's last day when it is shorter.
pub fn next_occurrence(from: &NaiveDateTime, recurrence: Recurrence) -> NaiveDateTime {
    match recurrence {
        Recurrence::Daily => *from + Duration::days(1),
        Recurrence::Weekly => *from + Duration::days(7),
        Recurrence::Monthly => from
            .checked_add_months(Months::new(1))
            .unwrap_or_else(|| last_day_of_next_month(from)),
    }
}

fn last_day_of_next_month(from: &NaiveDateTime) -> NaiveDateTime {
    let (y, m) = if from.month() == 12 {
        (from.year() + 1, 1)
    } else {
        (from.year(), from.month() + 1)
    };
    let mut day = 31;
    while NaiveDate::from_ymd_opt(y, m, day).is_none() && day > 28 {
        day -= 1;
    }
    NaiveDate::from_ymd_opt(y, m, day)
        .map(|d| d.and_time(from.time()))
        .unwrap_or(*from + Duration::days(30))
}

/// Validate a submitted campaign against the clock `now`.
pub fn validate(
    store: &dyn Store,
    form: &CampaignForm,
    now: &NaiveDateTime,
) -> Result<CampaignInput, Vec<String>> {
    check(store, form, Some(now))
}

/// Field checks. `now = None` skips the checks that depend on the clock,
/// which is what an explicit "send now" needs.
fn check(
    store: &dyn Store,
    form: &CampaignForm,
    now: Option<&NaiveDateTime>,
) -> Result<CampaignInput, Vec<String>> {
    let mut errors = Vec::new();

    let name = form.name.trim();
    let subject = form.subject.trim();
    if name.is_empty() {
        errors.push("Name is required".to_string());
    }
    if subject.is_empty() {
        errors.push("Subject is required".to_string());
    } else if subject.chars().count() > MAX_SUBJECT_LEN {
        errors.push(format!("Subject must be at most {} characters", MAX_SUBJECT_LEN));
    }
    if form.body.trim().is_empty() {
        errors.push("Body is required".to_string());
    }

    let from_email = form.from_email.trim().to_lowercase();
    if !from_email.is_empty() && !is_valid_email(&from_email) {
        errors.push(format!("Invalid from address: {}", form.from_email.trim()));
    }

    let send_at = parse_optional(&form.send_at, "send_at", &mut errors);
    let recurrence_end_at = parse_optional(&form.recurrence_end_at, "recurrence_end_at", &mut errors);
    let recurrence_raw = form
        .recurrence
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let recurrence = match recurrence_raw {
        Some(r) => match Recurrence::parse(r) {
            Some(rec) => Some(rec),
            None => {
                errors.push(format!("Unknown recurrence: {}", r));
                None
            }
        },
        None => None,
    };

    let schedule_type = ScheduleType::parse(&form.schedule_type);
    match schedule_type {
        None => errors.push(format!("Unknown schedule type: {}", form.schedule_type.trim())),
        Some(ScheduleType::Immediate) => {
            if recurrence_raw.is_some() || recurrence_end_at.is_some() {
                errors.push("Immediate campaigns cannot have a recurrence".to_string());
            }
        }
        Some(ScheduleType::Scheduled) => {
            match (&send_at, now) {
                (None, _) => errors.push("Scheduled campaigns need a send time".to_string()),
                (Some(at), Some(now)) if at <= now => {
                    errors.push("Send time must be in the future".to_string())
                }
                _ => {}
            }
            if recurrence_raw.is_some() || recurrence_end_at.is_some() {
                errors.push("Use the recurring schedule type for repeating campaigns".to_string());
            }
        }
        Some(ScheduleType::Recurring) => {
            if recurrence_raw.is_none() {
                errors.push("Recurring campaigns need a recurrence".to_string());
            }
            if send_at.is_none() {
                errors.push("Recurring campaigns need a first send time".to_string());
            }
            if let (Some(at), Some(now)) = (&send_at, now) {
                let ended = recurrence_end_at.map(|end| end <= *now).unwrap_or(false);
                if at <= now && ended {
                    errors.push("Recurrence has already ended".to_string());
                }
            }
        }
    }

    if let (Some(at), Some(end)) = (&send_at, &recurrence_end_at) {
        if end <= at {
            errors.push("Recurrence end must be after the send time".to_string());
        }
    }

    if let Some(list_id) = form.list_id {
        if store.list_find_by_id(list_id).is_none() {
            errors.push(format!("Contact list {} does not exist", list_id));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let schedule_type = schedule_type.unwrap_or(ScheduleType::Immediate);
    Ok(CampaignInput {
        name: name.to_string(),
        subject: subject.to_string(),
        body: form.body.clone(),
        from_email,
        from_name: form.from_name.trim().to_string(),
        schedule_type: schedule_type.as_str().to_string(),
        // An immediate campaign's send time is irrelevant.
        send_at: if schedule_type == ScheduleType::Immediate { None } else { send_at },
        recurrence: recurrence.map(|r| r.as_str().to_string()),
        recurrence_end_at,
        list_id: form.list_id,
    })
}

fn parse_optional(value: &Option<String>, field: &str, errors: &mut Vec<String>) -> Option<NaiveDateTime> {
    let raw = value.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
    match parse_ts(raw) {
        Some(dt) => Some(dt),
        None => {
            errors.push(format!("Invalid {}: {}", field, raw));
            None
        }
    }
}

fn load(store: &dyn Store, id: i64) -> Result<Campaign, CampaignError> {
    store.campaign_find_by_id(id).ok_or(CampaignError::NotFound)
}

// ── Operations ──────────────────────────────────────────────────────

pub fn create(
    store: &dyn Store,
    actor: &Actor,
    form: &CampaignForm,
    now: &NaiveDateTime,
) -> Result<i64, CampaignError> {
    let input = validate(store, form, now).map_err(CampaignError::Invalid)?;
    let id = store.campaign_create(&input, actor.user_id)?;
    store.audit_log(actor, "create", Some("campaign"), Some(id), Some(&input.name), None);
    Ok(id)
}

pub fn update(
    store: &dyn Store,
    actor: &Actor,
    id: i64,
    form: &CampaignForm,
    now: &NaiveDateTime,
) -> Result<(), CampaignError> {
    let existing = load(store, id)?;
    if !existing.is_editable() {
        return Err(CampaignError::Rejected(format!(
            "A {} campaign cannot be edited",
            existing.status
        )));
    }
    let input = validate(store, form, now).map_err(CampaignError::Invalid)?;
    store.campaign_update(id, &input)?;
    store.audit_log(actor, "update", Some("campaign"), Some(id), Some(&input.name), None);
    Ok(())
}

pub fn delete(store: &dyn Store, actor: &Actor, id: i64) -> Result<(), CampaignError> {
    let existing = load(store, id)?;
    if existing.status == "sending" {
        return Err(CampaignError::Rejected(
            "A campaign cannot be deleted while it is sending".into(),
        ));
    }
    store.campaign_delete(id)?;
    store.audit_log(actor, "delete", Some("campaign"), Some(id), Some(&existing.name), None);
    Ok(())
}

pub fn duplicate(store: &dyn Store, actor: &Actor, id: i64) -> Result<i64, CampaignError> {
    let existing = load(store, id)?;
    let new_id = store.campaign_duplicate(id, actor.user_id)?;
    store.audit_log(
        actor,
        "duplicate",
        Some("campaign"),
        Some(new_id),
        Some(&existing.name),
        Some(&format!("copied from #{}", id)),
    );
    Ok(new_id)
}

/// `draft | cancelled | failed → scheduled`. Returns the first run time.
pub fn schedule(
    store: &dyn Store,
    actor: &Actor,
    id: i64,
    now: &NaiveDateTime,
) -> Result<NaiveDateTime, CampaignError> {
    let campaign = load(store, id)?;
    ensure_schedulable(&campaign)?;
    let input = validate(store, &campaign.to_form(), now).map_err(CampaignError::Invalid)?;
    ensure_recipients(store, input.list_id)?;

    let next_run_at = match (ScheduleType::parse(&input.schedule_type), input.send_at) {
        (Some(ScheduleType::Immediate), _) | (_, None) => *now,
        (_, Some(at)) => at,
    };
    store.campaign_mark_scheduled(id, &next_run_at)?;
    store.audit_log(
        actor,
        "schedule",
        Some("campaign"),
        Some(id),
        Some(&campaign.name),
        Some(&format!("next run {}", fmt_ts(&next_run_at))),
    );
    Ok(next_run_at)
}

/// Queue the campaign for the next processor tick, whatever its schedule.
pub fn send_now(
    store: &dyn Store,
    actor: &Actor,
    id: i64,
    now: &NaiveDateTime,
) -> Result<(), CampaignError> {
    let campaign = load(store, id)?;
    if campaign.status != "scheduled" {
        ensure_schedulable(&campaign)?;
    }
    let input = check(store, &campaign.to_form(), None).map_err(CampaignError::Invalid)?;
    ensure_recipients(store, input.list_id)?;

    if campaign.status == "scheduled" {
        store.campaign_set_next_run(id, now)?;
    } else {
        store.campaign_mark_scheduled(id, now)?;
    }
    store.audit_log(actor, "send_now", Some("campaign"), Some(id), Some(&campaign.name), None);
    Ok(())
}

/// `scheduled → cancelled`.
pub fn cancel(store: &dyn Store, actor: &Actor, id: i64) -> Result<(), CampaignError> {
    let campaign = load(store, id)?;
    if campaign.status != "scheduled" {
        return Err(CampaignError::Rejected(format!(
            "Only scheduled campaigns can be cancelled (status is {})",
            campaign.status
        )));
    }
    store.campaign_mark_cancelled(id)?;
    store.audit_log(actor, "cancel", Some("campaign"), Some(id), Some(&campaign.name), None);
    Ok(())
}

fn ensure_schedulable(campaign: &Campaign) -> Result<(), CampaignError> {
    match campaign.status.as_str() {
        "draft" | "cancelled" | "failed" => Ok(()),
        other => Err(CampaignError::Rejected(format!(
            "A {} campaign cannot be scheduled",
            other
        ))),
    }
}

fn ensure_recipients(store: &dyn Store, list_id: Option<i64>) -> Result<(), CampaignError> {
    if store.contact_count_recipients(list_id) == 0 {
        return Err(CampaignError::Rejected("Campaign has no active recipients".into()));
    }
    Ok(())
}

/// Sender address and display name for a campaign, falling back to settings.
pub fn sender_identity(store: &dyn Store, campaign: &Campaign) -> Option<(String, String)> {
    let from = if campaign.from_email.is_empty() {
        crate::email::default_from_address(&store.setting_get_group("email_"))
            .or_else(|| store.setting_get("admin_email").filter(|s| !s.is_empty()))?
    } else {
        campaign.from_email.clone()
    };
    let name = if campaign.from_name.is_empty() {
        let configured = store.setting_get_or("email_from_name", "");
        if configured.is_empty() {
            store.setting_get_or("app_name", "Outreach")
        } else {
            configured
        }
    } else {
        campaign.from_name.clone()
    };
    Some((from, name))
}

/// The message a given contact would receive, without sending it.
pub fn preview(store: &dyn Store, id: i64, contact_id: Option<i64>) -> Result<OutgoingEmail, CampaignError> {
    let campaign = load(store, id)?;
    let contact = match contact_id {
        Some(cid) => store
            .contact_find_by_id(cid)
            .ok_or_else(|| CampaignError::Rejected("Contact not found".into()))?,
        None => store
            .contact_recipients(campaign.list_id)
            .into_iter()
            .next()
            .ok_or_else(|| CampaignError::Rejected("Campaign has no active recipients".into()))?,
    };
    let app_url = store.setting_get_or("app_url", "http://localhost:8000");
    let (subject, body) = merge::personalize(&campaign.subject, &campaign.body, &contact, &app_url);
    let (from, from_name) = sender_identity(store, &campaign).unwrap_or_default();
    Ok(OutgoingEmail {
        from,
        from_name,
        to: contact.email,
        subject,
        body,
    })
}
