use std::collections::HashSet;

use chrono::NaiveDateTime;

use super::{merge, next_occurrence, sender_identity, Recurrence};
use crate::email::{EmailSender, OutgoingEmail};
use crate::models::campaign::{Campaign, RunOutcome};
use crate::store::Store;

pub const DEFAULT_MAX_SENDS_PER_RUN: i64 = 500;

/// What one tick of the processor did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub campaigns: usize,
    pub sent: i64,
    pub failed: i64,
    pub skipped: i64,
    /// Campaigns left in `sending` because the per-tick cap was reached.
    pub deferred: usize,
    /// Campaigns left in `sending` because a database write failed.
    pub interrupted: usize,
}

/// One polling tick: resume campaigns left in `sending`, then claim and run
/// every scheduled campaign whose `next_run_at` has passed.
pub fn process_due(store: &dyn Store, sender: &dyn EmailSender, now: &NaiveDateTime) -> ProcessSummary {
    let mut summary = ProcessSummary::default();
    let mut budget = store
        .setting_get("campaign_max_sends_per_run")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_MAX_SENDS_PER_RUN)
        .max(1);

    for campaign in store.campaign_in_progress() {
        run_campaign(store, sender, &campaign, false, now, &mut budget, &mut summary);
    }

    for campaign in store.campaign_due(now) {
        match store.campaign_claim(campaign.id) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("[campaign] #{} already claimed, skipping", campaign.id);
                continue;
            }
            Err(e) => {
                log::error!("[campaign] Failed to claim #{}: {}", campaign.id, e);
                continue;
            }
        }
        log::info!(
            "[campaign] Starting run {} of #{} ({})",
            campaign.run_count + 1,
            campaign.id,
            campaign.name
        );
        run_campaign(store, sender, &campaign, true, now, &mut budget, &mut summary);
    }

    summary
}

/// Campaigns a previous process left in `sending`. They are picked up by the
/// next `process_due` call from their remaining pending sends.
pub fn recover_stalled(store: &dyn Store) -> usize {
    let stalled = store.campaign_in_progress();
    for c in &stalled {
        let run = c.run_count + 1;
        let stats = store.send_stats(c.id, Some(run));
        log::warn!(
            "[campaign] #{} ({}) was interrupted during run {}: {} pending, {} sent, {} failed; resuming",
            c.id,
            c.name,
            run,
            stats.pending,
            stats.sent,
            stats.failed
        );
    }
    stalled.len()
}

fn run_campaign(
    store: &dyn Store,
    sender: &dyn EmailSender,
    campaign: &Campaign,
    just_claimed: bool,
    now: &NaiveDateTime,
    budget: &mut i64,
    summary: &mut ProcessSummary,
) {
    let run_number = campaign.run_count + 1;
    summary.campaigns += 1;

    if just_claimed || !store.send_run_started(campaign.id, run_number) {
        let recipients = store.contact_recipients(campaign.list_id);
        match store.send_enqueue_run(campaign.id, run_number, &recipients) {
            Ok(n) => log::info!(
                "[campaign] #{} run {}: queued {} of {} recipients",
                campaign.id,
                run_number,
                n,
                recipients.len()
            ),
            Err(e) => {
                // Left in `sending`; the next tick retries the enqueue.
                summary.interrupted += 1;
                log::error!("[campaign] #{} failed to queue sends: {}", campaign.id, e);
                return;
            }
        }
    }

    if let Err(e) = send_pending(store, sender, campaign, run_number, now, budget, summary) {
        summary.interrupted += 1;
        log::error!(
            "[campaign] #{} run {} stopped, resuming next tick: {}",
            campaign.id,
            run_number,
            e
        );
        return;
    }

    let stats = store.send_stats(campaign.id, Some(run_number));
    if stats.pending > 0 {
        summary.deferred += 1;
        log::info!(
            "[campaign] #{} run {}: send cap reached, {} left for the next tick",
            campaign.id,
            run_number,
            stats.pending
        );
        return;
    }

    let outcome = finish_outcome(store, campaign, run_number, stats.sent, stats.failed, now);
    match store.campaign_finish_run(campaign.id, &outcome) {
        Ok(()) => log::info!(
            "[campaign] #{} run {} finished: {} ({} sent, {} failed, {} skipped)",
            campaign.id,
            run_number,
            outcome.status,
            stats.sent,
            stats.failed,
            stats.skipped
        ),
        Err(e) => {
            summary.interrupted += 1;
            log::error!("[campaign] #{} failed to finish run: {}", campaign.id, e);
        }
    }
}

/// Work through the run's pending rows until none are left or the budget is
/// spent. Any failed status write ends the run for this tick: the row is
/// still `pending`, and fetching it again here would resend or spin.
fn send_pending(
    store: &dyn Store,
    sender: &dyn EmailSender,
    campaign: &Campaign,
    run_number: i64,
    now: &NaiveDateTime,
    budget: &mut i64,
    summary: &mut ProcessSummary,
) -> Result<(), String> {
    let identity = sender_identity(store, campaign);
    let app_url = store.setting_get_or("app_url", "http://localhost:8000");
    let mut handled = HashSet::new();

    while *budget > 0 {
        let pending = store.send_pending_for_run(campaign.id, run_number, *budget);
        if pending.is_empty() {
            break;
        }
        for send in pending {
            if !handled.insert(send.id) {
                return Err(format!("send #{} is still pending after it was handled", send.id));
            }

            let contact = send.contact_id.and_then(|cid| store.contact_find_by_id(cid));
            let contact = match contact {
                Some(c) if c.is_active() => c,
                other => {
                    let reason = match other {
                        Some(c) => format!("Contact is {}", c.status),
                        None => "Contact was deleted".to_string(),
                    };
                    store
                        .send_mark_skipped(send.id, &reason)
                        .map_err(|e| format!("could not mark send #{} skipped: {}", send.id, e))?;
                    summary.skipped += 1;
                    continue;
                }
            };

            *budget -= 1;
            let result = match &identity {
                Some((from, from_name)) => {
                    let (subject, body) =
                        merge::personalize(&campaign.subject, &campaign.body, &contact, &app_url);
                    sender.send(&OutgoingEmail {
                        from: from.clone(),
                        from_name: from_name.clone(),
                        to: send.email.clone(),
                        subject,
                        body,
                    })
                }
                None => Err("No sender address configured".to_string()),
            };

            match result {
                Ok(()) => {
                    summary.sent += 1;
                    store.send_mark_sent(send.id, now).map_err(|e| {
                        format!("delivered to {} but could not record it: {}", send.email, e)
                    })?;
                    log::debug!("[campaign] #{} sent to {}", campaign.id, send.email);
                }
                Err(e) => {
                    summary.failed += 1;
                    log::warn!("[campaign] #{} failed for {}: {}", campaign.id, send.email, e);
                    store
                        .send_mark_failed(send.id, &e)
                        .map_err(|err| format!("could not mark send #{} failed: {}", send.id, err))?;
                }
            }
        }
    }
    Ok(())
}

fn finish_outcome(
    store: &dyn Store,
    campaign: &Campaign,
    run_number: i64,
    sent: i64,
    failed: i64,
    now: &NaiveDateTime,
) -> RunOutcome {
    let mut outcome = RunOutcome {
        status: "completed".to_string(),
        next_run_at: None,
        finished_at: *now,
        sent,
        failed,
        error: None,
    };

    if failed > 0 && sent == 0 {
        outcome.status = "failed".to_string();
        outcome.error = store
            .send_last_error(campaign.id, run_number)
            .or_else(|| Some("All sends failed".to_string()));
        return outcome;
    }
    if failed > 0 {
        outcome.error = store.send_last_error(campaign.id, run_number);
    }

    if campaign.is_recurring() {
        if let Some(rec) = campaign.recurrence.as_deref().and_then(Recurrence::parse) {
            let next = following_run(campaign.next_run_at.unwrap_or(*now), rec, now);
            let before_end = campaign.recurrence_end_at.map(|end| next < end).unwrap_or(true);
            if before_end {
                outcome.status = "scheduled".to_string();
                outcome.next_run_at = Some(next);
            }
        }
    }
    outcome
}

/// First occurrence after `now`, counted from the run's scheduled time.
/// Occurrences missed while the service was down are skipped, not replayed.
pub fn following_run(scheduled: NaiveDateTime, rec: Recurrence, now: &NaiveDateTime) -> NaiveDateTime {
    let mut next = next_occurrence(&scheduled, rec);
    while next <= *now {
        next = next_occurrence(&next, rec);
    }
    next
}
