use rocket::fairing::{Fairing, Info, Kind};
use rocket::tokio;
use rocket::{Orbit, Rocket};
use std::sync::Arc;
use std::time::Duration;

use crate::campaigns::processor;
use crate::email::ProviderChain;
use crate::models::now_utc;
use crate::rate_limit::RateLimiter;
use crate::store::Store;

pub struct BackgroundTasks;

#[rocket::async_trait]
impl Fairing for BackgroundTasks {
    fn info(&self) -> Info {
        Info {
            name: "Background Tasks",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let store = match rocket.state::<Arc<dyn Store>>() {
            Some(s) => s.clone(),
            None => {
                log::error!("[task] Store not found in managed state, background tasks disabled");
                return;
            }
        };
        let limiter = rocket.state::<Arc<RateLimiter>>().cloned();

        // Campaign processing task
        let s = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                let interval = get_interval(&*s, "task_campaign_interval_secs", 60);
                tokio::time::sleep(Duration::from_secs(interval)).await;
                let tick_store = Arc::clone(&s);
                let result = tokio::task::spawn_blocking(move || {
                    let sender = ProviderChain::from_settings(tick_store.setting_get_group("email_"));
                    processor::process_due(&*tick_store, &sender, &now_utc())
                })
                .await;
                match result {
                    Ok(summary) => {
                        if summary.campaigns > 0 {
                            log::info!(
                                "[task] Campaign tick: {} campaign(s), {} sent, {} failed, {} skipped, {} deferred, {} interrupted",
                                summary.campaigns,
                                summary.sent,
                                summary.failed,
                                summary.skipped,
                                summary.deferred,
                                summary.interrupted
                            );
                        }
                    }
                    Err(e) => log::error!("[task] Campaign processing panicked: {}", e),
                }
            }
        });

        // Session cleanup task
        let s = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                let interval = get_interval(&*s, "task_session_cleanup_interval", 30);
                tokio::time::sleep(Duration::from_secs(interval * 60)).await;
                let max_age = get_setting_i64(&*s, "task_session_max_age_days", 30);
                match s.task_cleanup_sessions(max_age) {
                    Ok(count) => {
                        if count > 0 {
                            log::info!("[task] Cleaned up {} expired sessions", count);
                        }
                    }
                    Err(e) => log::error!("[task] Session cleanup failed: {}", e),
                }
                if let Some(limiter) = &limiter {
                    limiter.cleanup(Duration::from_secs(3600));
                }
            }
        });

        // Audit log cleanup task
        let s = Arc::clone(&store);
        tokio::spawn(async move {
            loop {
                let interval = get_interval(&*s, "task_audit_log_cleanup_interval", 1440);
                tokio::time::sleep(Duration::from_secs(interval * 60)).await;
                let max_age = get_setting_i64(&*s, "task_audit_log_max_age_days", 90);
                match s.audit_cleanup(max_age) {
                    Ok(count) => {
                        if count > 0 {
                            log::info!("[task] Cleaned up {} old audit log entries", count);
                        }
                    }
                    Err(e) => log::error!("[task] Audit log cleanup failed: {}", e),
                }
            }
        });

        log::info!("[task] Background tasks started");
    }
}

fn get_interval(store: &dyn Store, key: &str, default: u64) -> u64 {
    store
        .setting_get_or(key, &default.to_string())
        .trim()
        .parse::<u64>()
        .unwrap_or(default)
        .max(1)
}

fn get_setting_i64(store: &dyn Store, key: &str, default: i64) -> i64 {
    store
        .setting_get_or(key, &default.to_string())
        .trim()
        .parse::<i64>()
        .unwrap_or(default)
}
