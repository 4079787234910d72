use std::sync::Arc;

use rocket::http::Status;
use rocket::response::content::RawHtml;
use rocket::State;
use serde_json::json;

use super::{fail, ok, ApiResponse};
use crate::models::audit::Actor;
use crate::store::Store;

// ── Unsubscribe ────────────────────────────────────────

/// Target of the link in every campaign email. Idempotent: following it twice
/// shows the same confirmation.
#[get("/unsubscribe/<token>")]
pub fn unsubscribe(store: &State<Arc<dyn Store>>, token: &str) -> (Status, RawHtml<String>) {
    let app_name = html_escape(&store.setting_get_or("app_name", "Outreach"));
    match store.contact_unsubscribe(token) {
        Ok(contact) => {
            store.audit_log(
                &Actor::default(),
                "unsubscribe",
                Some("contact"),
                Some(contact.id),
                Some(&contact.email),
                None,
            );
            (
                Status::Ok,
                page(&app_name, &format!(
                    "{} has been unsubscribed and will not receive further emails.",
                    html_escape(&contact.email)
                )),
            )
        }
        Err(_) => (
            Status::NotFound,
            page(&app_name, "This unsubscribe link is invalid or has expired."),
        ),
    }
}

fn page(title: &str, message: &str) -> RawHtml<String> {
    RawHtml(format!(
        "<html><head><title>{}</title></head><body style='font-family:sans-serif;text-align:center;padding:80px'><h1>{}</h1><p>{}</p></body></html>",
        title, title, message
    ))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

// ── Health ─────────────────────────────────────────────

#[get("/health")]
pub fn health(store: &State<Arc<dyn Store>>) -> ApiResponse {
    match store.ping() {
        Ok(()) => ok(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "campaigns": {
                "scheduled": store.campaign_count(Some("scheduled")),
                "sending": store.campaign_count(Some("sending")),
            },
        })),
        Err(e) => {
            log::error!("[health] Database check failed: {}", e);
            fail(Status::ServiceUnavailable, "Database unavailable")
        }
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![unsubscribe, health]
}
