pub mod auth;
pub mod campaigns;
pub mod contacts;
pub mod lists;
pub mod public;
pub mod settings;
pub mod users;

use rocket::http::Status;
use rocket::serde::json::Json;
use serde_json::{json, Value};

use crate::campaigns::CampaignError;

/// Every JSON endpoint answers with a status and a `{"success": ...}` body.
pub type ApiResponse = (Status, Json<Value>);

pub const DEFAULT_PER_PAGE: i64 = 50;
pub const MAX_PER_PAGE: i64 = 500;

pub fn ok(mut body: Value) -> ApiResponse {
    if let Value::Object(ref mut map) = body {
        map.insert("success".to_string(), Value::Bool(true));
    }
    (Status::Ok, Json(body))
}

pub fn created(id: i64) -> ApiResponse {
    (Status::Created, Json(json!({"success": true, "id": id})))
}

pub fn fail(status: Status, error: impl Into<String>) -> ApiResponse {
    (status, Json(json!({"success": false, "error": error.into()})))
}

pub fn not_found(what: &str) -> ApiResponse {
    fail(Status::NotFound, format!("{} not found", what))
}

pub fn campaign_error(e: CampaignError) -> ApiResponse {
    match e {
        CampaignError::NotFound => not_found("Campaign"),
        CampaignError::Invalid(errors) => (
            Status::UnprocessableEntity,
            Json(json!({"success": false, "error": "Validation failed", "errors": errors})),
        ),
        CampaignError::Rejected(msg) => fail(Status::Conflict, msg),
    }
}

/// `(page, per_page, offset)` with 1-based pages.
pub fn paging(page: Option<i64>, per_page: Option<i64>) -> (i64, i64, i64) {
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let page = page.unwrap_or(1).max(1);
    (page, per_page, (page - 1) * per_page)
}

pub fn total_pages(total: i64, per_page: i64) -> i64 {
    ((total as f64) / (per_page as f64)).ceil() as i64
}

pub fn api_routes() -> Vec<rocket::Route> {
    let mut all = Vec::new();
    all.extend(auth::routes());
    all.extend(users::routes());
    all.extend(contacts::routes());
    all.extend(lists::routes());
    all.extend(campaigns::routes());
    all.extend(settings::routes());
    all
}
