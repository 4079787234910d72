use std::collections::HashMap;
use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::json;

use super::{fail, ok, paging, total_pages, ApiResponse};
use crate::email;
use crate::models::contact::is_valid_email;
use crate::models::settings::masked;
use crate::security::auth::{self, AdminUser, ClientIp};
use crate::store::Store;

#[get("/settings")]
pub fn settings_get(_admin: AdminUser, store: &State<Arc<dyn Store>>) -> ApiResponse {
    ok(json!({"settings": masked(&store.setting_all())}))
}

#[post("/settings", format = "json", data = "<form>")]
pub fn settings_save(
    admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    form: Json<HashMap<String, String>>,
) -> ApiResponse {
    if form.is_empty() {
        return fail(Status::UnprocessableEntity, "No settings supplied");
    }
    if let Err(e) = store.setting_set_many(&form) {
        return fail(Status::InternalServerError, e);
    }
    let mut keys: Vec<&str> = form.keys().map(|k| k.as_str()).collect();
    keys.sort_unstable();
    store.audit_log(
        &auth::actor(&admin.user, &client_ip),
        "settings_change",
        Some("settings"),
        None,
        None,
        Some(&keys.join(", ")),
    );
    ok(json!({}))
}

#[derive(Deserialize)]
pub struct TestEmailForm {
    pub to: Option<String>,
}

/// Send a test message through the configured provider chain. Defaults to the
/// requesting admin's own address.
#[post("/settings/test-email", format = "json", data = "<form>")]
pub async fn settings_test_email(
    admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    form: Json<TestEmailForm>,
) -> ApiResponse {
    let to = form
        .to
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&admin.user.email)
        .to_lowercase();
    if !is_valid_email(&to) {
        return fail(Status::UnprocessableEntity, "Invalid recipient address");
    }

    let settings = store.setting_all();
    let recipient = to.clone();
    let result = rocket::tokio::task::spawn_blocking(move || email::send_test_email(settings, &recipient)).await;
    match result {
        Ok(Ok(())) => ok(json!({"to": to})),
        Ok(Err(e)) => fail(Status::BadGateway, e),
        Err(e) => fail(Status::InternalServerError, e.to_string()),
    }
}

#[get("/audit?<action>&<entity>&<page>&<per_page>")]
pub fn audit_list(
    _admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    action: Option<String>,
    entity: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
) -> ApiResponse {
    let (page, per_page, offset) = paging(page, per_page);
    let action = action.filter(|s| !s.is_empty());
    let entity = entity.filter(|s| !s.is_empty());
    let entries = store.audit_list(action.as_deref(), entity.as_deref(), per_page, offset);
    let total = store.audit_count(action.as_deref(), entity.as_deref());
    ok(json!({
        "entries": entries,
        "total": total,
        "page": page,
        "per_page": per_page,
        "total_pages": total_pages(total, per_page),
    }))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![settings_get, settings_save, settings_test_email, audit_list]
}
