use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde_json::json;

use super::{campaign_error, created, not_found, ok, paging, total_pages, ApiResponse};
use crate::campaigns;
use crate::models::campaign::CampaignForm;
use crate::models::{fmt_ts, now_utc};
use crate::security::auth::{self, AuthenticatedUser, ClientIp, EditorUser};
use crate::store::Store;

#[get("/campaigns?<status>&<page>&<per_page>")]
pub fn campaigns_list(
    _user: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    status: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
) -> ApiResponse {
    let (page, per_page, offset) = paging(page, per_page);
    let status = status.filter(|s| !s.is_empty());
    let list = store.campaign_list(status.as_deref(), per_page, offset);
    let total = store.campaign_count(status.as_deref());
    ok(json!({
        "campaigns": list,
        "total": total,
        "page": page,
        "per_page": per_page,
        "total_pages": total_pages(total, per_page),
    }))
}

#[get("/campaigns/<id>")]
pub fn campaign_get(_user: AuthenticatedUser, store: &State<Arc<dyn Store>>, id: i64) -> ApiResponse {
    let campaign = match store.campaign_find_by_id(id) {
        Some(c) => c,
        None => return not_found("Campaign"),
    };
    let stats = store.send_stats(id, None);
    let recipients = store.contact_count_recipients(campaign.list_id);
    ok(json!({
        "campaign": campaign,
        "stats": stats,
        "recipients": recipients,
    }))
}

#[post("/campaigns", format = "json", data = "<form>")]
pub fn campaign_create(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    form: Json<CampaignForm>,
) -> ApiResponse {
    let actor = auth::actor(&editor.user, &client_ip);
    match campaigns::create(&***store, &actor, &form, &now_utc()) {
        Ok(id) => created(id),
        Err(e) => campaign_error(e),
    }
}

#[put("/campaigns/<id>", format = "json", data = "<form>")]
pub fn campaign_update(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
    form: Json<CampaignForm>,
) -> ApiResponse {
    let actor = auth::actor(&editor.user, &client_ip);
    match campaigns::update(&***store, &actor, id, &form, &now_utc()) {
        Ok(()) => ok(json!({})),
        Err(e) => campaign_error(e),
    }
}

#[delete("/campaigns/<id>")]
pub fn campaign_delete(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    let actor = auth::actor(&editor.user, &client_ip);
    match campaigns::delete(&***store, &actor, id) {
        Ok(()) => ok(json!({})),
        Err(e) => campaign_error(e),
    }
}

#[post("/campaigns/<id>/duplicate")]
pub fn campaign_duplicate(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    let actor = auth::actor(&editor.user, &client_ip);
    match campaigns::duplicate(&***store, &actor, id) {
        Ok(new_id) => created(new_id),
        Err(e) => campaign_error(e),
    }
}

#[post("/campaigns/<id>/schedule")]
pub fn campaign_schedule(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    let actor = auth::actor(&editor.user, &client_ip);
    match campaigns::schedule(&***store, &actor, id, &now_utc()) {
        Ok(next) => ok(json!({"next_run_at": fmt_ts(&next)})),
        Err(e) => campaign_error(e),
    }
}

#[post("/campaigns/<id>/cancel")]
pub fn campaign_cancel(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    let actor = auth::actor(&editor.user, &client_ip);
    match campaigns::cancel(&***store, &actor, id) {
        Ok(()) => ok(json!({})),
        Err(e) => campaign_error(e),
    }
}

#[post("/campaigns/<id>/send-now")]
pub fn campaign_send_now(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    let actor = auth::actor(&editor.user, &client_ip);
    match campaigns::send_now(&***store, &actor, id, &now_utc()) {
        Ok(()) => ok(json!({})),
        Err(e) => campaign_error(e),
    }
}

#[get("/campaigns/<id>/sends?<status>&<page>&<per_page>")]
pub fn campaign_sends(
    _user: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    id: i64,
    status: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
) -> ApiResponse {
    if store.campaign_find_by_id(id).is_none() {
        return not_found("Campaign");
    }
    let (page, per_page, offset) = paging(page, per_page);
    let status = status.filter(|s| !s.is_empty());
    let sends = store.send_list_for_campaign(id, status.as_deref(), per_page, offset);
    ok(json!({
        "sends": sends,
        "stats": store.send_stats(id, None),
        "page": page,
        "per_page": per_page,
    }))
}

#[get("/campaigns/<id>/preview?<contact_id>")]
pub fn campaign_preview(
    _user: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    id: i64,
    contact_id: Option<i64>,
) -> ApiResponse {
    match campaigns::preview(&***store, id, contact_id) {
        Ok(msg) => ok(json!({
            "from": msg.from,
            "from_name": msg.from_name,
            "to": msg.to,
            "subject": msg.subject,
            "body": msg.body,
        })),
        Err(e) => campaign_error(e),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        campaigns_list,
        campaign_get,
        campaign_create,
        campaign_update,
        campaign_delete,
        campaign_duplicate,
        campaign_schedule,
        campaign_cancel,
        campaign_send_now,
        campaign_sends,
        campaign_preview
    ]
}
