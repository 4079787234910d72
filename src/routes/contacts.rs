use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::json;

use super::{created, fail, not_found, ok, paging, total_pages, ApiResponse};
use crate::models::contact::{ContactForm, STATUSES};
use crate::security::auth::{self, AuthenticatedUser, ClientIp, EditorUser};
use crate::store::Store;

/// Upper bound on one bulk request.
const MAX_BULK: usize = 5000;

#[get("/contacts?<q>&<status>&<page>&<per_page>")]
pub fn contacts_list(
    _user: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    q: Option<String>,
    status: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
) -> ApiResponse {
    let (page, per_page, offset) = paging(page, per_page);
    let q = q.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let status = status.filter(|s| !s.is_empty());
    let contacts = store.contact_list(q.as_deref(), status.as_deref(), per_page, offset);
    let total = store.contact_count(q.as_deref(), status.as_deref());
    ok(json!({
        "contacts": contacts,
        "total": total,
        "page": page,
        "per_page": per_page,
        "total_pages": total_pages(total, per_page),
    }))
}

#[get("/contacts/<id>")]
pub fn contact_get(_user: AuthenticatedUser, store: &State<Arc<dyn Store>>, id: i64) -> ApiResponse {
    match store.contact_find_by_id(id) {
        Some(c) => ok(json!({"contact": c})),
        None => not_found("Contact"),
    }
}

#[post("/contacts", format = "json", data = "<form>")]
pub fn contact_create(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    form: Json<ContactForm>,
) -> ApiResponse {
    if let Err(e) = form.validate() {
        return fail(Status::UnprocessableEntity, e);
    }
    match store.contact_create(&form) {
        Ok(id) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "create",
                Some("contact"),
                Some(id),
                Some(form.email.trim()),
                None,
            );
            created(id)
        }
        Err(e) => fail(Status::Conflict, e),
    }
}

/// Create many contacts at once. Invalid or duplicate rows are skipped and
/// reported; the rest are created.
#[post("/contacts/bulk", format = "json", data = "<forms>")]
pub fn contacts_bulk(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    forms: Json<Vec<ContactForm>>,
) -> ApiResponse {
    if forms.is_empty() {
        return fail(Status::UnprocessableEntity, "No contacts supplied");
    }
    if forms.len() > MAX_BULK {
        return fail(
            Status::PayloadTooLarge,
            format!("At most {} contacts per request", MAX_BULK),
        );
    }
    match store.contact_create_many(&forms) {
        Ok(result) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "bulk_create",
                Some("contact"),
                None,
                None,
                Some(&format!(
                    "{} created, {} skipped",
                    result.created.len(),
                    result.skipped.len()
                )),
            );
            let skipped: Vec<_> = result
                .skipped
                .iter()
                .map(|(email, reason)| json!({"email": email, "reason": reason}))
                .collect();
            ok(json!({"created": result.created, "skipped": skipped}))
        }
        Err(e) => fail(Status::InternalServerError, e),
    }
}

#[put("/contacts/<id>", format = "json", data = "<form>")]
pub fn contact_update(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
    form: Json<ContactForm>,
) -> ApiResponse {
    if store.contact_find_by_id(id).is_none() {
        return not_found("Contact");
    }
    if let Err(e) = form.validate() {
        return fail(Status::UnprocessableEntity, e);
    }
    match store.contact_update(id, &form) {
        Ok(()) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "update",
                Some("contact"),
                Some(id),
                Some(form.email.trim()),
                None,
            );
            ok(json!({}))
        }
        Err(e) => fail(Status::Conflict, e),
    }
}

#[derive(Deserialize)]
pub struct StatusForm {
    pub status: String,
}

#[post("/contacts/<id>/status", format = "json", data = "<form>")]
pub fn contact_set_status(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
    form: Json<StatusForm>,
) -> ApiResponse {
    let contact = match store.contact_find_by_id(id) {
        Some(c) => c,
        None => return not_found("Contact"),
    };
    let status = form.status.trim();
    if !STATUSES.contains(&status) {
        return fail(Status::UnprocessableEntity, "Invalid status");
    }
    match store.contact_update_status(id, status) {
        Ok(()) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "status",
                Some("contact"),
                Some(id),
                Some(&contact.email),
                Some(status),
            );
            ok(json!({}))
        }
        Err(e) => fail(Status::InternalServerError, e),
    }
}

#[delete("/contacts/<id>")]
pub fn contact_delete(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    let contact = match store.contact_find_by_id(id) {
        Some(c) => c,
        None => return not_found("Contact"),
    };
    match store.contact_delete(id) {
        Ok(()) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "delete",
                Some("contact"),
                Some(id),
                Some(&contact.email),
                None,
            );
            ok(json!({}))
        }
        Err(e) => fail(Status::InternalServerError, e),
    }
}

#[get("/contacts/<id>/sends?<limit>")]
pub fn contact_sends(
    _user: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    id: i64,
    limit: Option<i64>,
) -> ApiResponse {
    if store.contact_find_by_id(id).is_none() {
        return not_found("Contact");
    }
    let sends = store.send_list_for_contact(id, limit.unwrap_or(100).clamp(1, 1000));
    ok(json!({"sends": sends}))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        contacts_list,
        contact_get,
        contact_create,
        contacts_bulk,
        contact_update,
        contact_set_status,
        contact_delete,
        contact_sends
    ]
}
