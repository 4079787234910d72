use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::json;

use super::{created, fail, not_found, ok, paging, ApiResponse};
use crate::models::contact_list::ContactListForm;
use crate::security::auth::{self, AuthenticatedUser, ClientIp, EditorUser};
use crate::store::Store;

#[get("/lists")]
pub fn lists_all(_user: AuthenticatedUser, store: &State<Arc<dyn Store>>) -> ApiResponse {
    ok(json!({"lists": store.list_all()}))
}

#[post("/lists", format = "json", data = "<form>")]
pub fn list_create(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    form: Json<ContactListForm>,
) -> ApiResponse {
    if form.name.trim().is_empty() {
        return fail(Status::UnprocessableEntity, "List name is required");
    }
    match store.list_create(&form) {
        Ok(id) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "create",
                Some("list"),
                Some(id),
                Some(form.name.trim()),
                None,
            );
            created(id)
        }
        Err(e) => fail(Status::Conflict, e),
    }
}

#[put("/lists/<id>", format = "json", data = "<form>")]
pub fn list_update(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
    form: Json<ContactListForm>,
) -> ApiResponse {
    if store.list_find_by_id(id).is_none() {
        return not_found("List");
    }
    if form.name.trim().is_empty() {
        return fail(Status::UnprocessableEntity, "List name is required");
    }
    match store.list_update(id, &form) {
        Ok(()) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "update",
                Some("list"),
                Some(id),
                Some(form.name.trim()),
                None,
            );
            ok(json!({}))
        }
        Err(e) => fail(Status::Conflict, e),
    }
}

#[delete("/lists/<id>")]
pub fn list_delete(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    let list = match store.list_find_by_id(id) {
        Some(l) => l,
        None => return not_found("List"),
    };
    match store.list_delete(id) {
        Ok(()) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "delete",
                Some("list"),
                Some(id),
                Some(&list.name),
                None,
            );
            ok(json!({}))
        }
        Err(e) => fail(Status::Conflict, e),
    }
}

#[get("/lists/<id>/members?<page>&<per_page>")]
pub fn list_members(
    _user: AuthenticatedUser,
    store: &State<Arc<dyn Store>>,
    id: i64,
    page: Option<i64>,
    per_page: Option<i64>,
) -> ApiResponse {
    let list = match store.list_find_by_id(id) {
        Some(l) => l,
        None => return not_found("List"),
    };
    let (page, per_page, offset) = paging(page, per_page);
    let members = store.list_members(id, per_page, offset);
    ok(json!({
        "list": list,
        "members": members,
        "page": page,
        "per_page": per_page,
    }))
}

#[derive(Deserialize)]
pub struct MembersForm {
    pub contact_ids: Vec<i64>,
}

#[post("/lists/<id>/members", format = "json", data = "<form>")]
pub fn list_add_members(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
    form: Json<MembersForm>,
) -> ApiResponse {
    let list = match store.list_find_by_id(id) {
        Some(l) => l,
        None => return not_found("List"),
    };
    match store.list_add_members(id, &form.contact_ids) {
        Ok(added) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "add_members",
                Some("list"),
                Some(id),
                Some(&list.name),
                Some(&format!("{} added", added)),
            );
            ok(json!({"added": added}))
        }
        Err(e) => fail(Status::InternalServerError, e),
    }
}

#[delete("/lists/<id>/members", format = "json", data = "<form>")]
pub fn list_remove_members(
    editor: EditorUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
    form: Json<MembersForm>,
) -> ApiResponse {
    let list = match store.list_find_by_id(id) {
        Some(l) => l,
        None => return not_found("List"),
    };
    match store.list_remove_members(id, &form.contact_ids) {
        Ok(removed) => {
            store.audit_log(
                &auth::actor(&editor.user, &client_ip),
                "remove_members",
                Some("list"),
                Some(id),
                Some(&list.name),
                Some(&format!("{} removed", removed)),
            );
            ok(json!({"removed": removed}))
        }
        Err(e) => fail(Status::InternalServerError, e),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        lists_all,
        list_create,
        list_update,
        list_delete,
        list_members,
        list_add_members,
        list_remove_members
    ]
}
