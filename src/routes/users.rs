use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{created, fail, not_found, ok, paging, total_pages, ApiResponse};
use crate::models::contact::is_valid_email;
use crate::models::user::{normalize_email, ROLES};
use crate::security::auth::{self, AdminUser, ClientIp};
use crate::store::Store;

// ── Users Management ─────────────────────────────────────────

#[get("/users?<role>&<page>&<per_page>")]
pub fn users_list(
    _admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    role: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
) -> ApiResponse {
    let (page, per_page, offset) = paging(page, per_page);
    let role = role.filter(|r| !r.is_empty());
    let users = store.user_list_paginated(role.as_deref(), per_page, offset);
    let total = store.user_count_filtered(role.as_deref());
    let users_json: Vec<Value> = users.iter().map(|u| u.safe_json()).collect();

    ok(json!({
        "users": users_json,
        "total": total,
        "page": page,
        "per_page": per_page,
        "total_pages": total_pages(total, per_page),
    }))
}

#[derive(Deserialize)]
pub struct UserCreateForm {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub role: String,
}

#[post("/users", format = "json", data = "<form>")]
pub fn user_create(
    admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    form: Json<UserCreateForm>,
) -> ApiResponse {
    let email = normalize_email(&form.email);
    let display_name = form.display_name.trim();
    let role = form.role.trim();

    if email.is_empty() || display_name.is_empty() {
        return fail(Status::UnprocessableEntity, "Email and display name are required");
    }
    if !is_valid_email(&email) {
        return fail(Status::UnprocessableEntity, "Invalid email address");
    }
    if let Err(e) = auth::check_password_strength(&form.password) {
        return fail(Status::UnprocessableEntity, e);
    }
    if !ROLES.contains(&role) {
        return fail(Status::UnprocessableEntity, "Invalid role");
    }

    let hash = match auth::hash_password(&form.password) {
        Ok(h) => h,
        Err(e) => return fail(Status::InternalServerError, e),
    };

    match store.user_create(&email, &hash, display_name, role) {
        Ok(id) => {
            store.audit_log(
                &auth::actor(&admin.user, &client_ip),
                "create",
                Some("user"),
                Some(id),
                Some(display_name),
                Some(role),
            );
            created(id)
        }
        Err(e) => fail(Status::Conflict, e),
    }
}

#[derive(Deserialize)]
pub struct UserUpdateForm {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub password: Option<String>,
}

#[put("/users/<id>", format = "json", data = "<form>")]
pub fn user_update(
    admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
    form: Json<UserUpdateForm>,
) -> ApiResponse {
    let user = match store.user_get_by_id(id) {
        Some(u) => u,
        None => return not_found("User"),
    };

    // Update role if provided
    if let Some(ref role) = form.role {
        let role = role.trim();
        if !ROLES.contains(&role) {
            return fail(Status::UnprocessableEntity, "Invalid role");
        }
        if user.id == admin.user.id && role != "admin" {
            return fail(Status::Forbidden, "You cannot change your own role");
        }
        if role != user.role {
            if let Err(e) = store.user_update_role(id, role) {
                return fail(Status::InternalServerError, e);
            }
        }
    }

    // Update profile fields
    if form.email.is_some() || form.display_name.is_some() {
        let email = form
            .email
            .as_deref()
            .map(normalize_email)
            .unwrap_or_else(|| user.email.clone());
        let name = form
            .display_name
            .as_deref()
            .map(|n| n.trim().to_string())
            .unwrap_or_else(|| user.display_name.clone());
        if name.is_empty() {
            return fail(Status::UnprocessableEntity, "Display name cannot be empty");
        }
        if !is_valid_email(&email) {
            return fail(Status::UnprocessableEntity, "Invalid email address");
        }
        if let Err(e) = store.user_update_profile(id, &name, &email) {
            return fail(Status::Conflict, e);
        }
    }

    // Update password if provided
    if let Some(ref pw) = form.password {
        if !pw.is_empty() {
            if let Err(e) = auth::check_password_strength(pw) {
                return fail(Status::UnprocessableEntity, e);
            }
            let hash = match auth::hash_password(pw) {
                Ok(h) => h,
                Err(e) => return fail(Status::InternalServerError, e),
            };
            if let Err(e) = store.user_update_password(id, &hash) {
                return fail(Status::InternalServerError, e);
            }
        }
    }

    store.audit_log(
        &auth::actor(&admin.user, &client_ip),
        "update",
        Some("user"),
        Some(id),
        Some(&user.display_name),
        None,
    );
    ok(json!({}))
}

#[post("/users/<id>/lock")]
pub fn user_lock(
    admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    if id == admin.user.id {
        return fail(Status::Forbidden, "You cannot lock your own account");
    }
    let user = match store.user_get_by_id(id) {
        Some(u) => u,
        None => return not_found("User"),
    };
    match store.user_lock(id) {
        Ok(()) => {
            store.audit_log(
                &auth::actor(&admin.user, &client_ip),
                "lock",
                Some("user"),
                Some(id),
                Some(&user.display_name),
                None,
            );
            ok(json!({}))
        }
        Err(e) => fail(Status::InternalServerError, e),
    }
}

#[post("/users/<id>/unlock")]
pub fn user_unlock(
    admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    let user = match store.user_get_by_id(id) {
        Some(u) => u,
        None => return not_found("User"),
    };
    match store.user_unlock(id) {
        Ok(()) => {
            store.audit_log(
                &auth::actor(&admin.user, &client_ip),
                "unlock",
                Some("user"),
                Some(id),
                Some(&user.display_name),
                None,
            );
            ok(json!({}))
        }
        Err(e) => fail(Status::InternalServerError, e),
    }
}

#[delete("/users/<id>")]
pub fn user_delete(
    admin: AdminUser,
    store: &State<Arc<dyn Store>>,
    client_ip: ClientIp,
    id: i64,
) -> ApiResponse {
    if id == admin.user.id {
        return fail(Status::Forbidden, "You cannot delete your own account");
    }
    let user = match store.user_get_by_id(id) {
        Some(u) => u,
        None => return not_found("User"),
    };
    match store.user_delete(id) {
        Ok(()) => {
            store.audit_log(
                &auth::actor(&admin.user, &client_ip),
                "delete",
                Some("user"),
                Some(id),
                Some(&user.display_name),
                None,
            );
            ok(json!({}))
        }
        Err(e) => fail(Status::InternalServerError, e),
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![user_create, users_list, user_update, user_lock, user_unlock, user_delete]
}
