use std::sync::Arc;
use std::time::Duration;

use rocket::http::{CookieJar, Status};
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::json;

use super::{fail, ok, ApiResponse};
use crate::models::audit::Actor;
use crate::models::contact::is_valid_email;
use crate::models::user::normalize_email;
use crate::rate_limit::RateLimiter;
use crate::security::auth::{self, AuthenticatedUser, ClientIp, SESSION_COOKIE};
use crate::store::Store;

const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize)]
pub struct SetupForm {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
}

/// Create the first admin account. Refused once any user exists.
#[post("/setup", format = "json", data = "<form>")]
pub fn setup(
    store: &State<Arc<dyn Store>>,
    cookies: &CookieJar<'_>,
    client_ip: ClientIp,
    form: Json<SetupForm>,
) -> ApiResponse {
    if store.user_count() > 0 {
        return fail(Status::Forbidden, "Setup has already been completed");
    }

    let email = normalize_email(&form.email);
    if !is_valid_email(&email) {
        return fail(Status::UnprocessableEntity, "A valid email is required");
    }
    if let Err(e) = auth::check_password_strength(&form.password) {
        return fail(Status::UnprocessableEntity, e);
    }
    let display_name = match form.display_name.trim() {
        "" => "Admin".to_string(),
        name => name.to_string(),
    };

    let hash = match auth::hash_password(&form.password) {
        Ok(h) => h,
        Err(e) => return fail(Status::InternalServerError, e),
    };
    let id = match store.user_create(&email, &hash, &display_name, "admin") {
        Ok(id) => id,
        Err(e) => return fail(Status::Conflict, e),
    };

    let actor = Actor {
        user_id: Some(id),
        user_name: Some(display_name.clone()),
        ip: Some(auth::hash_ip(&client_ip.0)),
    };
    store.audit_log(&actor, "setup", Some("user"), Some(id), Some(&email), None);
    log::info!("[auth] Initial admin account created");

    match auth::create_session(&***store, id, Some(&client_ip.0), None) {
        Ok(session_id) => auth::set_session_cookie(cookies, &session_id, &***store),
        Err(e) => log::warn!("[auth] Could not open session after setup: {}", e),
    }

    let user = store.user_get_by_id(id).map(|u| u.safe_json());
    ok(json!({"id": id, "user": user}))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[post("/login", format = "json", data = "<form>")]
pub fn login(
    store: &State<Arc<dyn Store>>,
    limiter: &State<Arc<RateLimiter>>,
    cookies: &CookieJar<'_>,
    client_ip: ClientIp,
    user_agent: UserAgent,
    form: Json<LoginForm>,
) -> ApiResponse {
    let ip_hash = auth::hash_ip(&client_ip.0);
    let rate_key = format!("login:{}", ip_hash);
    let max_attempts = store.setting_get_i64("login_rate_limit").max(1) as u64;

    // Check rate limit before processing
    if !limiter.check_and_record(&rate_key, max_attempts, LOGIN_WINDOW) {
        return fail(
            Status::TooManyRequests,
            "Too many login attempts. Please try again in 15 minutes.",
        );
    }

    let email = normalize_email(&form.email);
    let user = match store.user_get_by_email(&email) {
        Some(u) if auth::verify_password(&form.password, &u.password_hash) => u,
        _ => {
            let actor = Actor {
                ip: Some(ip_hash),
                ..Default::default()
            };
            store.audit_log(&actor, "login_failed", Some("user"), None, Some(&email), None);
            return fail(Status::Unauthorized, "Invalid credentials");
        }
    };

    if !user.is_active() {
        return fail(Status::Forbidden, "This account is locked");
    }

    let session_id = match auth::create_session(&***store, user.id, Some(&client_ip.0), user_agent.0.as_deref()) {
        Ok(id) => id,
        Err(e) => {
            log::error!("[auth] Session creation failed: {}", e);
            return fail(Status::InternalServerError, "Session creation failed");
        }
    };
    auth::set_session_cookie(cookies, &session_id, &***store);
    limiter.reset(&rate_key);
    let _ = store.user_touch_last_login(user.id);
    store.audit_log(&auth::actor(&user, &client_ip), "login", Some("user"), Some(user.id), Some(&user.email), None);

    ok(json!({"user": user.safe_json()}))
}

#[post("/logout")]
pub fn logout(
    store: &State<Arc<dyn Store>>,
    cookies: &CookieJar<'_>,
    client_ip: ClientIp,
    current: Option<AuthenticatedUser>,
) -> ApiResponse {
    if let Some(cookie) = cookies.get_private(SESSION_COOKIE) {
        let _ = auth::destroy_session(&***store, cookie.value());
    }
    auth::clear_session_cookie(cookies);
    if let Some(current) = current {
        let user = &current.user;
        store.audit_log(&auth::actor(user, &client_ip), "logout", Some("user"), Some(user.id), Some(&user.email), None);
    }
    ok(json!({}))
}

#[get("/me")]
pub fn me(current: AuthenticatedUser) -> ApiResponse {
    ok(json!({"user": current.user.safe_json()}))
}

#[derive(Debug, Deserialize)]
pub struct PasswordChangeForm {
    pub current_password: String,
    pub new_password: String,
}

#[post("/me/password", format = "json", data = "<form>")]
pub fn change_password(
    store: &State<Arc<dyn Store>>,
    current: AuthenticatedUser,
    client_ip: ClientIp,
    form: Json<PasswordChangeForm>,
) -> ApiResponse {
    let user = &current.user;
    if !auth::verify_password(&form.current_password, &user.password_hash) {
        return fail(Status::Forbidden, "Current password is incorrect");
    }
    if let Err(e) = auth::check_password_strength(&form.new_password) {
        return fail(Status::UnprocessableEntity, e);
    }
    let hash = match auth::hash_password(&form.new_password) {
        Ok(h) => h,
        Err(e) => return fail(Status::InternalServerError, e),
    };
    if let Err(e) = store.user_update_password(user.id, &hash) {
        return fail(Status::InternalServerError, e);
    }
    store.audit_log(&auth::actor(user, &client_ip), "password_change", Some("user"), Some(user.id), Some(&user.email), None);
    ok(json!({}))
}

/// Optional `User-Agent` header, recorded with new sessions.
pub struct UserAgent(pub Option<String>);

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for UserAgent {
    type Error = ();

    async fn from_request(
        request: &'r rocket::Request<'_>,
    ) -> rocket::request::Outcome<Self, Self::Error> {
        let ua = request
            .headers()
            .get_one("User-Agent")
            .map(|s| s.chars().take(255).collect());
        rocket::request::Outcome::Success(UserAgent(ua))
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![setup, login, logout, me, change_password]
}
