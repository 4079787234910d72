use chrono::{Duration, Utc};
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::models::audit::Actor;
use crate::models::user::User;
use crate::store::Store;

pub const SESSION_COOKIE: &str = "outreach_session";

pub const MIN_PASSWORD_LEN: usize = 8;

// ── Client address ──

/// Address of the caller, as reported by a fronting proxy when there is one.
/// Only its hash is ever stored (audit log, sessions).
pub struct ClientIp(pub String);

fn proxied_ip(request: &Request<'_>) -> Option<String> {
    let headers = request.headers();
    let real_ip = headers.get_one("X-Real-IP");
    // Leftmost entry is the originating client
    let forwarded = headers
        .get_one("X-Forwarded-For")
        .and_then(|chain| chain.split(',').next());
    [real_ip, forwarded]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|ip| !ip.is_empty())
        .map(String::from)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = proxied_ip(request)
            .or_else(|| request.client_ip().map(|ip| ip.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

// ── Role guards ──

/// Minimum role an endpoint needs.
#[derive(Clone, Copy)]
enum Access {
    Viewer,
    Editor,
    Admin,
}

impl Access {
    fn allows(self, user: &User) -> bool {
        match self {
            Access::Viewer => true,
            Access::Editor => user.is_editor_or_above(),
            Access::Admin => user.is_admin(),
        }
    }
}

/// 401 without a live session, 403 when the role is too low.
async fn require(request: &Request<'_>, access: Access) -> Outcome<User, ()> {
    match session_user(request).await {
        Some(user) if access.allows(&user) => Outcome::Success(user),
        Some(_) => Outcome::Forward(Status::Forbidden),
        None => Outcome::Forward(Status::Unauthorized),
    }
}

/// Any signed-in user. Enough for reading contacts, lists and campaigns.
pub struct AuthenticatedUser {
    pub user: User,
}

/// Editors and admins: may change contacts, lists and campaigns.
pub struct EditorUser {
    pub user: User,
}

/// Admins only: users, settings and the audit log.
pub struct AdminUser {
    pub user: User,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        require(request, Access::Viewer).await.map(|user| AuthenticatedUser { user })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for EditorUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        require(request, Access::Editor).await.map(|user| EditorUser { user })
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        require(request, Access::Admin).await.map(|user| AdminUser { user })
    }
}

/// The active user behind the session cookie. A cookie naming an expired
/// session or a locked account is dropped.
async fn session_user(request: &Request<'_>) -> Option<User> {
    let store = request
        .guard::<&State<Arc<dyn Store>>>()
        .await
        .succeeded()?;
    let cookies = request.cookies();
    let token = cookies.get_private(SESSION_COOKIE)?.value().to_string();

    let user = store.session_get_user(&token).filter(User::is_active);
    if user.is_none() {
        cookies.remove_private(Cookie::from(SESSION_COOKIE));
    }
    user
}

/// Audit actor for a user acting from `ip`.
pub fn actor(user: &User, ip: &ClientIp) -> Actor {
    Actor {
        user_id: Some(user.id),
        user_name: Some(user.display_name.clone()),
        ip: Some(hash_ip(&ip.0)),
    }
}

// ── Passwords ──

pub fn hash_password(password: &str) -> Result<String, String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| e.to_string())
}

/// False for a wrong password and for a malformed stored hash alike.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub fn check_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    Ok(())
}

// ── Sessions ──

/// Store a new session for `user_id` and return its token. Lifetime comes
/// from `session_expiry_hours`.
pub fn create_session(
    store: &dyn Store,
    user_id: i64,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<String, String> {
    let hours = store.setting_get_i64("session_expiry_hours").max(1);
    let token = uuid::Uuid::new_v4().to_string();
    let expires_at = (Utc::now().naive_utc() + Duration::hours(hours))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let ip_hash = ip.map(hash_ip);
    store.session_create_full(user_id, &token, &expires_at, ip_hash.as_deref(), user_agent)?;
    Ok(token)
}

pub fn destroy_session(store: &dyn Store, token: &str) -> Result<(), String> {
    store.session_delete(token)
}

/// Private, HTTP-only, same-site cookie; marked `Secure` when `app_url` is https.
pub fn set_session_cookie(cookies: &CookieJar<'_>, token: &str, store: &dyn Store) {
    let mut cookie = Cookie::new(SESSION_COOKIE, token.to_string());
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/");
    cookie.set_secure(store.setting_get_or("app_url", "").starts_with("https://"));
    cookies.add_private(cookie);
}

pub fn clear_session_cookie(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::from(SESSION_COOKIE));
}

/// Hex SHA-256 of an address, so raw IPs never reach the database.
pub fn hash_ip(ip: &str) -> String {
    hex::encode(Sha256::digest(ip.as_bytes()))
}
