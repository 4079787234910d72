#[macro_use]
extern crate rocket;

mod boot;
mod campaigns;
mod db;
mod email;
mod models;
mod rate_limit;
mod routes;
mod security;
mod store;
mod tasks;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::serde::json::Json;
use serde_json::{json, Value};

use rate_limit::RateLimiter;
use store::sqlite::SqliteStore;
use store::Store;

pub struct NoCacheApi;

#[rocket::async_trait]
impl Fairing for NoCacheApi {
    fn info(&self) -> Info {
        Info { name: "No-Cache API Responses", kind: Kind::Response }
    }

    async fn on_response<'r>(&self, req: &'r rocket::Request<'_>, res: &mut rocket::Response<'r>) {
        if req.uri().path().starts_with("/api") {
            res.set_header(Header::new("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0"));
            res.set_header(Header::new("Pragma", "no-cache"));
        }
    }
}

#[catch(401)]
fn unauthorized() -> Json<Value> {
    Json(json!({"success": false, "error": "Authentication required"}))
}

#[catch(403)]
fn forbidden() -> Json<Value> {
    Json(json!({"success": false, "error": "Insufficient permissions"}))
}

#[catch(404)]
fn not_found() -> Json<Value> {
    Json(json!({"success": false, "error": "Not found"}))
}

#[catch(422)]
fn unprocessable() -> Json<Value> {
    Json(json!({"success": false, "error": "Malformed request body"}))
}

#[catch(500)]
fn server_error() -> Json<Value> {
    Json(json!({"success": false, "error": "Internal server error"}))
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    // Boot check: create data directories, verify the database location
    boot::run();

    let pool = db::init_pool().expect("Failed to initialize database pool");
    let store = SqliteStore::new(pool);
    store.run_migrations().expect("Failed to run database migrations");
    store.seed_defaults().expect("Failed to seed default settings");

    let stalled = campaigns::processor::recover_stalled(&store);
    if stalled > 0 {
        log::warn!("[boot] {} campaign(s) will resume sending on the next tick", stalled);
    }
    if store.user_count() == 0 {
        log::warn!("[boot] No users yet. POST /api/setup to create the first admin account.");
    }

    let store: Arc<dyn Store> = Arc::new(store);

    rocket::build()
        .manage(store)
        .manage(Arc::new(RateLimiter::new()))
        .attach(NoCacheApi)
        .attach(tasks::BackgroundTasks)
        .mount("/", routes::public::routes())
        .mount("/api", routes::api_routes())
        .register("/", catchers![unauthorized, forbidden, not_found, unprocessable, server_error])
}
