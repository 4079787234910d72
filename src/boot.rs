use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::process;

/// Required directories that will be created if missing
const REQUIRED_DIRS: &[&str] = &["data", "data/db"];

/// Run all boot checks. Call this before Rocket launches.
/// Creates missing directories, verifies the database location is writable,
/// and aborts on hard errors.
pub fn run() {
    info!("[boot] Outreach boot check starting...");

    let mut warnings = 0u32;
    let mut errors = 0u32;

    // ── 1. Directories ─────────────────────────────────
    for dir in REQUIRED_DIRS {
        let path = Path::new(dir);
        if !path.exists() {
            match fs::create_dir_all(path) {
                Ok(_) => info!("[boot]   Created directory: {}", dir),
                Err(e) => {
                    error!("[boot]   FAILED to create directory {}: {}", dir, e);
                    errors += 1;
                }
            }
        }
    }

    // ── 2. Database directory writable ──────────────────
    let db_path = crate::db::db_path();
    let db_dir = Path::new(&db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !db_dir.exists() {
        if let Err(e) = fs::create_dir_all(db_dir) {
            error!("[boot]   FAILED to create database directory {}: {}", db_dir.display(), e);
            errors += 1;
        }
    }
    if db_dir.exists() {
        let test_file = db_dir.join(".write_test");
        match fs::write(&test_file, "test") {
            Ok(_) => {
                let _ = fs::remove_file(&test_file);
            }
            Err(e) => {
                error!("[boot]   Database directory not writable: {}", e);
                errors += 1;
            }
        }
    }

    // ── 3. Rocket.toml exists ───────────────────────────
    if !Path::new("Rocket.toml").exists() {
        warn!("[boot]   Rocket.toml not found, using default config (set ROCKET_SECRET_KEY in production)");
        warnings += 1;
    }

    // ── Summary ─────────────────────────────────────────
    if errors > 0 {
        error!(
            "[boot] Boot check FAILED: {} error(s), {} warning(s). Aborting.",
            errors, warnings
        );
        process::exit(1);
    }

    if warnings > 0 {
        warn!("[boot] Boot check passed with {} warning(s).", warnings);
    } else {
        info!("[boot] Boot check passed.");
    }
}
