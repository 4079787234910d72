use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};

pub type DbPool = Pool<SqliteConnectionManager>;

pub const DEFAULT_DB_PATH: &str = "data/db/outreach.db";

/// Database path, overridable with `OUTREACH_DB_PATH`.
pub fn db_path() -> String {
    std::env::var("OUTREACH_DB_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
}

pub fn init_pool() -> Result<DbPool, String> {
    init_pool_at(&db_path())
}

pub fn init_pool_at(path: &str) -> Result<DbPool, String> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;"));
    let pool = Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| e.to_string())?;

    // WAL for concurrent readers while the campaign task writes
    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .map_err(|e| e.to_string())?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        -- Settings (key-value)
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        -- Application users
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'viewer',
            status TEXT NOT NULL DEFAULT 'active',
            last_login_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- Login sessions
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at DATETIME NOT NULL,
            expires_at DATETIME NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

        -- Contacts (campaign recipients)
        CREATE TABLE IF NOT EXISTS contacts (
            id INTEGER PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            company TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            unsubscribe_token TEXT UNIQUE NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_contacts_status ON contacts(status);

        -- Contact lists
        CREATE TABLE IF NOT EXISTS contact_lists (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS contact_list_members (
            list_id INTEGER NOT NULL,
            contact_id INTEGER NOT NULL,
            added_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (list_id, contact_id),
            FOREIGN KEY (list_id) REFERENCES contact_lists(id) ON DELETE CASCADE,
            FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE CASCADE
        );

        -- Email campaigns
        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            from_email TEXT NOT NULL DEFAULT '',
            from_name TEXT NOT NULL DEFAULT '',
            schedule_type TEXT NOT NULL DEFAULT 'immediate',
            send_at DATETIME,
            recurrence TEXT,
            recurrence_end_at DATETIME,
            list_id INTEGER,
            status TEXT NOT NULL DEFAULT 'draft',
            next_run_at DATETIME,
            last_run_at DATETIME,
            run_count INTEGER NOT NULL DEFAULT 0,
            sent_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_by INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (list_id) REFERENCES contact_lists(id) ON DELETE SET NULL,
            FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL
        );

        -- Per-recipient send tracking
        CREATE TABLE IF NOT EXISTS campaign_sends (
            id INTEGER PRIMARY KEY,
            campaign_id INTEGER NOT NULL,
            contact_id INTEGER,
            email TEXT NOT NULL,
            run_number INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT,
            sent_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(campaign_id, contact_id, run_number),
            FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE CASCADE,
            FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE SET NULL
        );

        -- Audit log
        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY,
            user_id INTEGER,
            user_name TEXT,
            action TEXT NOT NULL,
            entity_type TEXT,
            entity_id INTEGER,
            entity_title TEXT,
            details TEXT,
            ip_address TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_audit_date ON audit_log(created_at);
        ",
    )?;

    repair_schema(&conn)?;

    Ok(())
}

/// Columns that older databases may be missing. Added in place with their defaults.
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
    ("users", "last_login_at", "DATETIME"),
    ("contacts", "phone", "TEXT NOT NULL DEFAULT ''"),
    ("contacts", "notes", "TEXT NOT NULL DEFAULT ''"),
    ("campaigns", "from_name", "TEXT NOT NULL DEFAULT ''"),
    ("campaigns", "recurrence_end_at", "DATETIME"),
    ("campaigns", "next_run_at", "DATETIME"),
    ("campaigns", "last_run_at", "DATETIME"),
    ("campaigns", "run_count", "INTEGER NOT NULL DEFAULT 0"),
    ("campaigns", "sent_count", "INTEGER NOT NULL DEFAULT 0"),
    ("campaigns", "failed_count", "INTEGER NOT NULL DEFAULT 0"),
    ("campaigns", "last_error", "TEXT"),
    ("campaign_sends", "email", "TEXT NOT NULL DEFAULT ''"),
    ("campaign_sends", "run_number", "INTEGER NOT NULL DEFAULT 1"),
    ("campaign_sends", "error", "TEXT"),
    ("campaign_sends", "status", "TEXT NOT NULL DEFAULT 'pending'"),
    ("campaign_sends", "sent_at", "DATETIME"),
    ("campaign_sends", "created_at", "DATETIME"),
];

/// Bring a database created by an older build up to the current shape.
/// Safe to run on every boot.
pub fn repair_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    for (table, column, decl) in ADDED_COLUMNS {
        if !column_exists(conn, table, column)? {
            log::info!("[db] Adding missing column {}.{}", table, column);
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table, column, decl
            ))?;
        }
    }

    if campaign_sends_needs_rebuild(conn)? {
        log::info!("[db] Rebuilding campaign_sends with campaign foreign key");
        rebuild_campaign_sends(conn)?;
    }

    // After the column repairs, so legacy tables have every indexed column
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_campaigns_due ON campaigns(status, next_run_at);
         CREATE INDEX IF NOT EXISTS idx_sends_campaign ON campaign_sends(campaign_id, run_number, status);
         CREATE INDEX IF NOT EXISTS idx_sends_contact ON campaign_sends(contact_id);",
    )?;

    Ok(())
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, rusqlite::Error> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Legacy tables allowed NULL campaign ids and had no cascading foreign key,
/// which left orphaned send rows behind when a campaign was deleted.
fn campaign_sends_needs_rebuild(conn: &Connection) -> Result<bool, rusqlite::Error> {
    let notnull: i64 = conn
        .query_row(
            "SELECT \"notnull\" FROM pragma_table_info('campaign_sends') WHERE name = 'campaign_id'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);
    let fk: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_foreign_key_list('campaign_sends')
         WHERE \"table\" = 'campaigns' AND \"from\" = 'campaign_id' AND on_delete = 'CASCADE'",
        [],
        |row| row.get(0),
    )?;
    Ok(notnull == 0 || fk == 0)
}

fn rebuild_campaign_sends(conn: &Connection) -> Result<(), rusqlite::Error> {
    // foreign_keys cannot change inside a transaction
    conn.execute_batch("PRAGMA foreign_keys=OFF;")?;
    let copied = copy_campaign_sends(conn);
    let restored = conn.execute_batch("PRAGMA foreign_keys=ON;");
    copied.and(restored)
}

/// Rolled back as a whole when any step fails.
fn copy_campaign_sends(conn: &Connection) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE campaign_sends_new (
            id INTEGER PRIMARY KEY,
            campaign_id INTEGER NOT NULL,
            contact_id INTEGER,
            email TEXT NOT NULL,
            run_number INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT,
            sent_at DATETIME,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(campaign_id, contact_id, run_number),
            FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE CASCADE,
            FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE SET NULL
        );
        INSERT OR IGNORE INTO campaign_sends_new
            (id, campaign_id, contact_id, email, run_number, status, error, sent_at, created_at)
            SELECT s.id, s.campaign_id, s.contact_id, s.email, s.run_number, s.status, s.error, s.sent_at, s.created_at
            FROM campaign_sends s
            WHERE s.campaign_id IS NOT NULL
              AND EXISTS (SELECT 1 FROM campaigns c WHERE c.id = s.campaign_id);
        DROP TABLE campaign_sends;
        ALTER TABLE campaign_sends_new RENAME TO campaign_sends;
        CREATE INDEX IF NOT EXISTS idx_sends_campaign ON campaign_sends(campaign_id, run_number, status);
        CREATE INDEX IF NOT EXISTS idx_sends_contact ON campaign_sends(contact_id);
        ",
    )?;
    tx.commit()
}

pub fn seed_defaults(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    let defaults = vec![
        // General
        ("app_name", "Outreach"),
        ("app_url", "http://localhost:8000"),
        ("admin_email", ""),
        // Security
        ("session_expiry_hours", "24"),
        ("login_rate_limit", "5"),
        // Email
        ("email_from_address", ""),
        ("email_from_name", "Outreach"),
        ("email_failover_enabled", "false"),
        ("email_failover_chain", "smtp,gmail,resend,console"),
        ("email_smtp_enabled", "false"),
        ("email_smtp_host", ""),
        ("email_smtp_port", "587"),
        ("email_smtp_username", ""),
        ("email_smtp_password", ""),
        ("email_gmail_enabled", "false"),
        ("email_gmail_address", ""),
        ("email_gmail_app_password", ""),
        ("email_resend_enabled", "false"),
        ("email_resend_api_key", ""),
        ("email_console_enabled", "false"),
        // Campaigns
        ("campaign_max_sends_per_run", "500"),
        // Background tasks
        ("task_campaign_interval_secs", "60"),
        ("task_session_cleanup_interval", "30"),
        ("task_session_max_age_days", "30"),
        ("task_audit_log_cleanup_interval", "1440"),
        ("task_audit_log_max_age_days", "90"),
    ];

    for (key, value) in defaults {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }

    Ok(())
}
