//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates the staffing
//! schema. Table creation is idempotent, so every service start runs it.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Lock wait applied to every pooled connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection options shared by the service and tests
///
/// WAL lets readers proceed while one writer holds the lock; the busy timeout
/// makes a second writer wait for the first instead of failing immediately.
pub fn connect_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
}

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(connect_options(db_path))
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_projects_table(pool).await?;
    create_musicians_table(pool).await?;
    create_positions_table(pool).await?;
    create_ranked_list_tables(pool).await?;
    create_needs_table(pool).await?;
    create_requests_table(pool).await?;
    create_response_tokens_table(pool).await?;
    create_communication_log_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind(crate::time::to_db(crate::time::now()))
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_projects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_musicians_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS musicians (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            local_resident INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Positions are archived, never deleted, once history references them
async fn create_positions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            instrument TEXT NOT NULL,
            hierarchy_level INTEGER NOT NULL,
            display_order INTEGER NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ranked_list_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ranked_lists (
            id TEXT PRIMARY KEY,
            position_id TEXT NOT NULL REFERENCES positions(id) ON DELETE RESTRICT,
            variant TEXT NOT NULL,
            UNIQUE (position_id, variant)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rank is unique within a list, and a musician appears at most once per list
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ranked_list_entries (
            list_id TEXT NOT NULL REFERENCES ranked_lists(id) ON DELETE CASCADE,
            musician_id TEXT NOT NULL REFERENCES musicians(id) ON DELETE RESTRICT,
            rank INTEGER NOT NULL,
            PRIMARY KEY (list_id, musician_id),
            UNIQUE (list_id, rank)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_needs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS needs (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            position_id TEXT NOT NULL REFERENCES positions(id) ON DELETE RESTRICT,
            list_id TEXT NOT NULL REFERENCES ranked_lists(id) ON DELETE RESTRICT,
            quantity INTEGER NOT NULL CHECK (quantity >= 1),
            strategy TEXT NOT NULL CHECK (strategy IN ('sequential', 'parallel', 'first_come')),
            max_recipients INTEGER,
            response_time_hours INTEGER NOT NULL CHECK (response_time_hours >= 1),
            requires_local INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'completed', 'paused')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_needs_project ON needs(project_id, status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Requests are permanent history
///
/// `project_id` is carried on the row so the store itself can refuse a second
/// open offer to the same musician within one project.
async fn create_requests_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY,
            need_id TEXT NOT NULL REFERENCES needs(id) ON DELETE CASCADE,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            musician_id TEXT NOT NULL REFERENCES musicians(id) ON DELETE RESTRICT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'accepted', 'declined', 'timed_out', 'cancelled')),
            sent_at TEXT NOT NULL,
            reminder_sent_at TEXT,
            responded_at TEXT,
            confirmation_sent INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_one_open_offer
        ON requests(project_id, musician_id)
        WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_need ON requests(need_id, status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_requests_project ON requests(project_id, musician_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_response_tokens_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS response_tokens (
            token TEXT PRIMARY KEY,
            request_id TEXT NOT NULL UNIQUE REFERENCES requests(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            consumed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_response_tokens_expiry ON response_tokens(expires_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only; rows are never updated or deleted by the services
async fn create_communication_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS communication_log (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
            kind TEXT NOT NULL CHECK (kind IN (
                'request_sent', 'reminder', 'response_received', 'confirmation', 'position_filled'
            )),
            recipient TEXT NOT NULL,
            outcome TEXT NOT NULL CHECK (outcome IN ('sent', 'failed', 'recorded')),
            detail TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_communication_log_request ON communication_log(request_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
