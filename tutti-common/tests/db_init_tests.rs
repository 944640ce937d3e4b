//! Tests for database initialization
//!
//! Covers automatic creation, idempotent re-open, and the store-level
//! constraints the dispatch engine relies on.

use tempfile::TempDir;
use tutti_common::db::init::{init_database, SCHEMA_VERSION};
use tutti_common::time::{now, to_db};

async fn seed_project_with_need(pool: &sqlx::SqlitePool) {
    let ts = to_db(now());
    sqlx::query("INSERT INTO projects (id, name) VALUES ('p1', 'Spring Gala')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO musicians (id, name, email) VALUES ('m1', 'Ada', 'ada@example.org')",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO positions (id, name, instrument, hierarchy_level, display_order)
         VALUES ('pos1', 'Tutti Violin 2', 'violin', 3, 1)",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO ranked_lists (id, position_id, variant) VALUES ('l1', 'pos1', 'A')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO needs (id, project_id, position_id, list_id, quantity, strategy,
                            response_time_hours, created_at, updated_at)
         VALUES ('n1', 'p1', 'pos1', 'l1', 1, 'sequential', 24, ?, ?)",
    )
    .bind(&ts)
    .bind(&ts)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_request(pool: &sqlx::SqlitePool, id: &str, status: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO requests (id, need_id, project_id, musician_id, status, sent_at)
         VALUES (?, 'n1', 'p1', 'm1', ?, ?)",
    )
    .bind(id)
    .bind(status)
    .bind(to_db(now()))
    .execute(pool)
    .await
    .map(|_| ())
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("tutti.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("tutti.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version WHERE version = ?")
        .bind(SCHEMA_VERSION)
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(versions, 1);
}

#[tokio::test]
async fn test_second_open_offer_for_musician_is_rejected() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("tutti.db")).await.unwrap();
    seed_project_with_need(&pool).await;

    insert_request(&pool, "r1", "pending").await.unwrap();
    let duplicate = insert_request(&pool, "r2", "pending").await;
    assert!(duplicate.is_err(), "A musician may hold one open offer per project");

    // History rows do not count against the open-offer constraint
    insert_request(&pool, "r3", "declined").await.unwrap();
    insert_request(&pool, "r4", "timed_out").await.unwrap();
}

#[tokio::test]
async fn test_musician_with_history_cannot_be_deleted() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("tutti.db")).await.unwrap();
    seed_project_with_need(&pool).await;
    insert_request(&pool, "r1", "declined").await.unwrap();

    let result = sqlx::query("DELETE FROM musicians WHERE id = 'm1'")
        .execute(&pool)
        .await;
    assert!(result.is_err(), "Musician references are restrict-on-delete");
}

#[tokio::test]
async fn test_project_delete_cascades_to_requests() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("tutti.db")).await.unwrap();
    seed_project_with_need(&pool).await;
    insert_request(&pool, "r1", "pending").await.unwrap();

    sqlx::query("DELETE FROM projects WHERE id = 'p1'")
        .execute(&pool)
        .await
        .unwrap();

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_duplicate_rank_in_list_is_rejected() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("tutti.db")).await.unwrap();
    seed_project_with_need(&pool).await;
    sqlx::query("INSERT INTO musicians (id, name, email) VALUES ('m2', 'Ben', 'ben@example.org')")
        .execute(&pool)
        .await
        .unwrap();

    sqlx::query("INSERT INTO ranked_list_entries (list_id, musician_id, rank) VALUES ('l1', 'm1', 1)")
        .execute(&pool)
        .await
        .unwrap();
    let result =
        sqlx::query("INSERT INTO ranked_list_entries (list_id, musician_id, rank) VALUES ('l1', 'm2', 1)")
            .execute(&pool)
            .await;
    assert!(result.is_err(), "Two musicians may not share a rank in one list");
}

async fn insert_log_entry(pool: &sqlx::SqlitePool, id: &str, kind: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO communication_log (id, request_id, kind, recipient, outcome, created_at)
         VALUES (?, 'r1', ?, 'ada@example.org', 'sent', ?)",
    )
    .bind(id)
    .bind(kind)
    .bind(to_db(now()))
    .execute(pool)
    .await
    .map(|_| ())
}

#[tokio::test]
async fn test_communication_log_rejects_unknown_kind() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("tutti.db")).await.unwrap();
    seed_project_with_need(&pool).await;
    insert_request(&pool, "r1", "pending").await.unwrap();

    insert_log_entry(&pool, "c1", "request_sent").await.unwrap();
    insert_log_entry(&pool, "c2", "position_filled").await.unwrap();
    let result = insert_log_entry(&pool, "c3", "sms_blast").await;
    assert!(result.is_err(), "Log kind must be one of the known notification kinds");
}
