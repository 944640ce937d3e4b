//! Communication log
//!
//! Append-only record of every message sent (or attempted) and every response
//! received, kept so failed notifications can be reconciled by hand.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use tutti_common::db::{CommunicationKind, CommunicationLogEntry, DeliveryOutcome};
use tutti_common::time;
use uuid::Uuid;

use crate::error::Result;
use crate::roster::uuid_column;

/// Append one entry
pub async fn append(
    conn: &mut SqliteConnection,
    request_id: Uuid,
    kind: CommunicationKind,
    recipient: &str,
    outcome: DeliveryOutcome,
    detail: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO communication_log (id, request_id, kind, recipient, outcome, detail, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(request_id.to_string())
    .bind(kind.as_str())
    .bind(recipient)
    .bind(outcome.as_str())
    .bind(detail)
    .bind(time::to_db(now))
    .execute(&mut *conn)
    .await?;

    Ok(id)
}

/// Entries for one request, oldest first
pub async fn entries_for_request(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> Result<Vec<CommunicationLogEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, request_id, kind, recipient, outcome, detail, created_at
        FROM communication_log
        WHERE request_id = ?
        ORDER BY created_at, rowid
        "#,
    )
    .bind(request_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let kind: String = row.try_get("kind")?;
            let outcome: String = row.try_get("outcome")?;
            let created_at: String = row.try_get("created_at")?;

            Ok(CommunicationLogEntry {
                id: uuid_column(row, "id")?,
                request_id: uuid_column(row, "request_id")?,
                kind: kind.parse()?,
                recipient: row.try_get("recipient")?,
                outcome: outcome.parse()?,
                detail: row.try_get("detail")?,
                created_at: time::from_db(&created_at)?,
            })
        })
        .collect()
}
