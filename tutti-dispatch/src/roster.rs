//! Roster repository
//!
//! Read access to needs, ranked lists, musicians and per-need request counts.
//! Every query takes a `&mut SqliteConnection` so callers can run it on a
//! pooled connection or inside an open transaction (`&mut *tx`).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tutti_common::db::{
    Need, NeedStatus, RankedCandidate, Request, RequestStatus, ResponseToken, Strategy,
};
use tutti_common::time;
use uuid::Uuid;

use crate::error::Result;
use crate::strategy::NeedCounts;

/// A need together with the ranked list it draws from
#[derive(Debug, Clone)]
pub struct NeedRoster {
    pub need: Need,
    pub hierarchy_level: i64,
    pub display_order: i64,
    pub variant: String,
    /// Ordered by ascending rank
    pub candidates: Vec<RankedCandidate>,
}

/// Everything a message to one request's musician refers to
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub need_id: Uuid,
    pub musician_id: Uuid,
    pub musician_name: String,
    pub musician_email: String,
    pub project_name: String,
    pub position_name: String,
    pub status: RequestStatus,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub(crate) fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| {
        tutti_common::Error::Decode(format!("{} '{}': {}", column, raw, e)).into()
    })
}

fn status_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = tutti_common::Error>,
{
    let raw: String = row.try_get(column)?;
    Ok(raw.parse()?)
}

const NEED_COLUMNS: &str = "n.id, n.project_id, n.position_id, n.list_id, n.quantity, \
     n.strategy, n.max_recipients, n.response_time_hours, n.requires_local, n.status, n.created_at";

fn need_from_row(row: &SqliteRow) -> Result<Need> {
    let strategy: String = row.try_get("strategy")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Need {
        id: uuid_column(row, "id")?,
        project_id: uuid_column(row, "project_id")?,
        position_id: uuid_column(row, "position_id")?,
        list_id: uuid_column(row, "list_id")?,
        quantity: row.try_get("quantity")?,
        strategy: Strategy::from_columns(&strategy, row.try_get("max_recipients")?)?,
        response_time_hours: row.try_get("response_time_hours")?,
        requires_local: row.try_get("requires_local")?,
        status: status_column(row, "status")?,
        created_at: time::from_db(&created_at)?,
    })
}

fn request_from_row(row: &SqliteRow) -> Result<Request> {
    let sent_at: String = row.try_get("sent_at")?;

    Ok(Request {
        id: uuid_column(row, "id")?,
        need_id: uuid_column(row, "need_id")?,
        project_id: uuid_column(row, "project_id")?,
        musician_id: uuid_column(row, "musician_id")?,
        status: status_column(row, "status")?,
        sent_at: time::from_db(&sent_at)?,
        reminder_sent_at: time::from_db_opt(row.try_get("reminder_sent_at")?)?,
        responded_at: time::from_db_opt(row.try_get("responded_at")?)?,
        confirmation_sent: row.try_get("confirmation_sent")?,
    })
}

/// Load one need by id
pub async fn load_need(conn: &mut SqliteConnection, need_id: Uuid) -> Result<Option<Need>> {
    let row = sqlx::query(&format!("SELECT {} FROM needs n WHERE n.id = ?", NEED_COLUMNS))
        .bind(need_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(need_from_row).transpose()
}

/// Active needs of a project in dispatch order, each with its ranked list
///
/// Order: position display order, then hierarchy level, then creation time.
pub async fn load_project_rosters(
    conn: &mut SqliteConnection,
    project_id: Uuid,
) -> Result<Vec<NeedRoster>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {}, p.hierarchy_level, p.display_order, l.variant
        FROM needs n
        JOIN positions p ON p.id = n.position_id
        JOIN ranked_lists l ON l.id = n.list_id
        WHERE n.project_id = ? AND n.status = 'active'
        ORDER BY p.display_order, p.hierarchy_level, n.created_at, n.id
        "#,
        NEED_COLUMNS
    ))
    .bind(project_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut rosters = Vec::with_capacity(rows.len());
    for row in &rows {
        let need = need_from_row(row)?;
        let candidates = load_candidates(conn, need.list_id).await?;
        rosters.push(NeedRoster {
            need,
            hierarchy_level: row.try_get("hierarchy_level")?,
            display_order: row.try_get("display_order")?,
            variant: row.try_get("variant")?,
            candidates,
        });
    }

    Ok(rosters)
}

/// Ranked list entries with the musician attributes eligibility depends on
pub async fn load_candidates(
    conn: &mut SqliteConnection,
    list_id: Uuid,
) -> Result<Vec<RankedCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT e.musician_id, e.rank, m.active, m.local_resident
        FROM ranked_list_entries e
        JOIN musicians m ON m.id = e.musician_id
        WHERE e.list_id = ?
        ORDER BY e.rank
        "#,
    )
    .bind(list_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(RankedCandidate {
                musician_id: uuid_column(row, "musician_id")?,
                rank: row.try_get("rank")?,
                active: row.try_get("active")?,
                local_resident: row.try_get("local_resident")?,
            })
        })
        .collect()
}

/// Musicians who have ever been contacted within the project
///
/// Any request, in any status, engages the musician for the whole project.
pub async fn engaged_musicians(
    conn: &mut SqliteConnection,
    project_id: Uuid,
) -> Result<HashSet<Uuid>> {
    let rows = sqlx::query("SELECT DISTINCT musician_id FROM requests WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(|row| uuid_column(row, "musician_id")).collect()
}

/// Accepted and pending request counts for a need
pub async fn need_counts(conn: &mut SqliteConnection, need_id: Uuid) -> Result<NeedCounts> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN status = 'accepted' THEN 1 ELSE 0 END), 0) AS accepted,
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending
        FROM requests
        WHERE need_id = ?
        "#,
    )
    .bind(need_id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    Ok(NeedCounts {
        accepted: row.try_get("accepted")?,
        pending: row.try_get("pending")?,
    })
}

/// Take the write lock scoped to a need
///
/// Bumps `updated_at` so the statement is a write; SQLite then holds its
/// writer lock for the rest of the transaction. Returns the need's status,
/// or `None` when the need does not exist.
pub async fn lock_need(
    conn: &mut SqliteConnection,
    need_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<NeedStatus>> {
    let row = sqlx::query("UPDATE needs SET updated_at = ? WHERE id = ? RETURNING status")
        .bind(time::to_db(now))
        .bind(need_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(|r| status_column(r, "status")).transpose()
}

pub async fn project_exists(conn: &mut SqliteConnection, project_id: Uuid) -> Result<bool> {
    let found = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
        .bind(project_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Position a list belongs to, if the list exists
pub async fn list_position(conn: &mut SqliteConnection, list_id: Uuid) -> Result<Option<Uuid>> {
    let row = sqlx::query("SELECT position_id FROM ranked_lists WHERE id = ?")
        .bind(list_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(|r| uuid_column(r, "position_id")).transpose()
}

/// Archived flag of a position, if the position exists
pub async fn position_archived(
    conn: &mut SqliteConnection,
    position_id: Uuid,
) -> Result<Option<bool>> {
    let row = sqlx::query("SELECT archived FROM positions WHERE id = ?")
        .bind(position_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.try_get("archived")).transpose()?)
}

pub async fn load_request(conn: &mut SqliteConnection, request_id: Uuid) -> Result<Option<Request>> {
    let row = sqlx::query(
        r#"
        SELECT id, need_id, project_id, musician_id, status, sent_at,
               reminder_sent_at, responded_at, confirmation_sent
        FROM requests
        WHERE id = ?
        "#,
    )
    .bind(request_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(request_from_row).transpose()
}

/// All requests of a need, oldest first
pub async fn requests_for_need(conn: &mut SqliteConnection, need_id: Uuid) -> Result<Vec<Request>> {
    let rows = sqlx::query(
        r#"
        SELECT id, need_id, project_id, musician_id, status, sent_at,
               reminder_sent_at, responded_at, confirmation_sent
        FROM requests
        WHERE need_id = ?
        ORDER BY sent_at, id
        "#,
    )
    .bind(need_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(request_from_row).collect()
}

pub async fn load_token(conn: &mut SqliteConnection, token: &str) -> Result<Option<ResponseToken>> {
    let row = sqlx::query(
        r#"
        SELECT token, request_id, created_at, expires_at, consumed_at
        FROM response_tokens
        WHERE token = ?
        "#,
    )
    .bind(token)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let created_at: String = row.try_get("created_at")?;
    let expires_at: String = row.try_get("expires_at")?;

    Ok(Some(ResponseToken {
        token: row.try_get("token")?,
        request_id: uuid_column(&row, "request_id")?,
        created_at: time::from_db(&created_at)?,
        expires_at: time::from_db(&expires_at)?,
        consumed_at: time::from_db_opt(row.try_get("consumed_at")?)?,
    }))
}

const CONTEXT_QUERY: &str = r#"
    SELECT r.id AS request_id, r.need_id, r.musician_id, r.status,
           m.name AS musician_name, m.email AS musician_email,
           pr.name AS project_name, p.name AS position_name,
           t.token, t.expires_at
    FROM requests r
    JOIN musicians m ON m.id = r.musician_id
    JOIN needs n ON n.id = r.need_id
    JOIN projects pr ON pr.id = r.project_id
    JOIN positions p ON p.id = n.position_id
    JOIN response_tokens t ON t.request_id = r.id
"#;

fn context_from_row(row: &SqliteRow) -> Result<RequestContext> {
    let expires_at: String = row.try_get("expires_at")?;

    Ok(RequestContext {
        request_id: uuid_column(row, "request_id")?,
        need_id: uuid_column(row, "need_id")?,
        musician_id: uuid_column(row, "musician_id")?,
        musician_name: row.try_get("musician_name")?,
        musician_email: row.try_get("musician_email")?,
        project_name: row.try_get("project_name")?,
        position_name: row.try_get("position_name")?,
        status: status_column(row, "status")?,
        token: row.try_get("token")?,
        expires_at: time::from_db(&expires_at)?,
    })
}

/// Message context for a request
pub async fn request_context(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> Result<Option<RequestContext>> {
    let row = sqlx::query(&format!("{} WHERE r.id = ?", CONTEXT_QUERY))
        .bind(request_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(context_from_row).transpose()
}

/// Message context looked up by response token
pub async fn token_context(
    conn: &mut SqliteConnection,
    token: &str,
) -> Result<Option<RequestContext>> {
    let row = sqlx::query(&format!("{} WHERE t.token = ?", CONTEXT_QUERY))
        .bind(token)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(context_from_row).transpose()
}
