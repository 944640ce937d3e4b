//! Request lifecycle
//!
//! A request starts `pending` and moves exactly once to a terminal status:
//!
//! ```text
//! pending -> accepted | declined   (musician response)
//! pending -> timed_out             (response deadline passed)
//! pending -> cancelled             (need filled by other requests)
//! ```
//!
//! Every status write is a compare-and-set on `status = 'pending'`, so of two
//! racing transitions exactly one takes effect.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::{Connection, Row, SqliteConnection};
use tutti_common::db::{Need, RequestStatus, ResponseKind};
use tutti_common::time;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::roster::uuid_column;

/// Length of generated response tokens
pub const TOKEN_LENGTH: usize = 43;

/// Reason a pending request leaves `pending`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    Response(ResponseKind),
    Timeout,
    /// Need reached its quantity through other requests
    Filled,
}

impl TransitionCause {
    pub fn target(&self) -> RequestStatus {
        match self {
            TransitionCause::Response(kind) => (*kind).into(),
            TransitionCause::Timeout => RequestStatus::TimedOut,
            TransitionCause::Filled => RequestStatus::Cancelled,
        }
    }
}

/// Status a request moves to, or `RequestNotPending` when it is terminal
pub fn next_status(from: RequestStatus, cause: TransitionCause) -> Result<RequestStatus> {
    if from.is_terminal() {
        return Err(EngineError::RequestNotPending(from));
    }
    Ok(cause.target())
}

/// Unguessable single-use token
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Token expiry for a request sent at `sent_at`
pub fn token_expiry(sent_at: DateTime<Utc>, response_time_hours: i64) -> DateTime<Utc> {
    sent_at + Duration::hours(response_time_hours)
}

/// A freshly created request and its token
#[derive(Debug, Clone)]
pub struct IssuedRequest {
    pub request_id: Uuid,
    pub musician_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Create a pending request and its response token
///
/// Runs in a savepoint: either both rows exist afterwards or neither does, and
/// a failure leaves the enclosing transaction usable.
pub async fn issue_request(
    conn: &mut SqliteConnection,
    need: &Need,
    musician_id: Uuid,
    now: DateTime<Utc>,
) -> Result<IssuedRequest> {
    let request_id = Uuid::new_v4();
    let token = generate_token();
    let expires_at = token_expiry(now, need.response_time_hours);

    let mut savepoint = conn.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO requests (id, need_id, project_id, musician_id, status, sent_at)
        VALUES (?, ?, ?, ?, 'pending', ?)
        "#,
    )
    .bind(request_id.to_string())
    .bind(need.id.to_string())
    .bind(need.project_id.to_string())
    .bind(musician_id.to_string())
    .bind(time::to_db(now))
    .execute(&mut *savepoint)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO response_tokens (token, request_id, created_at, expires_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&token)
    .bind(request_id.to_string())
    .bind(time::to_db(now))
    .bind(time::to_db(expires_at))
    .execute(&mut *savepoint)
    .await?;

    savepoint.commit().await?;

    Ok(IssuedRequest {
        request_id,
        musician_id,
        token,
        expires_at,
    })
}

/// Compare-and-set a pending request to the cause's terminal status
///
/// Returns false when the request was no longer pending.
pub async fn transition(
    conn: &mut SqliteConnection,
    request_id: Uuid,
    cause: TransitionCause,
    now: DateTime<Utc>,
) -> Result<bool> {
    let responded_at = matches!(cause, TransitionCause::Response(_)).then(|| time::to_db(now));

    let result = sqlx::query(
        r#"
        UPDATE requests
        SET status = ?, responded_at = COALESCE(?, responded_at)
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(cause.target().as_str())
    .bind(responded_at)
    .bind(request_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Cancel every pending request of a need, returning the cancelled ids
pub async fn cancel_pending(conn: &mut SqliteConnection, need_id: Uuid) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        UPDATE requests
        SET status = 'cancelled'
        WHERE need_id = ? AND status = 'pending'
        RETURNING id
        "#,
    )
    .bind(need_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(|row| uuid_column(row, "id")).collect()
}

/// Time out every pending request whose token expired before `now`
///
/// Returns `(request_id, need_id)` pairs.
pub async fn time_out_expired(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<(Uuid, Uuid)>> {
    let rows = sqlx::query(
        r#"
        UPDATE requests
        SET status = 'timed_out'
        WHERE status = 'pending'
          AND id IN (SELECT request_id FROM response_tokens WHERE expires_at < ?)
        RETURNING id, need_id
        "#,
    )
    .bind(time::to_db(now))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| Ok((uuid_column(row, "id")?, uuid_column(row, "need_id")?)))
        .collect()
}

/// Claim pending requests due a reminder
///
/// A request is due when its token is unconsumed and expires within
/// `[now, until]`, and no reminder has been sent. Claimed requests get
/// `reminder_sent_at = now`, so each is reminded at most once.
pub async fn claim_reminders(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        UPDATE requests
        SET reminder_sent_at = ?
        WHERE status = 'pending'
          AND reminder_sent_at IS NULL
          AND id IN (
              SELECT request_id FROM response_tokens
              WHERE consumed_at IS NULL AND expires_at >= ? AND expires_at <= ?
          )
        RETURNING id
        "#,
    )
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .bind(time::to_db(until))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(|row| uuid_column(row, "id")).collect()
}

/// Mark a token consumed unless another submission got there first
pub async fn consume_token(
    conn: &mut SqliteConnection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE response_tokens SET consumed_at = ? WHERE token = ? AND consumed_at IS NULL",
    )
    .bind(time::to_db(now))
    .bind(token)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_confirmation_sent(conn: &mut SqliteConnection, request_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE requests SET confirmation_sent = 1 WHERE id = ?")
        .bind(request_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Current status of a request
pub async fn request_status(
    conn: &mut SqliteConnection,
    request_id: Uuid,
) -> Result<Option<RequestStatus>> {
    let row = sqlx::query("SELECT status FROM requests WHERE id = ?")
        .bind(request_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let raw: String = row.try_get("status")?;
            Ok(Some(raw.parse()?))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_moves_to_cause_target() {
        let cases = [
            (
                TransitionCause::Response(ResponseKind::Accepted),
                RequestStatus::Accepted,
            ),
            (
                TransitionCause::Response(ResponseKind::Declined),
                RequestStatus::Declined,
            ),
            (TransitionCause::Timeout, RequestStatus::TimedOut),
            (TransitionCause::Filled, RequestStatus::Cancelled),
        ];
        for (cause, expected) in cases {
            assert_eq!(next_status(RequestStatus::Pending, cause).unwrap(), expected);
        }
    }

    #[test]
    fn test_terminal_states_never_move() {
        for from in [
            RequestStatus::Accepted,
            RequestStatus::Declined,
            RequestStatus::TimedOut,
            RequestStatus::Cancelled,
        ] {
            let err = next_status(from, TransitionCause::Response(ResponseKind::Accepted))
                .unwrap_err();
            assert!(matches!(err, EngineError::RequestNotPending(s) if s == from));
        }
    }

    #[test]
    fn test_tokens_are_long_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_expiry_adds_response_window() {
        let sent = Utc::now();
        assert_eq!(token_expiry(sent, 48), sent + Duration::hours(48));
    }
}
