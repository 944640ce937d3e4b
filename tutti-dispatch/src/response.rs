//! Response processor
//!
//! Turns a musician's accept/decline, presented with a response token, into a
//! terminal request status. The token is consumed, the request resolved, the
//! response logged and, on acceptance, the need's completion cascade applied,
//! all in one transaction. Notifications and backfill dispatch run only after
//! that transaction commits, and their failures never reach the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{error, info, warn};
use tutti_common::db::{
    CommunicationKind, DeliveryOutcome, NeedStatus, RequestStatus, ResponseKind, Strategy,
};
use tutti_common::time;
use uuid::Uuid;

use crate::commlog;
use crate::error::{EngineError, Result};
use crate::lifecycle::{self, TransitionCause};
use crate::notify::{self, Notification, Notifier, ResponseLinks};
use crate::orchestrator::ReplacementDispatcher;
use crate::roster::{self, RequestContext};

/// Result of a processed response
#[derive(Debug, Clone, Serialize)]
pub struct ResponseReceipt {
    pub request_id: Uuid,
    pub need_id: Uuid,
    pub response: ResponseKind,
    /// The acceptance brought the need to its quantity
    pub need_completed: bool,
    /// Requests cancelled because the need filled
    pub cancelled: Vec<Uuid>,
}

/// What a response link shows before the musician answers
#[derive(Debug, Clone, Serialize)]
pub struct ResponsePreview {
    pub musician_name: String,
    pub project_name: String,
    pub position_name: String,
    pub deadline: DateTime<Utc>,
    pub status: RequestStatus,
}

/// Response processor
pub struct ResponseProcessor {
    db: SqlitePool,
    notifier: Arc<dyn Notifier>,
    replacement: Arc<dyn ReplacementDispatcher>,
    links: ResponseLinks,
}

impl ResponseProcessor {
    pub fn new(
        db: SqlitePool,
        notifier: Arc<dyn Notifier>,
        replacement: Arc<dyn ReplacementDispatcher>,
        links: ResponseLinks,
    ) -> Self {
        Self {
            db,
            notifier,
            replacement,
            links,
        }
    }

    /// Look up what a token refers to without consuming it
    ///
    /// Unknown and expired tokens fail alike from the caller's view; a used
    /// token fails with `TokenAlreadyUsed`.
    pub async fn preview(&self, token: &str, now: DateTime<Utc>) -> Result<ResponsePreview> {
        let mut conn = self.db.acquire().await?;

        let stored = roster::load_token(&mut conn, token)
            .await?
            .ok_or(EngineError::TokenNotFound)?;
        if stored.consumed_at.is_some() {
            return Err(EngineError::TokenAlreadyUsed);
        }
        if stored.is_expired(now) {
            return Err(EngineError::TokenExpired);
        }

        let ctx = roster::token_context(&mut conn, token)
            .await?
            .ok_or(EngineError::TokenNotFound)?;

        Ok(ResponsePreview {
            musician_name: ctx.musician_name,
            project_name: ctx.project_name,
            position_name: ctx.position_name,
            deadline: ctx.expires_at,
            status: ctx.status,
        })
    }

    /// Process one response
    pub async fn submit(
        &self,
        token: &str,
        response: ResponseKind,
        now: DateTime<Utc>,
    ) -> Result<ResponseReceipt> {
        let mut tx = self.db.begin().await?;
        let receipt = resolve(&mut tx, token, response, now).await?;
        tx.commit().await?;

        info!(
            request_id = %receipt.request_id,
            need_id = %receipt.need_id,
            response = %response,
            need_completed = receipt.need_completed,
            cancelled = receipt.cancelled.len(),
            "Response recorded"
        );

        match response {
            ResponseKind::Accepted => self.after_acceptance(&receipt).await,
            ResponseKind::Declined => self.after_decline(&receipt).await,
        }

        Ok(receipt)
    }

    async fn after_acceptance(&self, receipt: &ResponseReceipt) {
        if self
            .notify(receipt.request_id, CommunicationKind::Confirmation)
            .await
        {
            if let Err(e) = self.mark_confirmed(receipt.request_id).await {
                warn!(request_id = %receipt.request_id, error = %e, "Could not flag confirmation as sent");
            }
        }

        for request_id in &receipt.cancelled {
            self.notify(*request_id, CommunicationKind::PositionFilled)
                .await;
        }
    }

    /// A decline frees a slot; ask for a replacement
    async fn after_decline(&self, receipt: &ResponseReceipt) {
        match self.replacement.redispatch(receipt.need_id).await {
            Ok(outcome) => info!(
                need_id = %receipt.need_id,
                created = outcome.created.len(),
                "Replacement dispatch complete"
            ),
            Err(e) => error!(
                need_id = %receipt.need_id,
                error = %e,
                "Replacement dispatch failed; need requires manual dispatch"
            ),
        }
    }

    /// Send one notification about a request; true when delivered
    async fn notify(&self, request_id: Uuid, kind: CommunicationKind) -> bool {
        match self.load_context(request_id).await {
            Ok(Some(ctx)) => {
                let notification = Notification::for_request(kind, &ctx, &self.links);
                notify::deliver(&self.db, self.notifier.as_ref(), &notification).await
            }
            Ok(None) => {
                warn!(request_id = %request_id, kind = %kind, "Request not found for notification");
                false
            }
            Err(e) => {
                error!(request_id = %request_id, kind = %kind, error = %e, "Could not load notification context");
                false
            }
        }
    }

    async fn load_context(&self, request_id: Uuid) -> Result<Option<RequestContext>> {
        let mut conn = self.db.acquire().await?;
        roster::request_context(&mut conn, request_id).await
    }

    async fn mark_confirmed(&self, request_id: Uuid) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        lifecycle::mark_confirmation_sent(&mut conn, request_id).await
    }
}

/// Transactional core of `submit`
///
/// The token compare-and-set is the first statement, so the transaction holds
/// the database write lock from then on and concurrent submissions of the
/// same token serialize behind it. Any error rolls everything back.
async fn resolve(
    conn: &mut SqliteConnection,
    token: &str,
    response: ResponseKind,
    now: DateTime<Utc>,
) -> Result<ResponseReceipt> {
    if !lifecycle::consume_token(conn, token, now).await? {
        return Err(match roster::load_token(conn, token).await? {
            None => EngineError::TokenNotFound,
            Some(_) => EngineError::TokenAlreadyUsed,
        });
    }

    let stored = roster::load_token(conn, token)
        .await?
        .ok_or(EngineError::TokenNotFound)?;

    let request = roster::load_request(conn, stored.request_id)
        .await?
        .ok_or_else(|| {
            EngineError::InvariantViolation(format!("token for missing request {}", stored.request_id))
        })?;

    let cause = TransitionCause::Response(response);
    lifecycle::next_status(request.status, cause)?;

    if stored.is_expired(now) {
        return Err(EngineError::TokenExpired);
    }

    if !lifecycle::transition(conn, request.id, cause, now).await? {
        let current = lifecycle::request_status(conn, request.id)
            .await?
            .unwrap_or(request.status);
        return Err(EngineError::RequestNotPending(current));
    }

    let recipient = musician_email(conn, request.musician_id).await?;
    commlog::append(
        conn,
        request.id,
        CommunicationKind::ResponseReceived,
        &recipient,
        DeliveryOutcome::Recorded,
        Some(response.as_str()),
        now,
    )
    .await?;

    let mut receipt = ResponseReceipt {
        request_id: request.id,
        need_id: request.need_id,
        response,
        need_completed: false,
        cancelled: Vec::new(),
    };

    if response == ResponseKind::Accepted {
        complete_if_filled(conn, &mut receipt, now).await?;
    }

    Ok(receipt)
}

/// Mark the need completed once it holds enough acceptances
///
/// Under first_come the rest of the batch is cancelled in the same
/// transaction, so a later acceptance from that batch finds its request
/// already closed.
async fn complete_if_filled(
    conn: &mut SqliteConnection,
    receipt: &mut ResponseReceipt,
    now: DateTime<Utc>,
) -> Result<()> {
    let need = roster::load_need(conn, receipt.need_id)
        .await?
        .ok_or(EngineError::NeedNotFound(receipt.need_id))?;
    let counts = roster::need_counts(conn, need.id).await?;

    if counts.accepted < need.quantity {
        return Ok(());
    }

    if need.status != NeedStatus::Completed {
        sqlx::query("UPDATE needs SET status = 'completed', updated_at = ? WHERE id = ?")
            .bind(time::to_db(now))
            .bind(need.id.to_string())
            .execute(&mut *conn)
            .await?;
        receipt.need_completed = true;
    }

    if matches!(need.strategy, Strategy::FirstCome { .. }) {
        receipt.cancelled = lifecycle::cancel_pending(conn, need.id).await?;
    } else if counts.pending > 0 {
        error!(
            need_id = %need.id,
            pending = counts.pending,
            "Need filled with requests still pending"
        );
    }

    Ok(())
}

async fn musician_email(conn: &mut SqliteConnection, musician_id: Uuid) -> Result<String> {
    let email: Option<String> = sqlx::query_scalar("SELECT email FROM musicians WHERE id = ?")
        .bind(musician_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    email.ok_or_else(|| EngineError::NotFound(format!("musician {}", musician_id)))
}
