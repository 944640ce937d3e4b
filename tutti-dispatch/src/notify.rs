//! Notification collaborator
//!
//! The engine hands finished messages to a `Notifier`; rendering and
//! transport live behind it. Delivery failures are logged and written to the
//! communication log, never retried and never allowed to undo a committed
//! decision.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tutti_common::db::{CommunicationKind, DeliveryOutcome};
use uuid::Uuid;

use crate::commlog;
use crate::roster::RequestContext;

/// Notification delivery error
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One message to one musician
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: CommunicationKind,
    pub request_id: Uuid,
    /// Recipient address
    pub recipient: String,
    /// Template variables (musician_name, project_name, position_name, deadline, response_link)
    pub variables: BTreeMap<String, String>,
    /// Names of files to attach, resolved by the collaborator
    pub attachments: Vec<String>,
}

impl Notification {
    /// Build a message about `ctx`'s request
    ///
    /// Only messages that ask for an answer carry the response link.
    pub fn for_request(kind: CommunicationKind, ctx: &RequestContext, links: &ResponseLinks) -> Self {
        let mut variables = BTreeMap::new();
        variables.insert("musician_name".to_string(), ctx.musician_name.clone());
        variables.insert("project_name".to_string(), ctx.project_name.clone());
        variables.insert("position_name".to_string(), ctx.position_name.clone());
        variables.insert("deadline".to_string(), format_deadline(ctx.expires_at));

        if matches!(
            kind,
            CommunicationKind::RequestSent | CommunicationKind::Reminder
        ) {
            variables.insert("response_link".to_string(), links.link(&ctx.token));
        }

        Self {
            kind,
            request_id: ctx.request_id,
            recipient: ctx.musician_email.clone(),
            variables,
            attachments: Vec::new(),
        }
    }
}

fn format_deadline(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Provider acknowledgement of an accepted notification
#[derive(Debug, Clone, Default)]
pub struct NotifyOutcome {
    pub provider_reference: Option<String>,
}

/// Delivers notifications to musicians
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Collaborator name used in logs
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<NotifyOutcome, NotifyError>;
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<NotifyOutcome, NotifyError> {
        info!(
            kind = %notification.kind,
            request_id = %notification.request_id,
            recipient = %notification.recipient,
            variables = ?notification.variables,
            "Notification"
        );
        Ok(NotifyOutcome::default())
    }
}

/// POSTs each notification as JSON to a mail/SMS relay
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("tutti-dispatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<NotifyOutcome, NotifyError> {
        debug!(url = %self.url, request_id = %notification.request_id, "Posting notification");

        let response = self
            .http_client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let provider_reference = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(NotifyOutcome { provider_reference })
    }
}

/// Builds response links for notification variables
#[derive(Debug, Clone)]
pub struct ResponseLinks {
    base_url: String,
}

impl ResponseLinks {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn link(&self, token: &str) -> String {
        format!("{}/respond?token={}", self.base_url, token)
    }
}

/// Send one notification and record the attempt
///
/// Returns whether the collaborator accepted it. Neither a send failure nor a
/// failure to write the log entry is propagated.
pub async fn deliver(pool: &SqlitePool, notifier: &dyn Notifier, notification: &Notification) -> bool {
    let result = notifier.send(notification).await;

    let (outcome, detail) = match &result {
        Ok(ack) => {
            debug!(
                notifier = notifier.name(),
                kind = %notification.kind,
                request_id = %notification.request_id,
                "Notification sent"
            );
            (DeliveryOutcome::Sent, ack.provider_reference.clone())
        }
        Err(e) => {
            warn!(
                notifier = notifier.name(),
                kind = %notification.kind,
                request_id = %notification.request_id,
                recipient = %notification.recipient,
                error = %e,
                "Notification failed; needs manual follow-up"
            );
            (DeliveryOutcome::Failed, Some(e.to_string()))
        }
    };

    let logged = record_attempt(pool, notification, outcome, detail.as_deref()).await;

    if let Err(e) = logged {
        error!(
            request_id = %notification.request_id,
            kind = %notification.kind,
            outcome = %outcome,
            error = %e,
            "Failed to write communication log entry"
        );
    }

    result.is_ok()
}

async fn record_attempt(
    pool: &SqlitePool,
    notification: &Notification,
    outcome: DeliveryOutcome,
    detail: Option<&str>,
) -> crate::error::Result<Uuid> {
    let mut conn = pool.acquire().await?;
    commlog::append(
        &mut conn,
        notification.request_id,
        notification.kind,
        &notification.recipient,
        outcome,
        detail,
        tutti_common::time::now(),
    )
    .await
}
