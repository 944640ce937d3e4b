//! Scheduled sweeps
//!
//! Time-driven transitions triggered from outside (cron or an operator):
//! timing out unanswered requests and sending one reminder before a deadline.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info};
use tutti_common::db::CommunicationKind;
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle;
use crate::notify::{self, Notification, Notifier, ResponseLinks};
use crate::orchestrator::ReplacementDispatcher;
use crate::roster;

/// Outcome of a timeout sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeoutSweepReport {
    pub timed_out: Vec<Uuid>,
    /// Needs re-dispatched after losing a request
    pub redispatched: Vec<Uuid>,
    /// Needs whose re-dispatch failed
    pub redispatch_failed: Vec<Uuid>,
}

/// Outcome of a reminder sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderSweepReport {
    pub reminded: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

pub struct Sweeper {
    db: SqlitePool,
    notifier: Arc<dyn Notifier>,
    replacement: Arc<dyn ReplacementDispatcher>,
    links: ResponseLinks,
    reminder_lead: Duration,
}

impl Sweeper {
    pub fn new(
        db: SqlitePool,
        notifier: Arc<dyn Notifier>,
        replacement: Arc<dyn ReplacementDispatcher>,
        links: ResponseLinks,
        reminder_lead: Duration,
    ) -> Self {
        Self {
            db,
            notifier,
            replacement,
            links,
            reminder_lead,
        }
    }

    /// Time out expired pending requests, then backfill their needs
    pub async fn run_timeouts(&self, now: DateTime<Utc>) -> Result<TimeoutSweepReport> {
        let mut tx = self.db.begin().await?;
        let expired = lifecycle::time_out_expired(&mut tx, now).await?;
        tx.commit().await?;

        let mut report = TimeoutSweepReport {
            timed_out: expired.iter().map(|(request_id, _)| *request_id).collect(),
            ..Default::default()
        };

        let needs: BTreeSet<Uuid> = expired.iter().map(|(_, need_id)| *need_id).collect();

        if !report.timed_out.is_empty() {
            info!(
                timed_out = report.timed_out.len(),
                needs = needs.len(),
                "Timed out expired requests"
            );
        }

        for need_id in needs {
            match self.replacement.redispatch(need_id).await {
                Ok(_) => report.redispatched.push(need_id),
                Err(e) => {
                    error!(need_id = %need_id, error = %e, "Backfill after timeout failed");
                    report.redispatch_failed.push(need_id);
                }
            }
        }

        Ok(report)
    }

    /// Remind musicians whose deadline falls within the lead time
    pub async fn run_reminders(&self, now: DateTime<Utc>) -> Result<ReminderSweepReport> {
        let mut tx = self.db.begin().await?;
        let due = lifecycle::claim_reminders(&mut tx, now, now + self.reminder_lead).await?;
        tx.commit().await?;

        let mut report = ReminderSweepReport::default();

        for request_id in due {
            let sent = match self.load_context(request_id).await {
                Ok(Some(ctx)) => {
                    let notification =
                        Notification::for_request(CommunicationKind::Reminder, &ctx, &self.links);
                    notify::deliver(&self.db, self.notifier.as_ref(), &notification).await
                }
                Ok(None) => false,
                Err(e) => {
                    error!(request_id = %request_id, error = %e, "Could not load reminder context");
                    false
                }
            };

            if sent {
                report.reminded.push(request_id);
            } else {
                report.failed.push(request_id);
            }
        }

        if !report.reminded.is_empty() || !report.failed.is_empty() {
            info!(
                reminded = report.reminded.len(),
                failed = report.failed.len(),
                "Reminder sweep complete"
            );
        }

        Ok(report)
    }

    async fn load_context(&self, request_id: Uuid) -> Result<Option<roster::RequestContext>> {
        let mut conn = self.db.acquire().await?;
        roster::request_context(&mut conn, request_id).await
    }
}
