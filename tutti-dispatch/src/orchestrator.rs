//! Dispatch orchestrator
//!
//! Runs a dispatch pass over a project's active needs:
//!
//! 1. Analyze cross-need conflicts once for the pass
//! 2. Visit needs in position display order, then hierarchy level
//! 3. Per need, inside one transaction holding the need's write lock:
//!    re-read the engaged set and counts, filter, select, create requests
//! 4. After commit, notify each new recipient
//!
//! Musicians selected by an earlier need in the pass are carried forward in a
//! `ClaimedSet` so later needs do not offer them again.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};
use tutti_common::db::{CommunicationKind, ConflictPolicy, NeedStatus};
use tutti_common::time;
use uuid::Uuid;

use crate::availability::{AvailabilityFilter, ClaimedSet};
use crate::conflict::{ConflictAnalyzer, ConflictResolution};
use crate::error::{EngineError, Result};
use crate::lifecycle::{self, IssuedRequest};
use crate::notify::{self, Notification, Notifier, ResponseLinks};
use crate::roster::{self, NeedRoster};
use crate::strategy;

/// Why a need produced no requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Paused,
    Completed,
    /// Strategy allows nothing new (filled, or waiting on replies)
    NoOpenSlots,
    /// Slots open but no eligible musician left
    NoEligibleMusicians,
}

/// One recipient that could not be contacted
#[derive(Debug, Clone, Serialize)]
pub struct RecipientFailure {
    pub musician_id: Uuid,
    pub request_id: Option<Uuid>,
    pub error: String,
}

/// Outcome of dispatching one need
#[derive(Debug, Clone, Serialize)]
pub struct NeedDispatch {
    pub need_id: Uuid,
    /// Musicians the strategy selected, in rank order
    pub selected: Vec<Uuid>,
    /// Requests actually created
    pub created: Vec<Uuid>,
    pub failures: Vec<RecipientFailure>,
    pub skipped: Option<SkipReason>,
    /// Set when the need's step failed as a whole
    pub error: Option<String>,
}

impl NeedDispatch {
    fn skipped(need_id: Uuid, reason: SkipReason) -> Self {
        Self {
            need_id,
            selected: Vec::new(),
            created: Vec::new(),
            failures: Vec::new(),
            skipped: Some(reason),
            error: None,
        }
    }
}

/// Outcome of a dispatch pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub needs: Vec<NeedDispatch>,
}

impl DispatchReport {
    pub fn requests_created(&self) -> usize {
        self.needs.iter().map(|n| n.created.len()).sum()
    }

    pub fn for_need(&self, need_id: Uuid) -> Option<&NeedDispatch> {
        self.needs.iter().find(|n| n.need_id == need_id)
    }
}

/// Re-dispatch hook invoked when a request resolves without filling its need
#[async_trait]
pub trait ReplacementDispatcher: Send + Sync {
    async fn redispatch(&self, need_id: Uuid) -> Result<NeedDispatch>;
}

/// Dispatch orchestrator
pub struct DispatchOrchestrator {
    db: SqlitePool,
    notifier: Arc<dyn Notifier>,
    analyzer: ConflictAnalyzer,
    links: ResponseLinks,
}

impl DispatchOrchestrator {
    pub fn new(
        db: SqlitePool,
        notifier: Arc<dyn Notifier>,
        policy: ConflictPolicy,
        links: ResponseLinks,
    ) -> Self {
        Self {
            db,
            notifier,
            analyzer: ConflictAnalyzer::new(policy),
            links,
        }
    }

    /// Dispatch every active need of a project
    pub async fn dispatch_project(&self, project_id: Uuid) -> Result<DispatchReport> {
        let rosters = {
            let mut conn = self.db.acquire().await?;
            if !roster::project_exists(&mut conn, project_id).await? {
                return Err(EngineError::NotFound(format!("project {}", project_id)));
            }
            roster::load_project_rosters(&mut conn, project_id).await?
        };

        let conflicts = self.analyzer.analyze(&rosters);

        info!(
            project_id = %project_id,
            needs = rosters.len(),
            conflicted = conflicts.conflicted_musicians(),
            "Dispatch pass started"
        );

        let mut report = DispatchReport::default();
        let mut claimed = ClaimedSet::new();

        for need_roster in &rosters {
            let (outcome, next) = self.dispatch_step(need_roster, &conflicts, claimed).await?;
            claimed = next;
            report.needs.push(outcome);
        }

        info!(
            project_id = %project_id,
            created = report.requests_created(),
            "Dispatch pass finished"
        );

        Ok(report)
    }

    /// Dispatch a single need
    ///
    /// Conflicts are still analyzed across the whole project so the smart
    /// policy applies.
    pub async fn dispatch_need(&self, need_id: Uuid) -> Result<NeedDispatch> {
        let (need, rosters) = {
            let mut conn = self.db.acquire().await?;
            let need = roster::load_need(&mut conn, need_id)
                .await?
                .ok_or(EngineError::NeedNotFound(need_id))?;
            let rosters = roster::load_project_rosters(&mut conn, need.project_id).await?;
            (need, rosters)
        };

        let Some(need_roster) = rosters.iter().find(|r| r.need.id == need_id) else {
            let reason = match need.status {
                NeedStatus::Paused => SkipReason::Paused,
                _ => SkipReason::Completed,
            };
            debug!(need_id = %need_id, status = %need.status, "Need not active; nothing to dispatch");
            return Ok(NeedDispatch::skipped(need_id, reason));
        };

        let conflicts = self.analyzer.analyze(&rosters);
        let (mut outcome, issued) = self
            .create_requests(need_roster, &conflicts, &ClaimedSet::new(), time::now())
            .await?;
        self.notify_recipients(&issued, &mut outcome).await;

        Ok(outcome)
    }

    /// One need's step
    ///
    /// Failures are contained in the returned outcome, except invariant
    /// violations, which abort the pass.
    async fn dispatch_step(
        &self,
        need_roster: &NeedRoster,
        conflicts: &ConflictResolution,
        claimed: ClaimedSet,
    ) -> Result<(NeedDispatch, ClaimedSet)> {
        let now = time::now();

        match self.create_requests(need_roster, conflicts, &claimed, now).await {
            Ok((mut outcome, issued)) => {
                let claimed = claimed.with(&outcome.selected);
                self.notify_recipients(&issued, &mut outcome).await;
                Ok((outcome, claimed))
            }
            Err(e) => Ok((contain_failure(need_roster.need.id, e)?, claimed)),
        }
    }

    /// Transactional part of a step
    async fn create_requests(
        &self,
        need_roster: &NeedRoster,
        conflicts: &ConflictResolution,
        claimed: &ClaimedSet,
        now: DateTime<Utc>,
    ) -> Result<(NeedDispatch, Vec<IssuedRequest>)> {
        let need = &need_roster.need;
        let mut tx = self.db.begin().await?;

        match roster::lock_need(&mut tx, need.id, now).await? {
            None => return Err(EngineError::NeedNotFound(need.id)),
            Some(NeedStatus::Paused) => {
                return Ok((NeedDispatch::skipped(need.id, SkipReason::Paused), Vec::new()))
            }
            Some(NeedStatus::Completed) => {
                return Ok((NeedDispatch::skipped(need.id, SkipReason::Completed), Vec::new()))
            }
            Some(NeedStatus::Active) => {}
        }

        let engaged = roster::engaged_musicians(&mut tx, need.project_id).await?;
        let counts = roster::need_counts(&mut tx, need.id).await?;

        let eligible =
            AvailabilityFilter::new(&engaged, conflicts).eligible(need, &need_roster.candidates, claimed);
        let selected = strategy::select_recipients(&need.strategy, need.quantity, counts, &eligible);

        strategy::verify_selection(&need.strategy, need.quantity, counts, &selected)
            .map_err(EngineError::InvariantViolation)?;

        debug!(
            need_id = %need.id,
            strategy = need.strategy.kind_str(),
            accepted = counts.accepted,
            pending = counts.pending,
            eligible = eligible.len(),
            selected = selected.len(),
            "Need evaluated"
        );

        if selected.is_empty() {
            tx.commit().await?;
            let reason = if strategy::allowance(&need.strategy, need.quantity, counts, usize::MAX) == 0 {
                SkipReason::NoOpenSlots
            } else {
                SkipReason::NoEligibleMusicians
            };
            return Ok((NeedDispatch::skipped(need.id, reason), Vec::new()));
        }

        let mut issued = Vec::with_capacity(selected.len());
        let mut failures = Vec::new();

        for musician_id in &selected {
            match lifecycle::issue_request(&mut tx, need, *musician_id, now).await {
                Ok(request) => issued.push(request),
                Err(e) => {
                    warn!(
                        need_id = %need.id,
                        musician_id = %musician_id,
                        error = %e,
                        "Could not create request"
                    );
                    failures.push(RecipientFailure {
                        musician_id: *musician_id,
                        request_id: None,
                        error: e.to_string(),
                    });
                }
            }
        }

        tx.commit().await?;

        info!(
            need_id = %need.id,
            created = issued.len(),
            failed = failures.len(),
            "Requests created"
        );

        let outcome = NeedDispatch {
            need_id: need.id,
            selected,
            created: issued.iter().map(|r| r.request_id).collect(),
            failures,
            skipped: None,
            error: None,
        };

        Ok((outcome, issued))
    }

    /// Post-commit notifications; each recipient's failure is isolated
    async fn notify_recipients(&self, issued: &[IssuedRequest], outcome: &mut NeedDispatch) {
        for request in issued {
            let context = self.load_context(request.request_id).await;

            let failure = match context {
                Ok(Some(ctx)) => {
                    let notification =
                        Notification::for_request(CommunicationKind::RequestSent, &ctx, &self.links);
                    if notify::deliver(&self.db, self.notifier.as_ref(), &notification).await {
                        None
                    } else {
                        Some("notification failed".to_string())
                    }
                }
                Ok(None) => Some("request vanished before notification".to_string()),
                Err(e) => Some(e.to_string()),
            };

            if let Some(error) = failure {
                warn!(
                    request_id = %request.request_id,
                    musician_id = %request.musician_id,
                    error = %error,
                    "Request created but musician not notified"
                );
                outcome.failures.push(RecipientFailure {
                    musician_id: request.musician_id,
                    request_id: Some(request.request_id),
                    error,
                });
            }
        }
    }
}

/// Turn a failed step into that need's outcome, or re-raise it when the
/// failure means the dispatch math itself is broken
fn contain_failure(need_id: Uuid, err: EngineError) -> Result<NeedDispatch> {
    if let EngineError::InvariantViolation(detail) = &err {
        error!(need_id = %need_id, detail = %detail, "Dispatch invariant violated; aborting pass");
        return Err(err);
    }

    error!(need_id = %need_id, error = %err, "Dispatch failed for need");
    Ok(NeedDispatch {
        need_id,
        selected: Vec::new(),
        created: Vec::new(),
        failures: Vec::new(),
        skipped: None,
        error: Some(err.to_string()),
    })
}

impl DispatchOrchestrator {
    async fn load_context(&self, request_id: Uuid) -> Result<Option<roster::RequestContext>> {
        let mut conn = self.db.acquire().await?;
        roster::request_context(&mut conn, request_id).await
    }
}

#[async_trait]
impl ReplacementDispatcher for DispatchOrchestrator {
    async fn redispatch(&self, need_id: Uuid) -> Result<NeedDispatch> {
        self.dispatch_need(need_id).await
    }
}
