//! tutti-dispatch library - recipient dispatch and response engine
//!
//! Decides which substitute musicians to contact for each open need of a
//! project, issues single-use response tokens, and turns accept/decline
//! answers into need completion, cancellations and replacement offers.

use std::sync::Arc;

use axum::Router;
use chrono::Duration;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;
use tutti_common::db::ConflictPolicy;

pub mod api;
pub mod availability;
pub mod commlog;
pub mod config;
pub mod conflict;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod orchestrator;
pub mod planning;
pub mod response;
pub mod roster;
pub mod strategy;
pub mod sweep;

use notify::{Notifier, ResponseLinks};
use orchestrator::{DispatchOrchestrator, ReplacementDispatcher};
use response::ResponseProcessor;
use sweep::Sweeper;

/// Engine tuning shared by the orchestrator, processor and sweeper
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub conflict_policy: ConflictPolicy,
    /// Base of the response links placed in notifications
    pub public_base_url: String,
    pub reminder_lead: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            public_base_url: format!("http://{}", config::DEFAULT_BIND_ADDR),
            reminder_lead: Duration::hours(config::DEFAULT_REMINDER_LEAD_HOURS),
        }
    }
}

impl From<&config::Settings> for EngineOptions {
    fn from(settings: &config::Settings) -> Self {
        Self {
            conflict_policy: settings.conflict_policy,
            public_base_url: settings.public_base_url.clone(),
            reminder_lead: settings.reminder_lead,
        }
    }
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub responses: Arc<ResponseProcessor>,
    pub sweeper: Arc<Sweeper>,
}

impl AppState {
    /// Wire the engine components around one pool and notifier
    pub fn new(db: SqlitePool, notifier: Arc<dyn Notifier>, options: EngineOptions) -> Self {
        let links = ResponseLinks::new(&options.public_base_url);

        let orchestrator = Arc::new(DispatchOrchestrator::new(
            db.clone(),
            notifier.clone(),
            options.conflict_policy,
            links.clone(),
        ));
        let replacement: Arc<dyn ReplacementDispatcher> = orchestrator.clone();

        let responses = Arc::new(ResponseProcessor::new(
            db.clone(),
            notifier.clone(),
            replacement.clone(),
            links.clone(),
        ));

        let sweeper = Arc::new(Sweeper::new(
            db.clone(),
            notifier,
            replacement,
            links,
            options.reminder_lead,
        ));

        Self {
            db,
            orchestrator,
            responses,
            sweeper,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let engine = Router::new()
        .route("/respond", get(api::show_response).post(api::submit_response))
        .route("/api/projects/:project_id/dispatch", post(api::dispatch_project))
        .route("/api/projects/:project_id/needs", post(api::create_need))
        .route("/api/needs/:need_id", get(api::get_need))
        .route("/api/needs/:need_id/dispatch", post(api::dispatch_need))
        .route("/api/needs/:need_id/pause", post(api::pause_need))
        .route("/api/needs/:need_id/resume", post(api::resume_need))
        .route("/api/sweeps/timeouts", post(api::run_timeout_sweep))
        .route("/api/sweeps/reminders", post(api::run_reminder_sweep));

    Router::new()
        .merge(engine)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
