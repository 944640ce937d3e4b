//! Shared fixtures for tutti-dispatch integration tests
#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;
use tutti_common::db::{
    init_database, CommunicationKind, CommunicationLogEntry, ConflictPolicy, NeedStatus, Request,
    RequestStatus,
};
use tutti_common::time;
use tutti_dispatch::notify::{Notification, Notifier, NotifyError, NotifyOutcome};
use tutti_dispatch::orchestrator::{NeedDispatch, ReplacementDispatcher};
use tutti_dispatch::planning::{self, NeedRequest, StrategyKind};
use tutti_dispatch::{commlog, roster, AppState, EngineOptions};
use uuid::Uuid;

/// On-disk database with one project
pub struct Fixture {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub project_id: Uuid,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let pool = init_database(&dir.path().join("tutti.db"))
            .await
            .expect("database");
        let project_id = Uuid::new_v4();

        sqlx::query("INSERT INTO projects (id, name) VALUES (?, ?)")
            .bind(project_id.to_string())
            .bind("Spring Gala")
            .execute(&pool)
            .await
            .unwrap();

        Self {
            _dir: dir,
            pool,
            project_id,
        }
    }

    /// Another project in the same database
    pub async fn project(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO projects (id, name) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(name)
            .execute(&self.pool)
            .await
            .unwrap();
        id
    }

    pub async fn musician(&self, name: &str, active: bool, local_resident: bool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO musicians (id, name, email, active, local_resident) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(email_of(name))
        .bind(active)
        .bind(local_resident)
        .execute(&self.pool)
        .await
        .unwrap();
        id
    }

    /// Active, non-local musicians named `{prefix}1..{prefix}n`
    pub async fn musicians(&self, prefix: &str, n: usize) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(n);
        for i in 1..=n {
            ids.push(self.musician(&format!("{}{}", prefix, i), true, false).await);
        }
        ids
    }

    pub async fn position(&self, name: &str, hierarchy_level: i64, display_order: i64) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO positions (id, name, instrument, hierarchy_level, display_order) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind("strings")
        .bind(hierarchy_level)
        .bind(display_order)
        .execute(&self.pool)
        .await
        .unwrap();
        id
    }

    /// Ranked list with `musicians` at ranks 1..n
    pub async fn ranked_list(&self, position_id: Uuid, variant: &str, musicians: &[Uuid]) -> Uuid {
        let ranked: Vec<(Uuid, i64)> = musicians
            .iter()
            .enumerate()
            .map(|(i, m)| (*m, i as i64 + 1))
            .collect();
        self.ranked_list_with_ranks(position_id, variant, &ranked).await
    }

    pub async fn ranked_list_with_ranks(
        &self,
        position_id: Uuid,
        variant: &str,
        entries: &[(Uuid, i64)],
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO ranked_lists (id, position_id, variant) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(position_id.to_string())
            .bind(variant)
            .execute(&self.pool)
            .await
            .unwrap();

        for (musician_id, rank) in entries {
            sqlx::query("INSERT INTO ranked_list_entries (list_id, musician_id, rank) VALUES (?, ?, ?)")
                .bind(id.to_string())
                .bind(musician_id.to_string())
                .bind(rank)
                .execute(&self.pool)
                .await
                .unwrap();
        }
        id
    }

    /// Position + list + need in one go
    pub async fn need_for(
        &self,
        musicians: &[Uuid],
        strategy: StrategyKind,
        quantity: i64,
        max_recipients: Option<i64>,
    ) -> Uuid {
        let position_id = self.position("Violin II", 2, 2).await;
        let list_id = self.ranked_list(position_id, "A", musicians).await;
        self.need(position_id, list_id, strategy, quantity, max_recipients)
            .await
    }

    pub async fn need(
        &self,
        position_id: Uuid,
        list_id: Uuid,
        strategy: StrategyKind,
        quantity: i64,
        max_recipients: Option<i64>,
    ) -> Uuid {
        let request = NeedRequest {
            position_id,
            list_id,
            quantity,
            strategy,
            max_recipients,
            response_time_hours: 48,
            requires_local: false,
        };
        planning::create_need(&self.pool, self.project_id, &request, time::now())
            .await
            .expect("create need")
            .id
    }

    pub async fn requests(&self, need_id: Uuid) -> Vec<Request> {
        let mut conn = self.pool.acquire().await.unwrap();
        roster::requests_for_need(&mut conn, need_id).await.unwrap()
    }

    /// Musicians holding a request on the need in the given status
    pub async fn musicians_with(&self, need_id: Uuid, status: RequestStatus) -> BTreeSet<Uuid> {
        self.requests(need_id)
            .await
            .into_iter()
            .filter(|r| r.status == status)
            .map(|r| r.musician_id)
            .collect()
    }

    pub async fn request_for(&self, need_id: Uuid, musician_id: Uuid) -> Request {
        self.requests(need_id)
            .await
            .into_iter()
            .find(|r| r.musician_id == musician_id)
            .expect("request for musician")
    }

    pub async fn token_for(&self, request_id: Uuid) -> String {
        sqlx::query("SELECT token FROM response_tokens WHERE request_id = ?")
            .bind(request_id.to_string())
            .fetch_one(&self.pool)
            .await
            .unwrap()
            .get("token")
    }

    /// Token of the request the musician holds on the need
    pub async fn token_of(&self, need_id: Uuid, musician_id: Uuid) -> String {
        let request = self.request_for(need_id, musician_id).await;
        self.token_for(request.id).await
    }

    pub async fn set_token_expiry(&self, request_id: Uuid, expires_at: DateTime<Utc>) {
        sqlx::query("UPDATE response_tokens SET expires_at = ? WHERE request_id = ?")
            .bind(time::to_db(expires_at))
            .bind(request_id.to_string())
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn need_status(&self, need_id: Uuid) -> NeedStatus {
        let mut conn = self.pool.acquire().await.unwrap();
        roster::load_need(&mut conn, need_id)
            .await
            .unwrap()
            .expect("need")
            .status
    }

    pub async fn log_entries(&self, request_id: Uuid) -> Vec<CommunicationLogEntry> {
        let mut conn = self.pool.acquire().await.unwrap();
        commlog::entries_for_request(&mut conn, request_id)
            .await
            .unwrap()
    }

    /// Pending requests per musician across the whole project
    pub async fn max_open_offers_per_musician(&self) -> i64 {
        sqlx::query(
            r#"
            SELECT COALESCE(MAX(c), 0) AS worst FROM (
                SELECT COUNT(*) AS c FROM requests
                WHERE project_id = ? AND status = 'pending'
                GROUP BY musician_id
            )
            "#,
        )
        .bind(self.project_id.to_string())
        .fetch_one(&self.pool)
        .await
        .unwrap()
        .get("worst")
    }

    pub fn state(&self, notifier: Arc<RecordingNotifier>, policy: ConflictPolicy) -> AppState {
        AppState::new(
            self.pool.clone(),
            notifier,
            EngineOptions {
                conflict_policy: policy,
                public_base_url: "http://tutti.test".to_string(),
                ..Default::default()
            },
        )
    }
}

pub fn set(ids: &[Uuid]) -> BTreeSet<Uuid> {
    ids.iter().copied().collect()
}

pub fn email_of(name: &str) -> String {
    format!("{}@example.org", name.to_lowercase())
}

/// Notifier double that records every message and fails on request
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every send to `recipient` fail
    pub fn fail_for(&self, recipient: &str) {
        self.failing.lock().unwrap().insert(recipient.to_string());
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Recipients of successfully sent messages of `kind`
    pub fn recipients(&self, kind: CommunicationKind) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.recipient)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<NotifyOutcome, NotifyError> {
        if self.failing.lock().unwrap().contains(&notification.recipient) {
            return Err(NotifyError::Transport("mail relay unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(NotifyOutcome::default())
    }
}

/// Replacement dispatcher double that records calls
#[derive(Default)]
pub struct RecordingReplacement {
    pub calls: Mutex<Vec<Uuid>>,
    pub fail: bool,
}

impl RecordingReplacement {
    pub fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplacementDispatcher for RecordingReplacement {
    async fn redispatch(&self, need_id: Uuid) -> tutti_dispatch::error::Result<NeedDispatch> {
        self.calls.lock().unwrap().push(need_id);
        if self.fail {
            return Err(tutti_dispatch::error::EngineError::InvariantViolation(
                "replacement unavailable".to_string(),
            ));
        }
        Ok(NeedDispatch {
            need_id,
            selected: Vec::new(),
            created: Vec::new(),
            failures: Vec::new(),
            skipped: None,
            error: None,
        })
    }
}
