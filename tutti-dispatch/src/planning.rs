//! Need planning
//!
//! Creation-time validation of needs, plus pause/resume. The dispatcher
//! assumes a need is well formed; this is where malformed ones are refused.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;
use tutti_common::db::{Need, NeedStatus, Strategy};
use tutti_common::time;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::roster;

/// Stored strategy name, as accepted on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Sequential,
    Parallel,
    FirstCome,
}

/// Need definition as submitted
#[derive(Debug, Clone, Deserialize)]
pub struct NeedRequest {
    pub position_id: Uuid,
    pub list_id: Uuid,
    pub quantity: i64,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub max_recipients: Option<i64>,
    pub response_time_hours: i64,
    #[serde(default)]
    pub requires_local: bool,
}

/// Check the shape of a need and build its strategy
///
/// A first_come cap must be able to fill the need; an absent cap means the
/// whole eligible list. Caps on the other strategies are dropped.
pub fn validate(request: &NeedRequest) -> Result<Strategy> {
    if request.quantity < 1 {
        return Err(EngineError::InvalidConfiguration(format!(
            "quantity must be at least 1 (got {})",
            request.quantity
        )));
    }

    if request.response_time_hours < 1 {
        return Err(EngineError::InvalidConfiguration(format!(
            "response_time_hours must be at least 1 (got {})",
            request.response_time_hours
        )));
    }

    let strategy = match request.strategy {
        StrategyKind::Sequential => Strategy::Sequential,
        StrategyKind::Parallel => Strategy::Parallel,
        StrategyKind::FirstCome => {
            if let Some(cap) = request.max_recipients {
                if cap < request.quantity {
                    return Err(EngineError::InvalidConfiguration(format!(
                        "max_recipients ({}) must be at least quantity ({}) for first_come",
                        cap, request.quantity
                    )));
                }
            }
            Strategy::FirstCome {
                max_recipients: request.max_recipients,
            }
        }
    };

    Ok(strategy)
}

/// Create a need in `project_id`
pub async fn create_need(
    pool: &SqlitePool,
    project_id: Uuid,
    request: &NeedRequest,
    now: DateTime<Utc>,
) -> Result<Need> {
    let strategy = validate(request)?;

    let mut tx = pool.begin().await?;

    if !roster::project_exists(&mut tx, project_id).await? {
        return Err(EngineError::NotFound(format!("project {}", project_id)));
    }

    match roster::position_archived(&mut tx, request.position_id).await? {
        None => {
            return Err(EngineError::NotFound(format!(
                "position {}",
                request.position_id
            )))
        }
        Some(true) => {
            return Err(EngineError::InvalidConfiguration(format!(
                "position {} is archived",
                request.position_id
            )))
        }
        Some(false) => {}
    }

    match roster::list_position(&mut tx, request.list_id).await? {
        None => {
            return Err(EngineError::NotFound(format!(
                "ranked list {}",
                request.list_id
            )))
        }
        Some(position_id) if position_id != request.position_id => {
            return Err(EngineError::InvalidConfiguration(format!(
                "ranked list {} belongs to another position",
                request.list_id
            )))
        }
        Some(_) => {}
    }

    let need = Need {
        id: Uuid::new_v4(),
        project_id,
        position_id: request.position_id,
        list_id: request.list_id,
        quantity: request.quantity,
        strategy,
        response_time_hours: request.response_time_hours,
        requires_local: request.requires_local,
        status: NeedStatus::Active,
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO needs (id, project_id, position_id, list_id, quantity, strategy,
                           max_recipients, response_time_hours, requires_local, status,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(need.id.to_string())
    .bind(need.project_id.to_string())
    .bind(need.position_id.to_string())
    .bind(need.list_id.to_string())
    .bind(need.quantity)
    .bind(need.strategy.kind_str())
    .bind(need.strategy.max_recipients())
    .bind(need.response_time_hours)
    .bind(need.requires_local)
    .bind(need.status.as_str())
    .bind(time::to_db(now))
    .bind(time::to_db(now))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        need_id = %need.id,
        project_id = %project_id,
        strategy = need.strategy.kind_str(),
        quantity = need.quantity,
        "Need created"
    );

    Ok(need)
}

/// Pause an active need; dispatch skips it until resumed
pub async fn pause_need(pool: &SqlitePool, need_id: Uuid, now: DateTime<Utc>) -> Result<Need> {
    set_status(pool, need_id, NeedStatus::Active, NeedStatus::Paused, now).await
}

/// Resume a paused need
pub async fn resume_need(pool: &SqlitePool, need_id: Uuid, now: DateTime<Utc>) -> Result<Need> {
    set_status(pool, need_id, NeedStatus::Paused, NeedStatus::Active, now).await
}

async fn set_status(
    pool: &SqlitePool,
    need_id: Uuid,
    from: NeedStatus,
    to: NeedStatus,
    now: DateTime<Utc>,
) -> Result<Need> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query("UPDATE needs SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(time::to_db(now))
        .bind(need_id.to_string())
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let need = roster::load_need(&mut tx, need_id)
        .await?
        .ok_or(EngineError::NeedNotFound(need_id))?;

    // Repeating the same request is a no-op
    if updated == 0 && need.status != to {
        return Err(EngineError::InvalidConfiguration(format!(
            "need {} is {} and cannot become {}",
            need_id, need.status, to
        )));
    }

    tx.commit().await?;

    if updated == 1 {
        info!(need_id = %need_id, status = %to, "Need status changed");
    }

    Ok(need)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(strategy: StrategyKind, quantity: i64, max_recipients: Option<i64>) -> NeedRequest {
        NeedRequest {
            position_id: Uuid::new_v4(),
            list_id: Uuid::new_v4(),
            quantity,
            strategy,
            max_recipients,
            response_time_hours: 48,
            requires_local: false,
        }
    }

    #[test]
    fn test_rejects_zero_quantity() {
        let err = validate(&request(StrategyKind::Parallel, 0, None)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_rejects_zero_response_window() {
        let mut req = request(StrategyKind::Sequential, 1, None);
        req.response_time_hours = 0;
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_first_come_cap_below_quantity_rejected() {
        let err = validate(&request(StrategyKind::FirstCome, 3, Some(2))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_first_come_without_cap_accepted() {
        let strategy = validate(&request(StrategyKind::FirstCome, 2, None)).unwrap();
        assert_eq!(
            strategy,
            Strategy::FirstCome {
                max_recipients: None
            }
        );
    }

    #[test]
    fn test_cap_ignored_for_other_strategies() {
        let strategy = validate(&request(StrategyKind::Sequential, 1, Some(5))).unwrap();
        assert_eq!(strategy, Strategy::Sequential);
        assert_eq!(strategy.max_recipients(), None);
    }

    #[test]
    fn test_wire_format() {
        let req: NeedRequest = serde_json::from_value(serde_json::json!({
            "position_id": Uuid::new_v4(),
            "list_id": Uuid::new_v4(),
            "quantity": 2,
            "strategy": "first_come",
            "max_recipients": 4,
            "response_time_hours": 24
        }))
        .unwrap();
        assert_eq!(req.strategy, StrategyKind::FirstCome);
        assert!(!req.requires_local);
    }
}
