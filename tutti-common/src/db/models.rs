//! Database models
//!
//! Row types for the staffing tables plus the closed enumerations stored in
//! them. Enumerations are persisted as their snake_case string form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Stored string form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::Decode(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// How cross-need conflicts are resolved within one project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// No suppression; every need may offer to the musician independently
    Simple,
    /// A musician is offered only by the need holding their best appearance
    #[default]
    Smart,
}

string_enum!(ConflictPolicy {
    Simple => "simple",
    Smart => "smart",
});

/// Lifecycle status of a need
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedStatus {
    Active,
    Completed,
    Paused,
}

string_enum!(NeedStatus {
    Active => "active",
    Completed => "completed",
    Paused => "paused",
});

/// Status of one contact attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    TimedOut,
    Cancelled,
}

string_enum!(RequestStatus {
    Pending => "pending",
    Accepted => "accepted",
    Declined => "declined",
    TimedOut => "timed_out",
    Cancelled => "cancelled",
});

impl RequestStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// Answer a musician gives through their response link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Accepted,
    Declined,
}

string_enum!(ResponseKind {
    Accepted => "accepted",
    Declined => "declined",
});

impl From<ResponseKind> for RequestStatus {
    fn from(kind: ResponseKind) -> Self {
        match kind {
            ResponseKind::Accepted => RequestStatus::Accepted,
            ResponseKind::Declined => RequestStatus::Declined,
        }
    }
}

/// Kind of communication event recorded against a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationKind {
    RequestSent,
    Reminder,
    ResponseReceived,
    Confirmation,
    PositionFilled,
}

string_enum!(CommunicationKind {
    RequestSent => "request_sent",
    Reminder => "reminder",
    ResponseReceived => "response_received",
    Confirmation => "confirmation",
    PositionFilled => "position_filled",
});

/// Result of a communication event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Outbound notification accepted by the collaborator
    Sent,
    /// Outbound notification failed; needs manual reconciliation
    Failed,
    /// Inbound event (a musician's response) captured
    Recorded,
}

string_enum!(DeliveryOutcome {
    Sent => "sent",
    Failed => "failed",
    Recorded => "recorded",
});

/// Dispatch strategy of a need
///
/// The recipient cap only exists for `FirstCome`; the other strategies define
/// their own concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Strategy {
    /// One open offer at a time, in rank order
    Sequential,
    /// Keep `quantity - accepted` offers open
    Parallel,
    /// One batch to the top of the list; first acceptances win
    FirstCome { max_recipients: Option<i64> },
}

impl Strategy {
    /// Stored `strategy` column value
    pub fn kind_str(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Parallel => "parallel",
            Strategy::FirstCome { .. } => "first_come",
        }
    }

    /// Stored `max_recipients` column value
    pub fn max_recipients(&self) -> Option<i64> {
        match self {
            Strategy::FirstCome { max_recipients } => *max_recipients,
            _ => None,
        }
    }

    /// Rebuild from the two stored columns
    pub fn from_columns(kind: &str, max_recipients: Option<i64>) -> Result<Self, Error> {
        match kind {
            "sequential" => Ok(Strategy::Sequential),
            "parallel" => Ok(Strategy::Parallel),
            "first_come" => Ok(Strategy::FirstCome { max_recipients }),
            other => Err(Error::Decode(format!("unknown Strategy '{}'", other))),
        }
    }
}

/// One musician's place in a ranked list, with the attributes eligibility needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub musician_id: Uuid,
    pub rank: i64,
    pub active: bool,
    pub local_resident: bool,
}

impl RankedCandidate {
    /// Whether `need` could ever contact this musician, ignoring engagement
    /// and conflicts
    pub fn qualifies_for(&self, need: &Need) -> bool {
        self.active && (!need.requires_local || self.local_resident)
    }
}

/// A staffing requirement within a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Need {
    pub id: Uuid,
    pub project_id: Uuid,
    pub position_id: Uuid,
    pub list_id: Uuid,
    pub quantity: i64,
    pub strategy: Strategy,
    pub response_time_hours: i64,
    pub requires_local: bool,
    pub status: NeedStatus,
    pub created_at: DateTime<Utc>,
}

/// One contact attempt pairing a need with a musician
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub need_id: Uuid,
    pub project_id: Uuid,
    pub musician_id: Uuid,
    pub status: RequestStatus,
    pub sent_at: DateTime<Utc>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub confirmation_sent: bool,
}

/// Single-use capability bound to one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseToken {
    pub token: String,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl ResponseToken {
    /// A token past its expiry may not authorize anything
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Append-only audit record of a communication event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationLogEntry {
    pub id: Uuid,
    pub request_id: Uuid,
    pub kind: CommunicationKind,
    pub recipient: String,
    pub outcome: DeliveryOutcome,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_status_round_trips_through_storage_form() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Accepted,
            RequestStatus::Declined,
            RequestStatus::TimedOut,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_only_pending_is_non_terminal() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Accepted.is_terminal());
        assert!(RequestStatus::Declined.is_terminal());
        assert!(RequestStatus::TimedOut.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_unknown_status_is_decode_error() {
        assert!(matches!(
            "expired".parse::<RequestStatus>(),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_strategy_columns() {
        let first_come = Strategy::FirstCome {
            max_recipients: Some(4),
        };
        assert_eq!(first_come.kind_str(), "first_come");
        assert_eq!(first_come.max_recipients(), Some(4));
        assert_eq!(
            Strategy::from_columns("first_come", Some(4)).unwrap(),
            first_come
        );

        // A stray cap on a sequential need is not carried into the domain type
        let sequential = Strategy::from_columns("sequential", Some(3)).unwrap();
        assert_eq!(sequential, Strategy::Sequential);
        assert_eq!(sequential.max_recipients(), None);

        assert!(Strategy::from_columns("lottery", None).is_err());
    }

    #[test]
    fn test_response_kind_maps_to_terminal_status() {
        assert_eq!(
            RequestStatus::from(ResponseKind::Accepted),
            RequestStatus::Accepted
        );
        assert_eq!(
            RequestStatus::from(ResponseKind::Declined),
            RequestStatus::Declined
        );
    }

    #[test]
    fn test_conflict_policy_serde_uses_snake_case() {
        let policy: ConflictPolicy = serde_json::from_str("\"smart\"").unwrap();
        assert_eq!(policy, ConflictPolicy::Smart);
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Smart);
    }
}
