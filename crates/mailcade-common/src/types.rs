//! Common types for mailcade

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users
pub type UserId = Uuid;

/// Unique identifier for senders
pub type SenderId = Uuid;

/// Unique identifier for messages
pub type MessageId = Uuid;

/// Unique identifier for batches
pub type BatchId = Uuid;

/// Lifecycle status of a scheduled message.
///
/// SENT and FAILED are terminal. A cancellation removes the row outright
/// rather than introducing a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Scheduled,
    Processing,
    Sent,
    Failed,
    RateLimited,
}

impl MessageStatus {
    /// Canonical string form, used both in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Scheduled => "SCHEDULED",
            MessageStatus::Processing => "PROCESSING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Failed => "FAILED",
            MessageStatus::RateLimited => "RATE_LIMITED",
        }
    }

    /// Whether no further transition may leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::Failed)
    }

    /// Legality of a single transition.
    ///
    /// PROCESSING -> PROCESSING is admitted for lease-expiry redelivery:
    /// a crashed worker leaves the row in PROCESSING and the next holder
    /// of the lease proceeds from there.
    pub fn can_transition(&self, to: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, to),
            (Scheduled, Processing)
                | (Processing, Processing)
                | (Processing, RateLimited)
                | (Processing, Sent)
                | (Processing, Scheduled)
                | (Processing, Failed)
                | (RateLimited, Scheduled)
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(MessageStatus::Scheduled),
            "PROCESSING" => Ok(MessageStatus::Processing),
            "SENT" => Ok(MessageStatus::Sent),
            "FAILED" => Ok(MessageStatus::Failed),
            "RATE_LIMITED" => Ok(MessageStatus::RateLimited),
            other => Err(crate::Error::Validation(format!(
                "Unknown message status: {}",
                other
            ))),
        }
    }
}

/// Clock used to identify the planner's hour buckets.
///
/// UTC keeps planner buckets aligned with the rate-limit counter keys;
/// local-time bucketing is retained for deployments that want caps to
/// follow the server's wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BucketClock {
    #[default]
    Utc,
    Local,
}

impl std::str::FromStr for BucketClock {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utc" => Ok(BucketClock::Utc),
            "local" => Ok(BucketClock::Local),
            other => Err(crate::Error::Config(format!(
                "Unknown bucket clock: {} (expected \"utc\" or \"local\")",
                other
            ))),
        }
    }
}

/// Pagination metadata attached to list responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let limit = limit.max(1);
        let total_pages = (total + limit - 1) / limit;
        Self {
            page,
            limit,
            total,
            total_pages,
            has_more: page < total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for status in [
            MessageStatus::Scheduled,
            MessageStatus::Processing,
            MessageStatus::Sent,
            MessageStatus::Failed,
            MessageStatus::RateLimited,
        ] {
            assert_eq!(MessageStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(MessageStatus::from_str("BOUNCED").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(MessageStatus::Sent.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Scheduled.is_terminal());
        assert!(!MessageStatus::Processing.is_terminal());
        assert!(!MessageStatus::RateLimited.is_terminal());
    }

    #[test]
    fn test_transition_matrix() {
        use MessageStatus::*;

        assert!(Scheduled.can_transition(Processing));
        assert!(Processing.can_transition(Sent));
        assert!(Processing.can_transition(Failed));
        assert!(Processing.can_transition(Scheduled));
        assert!(Processing.can_transition(RateLimited));
        assert!(RateLimited.can_transition(Scheduled));

        // lease-expiry redelivery
        assert!(Processing.can_transition(Processing));

        // terminal states admit nothing
        for to in [Scheduled, Processing, Sent, Failed, RateLimited] {
            assert!(!Sent.can_transition(to));
            assert!(!Failed.can_transition(to));
        }

        // no shortcut from SCHEDULED to a terminal state
        assert!(!Scheduled.can_transition(Sent));
        assert!(!Scheduled.can_transition(Failed));
        assert!(!RateLimited.can_transition(Sent));
    }

    #[test]
    fn test_bucket_clock_parse() {
        assert_eq!(BucketClock::from_str("utc").unwrap(), BucketClock::Utc);
        assert_eq!(BucketClock::from_str("LOCAL").unwrap(), BucketClock::Local);
        assert!(BucketClock::from_str("pacific").is_err());
    }

    #[test]
    fn test_pagination() {
        let p = Pagination::new(1, 20, 45);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_more);

        let p = Pagination::new(3, 20, 45);
        assert!(!p.has_more);

        let p = Pagination::new(1, 20, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_more);
    }
}
