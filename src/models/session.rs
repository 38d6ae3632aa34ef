//! Session model and lifecycle helpers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for an intake session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session accepts screenshots and text.
    Active,
    /// Session finalized; the working set is ready for export.
    Completed,
    /// Session abandoned by the user or replaced by a newer one.
    Cancelled,
}

impl SessionStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// What the user opened the session for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Exactly one screenshot, then finalize.
    Oneshot,
    /// Up to the configured number of screenshots.
    Multishot,
    /// Extend a previously exported working set with new screenshots.
    Edit,
    /// Re-price an existing working set.
    PriceUpdate,
}

impl SessionKind {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oneshot => "oneshot",
            Self::Multishot => "multishot",
            Self::Edit => "edit",
            Self::PriceUpdate => "price_update",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "oneshot" => Some(Self::Oneshot),
            "multishot" => Some(Self::Multishot),
            "edit" => Some(Self::Edit),
            "price_update" => Some(Self::PriceUpdate),
            _ => None,
        }
    }

    /// Screenshot cap for this kind given the configured multi-shot limit.
    #[must_use]
    pub fn screenshot_limit(self, configured: u32) -> u32 {
        match self {
            Self::Oneshot => 1,
            Self::PriceUpdate => 0,
            Self::Multishot | Self::Edit => configured,
        }
    }
}

/// Session domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Owning user identifier.
    pub owner_user_id: String,
    /// Session purpose.
    pub kind: SessionKind,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Screenshots allowed over the whole session.
    pub screenshot_limit: u32,
    /// Screenshots consumed so far, across batches.
    pub screenshot_count: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Absolute expiry; an expired session is finalized at the next checkpoint.
    pub expires_at: DateTime<Utc>,
    /// Set when the session leaves `Active`.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Construct a new active session with a generated identifier.
    #[must_use]
    pub fn new(owner_user_id: String, kind: SessionKind, screenshot_limit: u32, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_user_id,
            kind,
            status: SessionStatus::Active,
            screenshot_limit,
            screenshot_count: 0,
            created_at: now,
            expires_at: now + ttl,
            completed_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                SessionStatus::Active,
                SessionStatus::Completed | SessionStatus::Cancelled
            )
        )
    }

    /// Whether the absolute expiry has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
