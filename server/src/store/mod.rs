//! Event, user and notification persistence.
//!
//! [`Store::commit`] is the only way a participation transition reaches
//! storage. It writes the new event (compare-and-swap on `version`), the
//! notifications, the statistics deltas and the blacklist entry as one unit,
//! so a transition is either fully durable or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::models::{
    Category, Event, EventId, EventStatus, Notification, NotificationId, StatsDelta, User, UserId,
};
use crate::participation::BlacklistEntry;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event {0} changed since it was read")]
    VersionConflict(EventId),

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("user {user} is blacklisted by organizer {organizer}")]
    Blacklisted { organizer: UserId, user: UserId },

    #[error("user name '{0}' is taken")]
    DuplicateName(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("stored row is invalid: {0}")]
    Corrupt(String),
}

/// Everything one transition writes.
#[derive(Debug, Clone)]
pub struct Commit {
    pub event: Event,
    pub expected_version: i64,
    pub notifications: Vec<Notification>,
    pub stats: Vec<StatsDelta>,
    pub blacklist: Option<BlacklistEntry>,
    /// `(organizer, applicant)`: the commit fails with
    /// [`StoreError::Blacklisted`] if this pair is blacklisted when it lands.
    pub applicant_not_blacklisted: Option<(UserId, UserId)>,
}

/// Filters for the discover listing. Finalized events are never listed.
#[derive(Debug, Clone, Deserialize)]
pub struct EventQuery {
    #[serde(default = "default_status")]
    pub status: EventStatus,
    pub category: Option<Category>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub q: Option<String>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_status() -> EventStatus {
    EventStatus::Active
}

fn default_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            status: default_status(),
            category: None,
            from: None,
            to: None,
            q: None,
            skip: 0,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl EventQuery {
    pub fn clamped_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }

    /// `skip` as a SQL offset, saturating instead of wrapping negative.
    pub fn offset(&self) -> i64 {
        i64::try_from(self.skip).unwrap_or(i64::MAX)
    }

    pub fn matches(&self, event: &Event) -> bool {
        if event.status != self.status || event.finalized {
            return false;
        }
        if self.category.is_some_and(|c| c != event.category) {
            return false;
        }
        if self.from.is_some_and(|from| event.starts_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.starts_at > to) {
            return false;
        }
        match self.q.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => event.title.to_lowercase().contains(&q.to_lowercase()),
            _ => true,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with [`StoreError::DuplicateName`] when the name is taken.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError>;

    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError>;

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError>;

    async fn find_event(&self, id: EventId) -> Result<Option<Event>, StoreError>;

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError>;

    async fn events_by_organizer(&self, organizer: UserId) -> Result<Vec<Event>, StoreError>;

    /// Active, non-finalized events that have started but not been announced.
    async fn events_due_to_start(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError>;

    async fn is_blacklisted(&self, organizer: UserId, user: UserId) -> Result<bool, StoreError>;

    async fn commit(&self, commit: Commit) -> Result<Event, StoreError>;

    /// Most recent first.
    async fn notifications(
        &self,
        recipient: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Returns `false` when `recipient` owns no notification with this id.
    async fn mark_read(&self, recipient: UserId, id: NotificationId) -> Result<bool, StoreError>;

    /// Returns how many notifications flipped to read.
    async fn mark_all_read(&self, recipient: UserId) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_saturates_instead_of_wrapping() {
        let query = EventQuery {
            skip: usize::MAX,
            ..EventQuery::default()
        };
        assert_eq!(query.offset(), i64::MAX);
        assert_eq!(EventQuery::default().offset(), 0);
    }

    #[test]
    fn test_limit_is_clamped() {
        let mut query = EventQuery::default();
        query.limit = 0;
        assert_eq!(query.clamped_limit(), 1);
        query.limit = 10_000;
        assert_eq!(query.clamped_limit(), MAX_LIST_LIMIT);
    }
}
