use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{Event, EventId, Notification, NotificationId, User, UserId};
use crate::store::{Commit, EventQuery, Store, StoreError};

/// Process-local store. One lock guards all tables so a commit is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    events: HashMap<EventId, Event>,
    /// (organizer, user)
    blacklist: HashSet<(UserId, UserId)>,
    /// Append order, oldest first.
    inboxes: HashMap<UserId, Vec<Notification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.name == user.name) {
            return Err(StoreError::DuplicateName(user.name.clone()));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.name == name).cloned())
    }

    async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.users.get(id).cloned())
            .collect())
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .events
            .insert(event.id, event.clone());
        Ok(())
    }

    async fn find_event(&self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.starts_at);
        Ok(events
            .into_iter()
            .skip(query.skip)
            .take(query.clamped_limit())
            .collect())
    }

    async fn events_by_organizer(&self, organizer: UserId) -> Result<Vec<Event>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .values()
            .filter(|e| e.organizer_id == organizer)
            .cloned()
            .collect())
    }

    async fn events_due_to_start(&self, now: DateTime<Utc>) -> Result<Vec<Event>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .values()
            .filter(|e| e.is_active() && !e.finalized && !e.started_notified && e.starts_at <= now)
            .cloned()
            .collect())
    }

    async fn is_blacklisted(&self, organizer: UserId, user: UserId) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .blacklist
            .contains(&(organizer, user)))
    }

    async fn commit(&self, commit: Commit) -> Result<Event, StoreError> {
        let mut tables = self.tables.write().await;
        let event_id = commit.event.id;
        let current = tables
            .events
            .get(&event_id)
            .ok_or(StoreError::EventNotFound(event_id))?;
        if current.version != commit.expected_version {
            return Err(StoreError::VersionConflict(event_id));
        }
        if let Some((organizer, user)) = commit.applicant_not_blacklisted {
            if tables.blacklist.contains(&(organizer, user)) {
                return Err(StoreError::Blacklisted { organizer, user });
            }
        }

        tables.events.insert(event_id, commit.event.clone());
        for delta in &commit.stats {
            if let Some(user) = tables.users.get_mut(&delta.user()) {
                delta.apply_to(user);
            }
        }
        if let Some(entry) = commit.blacklist {
            tables
                .blacklist
                .insert((entry.organizer_id, entry.user_id));
        }
        for notification in commit.notifications {
            tables
                .inboxes
                .entry(notification.recipient_user_id)
                .or_default()
                .push(notification);
        }
        Ok(commit.event)
    }

    async fn notifications(
        &self,
        recipient: UserId,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .inboxes
            .get(&recipient)
            .map(|inbox| inbox.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn mark_read(&self, recipient: UserId, id: NotificationId) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let found = tables
            .inboxes
            .get_mut(&recipient)
            .and_then(|inbox| inbox.iter_mut().find(|n| n.id == id))
            .map(|n| n.read = true)
            .is_some();
        Ok(found)
    }

    async fn mark_all_read(&self, recipient: UserId) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let mut flipped = 0;
        if let Some(inbox) = tables.inboxes.get_mut(&recipient) {
            for n in inbox.iter_mut().filter(|n| !n.read) {
                n.read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}
