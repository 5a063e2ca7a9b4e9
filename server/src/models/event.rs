use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::{EventId, UserId};
use crate::utils::error::AppError;

const TITLE_MAX_CHARS: usize = 100;
const DESCRIPTION_MAX_CHARS: usize = 2000;
const ALIAS_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Deportes,
    Cultural,
    Gastronomia,
    Turismo,
    Networking,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Deportes,
        Category::Cultural,
        Category::Gastronomia,
        Category::Turismo,
        Category::Networking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Deportes => "deportes",
            Category::Cultural => "cultural",
            Category::Gastronomia => "gastronomia",
            Category::Turismo => "turismo",
            Category::Networking => "networking",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AppError::ValidationError(format!("Unknown category '{}'", s)))
    }
}

/// Lifecycle status. `Cancelled` and `Deleted` are terminal for participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Cancelled,
    Deleted,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "active",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EventStatus::Active),
            "cancelled" => Ok(EventStatus::Cancelled),
            "deleted" => Ok(EventStatus::Deleted),
            other => Err(AppError::ValidationError(format!(
                "Unknown event status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub organizer_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: GeoPoint,
    pub location_alias: Option<String>,
    pub status: EventStatus,
    pub finalized: bool,
    /// Set once `event_started` has been emitted for this event.
    pub started_notified: bool,
    pub confirmed_participants: BTreeSet<UserId>,
    pub pending_approval_participants: BTreeSet<UserId>,
    /// Bumped on every committed transition; used for compare-and-swap.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_organizer(&self, user: UserId) -> bool {
        self.organizer_id == user
    }

    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }

    /// Pending and confirmed are disjoint and never contain the organizer.
    pub fn participants_consistent(&self) -> bool {
        self.pending_approval_participants
            .is_disjoint(&self.confirmed_participants)
            && !self.pending_approval_participants.contains(&self.organizer_id)
            && !self.confirmed_participants.contains(&self.organizer_id)
    }
}

/// Body of `POST /events`. The organizer comes from the caller's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: GeoPoint,
    pub location_alias: Option<String>,
}

impl NewEvent {
    pub fn into_event(self, organizer_id: UserId, now: DateTime<Utc>) -> Result<Event, AppError> {
        let title = self.title.trim().to_string();
        let title_len = title.chars().count();
        if title_len == 0 || title_len > TITLE_MAX_CHARS {
            return Err(AppError::ValidationError(format!(
                "Title must be between 1 and {} characters",
                TITLE_MAX_CHARS
            )));
        }
        if let Some(description) = &self.description {
            if description.chars().count() > DESCRIPTION_MAX_CHARS {
                return Err(AppError::ValidationError(format!(
                    "Description must be at most {} characters",
                    DESCRIPTION_MAX_CHARS
                )));
            }
        }
        if let Some(alias) = &self.location_alias {
            if alias.chars().count() > ALIAS_MAX_CHARS {
                return Err(AppError::ValidationError(format!(
                    "Location alias must be at most {} characters",
                    ALIAS_MAX_CHARS
                )));
            }
        }
        if self.starts_at >= self.ends_at {
            return Err(AppError::ValidationError(
                "Event must start before it ends".to_string(),
            ));
        }
        if !self.location.is_valid() {
            return Err(AppError::ValidationError(
                "Location is out of range".to_string(),
            ));
        }
        let category = self.category.parse::<Category>()?;

        Ok(Event {
            id: EventId::new(),
            organizer_id,
            title,
            description: self.description,
            category,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            location: self.location,
            location_alias: self.location_alias,
            status: EventStatus::Active,
            finalized: false,
            started_notified: false,
            confirmed_participants: BTreeSet::new(),
            pending_approval_participants: BTreeSet::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// An organizer's own events, split the way the "my events" page shows them.
/// Cancelled events are not listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MyEvents {
    pub active_open: Vec<Event>,
    pub active_finished: Vec<Event>,
    pub deleted: Vec<Event>,
}

impl MyEvents {
    pub fn group(events: Vec<Event>, now: DateTime<Utc>) -> Self {
        let mut grouped = MyEvents::default();
        for event in events {
            match event.status {
                EventStatus::Active if event.finalized || event.ends_at < now => {
                    grouped.active_finished.push(event)
                }
                EventStatus::Active => grouped.active_open.push(event),
                EventStatus::Deleted => grouped.deleted.push(event),
                EventStatus::Cancelled => {}
            }
        }
        grouped.active_open.sort_by_key(|e| e.starts_at);
        grouped
            .active_finished
            .sort_by(|a, b| b.ends_at.cmp(&a.ends_at));
        grouped
            .deleted
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        grouped
    }
}
