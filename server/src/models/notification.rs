//! Notification records and the text frames they travel in.
//!
//! A live frame is one of:
//!
//! - a keepalive marker (`keepalive`, or the SSE comment `: keepalive`)
//! - a notification payload, either prefixed (`data: {...}`) or bare (`{...}`)
//!
//! Both payload encodings decode to the same [`Notification`]. Anything else,
//! including a payload whose `type` is not a known [`NotificationKind`], is a
//! [`FrameError`] that callers log and drop.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ids::{EventId, NotificationId, UserId};

pub const KEEPALIVE: &str = "keepalive";

const DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewApplication,
    ApplicationAccepted,
    ApplicationRejected,
    EventStarted,
    EventFinished,
    EventCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewApplication => "new_application",
            NotificationKind::ApplicationAccepted => "application_accepted",
            NotificationKind::ApplicationRejected => "application_rejected",
            NotificationKind::EventStarted => "event_started",
            NotificationKind::EventFinished => "event_finished",
            NotificationKind::EventCancelled => "event_cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            NotificationKind::NewApplication,
            NotificationKind::ApplicationAccepted,
            NotificationKind::ApplicationRejected,
            NotificationKind::EventStarted,
            NotificationKind::EventFinished,
            NotificationKind::EventCancelled,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a recipient's inbox. Only `read` ever changes, and only
/// from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub event_id: Option<EventId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unrecognized frame: {0:?}")]
    Unrecognized(String),

    #[error("malformed notification payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Keepalive,
    Notification(Notification),
}

impl Frame {
    pub fn decode(raw: &str) -> Result<Frame, FrameError> {
        let trimmed = raw.trim();

        if trimmed == KEEPALIVE {
            return Ok(Frame::Keepalive);
        }
        if let Some(comment) = trimmed.strip_prefix(':') {
            if comment.trim() == KEEPALIVE {
                return Ok(Frame::Keepalive);
            }
            return Err(FrameError::Unrecognized(raw.to_string()));
        }

        let payload = match trimmed.strip_prefix(DATA_PREFIX) {
            Some(rest) => rest.trim_start(),
            None if trimmed.starts_with('{') => trimmed,
            None => return Err(FrameError::Unrecognized(raw.to_string())),
        };

        let notification = serde_json::from_str::<Notification>(payload)?;
        Ok(Frame::Notification(notification))
    }

    /// Prefixed encoding, as written by the stream server.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Frame::Keepalive => Ok(format!(": {}", KEEPALIVE)),
            Frame::Notification(n) => Ok(format!("{} {}", DATA_PREFIX, serde_json::to_string(n)?)),
        }
    }
}
