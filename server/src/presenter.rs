//! What a UI needs from the inbox: transient toasts and the unread badge.
//!
//! Showing a toast never marks anything read. The badge is driven by the
//! client's unread count alone.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::models::{Notification, NotificationId};

pub const TOAST_LIFETIME: Duration = Duration::from_secs(5);
/// Vertical distance between stacked toasts, in pixels.
pub const TOAST_OFFSET: u32 = 80;
const BADGE_CAP: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub notification: Notification,
    pub shown_at: Instant,
}

#[derive(Debug)]
pub struct ToastQueue {
    lifetime: Duration,
    offset: u32,
    active: Vec<Toast>,
    shown: HashSet<NotificationId>,
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(TOAST_LIFETIME, TOAST_OFFSET)
    }
}

impl ToastQueue {
    pub fn new(lifetime: Duration, offset: u32) -> Self {
        Self {
            lifetime,
            offset,
            active: Vec::new(),
            shown: HashSet::new(),
        }
    }

    /// Queues a toast for every unread notification not shown before and
    /// returns their ids, so the caller can report them to the client.
    pub fn observe(&mut self, inbox: &[Notification], now: Instant) -> Vec<NotificationId> {
        let mut fresh = Vec::new();
        for notification in inbox {
            if notification.read || !self.shown.insert(notification.id) {
                continue;
            }
            fresh.push(notification.id);
            self.active.push(Toast {
                notification: notification.clone(),
                shown_at: now,
            });
        }
        fresh
    }

    pub fn dismiss(&mut self, id: NotificationId) -> bool {
        let before = self.active.len();
        self.active.retain(|t| t.notification.id != id);
        self.active.len() != before
    }

    /// Drops toasts older than the lifetime and returns their ids.
    pub fn expire(&mut self, now: Instant) -> Vec<NotificationId> {
        let lifetime = self.lifetime;
        let mut expired = Vec::new();
        self.active.retain(|t| {
            let alive = now.saturating_duration_since(t.shown_at) < lifetime;
            if !alive {
                expired.push(t.notification.id);
            }
            alive
        });
        expired
    }

    /// Visible toasts with their vertical offsets, top first.
    pub fn stacked(&self) -> impl Iterator<Item = (u32, &Toast)> + '_ {
        self.active
            .iter()
            .enumerate()
            .map(move |(i, toast)| (i as u32 * self.offset, toast))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn was_shown(&self, id: NotificationId) -> bool {
        self.shown.contains(&id)
    }
}

/// Badge text for an unread count; nothing at zero.
pub fn badge_label(unread: usize) -> Option<String> {
    match unread {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{}+", BADGE_CAP)),
        n => Some(n.to_string()),
    }
}
