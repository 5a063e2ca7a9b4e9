//! Turns a committed-to-be [`Transition`] into inbox records.
//!
//! One record per affected recipient, in the order the transition lists
//! them. The actor never receives a record for their own action.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::models::{Event, Notification, NotificationId, NotificationKind};
use crate::participation::{Action, Transition};

pub fn emit(transition: &Transition, now: DateTime<Utc>) -> Vec<Notification> {
    let Some(kind) = kind_for(&transition.action) else {
        return Vec::new();
    };
    let event = &transition.event;
    let (title, message) = render(kind, event);

    let mut seen = HashSet::new();
    transition
        .affected
        .iter()
        .copied()
        .filter(|recipient| *recipient != transition.actor)
        .filter(|recipient| seen.insert(*recipient))
        .map(|recipient| Notification {
            id: NotificationId::new(),
            recipient_user_id: recipient,
            kind,
            title: title.clone(),
            message: message.clone(),
            event_id: Some(event.id),
            created_at: now,
            read: false,
        })
        .collect()
}

fn kind_for(action: &Action) -> Option<NotificationKind> {
    match action {
        Action::Apply => Some(NotificationKind::NewApplication),
        Action::Accept { .. } => Some(NotificationKind::ApplicationAccepted),
        Action::Reject { .. } => Some(NotificationKind::ApplicationRejected),
        Action::Cancel => Some(NotificationKind::EventCancelled),
        Action::Complete => Some(NotificationKind::EventFinished),
        Action::MarkStarted => Some(NotificationKind::EventStarted),
        Action::Delete | Action::NoShow { .. } => None,
    }
}

fn render(kind: NotificationKind, event: &Event) -> (String, String) {
    let title = &event.title;
    match kind {
        NotificationKind::NewApplication => (
            "New application".to_string(),
            format!("Someone applied to \"{}\" and is waiting for your approval.", title),
        ),
        NotificationKind::ApplicationAccepted => (
            "Application accepted".to_string(),
            format!("You are confirmed for \"{}\".", title),
        ),
        NotificationKind::ApplicationRejected => (
            "Application rejected".to_string(),
            format!("Your application to \"{}\" was not accepted.", title),
        ),
        NotificationKind::EventStarted => (
            "Event started".to_string(),
            format!("\"{}\" is starting now.", title),
        ),
        NotificationKind::EventFinished => (
            "Event finished".to_string(),
            format!("\"{}\" has finished. Thanks for joining!", title),
        ),
        NotificationKind::EventCancelled => (
            "Event cancelled".to_string(),
            format!("\"{}\" was cancelled by the organizer.", title),
        ),
    }
}
