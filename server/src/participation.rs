//! Participation state machine.
//!
//! Every organizer or applicant action is a pure function of the current
//! [`Event`], the acting user and the clock. A successful call returns a
//! [`Transition`] carrying the next event value plus the side effects that
//! must be committed with it; a failed call leaves nothing behind.
//!
//! | Action | Who | Requires |
//! |---|---|---|
//! | `Apply` | anyone but the organizer | active, not blacklisted, not yet a participant |
//! | `Accept` | organizer | active, user pending |
//! | `Reject` | organizer | active, user pending |
//! | `Cancel` | organizer | active |
//! | `Complete` | organizer | active, not finalized |
//! | `Delete` | organizer | not already deleted |
//! | `NoShow` | organizer | finalized, user confirmed |
//! | `MarkStarted` | organizer (the start sweeper acts on its behalf) | active, not finalized, started, not yet announced |

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{Event, EventId, EventStatus, StatsDelta, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParticipationError {
    /// The event is not in a state that allows the action.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The target user or event is not where the action expects it.
    #[error("not found: {0}")]
    NotFound(String),

    /// The actor may not perform the action.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

/// Where a user stands with respect to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationState {
    None,
    Pending,
    Confirmed,
}

pub fn participation_of(event: &Event, user: UserId) -> ParticipationState {
    if event.confirmed_participants.contains(&user) {
        ParticipationState::Confirmed
    } else if event.pending_approval_participants.contains(&user) {
        ParticipationState::Pending
    } else {
        ParticipationState::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Apply,
    Accept { user: UserId },
    Reject { user: UserId, blacklist: bool },
    Cancel,
    Complete,
    Delete,
    NoShow { user: UserId, blacklist: bool },
    MarkStarted,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Accept { .. } => "accept",
            Action::Reject { .. } => "reject",
            Action::Cancel => "cancel",
            Action::Complete => "complete",
            Action::Delete => "delete",
            Action::NoShow { .. } => "no_show",
            Action::MarkStarted => "mark_started",
        }
    }
}

/// Marks `user_id` as not welcome at any future event of `organizer_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub organizer_id: UserId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub created_at: DateTime<Utc>,
}

/// Facts the machine cannot derive from the event itself.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub actor: UserId,
    pub now: DateTime<Utc>,
    /// Whether the actor is on the organizer's blacklist. Only read by `Apply`.
    pub actor_blacklisted: bool,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub action: Action,
    pub actor: UserId,
    pub previous_version: i64,
    pub event: Event,
    /// Users the transition concerns, in the order they should be told.
    pub affected: Vec<UserId>,
    pub blacklist: Option<BlacklistEntry>,
    pub stats: Vec<StatsDelta>,
}

pub fn transition(
    event: &Event,
    action: Action,
    ctx: &Context,
) -> Result<Transition, ParticipationError> {
    if action != Action::Apply && !event.is_organizer(ctx.actor) {
        return Err(ParticipationError::Forbidden(format!(
            "Only the organizer can {} this event",
            action.name()
        )));
    }

    let mut next = event.clone();
    let mut affected = Vec::new();
    let mut blacklist = None;
    let mut stats = Vec::new();

    match action {
        Action::Apply => {
            require_active(event)?;
            if event.is_organizer(ctx.actor) {
                return Err(ParticipationError::Forbidden(
                    "The organizer cannot apply to their own event".to_string(),
                ));
            }
            if ctx.actor_blacklisted {
                return Err(ParticipationError::Forbidden(
                    "The organizer has blocked you from their events".to_string(),
                ));
            }
            match participation_of(event, ctx.actor) {
                ParticipationState::None => {}
                ParticipationState::Pending => {
                    return Err(ParticipationError::Conflict(
                        "You already applied to this event".to_string(),
                    ))
                }
                ParticipationState::Confirmed => {
                    return Err(ParticipationError::Conflict(
                        "You are already confirmed for this event".to_string(),
                    ))
                }
            }
            next.pending_approval_participants.insert(ctx.actor);
            affected.push(event.organizer_id);
        }
        Action::Accept { user } => {
            require_active(event)?;
            require_pending(event, user)?;
            next.pending_approval_participants.remove(&user);
            next.confirmed_participants.insert(user);
            affected.push(user);
        }
        Action::Reject {
            user,
            blacklist: with_blacklist,
        } => {
            require_active(event)?;
            require_pending(event, user)?;
            next.pending_approval_participants.remove(&user);
            if with_blacklist {
                blacklist = Some(BlacklistEntry {
                    organizer_id: event.organizer_id,
                    user_id: user,
                    event_id: event.id,
                    created_at: ctx.now,
                });
            }
            affected.push(user);
        }
        Action::Cancel => {
            require_active(event)?;
            next.status = EventStatus::Cancelled;
            affected.extend(event.confirmed_participants.iter().copied());
            affected.extend(event.pending_approval_participants.iter().copied());
        }
        Action::Complete => {
            require_active(event)?;
            if event.finalized {
                return Err(ParticipationError::Conflict(
                    "The event is already finalized".to_string(),
                ));
            }
            next.finalized = true;
            stats.extend(
                event
                    .confirmed_participants
                    .iter()
                    .map(|user| StatsDelta::EventVisited(*user)),
            );
            stats.push(StatsDelta::EventOrganized(event.organizer_id));
            affected.extend(event.confirmed_participants.iter().copied());
        }
        Action::Delete => {
            if event.status == EventStatus::Deleted {
                return Err(ParticipationError::Conflict(
                    "The event is already deleted".to_string(),
                ));
            }
            next.status = EventStatus::Deleted;
        }
        Action::NoShow {
            user,
            blacklist: with_blacklist,
        } => {
            if !event.finalized {
                return Err(ParticipationError::Conflict(
                    "No-shows can only be recorded after the event is finalized".to_string(),
                ));
            }
            if !event.confirmed_participants.contains(&user) {
                return Err(ParticipationError::NotFound(format!(
                    "User '{}' was not a confirmed participant",
                    user
                )));
            }
            stats.push(StatsDelta::NoShow(user));
            if with_blacklist {
                blacklist = Some(BlacklistEntry {
                    organizer_id: event.organizer_id,
                    user_id: user,
                    event_id: event.id,
                    created_at: ctx.now,
                });
            }
        }
        Action::MarkStarted => {
            require_active(event)?;
            if event.finalized || event.started_notified || event.starts_at > ctx.now {
                return Err(ParticipationError::Conflict(
                    "The event start has already been announced or is not due".to_string(),
                ));
            }
            next.started_notified = true;
            affected.extend(event.confirmed_participants.iter().copied());
        }
    }

    next.version = event.version + 1;
    next.updated_at = ctx.now;
    debug_assert!(next.participants_consistent());

    Ok(Transition {
        action,
        actor: ctx.actor,
        previous_version: event.version,
        event: next,
        affected,
        blacklist,
        stats,
    })
}

fn require_active(event: &Event) -> Result<(), ParticipationError> {
    match event.status {
        EventStatus::Active => Ok(()),
        status => Err(ParticipationError::Conflict(format!(
            "The event is {} and no longer accepts changes",
            status
        ))),
    }
}

fn require_pending(event: &Event, user: UserId) -> Result<(), ParticipationError> {
    if event.pending_approval_participants.contains(&user) {
        Ok(())
    } else {
        Err(ParticipationError::NotFound(format!(
            "User '{}' has no pending application; it may have been resolved already",
            user
        )))
    }
}
