use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::hub::NotificationHub;
use crate::models::{Event, EventId, UserId};
use crate::notify;
use crate::participation::{self, Action, Context};
use crate::store::{Commit, Store, StoreError};
use crate::utils::error::AppError;

const MAX_ATTEMPTS: usize = 3;

/// Runs participation actions end to end: load, transition, commit, push.
#[derive(Clone)]
pub struct ParticipationService {
    store: Arc<dyn Store>,
    hub: Arc<NotificationHub>,
}

impl ParticipationService {
    pub fn new(store: Arc<dyn Store>, hub: Arc<NotificationHub>) -> Self {
        Self { store, hub }
    }

    /// Applies `action` on behalf of `actor` and returns the committed event.
    ///
    /// The transition is re-evaluated against a fresh copy of the event when
    /// another writer commits first, so racing organizer actions serialize on
    /// the state machine's preconditions rather than overwrite each other.
    pub async fn perform(
        &self,
        event_id: EventId,
        actor: UserId,
        action: Action,
    ) -> Result<Event, AppError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let event = self
                .store
                .find_event(event_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", event_id)))?;

            let actor_blacklisted = match action {
                Action::Apply => self.store.is_blacklisted(event.organizer_id, actor).await?,
                _ => false,
            };
            let now = Utc::now();
            let ctx = Context {
                actor,
                now,
                actor_blacklisted,
            };

            let transition = participation::transition(&event, action, &ctx).map_err(|e| {
                debug!(event_id = %event_id, actor = %actor, action = action.name(), error = %e, "Transition refused");
                AppError::from(e)
            })?;
            let notifications = notify::emit(&transition, now);

            let commit = Commit {
                event: transition.event,
                expected_version: transition.previous_version,
                notifications: notifications.clone(),
                stats: transition.stats,
                blacklist: transition.blacklist,
                applicant_not_blacklisted: match action {
                    Action::Apply => Some((event.organizer_id, actor)),
                    _ => None,
                },
            };

            match self.store.commit(commit).await {
                Ok(committed) => {
                    info!(
                        event_id = %event_id,
                        actor = %actor,
                        action = action.name(),
                        version = committed.version,
                        notifications = notifications.len(),
                        "Transition committed"
                    );
                    // Only durable notifications are pushed.
                    for notification in &notifications {
                        self.hub.publish(notification);
                    }
                    return Ok(committed);
                }
                Err(StoreError::VersionConflict(_)) => {
                    warn!(event_id = %event_id, action = action.name(), attempt, "Version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Conflict(format!(
            "Event '{}' is being modified by someone else, try again",
            event_id
        )))
    }

    /// Announces every event whose start time has passed. Returns how many
    /// events were announced by this sweep.
    pub async fn sweep_started(&self) -> Result<usize, AppError> {
        let due = self.store.events_due_to_start(Utc::now()).await?;
        let mut announced = 0;
        for event in due {
            match self
                .perform(event.id, event.organizer_id, Action::MarkStarted)
                .await
            {
                Ok(_) => announced += 1,
                // Someone else got there first, or the event changed under us.
                Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if announced > 0 {
            info!(announced, "Start sweep announced events");
        }
        Ok(announced)
    }

    pub fn spawn_start_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_started().await {
                    error!(error = %e, "Start sweep failed");
                }
            }
        })
    }
}
