//! Live notification channels, one per connected user.
//!
//! Delivery is at-most-once per connection: a notification published while
//! nobody is subscribed is simply not pushed (it is already in the inbox), and
//! a subscriber that falls too far behind skips what it missed. Clients fill
//! gaps by re-reading the inbox.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::models::{Notification, UserId};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct NotificationHub {
    channels: DashMap<UserId, broadcast::Sender<Notification>>,
    capacity: usize,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Registers a live stream for `user`. The channel stays registered until
    /// the last stream for that user is dropped.
    pub fn subscribe(self: &Arc<Self>, user: UserId) -> LiveStream {
        // Subscribing under the entry lock keeps a concurrent release from
        // removing the sender between lookup and subscribe.
        let receiver = {
            let entry = self.channels.entry(user).or_insert_with(|| {
                info!(user_id = %user, "Channel registered");
                broadcast::channel(self.capacity).0
            });
            entry.subscribe()
        };
        LiveStream {
            inner: BroadcastStream::new(receiver),
            user,
            _guard: ChannelGuard {
                hub: Arc::clone(self),
                user,
            },
        }
    }

    /// Pushes to the recipient's live channel. Returns whether any stream was
    /// connected to receive it.
    pub fn publish(&self, notification: &Notification) -> bool {
        let recipient = notification.recipient_user_id;
        let Some(sender) = self.channels.get(&recipient) else {
            debug!(user_id = %recipient, notification_id = %notification.id, "Recipient offline, not pushed");
            return false;
        };
        match sender.send(notification.clone()) {
            Ok(receivers) => {
                debug!(
                    user_id = %recipient,
                    notification_id = %notification.id,
                    receivers,
                    "Notification pushed"
                );
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_connected(&self, user: UserId) -> bool {
        self.channels
            .get(&user)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }

    pub fn connected_users(&self) -> usize {
        self.channels.len()
    }

    /// Ends every live stream. Used on shutdown so open connections finish.
    pub fn close_all(&self) {
        let open = self.channels.len();
        self.channels.clear();
        info!(open, "All live channels closed");
    }

    fn release(&self, user: UserId) {
        // The dropping receiver is already gone when this runs.
        let removed = self
            .channels
            .remove_if(&user, |_, sender| sender.receiver_count() == 0);
        if removed.is_some() {
            info!(user_id = %user, "Channel released");
        }
    }
}

struct ChannelGuard {
    hub: Arc<NotificationHub>,
    user: UserId,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.hub.release(self.user);
    }
}

/// Notifications pushed to one connection.
#[pin_project::pin_project]
pub struct LiveStream {
    // Declared before the guard so the receiver is dropped first.
    #[pin]
    inner: BroadcastStream<Notification>,
    user: UserId,
    _guard: ChannelGuard,
}

impl LiveStream {
    pub fn user(&self) -> UserId {
        self.user
    }
}

impl Stream for LiveStream {
    type Item = Notification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(notification))) => return Poll::Ready(Some(notification)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(user_id = %this.user, skipped, "Live stream lagged, frames dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
