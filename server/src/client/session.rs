use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::client::{ClientConfig, ClientError, NotificationApi, Subscription, SubscriptionEvent};
use crate::models::{Frame, Notification, NotificationId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What a failed read acknowledgement does to the local flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadAckPolicy {
    /// Leave the optimistic flip in place; the next refresh reconciles.
    #[default]
    KeepOptimistic,
    /// Restore the unread flag and count.
    Rollback,
}

/// Snapshot of client state handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxView {
    pub connection: ConnectionState,
    /// Most recent first.
    pub inbox: Vec<Notification>,
    pub unread_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Keepalive,
    Added(NotificationId),
    Duplicate(NotificationId),
    /// Addressed to another user; never shown.
    Foreign(NotificationId),
    Dropped(String),
}

#[derive(Debug)]
struct Inbox {
    connection: ConnectionState,
    entries: Vec<Notification>,
    unread: usize,
    shown: HashSet<NotificationId>,
    opened_before: bool,
}

impl Inbox {
    fn contains(&self, id: NotificationId) -> bool {
        self.shown.contains(&id) || self.entries.iter().any(|n| n.id == id)
    }

    fn view(&self) -> InboxView {
        debug_assert_eq!(
            self.unread,
            self.entries.iter().filter(|n| !n.read).count()
        );
        InboxView {
            connection: self.connection,
            inbox: self.entries.clone(),
            unread_count: self.unread,
        }
    }
}

/// One user's notification inbox, kept in step with the server.
///
/// The unread count only grows when a new unread notification arrives on
/// the live channel, and is recomputed from scratch on every snapshot load.
pub struct NotificationClient {
    api: Arc<dyn NotificationApi>,
    user: UserId,
    config: ClientConfig,
    inbox: Mutex<Inbox>,
    views: watch::Sender<InboxView>,
}

impl NotificationClient {
    pub fn new(api: Arc<dyn NotificationApi>, user: UserId, config: ClientConfig) -> Self {
        let inbox = Inbox {
            connection: ConnectionState::Connecting,
            entries: Vec::new(),
            unread: 0,
            shown: HashSet::new(),
            opened_before: false,
        };
        let (views, _) = watch::channel(inbox.view());
        Self {
            api,
            user,
            config,
            inbox: Mutex::new(inbox),
            views,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Receives a fresh [`InboxView`] after every change.
    pub fn watch(&self) -> watch::Receiver<InboxView> {
        self.views.subscribe()
    }

    pub async fn view(&self) -> InboxView {
        self.inbox.lock().await.view()
    }

    pub async fn unread_count(&self) -> usize {
        self.inbox.lock().await.unread
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inbox.lock().await.connection
    }

    fn publish(&self, inbox: &Inbox) {
        self.views.send_replace(inbox.view());
    }

    /// Replaces the inbox with the server's snapshot. The snapshot wins over
    /// any local optimism.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let snapshot = self
            .api
            .fetch_notifications(self.user, self.config.snapshot_limit)
            .await?;
        let mut inbox = self.inbox.lock().await;
        inbox.entries = snapshot
            .into_iter()
            .filter(|n| n.recipient_user_id == self.user)
            .collect();
        inbox.unread = inbox.entries.iter().filter(|n| !n.read).count();
        debug!(user_id = %self.user, loaded = inbox.entries.len(), unread = inbox.unread, "Inbox refreshed");
        self.publish(&inbox);
        Ok(())
    }

    /// Records a connection opening. Returns `true` when it is a reconnect,
    /// which means pushes may have been missed.
    pub async fn on_open(&self) -> bool {
        let mut inbox = self.inbox.lock().await;
        inbox.connection = ConnectionState::Open;
        let reconnect = inbox.opened_before;
        inbox.opened_before = true;
        self.publish(&inbox);
        reconnect
    }

    pub async fn on_transport_error(&self, reason: &str) {
        warn!(user_id = %self.user, reason, "Notification stream interrupted");
        let mut inbox = self.inbox.lock().await;
        if inbox.connection != ConnectionState::Closed {
            inbox.connection = ConnectionState::Connecting;
            self.publish(&inbox);
        }
    }

    pub async fn close(&self) {
        let mut inbox = self.inbox.lock().await;
        inbox.connection = ConnectionState::Closed;
        self.publish(&inbox);
    }

    /// Folds one raw live frame into the inbox. Never fails: anything that
    /// does not decode is logged and dropped.
    pub async fn handle_frame(&self, raw: &str) -> FrameOutcome {
        let notification = match Frame::decode(raw) {
            Ok(Frame::Keepalive) => return FrameOutcome::Keepalive,
            Ok(Frame::Notification(notification)) => notification,
            Err(e) => {
                warn!(user_id = %self.user, error = %e, "Dropping unreadable frame");
                return FrameOutcome::Dropped(e.to_string());
            }
        };

        let id = notification.id;
        if notification.recipient_user_id != self.user {
            warn!(user_id = %self.user, notification_id = %id, "Dropping frame addressed to another user");
            return FrameOutcome::Foreign(id);
        }

        let mut inbox = self.inbox.lock().await;
        if inbox.contains(id) {
            debug!(notification_id = %id, "Duplicate frame ignored");
            return FrameOutcome::Duplicate(id);
        }
        if !notification.read {
            inbox.unread += 1;
        }
        inbox.entries.insert(0, notification);
        self.publish(&inbox);
        FrameOutcome::Added(id)
    }

    /// Ids the presentation layer has already surfaced. They count as seen
    /// for duplicate suppression but stay unread.
    pub async fn note_shown(&self, ids: impl IntoIterator<Item = NotificationId>) {
        let mut inbox = self.inbox.lock().await;
        inbox.shown.extend(ids);
    }

    pub async fn mark_as_read(&self, id: NotificationId) -> Result<(), ClientError> {
        let flipped = {
            let mut inbox = self.inbox.lock().await;
            let flipped = match inbox.entries.iter_mut().find(|n| n.id == id) {
                Some(entry) if !entry.read => {
                    entry.read = true;
                    true
                }
                _ => false,
            };
            if flipped {
                inbox.unread = inbox.unread.saturating_sub(1);
                self.publish(&inbox);
            }
            flipped
        };

        let result = self.api.mark_read(self.user, id).await;
        if let Err(e) = &result {
            warn!(user_id = %self.user, notification_id = %id, error = %e, "Read acknowledgement failed");
            if flipped && self.config.read_ack == ReadAckPolicy::Rollback {
                let mut inbox = self.inbox.lock().await;
                if let Some(entry) = inbox.entries.iter_mut().find(|n| n.id == id && n.read) {
                    entry.read = false;
                    inbox.unread += 1;
                    self.publish(&inbox);
                }
            }
        }
        result
    }

    pub async fn mark_all_as_read(&self) -> Result<(), ClientError> {
        let flipped: Vec<NotificationId> = {
            let mut inbox = self.inbox.lock().await;
            let flipped = inbox
                .entries
                .iter_mut()
                .filter(|n| !n.read)
                .map(|n| {
                    n.read = true;
                    n.id
                })
                .collect();
            inbox.unread = 0;
            self.publish(&inbox);
            flipped
        };

        let result = self.api.mark_all_read(self.user).await;
        if let Err(e) = &result {
            warn!(user_id = %self.user, error = %e, "Bulk read acknowledgement failed");
            if self.config.read_ack == ReadAckPolicy::Rollback && !flipped.is_empty() {
                let mut inbox = self.inbox.lock().await;
                let mut restored = 0;
                for entry in inbox.entries.iter_mut() {
                    if entry.read && flipped.contains(&entry.id) {
                        entry.read = false;
                        restored += 1;
                    }
                }
                inbox.unread += restored;
                self.publish(&inbox);
            }
        }
        result
    }
}

/// Loads the snapshot, then drives the client from `subscription` until it
/// closes. Every reconnect triggers a refresh.
pub async fn run_session<S>(client: &NotificationClient, mut subscription: S)
where
    S: Subscription,
{
    if let Err(e) = client.refresh().await {
        warn!(user_id = %client.user(), error = %e, "Initial inbox load failed");
    }

    while let Some(event) = subscription.next().await {
        match event {
            SubscriptionEvent::Open => {
                if client.on_open().await {
                    info!(user_id = %client.user(), "Reconnected, refreshing inbox");
                    if let Err(e) = client.refresh().await {
                        warn!(user_id = %client.user(), error = %e, "Refresh after reconnect failed");
                    }
                }
            }
            SubscriptionEvent::Message(raw) => {
                client.handle_frame(&raw).await;
            }
            SubscriptionEvent::Error(reason) => client.on_transport_error(&reason).await,
        }
    }

    subscription.close();
    client.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChannelSubscription;
    use crate::models::NotificationKind;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeApi {
        snapshot: std::sync::Mutex<Vec<Notification>>,
        fail_acks: AtomicBool,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl NotificationApi for FakeApi {
        async fn fetch_notifications(
            &self,
            _user: UserId,
            limit: usize,
        ) -> Result<Vec<Notification>, ClientError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let snapshot = self.snapshot.lock().unwrap();
            Ok(snapshot.iter().take(limit).cloned().collect())
        }

        async fn mark_read(&self, _user: UserId, _id: NotificationId) -> Result<(), ClientError> {
            self.ack()
        }

        async fn mark_all_read(&self, _user: UserId) -> Result<(), ClientError> {
            self.ack()
        }
    }

    impl FakeApi {
        fn ack(&self) -> Result<(), ClientError> {
            if self.fail_acks.load(Ordering::SeqCst) {
                Err(ClientError::TransportFailure("offline".into()))
            } else {
                Ok(())
            }
        }
    }

    fn notification(recipient: UserId, read: bool) -> Notification {
        Notification {
            id: NotificationId::new(),
            recipient_user_id: recipient,
            kind: NotificationKind::ApplicationAccepted,
            title: "Application accepted".to_string(),
            message: "You are confirmed".to_string(),
            event_id: None,
            created_at: Utc::now(),
            read,
        }
    }

    fn frame(n: &Notification) -> String {
        format!("data: {}", serde_json::to_string(n).unwrap())
    }

    fn client(api: Arc<FakeApi>, policy: ReadAckPolicy) -> (NotificationClient, UserId) {
        let user = UserId::new();
        let mut config = ClientConfig::new("http://test");
        config.read_ack = policy;
        (NotificationClient::new(api, user, config), user)
    }

    #[tokio::test]
    async fn test_refresh_counts_unread_from_snapshot() {
        let api = Arc::new(FakeApi::default());
        let (client, user) = client(api.clone(), ReadAckPolicy::default());
        *api.snapshot.lock().unwrap() = vec![
            notification(user, false),
            notification(user, true),
            notification(UserId::new(), false),
        ];
        client.refresh().await.unwrap();
        let view = client.view().await;
        assert_eq!(view.inbox.len(), 2);
        assert_eq!(view.unread_count, 1);
    }

    #[tokio::test]
    async fn test_live_frame_prepends_and_counts_once() {
        let api = Arc::new(FakeApi::default());
        let (client, user) = client(api, ReadAckPolicy::default());
        let n = notification(user, false);

        assert_eq!(client.handle_frame(&frame(&n)).await, FrameOutcome::Added(n.id));
        assert_eq!(
            client.handle_frame(&frame(&n)).await,
            FrameOutcome::Duplicate(n.id)
        );
        let bare = serde_json::to_string(&n).unwrap();
        assert_eq!(client.handle_frame(&bare).await, FrameOutcome::Duplicate(n.id));

        let view = client.view().await;
        assert_eq!(view.inbox.len(), 1);
        assert_eq!(view.unread_count, 1);
    }

    #[tokio::test]
    async fn test_shown_ids_suppress_redelivery() {
        let api = Arc::new(FakeApi::default());
        let (client, user) = client(api, ReadAckPolicy::default());
        let n = notification(user, false);
        client.note_shown([n.id]).await;
        assert_eq!(
            client.handle_frame(&frame(&n)).await,
            FrameOutcome::Duplicate(n.id)
        );
        assert_eq!(client.unread_count().await, 0);
    }

    #[tokio::test]
    async fn test_foreign_and_garbage_frames_leave_inbox_alone() {
        let api = Arc::new(FakeApi::default());
        let (client, _) = client(api, ReadAckPolicy::default());
        let stranger = notification(UserId::new(), false);
        assert!(matches!(
            client.handle_frame(&frame(&stranger)).await,
            FrameOutcome::Foreign(_)
        ));
        assert!(matches!(
            client.handle_frame("hello").await,
            FrameOutcome::Dropped(_)
        ));
        assert_eq!(client.handle_frame(": keepalive").await, FrameOutcome::Keepalive);
        assert!(client.view().await.inbox.is_empty());
    }

    #[tokio::test]
    async fn test_mark_as_read_keeps_optimistic_flip_on_failure() {
        let api = Arc::new(FakeApi::default());
        let (client, user) = client(api.clone(), ReadAckPolicy::KeepOptimistic);
        let n = notification(user, false);
        client.handle_frame(&frame(&n)).await;

        api.fail_acks.store(true, Ordering::SeqCst);
        assert!(client.mark_as_read(n.id).await.is_err());
        let view = client.view().await;
        assert!(view.inbox[0].read);
        assert_eq!(view.unread_count, 0);
    }

    #[tokio::test]
    async fn test_rollback_policy_restores_unread() {
        let api = Arc::new(FakeApi::default());
        let (client, user) = client(api.clone(), ReadAckPolicy::Rollback);
        let first = notification(user, false);
        let second = notification(user, false);
        client.handle_frame(&frame(&first)).await;
        client.handle_frame(&frame(&second)).await;

        api.fail_acks.store(true, Ordering::SeqCst);
        assert!(client.mark_as_read(first.id).await.is_err());
        assert_eq!(client.unread_count().await, 2);
        assert!(client.mark_all_as_read().await.is_err());
        let view = client.view().await;
        assert_eq!(view.unread_count, 2);
        assert!(view.inbox.iter().all(|n| !n.read));
    }

    #[tokio::test]
    async fn test_mark_all_as_read_zeroes_count() {
        let api = Arc::new(FakeApi::default());
        let (client, user) = client(api, ReadAckPolicy::default());
        for _ in 0..3 {
            client.handle_frame(&frame(&notification(user, false))).await;
        }
        client.mark_all_as_read().await.unwrap();
        let view = client.view().await;
        assert_eq!(view.unread_count, 0);
        assert!(view.inbox.iter().all(|n| n.read));

        // Reading again never goes negative.
        client.mark_as_read(view.inbox[0].id).await.unwrap();
        assert_eq!(client.unread_count().await, 0);
    }

    #[tokio::test]
    async fn test_run_session_refreshes_after_reconnect() {
        let api = Arc::new(FakeApi::default());
        let (client, user) = client(api.clone(), ReadAckPolicy::default());
        let (tx, subscription) = ChannelSubscription::new(8);
        let missed = notification(user, false);

        tx.send(SubscriptionEvent::Open).await.unwrap();
        tx.send(SubscriptionEvent::Message("keepalive".into()))
            .await
            .unwrap();
        tx.send(SubscriptionEvent::Error("reset".into())).await.unwrap();
        api.snapshot.lock().unwrap().push(missed.clone());
        tx.send(SubscriptionEvent::Open).await.unwrap();
        drop(tx);

        let mut views = client.watch();
        run_session(&client, subscription).await;

        // Initial load plus one refresh after the reconnect.
        assert_eq!(api.fetches.load(Ordering::SeqCst), 2);
        let view = views.borrow_and_update().clone();
        assert_eq!(view.connection, ConnectionState::Closed);
        assert_eq!(view.inbox.len(), 1);
        assert_eq!(view.inbox[0].id, missed.id);
        assert_eq!(view.unread_count, 1);
    }
}
