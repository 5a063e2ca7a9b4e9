//! End-to-end tests for the notification client against a served router.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use segunda_server::client::{
    run_session, Backoff, ClientConfig, ConnectionState, HttpApi, InboxView, NotificationClient,
    SseSubscription,
};
use segunda_server::config::Config;
use segunda_server::models::{GeoPoint, NewEvent, NewUser, NotificationKind, User};
use segunda_server::routes::create_routes;
use segunda_server::state::{AppState, StreamSettings};
use segunda_server::store::MemoryStore;
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn serve() -> (String, AppState) {
    let settings = StreamSettings {
        keepalive: Duration::from_millis(200),
        max_notification_page: 100,
    };
    let state = AppState::new(Arc::new(MemoryStore::new()), settings);
    let app = create_routes(state.clone(), &Config::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

async fn user(state: &AppState, name: &str) -> User {
    let user = NewUser {
        name: name.to_string(),
    }
    .into_user(Utc::now())
    .unwrap();
    state.store.insert_user(&user).await.unwrap();
    user
}

async fn wait_for(
    views: &mut watch::Receiver<InboxView>,
    done: impl Fn(&InboxView) -> bool,
) -> InboxView {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let view = views.borrow_and_update();
                if done(&view) {
                    return view.clone();
                }
            }
            views.changed().await.unwrap();
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_live_accept_reaches_client_inbox() {
    let (base_url, state) = serve().await;
    let organizer = user(&state, "org").await;
    let applicant = user(&state, "ana").await;
    let starts_at = Utc::now() + chrono::Duration::hours(1);
    let event = NewEvent {
        title: "Bicicleteada".to_string(),
        description: None,
        category: "turismo".to_string(),
        starts_at,
        ends_at: starts_at + chrono::Duration::hours(3),
        location: GeoPoint {
            lat: -34.6,
            lng: -58.4,
        },
        location_alias: None,
    }
    .into_event(organizer.id, Utc::now())
    .unwrap();
    state.store.insert_event(&event).await.unwrap();

    let api = HttpApi::new(base_url.clone());
    let client = Arc::new(NotificationClient::new(
        Arc::new(api.clone()),
        applicant.id,
        ClientConfig::new(base_url),
    ));
    let subscription = SseSubscription::connect(
        api.http().clone(),
        api.stream_url(applicant.id),
        applicant.id,
        Backoff::default(),
    );
    let mut views = client.watch();
    let session = {
        let client = client.clone();
        tokio::spawn(async move { run_session(&client, subscription).await })
    };

    wait_for(&mut views, |v| v.connection == ConnectionState::Open).await;

    let applied = api.apply(applicant.id, event.id).await.unwrap();
    assert!(applied.pending_approval_participants.contains(&applicant.id));
    let accepted = api.accept(organizer.id, event.id, applicant.id).await.unwrap();
    assert!(accepted.confirmed_participants.contains(&applicant.id));

    let view = wait_for(&mut views, |v| !v.inbox.is_empty()).await;
    assert_eq!(view.inbox.len(), 1);
    assert_eq!(view.inbox[0].kind, NotificationKind::ApplicationAccepted);
    assert_eq!(view.inbox[0].event_id, Some(event.id));
    assert_eq!(view.unread_count, 1);

    // Keepalives keep arriving without touching the inbox.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let view = client.view().await;
    assert_eq!(view.inbox.len(), 1);
    assert_eq!(view.connection, ConnectionState::Open);

    client.mark_all_as_read().await.unwrap();
    assert_eq!(client.unread_count().await, 0);
    let stored = state.store.notifications(applicant.id, 50).await.unwrap();
    assert!(stored.iter().all(|n| n.read));

    session.abort();
}

#[tokio::test]
async fn test_rejected_actions_explain_themselves() {
    let (base_url, state) = serve().await;
    let organizer = user(&state, "org").await;
    let applicant = user(&state, "ana").await;
    let starts_at = Utc::now() + chrono::Duration::hours(1);
    let event = NewEvent {
        title: "Coro".to_string(),
        description: None,
        category: "cultural".to_string(),
        starts_at,
        ends_at: starts_at + chrono::Duration::hours(1),
        location: GeoPoint { lat: 0.0, lng: 0.0 },
        location_alias: None,
    }
    .into_event(organizer.id, Utc::now())
    .unwrap();
    state.store.insert_event(&event).await.unwrap();

    let api = HttpApi::new(base_url);
    api.apply(applicant.id, event.id).await.unwrap();
    api.accept(organizer.id, event.id, applicant.id).await.unwrap();

    let again = api
        .accept(organizer.id, event.id, applicant.id)
        .await
        .unwrap_err();
    assert!(again.is_stale_state());
    assert!(again.user_message().contains("already resolved"));

    let denied = api.cancel(applicant.id, event.id).await.unwrap_err();
    assert!(denied.user_message().contains("not authorized"));

    let deleted = api.delete(organizer.id, event.id).await.unwrap();
    assert_eq!(deleted.status.as_str(), "deleted");
}
