//! Integration tests for the HTTP surface.
//!
//! The router is driven through `tower::ServiceExt::oneshot` against the
//! in-memory store, so no database or socket is needed.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use futures::StreamExt;
use segunda_server::client::SseParser;
use segunda_server::config::Config;
use segunda_server::models::{Frame, NotificationKind};
use segunda_server::routes::create_routes;
use segunda_server::state::{AppState, StreamSettings};
use segunda_server::store::MemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let state = AppState::new(Arc::new(MemoryStore::new()), StreamSettings::default());
        Self {
            router: create_routes(state, &Config::default()),
        }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(path);
        if let Some(user) = user {
            request = request.header("X-User-Id", user);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(&self, name: &str) -> String {
        let (status, json) = self
            .call(
                Method::POST,
                "/users/register",
                None,
                Some(json!({ "name": name })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{json}");
        json["data"]["id"].as_str().unwrap().to_string()
    }

    async fn create_event(&self, organizer: &str, title: &str) -> String {
        let starts_at = Utc::now() + chrono::Duration::hours(2);
        let (status, json) = self
            .call(
                Method::POST,
                "/events",
                Some(organizer),
                Some(json!({
                    "title": title,
                    "description": "Bring water",
                    "category": "deportes",
                    "starts_at": starts_at,
                    "ends_at": starts_at + chrono::Duration::hours(2),
                    "location": { "lat": -34.6, "lng": -58.4 },
                    "location_alias": "Parque"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{json}");
        json["data"]["id"].as_str().unwrap().to_string()
    }

    async fn act(&self, actor: &str, event: &str, action: &str, body: Option<Value>) -> (StatusCode, Value) {
        let method = match action {
            "cancel" => Method::PATCH,
            _ => Method::POST,
        };
        self.call(method, &format!("/events/{}/{}", event, action), Some(actor), body)
            .await
    }

    async fn notifications(&self, user: &str) -> Vec<Value> {
        let (status, json) = self
            .call(Method::GET, "/notifications?limit=50", Some(user), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        json["data"].as_array().unwrap().clone()
    }
}

fn ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_and_categories() {
    let app = TestApp::new();
    let (status, json) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "ok");

    let (status, json) = app.call(Method::GET, "/categories", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_register_login_and_identity() {
    let app = TestApp::new();
    let id = app.register("ana").await;

    let (status, json) = app
        .call(Method::POST, "/users/register", None, Some(json!({ "name": "ana" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");

    let (status, json) = app
        .call(Method::POST, "/users/login", None, Some(json!({ "name": "ana" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["id"], id.as_str());

    let (status, json) = app.call(Method::GET, "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "AUTH_ERROR");

    let (status, json) = app.call(Method::GET, "/users/me", Some(&id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["name"], "ana");

    let (status, json) = app
        .call(Method::POST, "/users/batch", None, Some(json!({ "ids": [id] })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"][0]["name"], "ana");
}

#[tokio::test]
async fn test_create_event_validates_input() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let starts_at = Utc::now() + chrono::Duration::hours(2);
    let (status, json) = app
        .call(
            Method::POST,
            "/events",
            Some(&organizer),
            Some(json!({
                "title": "Backwards",
                "category": "cultural",
                "starts_at": starts_at,
                "ends_at": starts_at - chrono::Duration::hours(1),
                "location": { "lat": 0.0, "lng": 0.0 }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_apply_then_accept_notifies_applicant_once() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let applicant = app.register("ana").await;
    let event = app.create_event(&organizer, "Futbol").await;

    let (status, json) = app.act(&applicant, &event, "apply", None).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(ids(&json["data"]["pending_approval_participants"]), vec![applicant.clone()]);
    assert_eq!(json["data"]["participation"], "pending");

    let org_inbox = app.notifications(&organizer).await;
    assert_eq!(org_inbox.len(), 1);
    assert_eq!(org_inbox[0]["type"], "new_application");

    let (status, json) = app
        .act(&organizer, &event, "accept", Some(json!({ "user_id": applicant })))
        .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert!(ids(&json["data"]["pending_approval_participants"]).is_empty());
    assert_eq!(ids(&json["data"]["confirmed_participants"]), vec![applicant.clone()]);

    let inbox = app.notifications(&applicant).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["type"], "application_accepted");
    assert_eq!(inbox[0]["event_id"], event.as_str());
    assert_eq!(inbox[0]["read"], false);

    // The organizer is never told about their own accept.
    assert_eq!(app.notifications(&organizer).await.len(), 1);
}

#[tokio::test]
async fn test_double_apply_and_organizer_apply_are_refused() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let applicant = app.register("ana").await;
    let event = app.create_event(&organizer, "Museo").await;

    app.act(&applicant, &event, "apply", None).await;
    let (status, _) = app.act(&applicant, &event, "apply", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.act(&organizer, &event, "apply", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reject_with_blacklist_blocks_future_applications() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let applicant = app.register("bruno").await;
    let first = app.create_event(&organizer, "Asado").await;
    let second = app.create_event(&organizer, "Picnic").await;

    app.act(&applicant, &first, "apply", None).await;
    let (status, json) = app
        .act(
            &organizer,
            &first,
            "reject",
            Some(json!({ "user_id": applicant, "blacklist": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(ids(&json["data"]["pending_approval_participants"]).is_empty());

    let inbox = app.notifications(&applicant).await;
    assert_eq!(inbox[0]["type"], "application_rejected");

    let (status, json) = app.act(&applicant, &second, "apply", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["code"], "FORBIDDEN");

    // accept after reject without a new apply finds nobody pending.
    let (status, _) = app
        .act(&organizer, &first, "accept", Some(json!({ "user_id": applicant })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_is_terminal_for_participation() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let pending = app.register("carla").await;
    let late = app.register("dario").await;
    let event = app.create_event(&organizer, "Feria").await;

    app.act(&pending, &event, "apply", None).await;
    let (status, json) = app.act(&organizer, &event, "cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "cancelled");

    let inbox = app.notifications(&pending).await;
    assert_eq!(inbox[0]["type"], "event_cancelled");

    let (status, _) = app.act(&late, &event, "apply", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app
        .act(&organizer, &event, "accept", Some(json!({ "user_id": pending })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.act(&organizer, &event, "cancel", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_complete_once_then_conflict_and_stats() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let applicant = app.register("ana").await;
    let event = app.create_event(&organizer, "Trekking").await;
    app.act(&applicant, &event, "apply", None).await;
    app.act(&organizer, &event, "accept", Some(json!({ "user_id": applicant })))
        .await;

    let (status, json) = app.act(&organizer, &event, "complete", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["finalized"], true);
    let (status, _) = app.act(&organizer, &event, "complete", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, json) = app
        .call(Method::GET, &format!("/events/{}", event), None, None)
        .await;
    assert_eq!(json["data"]["finalized"], true);

    let (_, json) = app.call(Method::GET, "/users/me", Some(&applicant), None).await;
    assert_eq!(json["data"]["events_visited"], 1);
    let (_, json) = app.call(Method::GET, "/users/me", Some(&organizer), None).await;
    assert_eq!(json["data"]["events_organized"], 1);

    let inbox = app.notifications(&applicant).await;
    assert_eq!(inbox[0]["type"], "event_finished");

    let (status, _) = app
        .act(&organizer, &event, "no_show", Some(json!({ "user_id": applicant })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = app.call(Method::GET, "/users/me", Some(&applicant), None).await;
    assert_eq!(json["data"]["no_shows"], 1);
}

#[tokio::test]
async fn test_non_organizer_actions_are_forbidden() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let applicant = app.register("ana").await;
    let stranger = app.register("eve").await;
    let event = app.create_event(&organizer, "Cata").await;
    app.act(&applicant, &event, "apply", None).await;

    let (status, json) = app
        .act(&stranger, &event, "accept", Some(json!({ "user_id": applicant })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["code"], "FORBIDDEN");

    let (status, _) = app
        .call(Method::DELETE, &format!("/events/{}", event), Some(&stranger), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_twice_conflicts_and_groups_my_events() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let kept = app.create_event(&organizer, "Kept").await;
    let removed = app.create_event(&organizer, "Removed").await;

    let path = format!("/events/{}", removed);
    let (status, json) = app.call(Method::DELETE, &path, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "deleted");
    let (status, _) = app.call(Method::DELETE, &path, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, json) = app.call(Method::GET, "/events/my", Some(&organizer), None).await;
    assert_eq!(json["data"]["active_open"][0]["id"], kept.as_str());
    assert_eq!(json["data"]["deleted"][0]["id"], removed.as_str());

    let (_, json) = app.call(Method::GET, "/events?q=kep", None, None).await;
    let listed = json["data"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["organizer_name"], "org");
}

#[tokio::test]
async fn test_read_acknowledgements_are_scoped_to_owner() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let first = app.register("ana").await;
    let second = app.register("bruno").await;
    let event = app.create_event(&organizer, "Charla").await;
    app.act(&first, &event, "apply", None).await;
    app.act(&second, &event, "apply", None).await;

    let inbox = app.notifications(&organizer).await;
    assert_eq!(inbox.len(), 2);
    let id = inbox[0]["id"].as_str().unwrap().to_string();

    let path = format!("/notifications/{}/read", id);
    let (status, _) = app.call(Method::PATCH, &path, Some(&first), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.call(Method::PATCH, &path, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.call(Method::PATCH, &path, Some(&organizer), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = app
        .call(Method::PATCH, "/notifications/read-all", Some(&organizer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["updated"], 1);
    assert!(app
        .notifications(&organizer)
        .await
        .iter()
        .all(|n| n["read"] == true));
}

#[tokio::test]
async fn test_stream_pushes_committed_notifications() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let applicant = app.register("ana").await;
    let event = app.create_event(&organizer, "Jazz").await;

    let request = Request::get(format!("/notifications/stream?X-User-Id={}", applicant))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    app.act(&applicant, &event, "apply", None).await;
    app.act(&organizer, &event, "accept", Some(json!({ "user_id": applicant })))
        .await;

    let mut body = response.into_body().into_data_stream();
    let mut parser = SseParser::default();
    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let chunk = body.next().await.unwrap().unwrap();
            if let Some(frame) = parser.push(&chunk).into_iter().next() {
                return frame;
            }
        }
    })
    .await
    .unwrap();

    match Frame::decode(&frame).unwrap() {
        Frame::Notification(n) => {
            assert_eq!(n.kind, NotificationKind::ApplicationAccepted);
            assert_eq!(n.recipient_user_id.to_string(), applicant);
        }
        Frame::Keepalive => panic!("expected a notification first"),
    }
}

#[tokio::test]
async fn test_unregistered_user_cannot_apply() {
    let app = TestApp::new();
    let organizer = app.register("org").await;
    let event = app.create_event(&organizer, "Taller").await;
    let ghost = uuid::Uuid::new_v4().to_string();

    let (status, json) = app.act(&ghost, &event, "apply", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "AUTH_ERROR");
    assert!(app.notifications(&organizer).await.is_empty());

    let (status, json) = app
        .call(Method::GET, &format!("/events/{}", event), Some(&organizer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"]["pending_approval_participants"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_stream_without_identity_is_unauthorized() {
    let app = TestApp::new();
    let (status, json) = app
        .call(Method::GET, "/notifications/stream", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "AUTH_ERROR");
}
