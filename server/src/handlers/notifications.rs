use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::handlers::identity::Identity;
use crate::models::notification::KEEPALIVE;
use crate::models::{NotificationId, UserId};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub const DEFAULT_PAGE: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadAllResult {
    pub updated: u64,
}

pub async fn list(
    State(state): State<AppState>,
    Identity(user): Identity,
    Query(params): Query<ListParams>,
) -> Result<Response, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE)
        .clamp(1, state.settings.max_notification_page);
    let notifications = state.store.notifications(user, limit).await?;
    Ok(success(notifications, "Notifications retrieved"))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id: NotificationId = id
        .parse()
        .map_err(|_| AppError::ValidationError(format!("'{}' is not a valid notification id", id)))?;
    // Someone else's id looks exactly like a missing one.
    if !state.store.mark_read(user, id).await? {
        return Err(AppError::NotFound(format!(
            "Notification with id '{}' was not found",
            id
        )));
    }
    Ok(success(id, "Notification marked as read"))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Identity(user): Identity,
) -> Result<Response, AppError> {
    let updated = state.store.mark_all_read(user).await?;
    Ok(success(ReadAllResult { updated }, "All notifications marked as read"))
}

/// Live push for one user. Each frame is `data: <notification json>`; idle
/// connections get a `: keepalive` comment.
pub async fn stream(State(state): State<AppState>, Identity(user): Identity) -> Response {
    info!(user_id = %user, "Notification stream opened");
    Sse::new(frames(&state, user))
        .keep_alive(
            KeepAlive::new()
                .interval(state.settings.keepalive)
                .text(KEEPALIVE),
        )
        .into_response()
}

fn frames(state: &AppState, user: UserId) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    state
        .hub
        .subscribe(user)
        .filter_map(|notification| {
            let frame = SseEvent::default()
                .id(notification.id.to_string())
                .json_data(&notification);
            future::ready(match frame {
                Ok(frame) => Some(Ok(frame)),
                Err(e) => {
                    warn!(notification_id = %notification.id, error = %e, "Dropping unencodable frame");
                    None
                }
            })
        })
}
