use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::handlers::identity::Identity;
use crate::models::{Event, EventId, MyEvents, NewEvent, UserId};
use crate::participation::{participation_of, Action, ParticipationState};
use crate::state::AppState;
use crate::store::EventQuery;
use crate::utils::error::AppError;
use crate::utils::response::success;

/// An event as the API shows it: the record plus who organizes it and, when
/// the caller identified themselves, where they stand.
#[derive(Debug, Serialize)]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    pub organizer_name: Option<String>,
    pub organizer_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participation: Option<ParticipationState>,
}

/// Body of accept, reject and no-show.
#[derive(Debug, Deserialize)]
pub struct ParticipantBody {
    pub user_id: UserId,
    #[serde(default)]
    pub blacklist: bool,
}

pub(crate) fn parse_event_id(raw: &str) -> Result<EventId, AppError> {
    raw.parse()
        .map_err(|_| AppError::ValidationError(format!("'{}' is not a valid event id", raw)))
}

async fn view(state: &AppState, event: Event, viewer: Option<UserId>) -> Result<EventView, AppError> {
    let organizer = state.store.find_user(event.organizer_id).await?;
    let participation = viewer.map(|user| participation_of(&event, user));
    Ok(EventView {
        organizer_name: organizer.as_ref().map(|u| u.name.clone()),
        organizer_rating: organizer.as_ref().map(|u| u.rating),
        participation,
        event,
    })
}

pub async fn create_event(
    State(state): State<AppState>,
    Identity(organizer): Identity,
    Json(body): Json<NewEvent>,
) -> Result<Response, AppError> {
    require_registered(&state, organizer).await?;
    let event = body.into_event(organizer, Utc::now())?;
    state.store.insert_event(&event).await?;
    tracing::info!(event_id = %event.id, organizer = %organizer, "Event created");

    let view = view(&state, event, Some(organizer)).await?;
    Ok(success(view, "Event created"))
}

pub async fn get_event(
    State(state): State<AppState>,
    viewer: Option<Identity>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_event_id(&id)?;
    let event = state
        .store
        .find_event(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event with id '{}' was not found", id)))?;
    let view = view(&state, event, viewer.map(|Identity(user)| user)).await?;
    Ok(success(view, "Event retrieved"))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<Response, AppError> {
    let events = state.store.list_events(&query).await?;
    let mut views = Vec::with_capacity(events.len());
    for event in events {
        views.push(view(&state, event, None).await?);
    }
    Ok(success(views, "Events retrieved"))
}

pub async fn my_events(
    State(state): State<AppState>,
    Identity(organizer): Identity,
) -> Result<Response, AppError> {
    let events = state.store.events_by_organizer(organizer).await?;
    Ok(success(MyEvents::group(events, Utc::now()), "Events retrieved"))
}

async fn require_registered(state: &AppState, user: UserId) -> Result<(), AppError> {
    match state.store.find_user(user).await? {
        Some(_) => Ok(()),
        None => Err(AppError::AuthError(format!("Unknown user '{}'", user))),
    }
}

async fn act(state: &AppState, raw_id: &str, actor: UserId, action: Action) -> Result<Response, AppError> {
    let event_id = parse_event_id(raw_id)?;
    let event = state.participation.perform(event_id, actor, action).await?;
    let message = match action {
        Action::Apply => "Application sent",
        Action::Accept { .. } => "Participant accepted",
        Action::Reject { .. } => "Participant rejected",
        Action::Cancel => "Event cancelled",
        Action::Complete => "Event finalized",
        Action::Delete => "Event deleted",
        Action::NoShow { .. } => "No-show recorded",
        Action::MarkStarted => "Event started",
    };
    let view = view(state, event, Some(actor)).await?;
    Ok(success(view, message))
}

pub async fn apply(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    require_registered(&state, actor).await?;
    act(&state, &id, actor, Action::Apply).await
}

pub async fn accept(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(id): Path<String>,
    Json(body): Json<ParticipantBody>,
) -> Result<Response, AppError> {
    act(&state, &id, actor, Action::Accept { user: body.user_id }).await
}

pub async fn reject(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(id): Path<String>,
    Json(body): Json<ParticipantBody>,
) -> Result<Response, AppError> {
    let action = Action::Reject {
        user: body.user_id,
        blacklist: body.blacklist,
    };
    act(&state, &id, actor, action).await
}

pub async fn cancel(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    act(&state, &id, actor, Action::Cancel).await
}

pub async fn complete(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    act(&state, &id, actor, Action::Complete).await
}

pub async fn no_show(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(id): Path<String>,
    Json(body): Json<ParticipantBody>,
) -> Result<Response, AppError> {
    let action = Action::NoShow {
        user: body.user_id,
        blacklist: body.blacklist,
    };
    act(&state, &id, actor, action).await
}

pub async fn delete_event(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    act(&state, &id, actor, Action::Delete).await
}
