use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::handlers::identity::Identity;
use crate::models::{NewUser, UserId, UserSummary};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

const MAX_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<UserId>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<NewUser>,
) -> Result<Response, AppError> {
    let user = body.into_user(Utc::now())?;
    state.store.insert_user(&user).await?;
    tracing::info!(user_id = %user.id, "User registered");
    Ok(success(user, "User registered"))
}

/// Looks a user up by name. No credential is checked.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<NewUser>,
) -> Result<Response, AppError> {
    let name = body.validated_name()?;
    let user = state
        .store
        .find_user_by_name(&name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user named '{}'", name)))?;
    Ok(success(user, "Logged in"))
}

pub async fn me(
    State(state): State<AppState>,
    Identity(user_id): Identity,
) -> Result<Response, AppError> {
    let user = state
        .store
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id '{}' was not found", user_id)))?;
    Ok(success(user, "User retrieved"))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let user_id: UserId = id
        .parse()
        .map_err(|_| AppError::ValidationError(format!("'{}' is not a valid user id", id)))?;
    let user = state
        .store
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id '{}' was not found", user_id)))?;
    Ok(success(user, "User retrieved"))
}

/// Names and ratings for participant lists. Unknown ids are skipped.
pub async fn batch(
    State(state): State<AppState>,
    Json(body): Json<BatchRequest>,
) -> Result<Response, AppError> {
    if body.ids.len() > MAX_BATCH {
        return Err(AppError::ValidationError(format!(
            "At most {} ids per request",
            MAX_BATCH
        )));
    }
    let users = state.store.users_by_ids(&body.ids).await?;
    let summaries: Vec<UserSummary> = users.iter().map(UserSummary::from).collect();
    Ok(success(summaries, "Users retrieved"))
}
