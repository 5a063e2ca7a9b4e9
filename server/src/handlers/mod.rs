use axum::extract::State;
use axum::response::Response;
use serde::Serialize;

use crate::models::Category;
use crate::state::AppState;
use crate::utils::response::success;

pub mod events;
pub mod identity;
pub mod notifications;
pub mod users;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
    live_channels: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "segunda-api",
        live_channels: state.hub.connected_users(),
    };

    success(payload, "Health check successful")
}

pub async fn categories() -> Response {
    success(Category::ALL, "Categories retrieved")
}
