use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, Config, SecurityHeadersLayer};
use crate::handlers::{categories, events, health_check, notifications, users};
use crate::state::AppState;

pub fn create_routes(state: AppState, config: &Config) -> Router {
    let event_routes = Router::new()
        .route("/", get(events::list_events).post(events::create_event))
        .route("/my", get(events::my_events))
        .route("/:id", get(events::get_event).delete(events::delete_event))
        .route("/:id/apply", post(events::apply))
        .route("/:id/accept", post(events::accept))
        .route("/:id/reject", post(events::reject))
        .route("/:id/cancel", patch(events::cancel))
        .route("/:id/complete", post(events::complete))
        .route("/:id/no_show", post(events::no_show));

    let user_routes = Router::new()
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/me", get(users::me))
        .route("/batch", post(users::batch))
        .route("/:id", get(users::get_user));

    let notification_routes = Router::new()
        .route("/", get(notifications::list))
        .route("/stream", get(notifications::stream))
        .route("/read-all", patch(notifications::mark_all_read))
        .route("/:id/read", patch(notifications::mark_read));

    Router::new()
        .route("/health", get(health_check))
        .route("/categories", get(categories))
        .nest("/events", event_routes)
        .nest("/users", user_routes)
        .nest("/notifications", notification_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SecurityHeadersLayer::new(config.production))
        .layer(create_cors_layer(&config.cors_allowed_origins))
}
