use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{auth, events, health_check, registrations, users};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/register/", post(auth::sign_up))
        .route("/auth/login/", post(auth::login))
        .route("/users/", get(users::list_users))
        .route("/users/:id/", get(users::get_user))
        .route(
            "/events/",
            get(events::list_events).post(events::create_event),
        )
        .route(
            "/events/:id/",
            get(events::get_event)
                .put(events::replace_event)
                .patch(events::patch_event)
                .delete(events::delete_event),
        )
        .route("/events/:id/register/", post(events::register))
        .route("/events/:id/unregister/", post(events::unregister))
        .route("/events/:id/attendees/", get(events::attendees))
        .route("/registrations/", get(registrations::list_my_registrations))
        .route(
            "/registrations/:id/",
            get(registrations::get_my_registration),
        );

    let security_headers = create_security_headers_layer(&state.config);
    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(security_headers)
        .layer(cors)
}
