//! REST and WebSocket surface of the chat core.

pub mod auth;
pub mod channels;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod sockets;
pub mod state;
pub mod stats;

use axum::{
    Router,
    routing::{delete, get, post},
};

pub use error::{ApiError, ApiResult};
pub use state::{AppState, AppStateInner, AuthSettings};

/// All routes, without transport layers (CORS, tracing) which the binary adds.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/login/", post(auth::login))
        .route("/auth/login/", post(auth::login))
        .route("/register/", post(auth::register))
        .route("/auth/register/", post(auth::register))
        .route("/auth/logout", post(auth::logout))
        .route("/api/v1/ws/{user_id}", get(sockets::ws_upgrade));

    let protected_routes = Router::new()
        .route("/api/v1/channels", post(channels::create_channel))
        .route("/api/v1/channels/my", get(channels::my_channels))
        .route(
            "/api/v1/channels/{channel_id}",
            get(channels::get_channel).patch(channels::rename_channel),
        )
        .route(
            "/api/v1/channels/{channel_id}/members",
            get(channels::list_members).post(channels::add_members),
        )
        .route(
            "/api/v1/channels/{channel_id}/members/{user_id}",
            delete(channels::remove_member),
        )
        .route("/api/v1/channels/{channel_id}/messages", get(messages::get_messages))
        .route("/api/v1/messages", post(messages::send_message))
        .route("/api/v1/messages/{message_id}", get(messages::get_message))
        .route("/api/v1/stats", get(stats::delivery_stats))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
