use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_gateway::connection;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{decode_token, token_from_headers};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SocketQuery {
    /// Browsers cannot set headers on a WebSocket handshake.
    pub token: Option<String>,
}

/// `GET /api/v1/ws/{user_id}`: authenticate, look up memberships, upgrade.
///
/// Everything that can fail happens here, before the upgrade, so a rejected
/// client gets a plain HTTP error instead of a socket that closes at once.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Query(query), _): WithRejection<Query<SocketQuery>, ApiError>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = token_from_headers(&headers)
        .or(query.token)
        .ok_or_else(|| ApiError::auth("not authenticated"))?;
    let claims = decode_token(&state.auth.jwt_secret, &token)?;

    if claims.sub != user_id {
        warn!("{} attempted to open a socket as {}", claims.sub, user_id);
        return Err(ApiError::forbidden("token does not belong to this user"));
    }

    let channel_ids = state.channels.channel_ids_for_user(user_id).await?;
    debug!("{} upgrading with {} channel subscriptions", user_id, channel_ids.len());

    let ctx = state.gateway();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx, user_id, channel_ids)))
}
