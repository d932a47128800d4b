use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use courier_types::api::{AddMembersRequest, ChannelDetail, Claims, CreateChannelRequest, RenameChannelRequest};
use courier_types::models::{Channel, ChannelSummary};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_CHANNEL_NAME_LEN: usize = 64;

/// Channels the caller belongs to, as `{id, name}` pairs.
pub async fn my_channels(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<ChannelSummary>>> {
    let channels = state.channels.list_for_user(claims.sub).await?;
    Ok(Json(channels.into_iter().map(ChannelSummary::from).collect()))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<CreateChannelRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let name = channel_name(&req.name)?;
    let channel = state.channels.create(name, claims.sub, req.member_ids).await?;
    let detail = detail(&state, channel).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(channel_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> ApiResult<Json<ChannelDetail>> {
    let channel = require_member(&state, channel_id, claims.sub).await?;
    Ok(Json(detail(&state, channel).await?))
}

/// Owner-only. The seeded general channel has no owner and keeps its name.
pub async fn rename_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(channel_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(req), _): WithRejection<Json<RenameChannelRequest>, ApiError>,
) -> ApiResult<Json<ChannelDetail>> {
    let channel = require_member(&state, channel_id, claims.sub).await?;
    if channel.owner_id != Some(claims.sub) {
        return Err(ApiError::forbidden("only the channel owner can rename it"));
    }

    let name = channel_name(&req.name)?;
    let channel = state.channels.rename(channel_id, name).await?;
    Ok(Json(detail(&state, channel).await?))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(channel_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> ApiResult<Json<Vec<Uuid>>> {
    require_member(&state, channel_id, claims.sub).await?;
    Ok(Json(state.channels.member_ids(channel_id).await?))
}

/// Owner-only. Users that are already members are skipped.
pub async fn add_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(channel_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Json(req), _): WithRejection<Json<AddMembersRequest>, ApiError>,
) -> ApiResult<Json<ChannelDetail>> {
    let channel = require_member(&state, channel_id, claims.sub).await?;
    if channel.owner_id != Some(claims.sub) {
        return Err(ApiError::forbidden("only the channel owner can add members"));
    }

    for user_id in req.user_ids {
        state.channels.add_member(channel_id, user_id).await?;
    }
    Ok(Json(detail(&state, channel).await?))
}

/// The owner may remove anyone else; any member may remove themselves.
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path((channel_id, user_id)), _): WithRejection<Path<(Uuid, Uuid)>, ApiError>,
) -> ApiResult<StatusCode> {
    let channel = require_member(&state, channel_id, claims.sub).await?;
    let is_owner = channel.owner_id == Some(claims.sub);

    if user_id != claims.sub && !is_owner {
        return Err(ApiError::forbidden("only the channel owner can remove other members"));
    }
    if is_owner && user_id == claims.sub {
        return Err(ApiError::validation("the owner cannot leave their own channel"));
    }

    if !state.channels.remove_member(channel_id, user_id).await? {
        return Err(ApiError::not_found(format!("user {} is not a member of this channel", user_id)));
    }
    info!("{} removed {} from channel {}", claims.sub, user_id, channel_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Load a channel the caller must belong to. Unknown channels are
/// `NotFound`, known channels the caller is not in are `Forbidden`.
pub(crate) async fn require_member(state: &AppState, channel_id: Uuid, user_id: Uuid) -> ApiResult<Channel> {
    let channel = state
        .channels
        .get(channel_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("channel {} not found", channel_id)))?;

    if !state.channels.is_member(channel_id, user_id).await? {
        return Err(ApiError::forbidden("not a member of this channel"));
    }
    Ok(channel)
}

fn channel_name(raw: &str) -> ApiResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::validation("channel name is required"));
    }
    if name.chars().count() > MAX_CHANNEL_NAME_LEN {
        return Err(ApiError::validation("channel name is too long"));
    }
    Ok(name.to_string())
}

async fn detail(state: &AppState, channel: Channel) -> ApiResult<ChannelDetail> {
    let member_ids = state.channels.member_ids(channel.id).await?;
    let last_seq = state.log.last_seq(channel.id).await?;
    Ok(ChannelDetail {
        id: channel.id,
        name: channel.name,
        owner_id: channel.owner_id,
        created_at: channel.created_at,
        member_ids,
        last_seq,
    })
}
