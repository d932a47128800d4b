use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use courier_types::api::{Claims, CreateMessageRequest, HistoryQuery};
use courier_types::models::{Message, MessageDraft};

use crate::channels::require_member;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_TEXT_LEN: usize = 4000;
const MAX_PAGE: u32 = 1000;

/// History of one channel in append order. Without `limit` the whole log
/// after `after_seq` is returned.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(channel_id), _): WithRejection<Path<Uuid>, ApiError>,
    WithRejection(Query(query), _): WithRejection<Query<HistoryQuery>, ApiError>,
) -> ApiResult<Json<Vec<Message>>> {
    require_member(&state, channel_id, claims.sub).await?;

    let limit = query.limit.map(|l| l.min(MAX_PAGE));
    let messages = state.log.read_range(channel_id, query.after_seq, limit).await?;
    Ok(Json(messages))
}

pub async fn get_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(message_id), _): WithRejection<Path<Uuid>, ApiError>,
) -> ApiResult<Json<Message>> {
    let message = state
        .log
        .get(message_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("message {} not found", message_id)))?;

    // Same answer for "absent" and "not yours" so ids cannot be guessed
    if !state.channels.is_member(message.channel_id, claims.sub).await? {
        return Err(ApiError::not_found(format!("message {} not found", message_id)));
    }
    Ok(Json(message))
}

/// Ingest: validate, append to the channel log, return the stored message.
/// Live delivery to open sockets happens inside the append.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<CreateMessageRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let draft = validate(req, claims.sub)?;

    require_member(&state, draft.channel_id, claims.sub).await?;
    if let Some(recipient) = draft.recipient_id {
        if !state.channels.is_member(draft.channel_id, recipient).await? {
            return Err(ApiError::validation("recipient is not a member of this channel"));
        }
    }

    let message = state.log.append(draft).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Checks that need no storage access. The sender always comes from the token.
fn validate(req: CreateMessageRequest, caller: Uuid) -> ApiResult<MessageDraft> {
    let channel_id = req
        .channel_id
        .ok_or_else(|| ApiError::validation("channel_id is required"))?;

    let text = req.text.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ApiError::validation("text must not be empty"));
    }
    if text.chars().count() > MAX_TEXT_LEN {
        return Err(ApiError::validation(format!(
            "text must be at most {} characters",
            MAX_TEXT_LEN
        )));
    }
    if req.widget.as_ref().is_some_and(|w| !w.is_object()) {
        return Err(ApiError::validation("widget must be a JSON object"));
    }
    if req.sender_id.is_some_and(|s| s != caller) {
        return Err(ApiError::forbidden("cannot send messages on behalf of another user"));
    }

    Ok(MessageDraft {
        channel_id,
        sender_id: caller,
        recipient_id: req.recipient_id,
        text,
        params: req.params,
        widget: req.widget,
    })
}
