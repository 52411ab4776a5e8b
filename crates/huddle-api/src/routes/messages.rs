use axum::extract::{Path, State};
use huddle_core::message;
use huddle_core::AppState;
use huddle_models::message::{ConversationSummary, DirectThreadEntry, GroupThreadEntry, Message};
use serde::Deserialize;

use super::parse_id;
use crate::error::ApiError;
use crate::middleware::{AuthUser, JsonBody};
use crate::response::ApiResponse;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
}

pub async fn conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<Vec<ConversationSummary>>, ApiError> {
    let list = message::conversation_list(&state, auth.id()).await?;
    Ok(ApiResponse::ok(list, "Conversations"))
}

pub async fn direct_thread(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<ApiResponse<Vec<DirectThreadEntry>>, ApiError> {
    let other = parse_id(&user_id, "user")?;
    let thread = message::direct_thread(&state, auth.id(), other).await?;
    Ok(ApiResponse::ok(thread, "Messages fetched"))
}

pub async fn send_direct(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    JsonBody(body): JsonBody<SendMessageRequest>,
) -> Result<ApiResponse<Message>, ApiError> {
    let receiver = parse_id(&user_id, "user")?;
    let row = message::send_direct(&state, auth.id(), receiver, &body.content).await?;
    Ok(ApiResponse::ok(row.to_message(), "Message sent"))
}

pub async fn group_thread(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<String>,
) -> Result<ApiResponse<Vec<GroupThreadEntry>>, ApiError> {
    let group_id = parse_id(&group_id, "group")?;
    let thread = message::group_thread(&state, auth.id(), group_id).await?;
    Ok(ApiResponse::ok(thread, "Messages fetched"))
}

pub async fn send_to_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<String>,
    JsonBody(body): JsonBody<SendMessageRequest>,
) -> Result<ApiResponse<Message>, ApiError> {
    let group_id = parse_id(&group_id, "group")?;
    let (row, _) = message::send_to_group(&state, auth.id(), group_id, &body.content).await?;
    Ok(ApiResponse::ok(row.to_message(), "Message sent"))
}

/// Serves both `/messages/user/del/:id` and `/messages/group/del/:id`.
pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<ApiResponse<Message>, ApiError> {
    let message_id = parse_id(&message_id, "message")?;
    let row = message::delete_message(&state, auth.id(), message_id).await?;
    Ok(ApiResponse::ok(row.to_message(), "Message deleted"))
}
