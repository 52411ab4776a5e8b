use huddle_db::groups::{self, GroupRow};
use huddle_db::messages::{self, MessageRow};
use huddle_models::group::SenderRole;
use huddle_models::message::{Addressee, ConversationSummary, DirectThreadEntry, GroupThreadEntry};
use huddle_util::validation::{self, ValidationError};

use crate::cache::{direct_thread_invalidation_keys, group_thread_key};
use crate::error::CoreError;
use crate::guard::{authorize, Access};
use crate::{next_id, AppState};

/// Role label for `sender_id` against the group as it is now.
/// Former participants read as plain members.
pub fn sender_role(sender_id: i64, group: &GroupRow) -> SenderRole {
    if group.is_owner(sender_id) {
        SenderRole::Owner
    } else if group.is_admin(sender_id) {
        SenderRole::Admin
    } else {
        SenderRole::Member
    }
}

fn message_text(content: &str) -> Result<&str, CoreError> {
    let trimmed = content.trim();
    match validation::validate_message_content(trimmed) {
        Ok(()) => Ok(trimmed),
        Err(ValidationError::TooShort { .. }) => Err(CoreError::validation("Need some text to send")),
        Err(err) => Err(err.into()),
    }
}

async fn existing_group(state: &AppState, group_id: i64) -> Result<GroupRow, CoreError> {
    groups::get_group(&state.db, group_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Group not found"))
}

/// Keys whose cached threads contain a message addressed like this one.
fn affected_keys(sender_id: i64, receiver: Addressee) -> Vec<String> {
    match receiver {
        Addressee::User(receiver_id) => direct_thread_invalidation_keys(sender_id, receiver_id),
        Addressee::Group(group_id) => vec![group_thread_key(group_id)],
    }
}

pub async fn send_direct(
    state: &AppState,
    sender_id: i64,
    receiver_id: i64,
    content: &str,
) -> Result<MessageRow, CoreError> {
    let text = message_text(content)?;
    if huddle_db::users::get_user_by_id(&state.db, receiver_id).await?.is_none() {
        return Err(CoreError::not_found("Receiver not found"));
    }

    let receiver = Addressee::User(receiver_id);
    let message = messages::create_message(&state.db, next_id(), sender_id, receiver, text).await?;
    state.cache.invalidate(affected_keys(sender_id, receiver)).await;
    tracing::debug!(message_id = message.id, sender_id, receiver_id, "direct message stored");
    Ok(message)
}

/// Returns the group as well so callers can label the sender's role.
pub async fn send_to_group(
    state: &AppState,
    sender_id: i64,
    group_id: i64,
    content: &str,
) -> Result<(MessageRow, GroupRow), CoreError> {
    let text = message_text(content)?;
    let group = existing_group(state, group_id).await?;
    if !group.is_participant(sender_id) {
        return Err(CoreError::forbidden("You are not a member of this group"));
    }

    let receiver = Addressee::Group(group_id);
    let message = messages::create_message(&state.db, next_id(), sender_id, receiver, text).await?;
    state.cache.invalidate(affected_keys(sender_id, receiver)).await;
    tracing::debug!(message_id = message.id, sender_id, group_id, "group message stored");
    Ok((message, group))
}

/// Only the sender may delete. The row is removed with the sender in the
/// filter, so a concurrent delete surfaces as not found.
pub async fn delete_message(
    state: &AppState,
    requester: i64,
    message_id: i64,
) -> Result<MessageRow, CoreError> {
    let authorized =
        authorize::<MessageRow>(&state.db, message_id, requester, Access::Destructive).await?;
    let message = authorized.resource;

    if !messages::delete_message_by_sender(&state.db, message.id, requester).await? {
        return Err(CoreError::not_found("Message not found"));
    }
    state
        .cache
        .invalidate(affected_keys(message.sender_id, message.receiver))
        .await;
    tracing::info!(message_id, requester, "message deleted");
    Ok(message)
}

pub async fn conversation_list(
    state: &AppState,
    user_id: i64,
) -> Result<Vec<ConversationSummary>, CoreError> {
    Ok(messages::conversation_list(&state.db, user_id).await?)
}

pub async fn direct_thread(
    state: &AppState,
    reader: i64,
    other: i64,
) -> Result<Vec<DirectThreadEntry>, CoreError> {
    if huddle_db::users::get_user_by_id(&state.db, other).await?.is_none() {
        return Err(CoreError::not_found("User not found"));
    }

    let key = crate::cache::direct_thread_key(reader, other);
    state
        .cache
        .get_or_compute(&key, state.config.direct_thread_ttl, || async {
            Ok(messages::direct_thread(&state.db, reader, other).await?)
        })
        .await
}

/// Participation is checked against the live group on every read, cached or not.
pub async fn group_thread(
    state: &AppState,
    reader: i64,
    group_id: i64,
) -> Result<Vec<GroupThreadEntry>, CoreError> {
    let group = existing_group(state, group_id).await?;
    if !group.is_participant(reader) {
        return Err(CoreError::forbidden("You are not a member of this group"));
    }

    state
        .cache
        .get_or_compute(&group_thread_key(group_id), state.config.group_thread_ttl, || async {
            let rows = messages::group_thread(&state.db, group_id).await?;
            Ok(rows
                .into_iter()
                .map(|row| GroupThreadEntry {
                    sender_role: sender_role(row.message.sender_id, &group),
                    message: row.message.to_message(),
                    sender_details: row.sender,
                })
                .collect())
        })
        .await
}
