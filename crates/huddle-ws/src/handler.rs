use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use huddle_core::auth::Identity;
use huddle_core::error::CoreError;
use huddle_core::message::sender_role;
use huddle_core::rooms::{Outbound, Room, OUTBOUND_QUEUE_CAPACITY};
use huddle_core::AppState;
use huddle_models::gateway::{
    ClientEvent, GatewayError, JoinedGroup, Ready, ReceivedMessage, SendMessage, ServerEvent,
};
use huddle_models::user::UserProfile;

use crate::session::Session;

/// A socket that accepts no frame for this long is treated as dead.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// "Try again later": the client fell behind and should reconnect.
const CLOSE_LAGGED: u16 = 1013;

fn encode(event: &ServerEvent) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(frame) => Some(Arc::from(frame)),
        Err(err) => {
            tracing::error!(event = event.name(), error = %err, "failed to encode gateway event");
            None
        }
    }
}

fn reply(session: &Session, event: &ServerEvent) {
    if let Some(frame) = encode(event) {
        session.reply(frame);
    }
}

/// Message shown to the client for a rejected event. Store failures are not
/// described.
fn client_message(err: &CoreError) -> String {
    match err {
        CoreError::Database(_) | CoreError::Internal(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}

pub async fn handle_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut queued) = Outbound::channel(OUTBOUND_QUEUE_CAPACITY);
    let stalled = outbound.stall_signal();
    let connection_id = state.rooms.next_connection_id();
    let mut session = Session::new(identity, connection_id, outbound);

    if let Err(err) = join_initial_rooms(&state, &mut session).await {
        tracing::error!(user_id = session.identity.id, error = %err, "failed to load rooms for socket");
        session.leave_all(&state.rooms).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    }
    tracing::info!(
        user_id = session.identity.id,
        connection_id,
        "socket connected"
    );
    reply(
        &session,
        &ServerEvent::Ready(Ready {
            user: UserProfile {
                id: session.identity.id,
                username: session.identity.username.clone(),
                email: session.identity.email.clone(),
            },
            rooms: session.room_names(),
        }),
    );

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &mut session, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(user_id = session.identity.id, error = %err, "socket read failed");
                        break;
                    }
                    // Pings are answered by axum; binary frames carry nothing here.
                    Some(Ok(_)) => {}
                }
            }
            frame = queued.recv() => {
                let Some(frame) = frame else { break };
                let sent = tokio::time::timeout(
                    SEND_TIMEOUT,
                    sender.send(Message::Text(frame.as_ref().into())),
                )
                .await;
                if !matches!(sent, Ok(Ok(()))) {
                    tracing::debug!(user_id = session.identity.id, "socket write failed or timed out");
                    break;
                }
            }
            _ = stalled.notified() => {
                tracing::warn!(
                    user_id = session.identity.id,
                    connection_id,
                    "outbound queue full; forcing reconnect"
                );
                let close = CloseFrame {
                    code: CLOSE_LAGGED,
                    reason: "Client fell behind".into(),
                };
                let _ = tokio::time::timeout(SEND_TIMEOUT, sender.send(Message::Close(Some(close)))).await;
                break;
            }
        }
    }

    session.leave_all(&state.rooms).await;
    tracing::info!(
        user_id = session.identity.id,
        connection_id,
        "socket disconnected"
    );
}

/// Personal room plus a snapshot of every group the user takes part in.
async fn join_initial_rooms(state: &AppState, session: &mut Session) -> Result<(), CoreError> {
    let user_id = session.identity.id;
    session.join(&state.rooms, Room::User(user_id)).await;
    let group_ids = huddle_db::groups::list_group_ids_for_user(&state.db, user_id).await?;
    for group_id in group_ids {
        session.join(&state.rooms, Room::Group(group_id)).await;
    }
    Ok(())
}

async fn handle_frame(state: &AppState, session: &mut Session, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(user_id = session.identity.id, error = %err, "malformed socket frame");
            reply(
                session,
                &ServerEvent::Error(GatewayError {
                    event: None,
                    message: "Malformed event".to_string(),
                }),
            );
            return;
        }
    };

    let name = event.name();
    let result = match event {
        ClientEvent::JoinGroup(group_id) => join_group(state, session, group_id).await,
        ClientEvent::SendMessage(payload) => send_message(state, session, payload).await,
    };

    if let Err(err) = result {
        tracing::warn!(
            user_id = session.identity.id,
            event = name,
            error = %err,
            "socket event rejected"
        );
        reply(
            session,
            &ServerEvent::Error(GatewayError {
                event: Some(name.to_string()),
                message: client_message(&err),
            }),
        );
    }
}

async fn join_group(state: &AppState, session: &mut Session, group_id: i64) -> Result<(), CoreError> {
    let group = huddle_db::groups::get_group(&state.db, group_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Group not found"))?;
    if !group.is_participant(session.identity.id) {
        return Err(CoreError::forbidden("You are not a member of this group"));
    }

    session.join(&state.rooms, Room::Group(group_id)).await;
    reply(session, &ServerEvent::JoinedGroup(JoinedGroup { group_id }));
    Ok(())
}

/// Persist through the same operations as HTTP, then fan out. Direct
/// messages also reach the sender's own room so their other sessions see them.
async fn send_message(
    state: &AppState,
    session: &mut Session,
    payload: SendMessage,
) -> Result<(), CoreError> {
    let sender_id = session.identity.id;
    let (message, targets, role) = if payload.is_group {
        let group_id = payload.receiver_id;
        let (message, group) =
            huddle_core::message::send_to_group(state, sender_id, group_id, &payload.content)
                .await?;
        let role = sender_role(sender_id, &group);
        (message, vec![Room::Group(group_id)], Some(role))
    } else {
        let receiver_id = payload.receiver_id;
        let message =
            huddle_core::message::send_direct(state, sender_id, receiver_id, &payload.content)
                .await?;
        (message, vec![Room::User(receiver_id), Room::User(sender_id)], None)
    };

    let event = ServerEvent::ReceivedMessage(ReceivedMessage {
        message: message.to_message(),
        username: session.identity.username.clone(),
        email: session.identity.email.clone(),
        sender_role: role,
    });
    if let Some(frame) = encode(&event) {
        let delivered = state.rooms.broadcast(&targets, frame).await;
        tracing::debug!(message_id = message.id, delivered, "message fanned out");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_not_shown_to_clients() {
        let err = CoreError::Internal("pool timed out".into());
        assert_eq!(client_message(&err), "Internal server error");
        let err = CoreError::forbidden("You are not a member of this group");
        assert_eq!(client_message(&err), "You are not a member of this group");
    }
}
