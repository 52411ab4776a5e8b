mod handler;
mod session;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use huddle_core::error::CoreError;
use huddle_core::AppState;
use serde_json::json;

pub fn gateway_router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

/// The identity cookie is checked before upgrading; a failed check never
/// opens a socket.
async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let cookies = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
    let identity = match huddle_core::auth::verify_identity(cookies, &state.config.jwt_secret) {
        Ok(identity) => identity,
        Err(err) => {
            let message = CoreError::from(err).to_string();
            tracing::warn!(reason = %message, "socket handshake rejected");
            let body = json!({
                "statuscode": StatusCode::UNAUTHORIZED.as_u16(),
                "message": message,
                "success": false,
            });
            return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        }
    };

    ws.on_upgrade(move |socket| handler::handle_connection(socket, state, identity))
}
