use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use huddle_core::AppState;
use serde_json::json;
use tower_http::cors::CorsLayer;

pub mod error;
pub mod middleware;
pub mod response;
pub mod routes;

/// HTTP surface. `cors_origin` is the browser origin allowed to call the API
/// with credentials; without one, cross-origin requests get no CORS headers.
pub fn build_router(cors_origin: Option<HeaderValue>) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .layer(build_cors_layer(cors_origin))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Users
        .route("/users/register", post(routes::users::register))
        .route("/users/login", post(routes::users::login))
        .route("/users/logout", post(routes::users::logout))
        .route("/users/refresh-token", post(routes::users::refresh_token))
        .route("/users/me", get(routes::users::me))
        .route("/users/search", get(routes::users::search))
        .route(
            "/users/publicKey/{username}",
            get(routes::users::public_key),
        )
        // Groups
        .route("/groups/createGroup", post(routes::groups::create_group))
        .route(
            "/groups/groupDetails/{group_id}",
            get(routes::groups::group_details),
        )
        .route(
            "/groups/members/{group_id}/{member_id}",
            patch(routes::groups::add_member).delete(routes::groups::remove_member),
        )
        .route(
            "/groups/admins/{group_id}/{member_id}",
            patch(routes::groups::promote_admin).delete(routes::groups::demote_admin),
        )
        .route(
            "/groups/admins/remove/{group_id}/{admin_id}",
            delete(routes::groups::remove_admin),
        )
        .route(
            "/groups/deleteGroup/{group_id}",
            delete(routes::groups::delete_group),
        )
        // Messages
        .route("/messages", get(routes::messages::conversations))
        .route(
            "/messages/user/{user_id}",
            get(routes::messages::direct_thread).post(routes::messages::send_direct),
        )
        .route(
            "/messages/user/del/{message_id}",
            delete(routes::messages::delete_message),
        )
        .route(
            "/messages/group/{group_id}",
            get(routes::messages::group_thread).post(routes::messages::send_to_group),
        )
        .route(
            "/messages/group/del/{message_id}",
            delete(routes::messages::delete_message),
        )
}

fn build_cors_layer(origin: Option<HeaderValue>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);
    match origin {
        Some(origin) => layer.allow_origin(origin).allow_credentials(true),
        None => layer,
    }
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "huddle" })),
    )
}
