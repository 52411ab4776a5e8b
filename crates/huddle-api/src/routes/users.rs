use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse},
};
use huddle_core::auth::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME};
use huddle_core::user::{self, Registration, Session};
use huddle_core::AppState;
use huddle_models::user::{PublicKey, User, UserProfile};
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::{AuthUser, JsonBody};
use crate::response::ApiResponse;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub username: Option<String>,
}

fn build_cookie(name: &str, value: &str, max_age: u64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!("{name}={value}; HttpOnly; Path=/; SameSite=Strict; Max-Age={max_age}{secure_attr}")
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))
}

fn session_cookies(
    state: &AppState,
    session: &Session,
) -> Result<[(header::HeaderName, HeaderValue); 2], ApiError> {
    let config = &state.config;
    let access = build_cookie(
        ACCESS_COOKIE_NAME,
        &session.access_token,
        config.access_token_ttl_seconds,
        config.secure_cookies,
    );
    let refresh = build_cookie(
        REFRESH_COOKIE_NAME,
        &session.refresh_token,
        config.refresh_token_ttl_seconds,
        config.secure_cookies,
    );
    Ok([
        (header::SET_COOKIE, header_value(&access)?),
        (header::SET_COOKIE, header_value(&refresh)?),
    ])
}

fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    huddle_core::auth::cookie_value(raw, name)
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RegisterRequest>,
) -> Result<ApiResponse<User>, ApiError> {
    let user = user::register(
        &state,
        Registration {
            username: body.username.as_deref(),
            email: body.email.as_deref(),
            password: body.password.as_deref(),
            public_key: body.public_key.as_deref(),
        },
    )
    .await?;
    Ok(ApiResponse::with_status(
        StatusCode::CREATED,
        user.to_user(),
        "User registered successfully",
    ))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = user::login(&state, body.username.as_deref(), body.password.as_deref()).await?;
    let cookies = session_cookies(&state, &session)?;
    Ok((
        AppendHeaders(cookies),
        ApiResponse::with_status(
            StatusCode::ACCEPTED,
            session.user.to_user(),
            "User logged in successfully",
        ),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    user::logout(&state, auth.id()).await?;
    let secure = state.config.secure_cookies;
    Ok((
        AppendHeaders([
            (header::SET_COOKIE, header_value(&build_cookie(ACCESS_COOKIE_NAME, "", 0, secure))?),
            (header::SET_COOKIE, header_value(&build_cookie(REFRESH_COOKIE_NAME, "", 0, secure))?),
        ]),
        ApiResponse::with_status(
            StatusCode::NON_AUTHORITATIVE_INFORMATION,
            (),
            "User logged out successfully",
        ),
    ))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = user::refresh(&state, cookie(&headers, REFRESH_COOKIE_NAME)).await?;
    let cookies = session_cookies(&state, &session)?;
    Ok((
        AppendHeaders(cookies),
        ApiResponse::ok(session.user.to_user(), "Tokens refreshed"),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<User>, ApiError> {
    let user = user::me(&state, auth.id()).await?;
    Ok(ApiResponse::ok(user.to_user(), "Current user"))
}

pub async fn search(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<ApiResponse<Vec<UserProfile>>, ApiError> {
    let users = user::search(&state, auth.id(), query.username.as_deref()).await?;
    Ok(ApiResponse::ok(users, "Users found"))
}

pub async fn public_key(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(username): Path<String>,
) -> Result<ApiResponse<PublicKey>, ApiError> {
    let key = user::public_key(&state, &username).await?;
    Ok(ApiResponse::ok(key, "Public key"))
}
