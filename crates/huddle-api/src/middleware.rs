use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts},
    Json,
};
use huddle_core::auth::Identity;
use huddle_core::AppState;

use crate::error::ApiError;

/// The caller, verified from the `accessToken` cookie.
pub struct AuthUser(pub Identity);

impl AuthUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = parts
            .headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok());

        let identity = huddle_core::auth::verify_identity(cookies, &state.config.jwt_secret)?;
        Ok(AuthUser(identity))
    }
}

/// `Json<T>` whose rejection renders the error envelope.
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(JsonBody(value))
    }
}
