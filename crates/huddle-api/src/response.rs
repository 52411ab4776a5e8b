use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

/// Success envelope: `{statuscode, data, message, success: true}`.
pub struct ApiResponse<T> {
    status: StatusCode,
    data: T,
    message: &'static str,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: &'static str) -> Self {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn with_status(status: StatusCode, data: T, message: &'static str) -> Self {
        Self {
            status,
            data,
            message,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = json!({
            "statuscode": self.status.as_u16(),
            "data": self.data,
            "message": self.message,
            "success": true,
        });
        (self.status, Json(body)).into_response()
    }
}
