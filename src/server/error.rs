//! Error-to-HTTP response conversion.
//!
//! Lets handlers return `Result<T, AppError>` and use `?` on coordinator
//! calls.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Wrapper so we can implement `IntoResponse` for [`dayreel_common::Error`].
#[derive(Debug)]
pub struct AppError(dayreel_common::Error);

impl From<dayreel_common::Error> for AppError {
    fn from(e: dayreel_common::Error) -> Self {
        Self(e)
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "Server error in handler");
        } else {
            tracing::warn!(status = %status, error = %self.0, "Request rejected");
        }

        (status, self.0.to_string()).into_response()
    }
}
