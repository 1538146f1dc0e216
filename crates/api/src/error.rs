//! API error types with HTTP response mapping.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::Json;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ErrorBody, ErrorResponse};
use futures_util::FutureExt;
use store::StoreError;
use thiserror::Error;

use crate::identity::REQUEST_ID_HEADER;

/// Code reported when a handler panicked instead of returning.
pub const INTERNAL_ERROR_CODE: &str = "INTERNAL_SERVER_ERROR";

/// A domain error on its way to the client, with the request's correlation
/// token.
#[derive(Debug)]
pub struct ApiError {
    pub error: DomainError,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(error: DomainError, request_id: Option<String>) -> Self {
        Self { error, request_id }
    }

    /// HTTP status for the error's taxonomy kind.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.error.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let request_id = self.request_id.as_deref().unwrap_or("-");

        if kind.is_server_error() {
            tracing::error!(
                code = kind.code(),
                request_id,
                error = %self.error,
                source = ?std::error::Error::source(&self.error),
                "request failed"
            );
        } else {
            tracing::debug!(code = kind.code(), request_id, error = %self.error, "request rejected");
        }
        metrics::counter!("api_errors_total", "code" => kind.code()).increment(1);

        let status = self.status();
        let body = ErrorResponse::from_error(&self.error, self.request_id.as_deref());
        (status, Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        Self::new(error, None)
    }
}

/// Middleware turning a panic below it into a 500 carrying the error envelope
/// and the request's correlation token.
pub async fn recover_panics(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            tracing::error!(
                code = INTERNAL_ERROR_CODE,
                request_id = request_id.as_deref().unwrap_or("-"),
                panic = panic_message(panic.as_ref()),
                "handler panicked"
            );
            metrics::counter!("api_errors_total", "code" => INTERNAL_ERROR_CODE).increment(1);

            let body = ErrorResponse {
                error: ErrorBody {
                    code: INTERNAL_ERROR_CODE.to_string(),
                    message: "internal server error".to_string(),
                    details: None,
                    request_id,
                },
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Failures while bringing the server up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to connect to database: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ErrorKind;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn client_errors_keep_their_message_and_request_id() {
        let err = ApiError::new(DomainError::not_found("Order"), Some("req-1".into()));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "Order not found");
        assert_eq!(json["error"]["request_id"], "req-1");
    }

    #[tokio::test]
    async fn database_errors_hide_driver_text() {
        let err = ApiError::from(DomainError::from(StoreError::Database(
            sqlx::Error::Protocol("connection reset by peer".into()),
        )));
        assert_eq!(err.error.kind(), ErrorKind::Database);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "DATABASE_ERROR");
        assert!(!json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("connection reset"));
        assert!(json["error"].get("request_id").is_none());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let literal: Box<dyn Any + Send> = Box::new("static message");
        let formatted: Box<dyn Any + Send> = Box::new(format!("order {}", 7));
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(literal.as_ref()), "static message");
        assert_eq!(panic_message(formatted.as_ref()), "order 7");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
