/**
 * Error Conversion
 *
 * Conversions from engine errors into HTTP responses (admin routes) and into
 * protocol-level `error` frames (WebSocket clients).
 *
 * HTTP error bodies look like:
 * ```json
 * {"error": "Permission denied: admin token required", "status": 403}
 * ```
 */

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::backend::error::types::CollabError;
use crate::shared::{Envelope, ServerMessage};

impl IntoResponse for CollabError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("[Admin] Request failed: {}", self);
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

impl From<&CollabError> for Envelope {
    /// Build the `error` frame sent back to the originating client
    fn from(err: &CollabError) -> Self {
        Envelope::new(ServerMessage::error(err.code(), err.message()))
    }
}
