//! Error to HTTP response mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scoutflow_core::{Error, ErrorBody};
use tracing::{error, warn};

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Error::InvalidDecision(_)
            | Error::InvalidCriteria(_)
            | Error::InvalidSessionId(_)
            | Error::InvalidArtifactPath(_)
            | Error::JsonError(_) => StatusCode::BAD_REQUEST,
            Error::SessionExists(_) => StatusCode::CONFLICT,
            e if e.is_protocol_violation() => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(status = status.as_u16(), kind = self.0.kind(), "request rejected");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}
