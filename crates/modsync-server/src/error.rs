//! HTTP error mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON body returned for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable failure description
    pub detail: String,
}

/// Errors surfaced by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body could not be decoded into an ingest batch.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    /// The sync service failed.
    #[error(transparent)]
    Service(#[from] modsync::Error),
}

impl ApiError {
    /// Status code for this error.
    ///
    /// Store outages map to 503, other service failures to 500.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody(rejection) => rejection.status(),
            Self::Service(e) if e.is_store_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let detail = match &self {
            Self::InvalidBody(rejection) => rejection.body_text(),
            Self::Service(e) => e.to_string(),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}
