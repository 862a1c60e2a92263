use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use carbon_core::{DispatchError, SignalError};
use carbon_engine::AdviseError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Advise(#[from] AdviseError),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("favorites store: {0}")]
    Favorites(#[from] std::io::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Advise(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::Advise(AdviseError::Signal(SignalError::Cancelled))
            | ApiError::Dispatch(DispatchError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Advise(_) | ApiError::Dispatch(_) => StatusCode::BAD_GATEWAY,
            ApiError::Favorites(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        } else {
            tracing::debug!(status = status.as_u16(), "{}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
