//! JSON envelope shared by every REST reply:
//! `{"status":"Success","data":..,"timestamp":..}` or
//! `{"status":"Error","message":..,"timestamp":..}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AuthError;

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessBody<T> {
    pub status: String,
    pub data: T,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn success<T: Serialize>(data: T) -> Response {
    let body = SuccessBody {
        status: "Success".to_string(),
        data,
        timestamp: now(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

pub fn error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        status: "Error".to_string(),
        message: message.into(),
        timestamp: now(),
    };
    (status, Json(body)).into_response()
}

/// Every way a request can fail, mapped onto a status code and an error envelope.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("resource not found")]
    NotFound,

    #[error("rate limit exceeded")]
    TooManyRequests,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error(self.status(), self.to_string())
    }
}
