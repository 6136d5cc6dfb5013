use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Words that mark an error message as the client's fault regardless of
/// which layer produced it.
const CLIENT_FAULT_KEYWORDS: [&str; 4] = ["unsupported", "private", "unavailable", "invalid"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    UpstreamUnsupported,
    UpstreamPrivate,
    UpstreamUnavailable,
    UpstreamFailure,
    Timeout,
    NotFound,
    FileNotFound,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::UpstreamUnsupported => "UNSUPPORTED_URL",
            ErrorKind::UpstreamPrivate => "PRIVATE_MEDIA",
            ErrorKind::UpstreamUnavailable => "MEDIA_UNAVAILABLE",
            ErrorKind::UpstreamFailure => "UPSTREAM_FAILURE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NotFound => "OUTPUT_NOT_FOUND",
            ErrorKind::FileNotFound => "FILE_NOT_FOUND",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn file_not_found() -> Self {
        Self::new(ErrorKind::FileNotFound, "File not found")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn upstream(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Status policy: missing files are 404, any message carrying a
    /// client-fault keyword is 400, everything else follows the kind.
    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::NotFound | ErrorKind::FileNotFound => return StatusCode::NOT_FOUND,
            _ => {}
        }

        let lower = self.message.to_ascii_lowercase();
        if CLIENT_FAULT_KEYWORDS
            .iter()
            .any(|keyword| lower.contains(keyword))
        {
            return StatusCode::BAD_REQUEST;
        }

        match self.kind {
            ErrorKind::InvalidRequest
            | ErrorKind::UpstreamUnsupported
            | ErrorKind::UpstreamPrivate
            | ErrorKind::UpstreamUnavailable => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorBody {
            error: self.message,
            code: self.kind.code(),
        });

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
