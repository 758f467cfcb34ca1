//! Error kinds for the collection boundary and the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::io;
use thiserror::Error;

use crate::types::ActionResponse;

/// Failure of a metric source, a kernel table read or an external tool.
///
/// Produced where files are read or commands are spawned, so the engines above
/// never have to inspect error text.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0} is not available on this host")]
    Unavailable(String),
    #[error("malformed {what}: {detail}")]
    Parse { what: &'static str, detail: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SourceError {
    pub fn parse(what: &'static str, detail: impl Into<String>) -> Self {
        SourceError::Parse {
            what,
            detail: detail.into(),
        }
    }

    /// Maps an I/O error on `subject` to the structured kind.
    pub fn from_io(subject: impl Into<String>, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(subject.into()),
            io::ErrorKind::PermissionDenied => SourceError::PermissionDenied(subject.into()),
            _ => SourceError::Io(err),
        }
    }

    /// Maps an errno returned by a syscall acting on a pid.
    pub fn from_errno(pid: u32, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ESRCH) => SourceError::NotFound(format!("process {pid}")),
            Some(libc::EPERM) | Some(libc::EACCES) => {
                SourceError::PermissionDenied(format!("process {pid}"))
            }
            _ => SourceError::Io(err),
        }
    }
}

/// Outcome of the access decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authentication required")]
    Unauthorized,
    #[error("read-write access required")]
    Forbidden,
}

/// Refusal or failure of a mutating operation.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{0}")]
    Invalid(String),
    #[error("Cannot send signals to the syspeek service itself")]
    SelfTarget,
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Client-facing error, rendered as `{"success": false, "message": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized => ApiError::Unauthorized,
            AuthError::Forbidden => {
                ApiError::Forbidden("Forbidden: Read-write access required".into())
            }
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::NotFound(_) => ApiError::NotFound(e.to_string()),
            SourceError::PermissionDenied(_) => ApiError::Forbidden(e.to_string()),
            SourceError::Unavailable(_) => ApiError::Unavailable(e.to_string()),
            SourceError::Parse { .. } | SourceError::Failed(_) | SourceError::Io(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::Invalid(m) => ApiError::BadRequest(m),
            ControlError::SelfTarget => ApiError::Forbidden(e.to_string()),
            ControlError::Source(s) => s.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ActionResponse {
            success: false,
            message: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
