use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Please enter a valid query.")]
    EmptyQuery,

    #[error("Invalid file type for '{name}'. Allowed: {allowed}")]
    DisallowedExtension { name: String, allowed: String },

    #[error("Path traversal not allowed: {0}")]
    PathTraversal(String),

    #[error("Invalid filename: '{0}'")]
    InvalidFilename(String),

    #[error("No files provided")]
    NoFiles,

    #[error("Malformed upload: {0}")]
    Multipart(String),
}

/// Failures of the index lifecycle: enumeration, build, load or search.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("Index build failed: {0}")]
    Build(String),

    #[error("Index build timed out after {0:?}")]
    Timeout(Duration),

    #[error("Search failed: {0}")]
    Search(String),
}

impl AppError {
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Input(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage { .. } | Self::Index(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::NotFound(_) => "not_found",
            Self::Storage { .. } => "storage",
            Self::Index(_) => "index",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", self);
        }
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}
