//! Crate-wide error type and its mapping onto the wire's status/body contract.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Every way a request into the registry core can fail, mapped 1:1 onto the
/// status/body table the wire protocol demands.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RegistryError {
    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("image already exists")]
    Conflict,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Internal(err.into())
    }
}

impl From<crate::registry::blob_store::BlobStoreError> for RegistryError {
    fn from(err: crate::registry::blob_store::BlobStoreError) -> Self {
        match err {
            crate::registry::blob_store::BlobStoreError::NotFound => {
                RegistryError::NotFound("layer")
            }
            crate::registry::blob_store::BlobStoreError::Io(io_err) => {
                RegistryError::Internal(io_err.into())
            }
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        match self {
            RegistryError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            RegistryError::Unauthorized => (StatusCode::UNAUTHORIZED, ()).into_response(),
            RegistryError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("{resource} not found") })),
            )
                .into_response(),
            RegistryError::Conflict => (
                StatusCode::CONFLICT,
                Json(json!({ "error": "image already exists" })),
            )
                .into_response(),
            RegistryError::ChecksumMismatch => (
                StatusCode::CONFLICT,
                Json(json!({ "error": "Checksum mismatch" })),
            )
                .into_response(),
            RegistryError::Internal(err) => {
                tracing::error!(%err, "internal registry error");
                (StatusCode::INTERNAL_SERVER_ERROR, ()).into_response()
            }
        }
    }
}
