use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("No registered students")]
    NoRegisteredStudents,

    #[error("Face embedding model not loaded")]
    ModelNotLoaded,

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Model produced an empty embedding")]
    EmptyEmbedding,
}

impl AttendanceError {
    pub fn status(&self) -> StatusCode {
        match self {
            AttendanceError::NoRegisteredStudents => StatusCode::NOT_FOUND,
            AttendanceError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            AttendanceError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            AttendanceError::EmptyEmbedding => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Maps an arbitrary pipeline error onto an HTTP status, looking through
/// `anyhow` context for a domain error first.
pub fn status_for(err: &anyhow::Error) -> StatusCode {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<AttendanceError>())
        .map(AttendanceError::status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
