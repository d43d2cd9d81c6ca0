use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use utils::api::error::ApiErrorBody;

use crate::store::StoreError;

#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    body: ApiErrorBody,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody::new(message),
        }
    }

    /// Auth endpoints answer with an error code plus a description.
    pub fn oauth(status: StatusCode, error: &str, description: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error: Some(error.to_string()),
                error_description: Some(description.into()),
                ..ApiErrorBody::default()
            },
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<StoreError> for ErrorResponse {
    fn from(error: StoreError) -> Self {
        let status = match &error {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::InvalidCredentials => StatusCode::BAD_REQUEST,
        };
        Self::new(status, error.to_string())
    }
}
