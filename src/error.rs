//! HTTP-facing error type. Every handler returns `AppResult<T>`; the
//! conversion below picks the status and renders `{ "error": { "message" } }`.

use axum::{
  extract::{rejection::JsonRejection, FromRequest},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::builder::PublishError;
use crate::schema::ValidationError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Authentication required.")]
  Unauthenticated,
  #[error("Admin access required.")]
  Forbidden,
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  NotFound(String),
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error(transparent)]
  Publish(#[from] PublishError),
  #[error(transparent)]
  Store(#[from] StoreError),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = match &self {
      AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
      AppError::Forbidden => StatusCode::FORBIDDEN,
      AppError::BadRequest(_) | AppError::Validation(_) | AppError::Publish(_) => StatusCode::BAD_REQUEST,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Store(StoreError::UnknownChapter(_) | StoreError::UnknownBatch(_)) => StatusCode::BAD_REQUEST,
      AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    // Storage internals stay in the logs.
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
      error!(target: "lingo_backend", error = %self, "Request failed");
      "Something went wrong while saving. Please try again.".to_string()
    } else {
      self.to_string()
    };

    (status, Json(json!({ "error": { "message": message } }))).into_response()
  }
}

pub type AppResult<T> = Result<T, AppError>;

/// JSON body extractor whose rejections (bad syntax, wrong field types,
/// missing content type) render as a 400 in the shape above.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for AppError {
  fn from(rejection: JsonRejection) -> Self {
    AppError::BadRequest(rejection.body_text())
  }
}
