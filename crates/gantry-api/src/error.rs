//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("engine error: {0}")]
  Engine(#[source] gantry_core::Error),
}

/// Map the engine taxonomy onto the three response classes. Lookup misses
/// are 404s; anything the caller could have submitted differently is a
/// 400; the rest is the server's problem.
impl From<gantry_core::Error> for ApiError {
  fn from(e: gantry_core::Error) -> Self {
    use gantry_core::Error as E;
    match e {
      E::NotFound { .. } => ApiError::NotFound(e.to_string()),
      E::Configuration(_)
      | E::Transaction { .. }
      | E::InvalidTransition { .. }
      | E::CycleDetected { .. }
      | E::FormDefinition(_) => ApiError::BadRequest(e.to_string()),
      other => ApiError::Engine(other),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Engine(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
