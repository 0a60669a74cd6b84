//! Handlers for `/users` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/users` | Body: `{"name":"..."}`; returns 201 + the new user |
//! | `GET`  | `/users/{id}` | Single user with their settings document |
//!
//! Users are actors, not entity types; creating one here is what makes
//! the `x-gantry-user` header resolvable on every other endpoint.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use gantry_core::{
  store::EntityStore,
  user::{Settings, User},
};

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct NewUserBody {
  pub name: String,
}

/// Boundary view of a user row.
#[derive(Debug, Serialize)]
pub struct UserPayload {
  pub id:       i64,
  pub name:     String,
  pub gid:      Option<i64>,
  pub settings: Settings,
}

impl From<User> for UserPayload {
  fn from(user: User) -> Self {
    UserPayload {
      id:       user.id,
      name:     user.name,
      gid:      user.gid,
      settings: user.settings,
    }
  }
}

/// `POST /users` — returns 201 + the stored user.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<NewUserBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let user = state.store.add_user(body.name).await?;
  Ok((StatusCode::CREATED, Json(UserPayload::from(user))))
}

/// `GET /users/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path(id): Path<i64>,
) -> Result<Json<UserPayload>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let user = state.store.load_user(id).await?;
  Ok(Json(UserPayload::from(user)))
}
