//! Handlers for the two-step bundled-action protocol.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/{type_name}/bundle` | `?bundle_action=<name>&id=..&id=..` stages a selection |
//! | `POST` | `/{type_name}/bundle/confirm` | Applies the staged action |
//!
//! The selection lives in the caller's session between the two steps, so
//! both requests must carry the same session header. Confirmation
//! re-checks each selected record against the access policy and skips
//! records that vanished in between; the staged selection stays put
//! afterwards, matching the session-backed flow it mirrors.

use axum::{
  Json,
  extract::{Path, Query, State},
  http::HeaderMap,
};

use gantry_core::{
  overview::{BundleOutcome, BundleSelection, confirm_bundle, stage_bundle},
  store::EntityStore,
};

use crate::{AppState, context::build_context, error::ApiError};

/// `POST /{type_name}/bundle` — stage (or restate) the selection.
///
/// A request carrying `bundle_action` plus repeated `id` params replaces
/// the stored selection; one without reads the current selection back.
/// No staged selection at all is a client error.
pub async fn stage<S>(
  State(state): State<AppState<S>>,
  Path(type_name): Path<String>,
  headers: HeaderMap,
  Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<BundleSelection>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let ctx =
    build_context(state.store.as_ref(), &state.sessions, &headers, params)
      .await?;
  let def = state.registry.get(&type_name)?;
  let selection = stage_bundle(&def, &ctx).ok_or_else(|| {
    ApiError::BadRequest(format!("no bundle staged for {type_name}"))
  })?;
  Ok(Json(selection))
}

/// `POST /{type_name}/bundle/confirm` — apply the staged action.
///
/// Dispatches to the export or delete implementation; an action the
/// engine does not support is a client error, as is confirming without a
/// staged selection.
pub async fn confirm<S>(
  State(state): State<AppState<S>>,
  Path(type_name): Path<String>,
  headers: HeaderMap,
  Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<BundleOutcome>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let ctx =
    build_context(state.store.as_ref(), &state.sessions, &headers, params)
      .await?;
  let def = state.registry.get(&type_name)?;
  let selection = stage_bundle(&def, &ctx).ok_or_else(|| {
    ApiError::BadRequest(format!("no bundle staged for {type_name}"))
  })?;
  let outcome = confirm_bundle(
    state.store.as_ref(),
    state.policy.as_ref(),
    &ctx,
    def,
    selection,
  )
  .await?;
  Ok(Json(outcome))
}
