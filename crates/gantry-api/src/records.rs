//! Handlers for per-record endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/{type_name}` | Body: field values; returns 201 + the persisted record |
//! | `GET`    | `/{type_name}/{id}` | Single record, side relations included |
//! | `PUT`    | `/{type_name}/{id}` | Body: field values; runs the update hooks |
//! | `DELETE` | `/{type_name}/{id}` | Removes the record and its relation links |
//! | `GET`    | `/{type_name}/{id}/form` | Resolved form definition for the record |
//! | `GET`    | `/{type_name}/{id}/children` | Direct children (`Nested` types) |
//! | `GET`    | `/{type_name}/{id}/parents` | Ancestor chain, parent first |
//! | `GET`    | `/{type_name}/{id}/descendants` | Depth-first subtree |
//!
//! Record values travel as JSON object bodies; engine parameters (the
//! `comment` accompanying an update, state-field targets are ordinary
//! values) stay in the query string so hooks can read them off the
//! request context.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
  Json,
  extract::{Path, Query, State},
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use serde::Serialize;
use serde_json::{Map, Value};

use gantry_core::{
  capability::{Capability, RelationKind},
  forms::{FormConfig, resolve_form},
  hierarchy,
  record::Record,
  schema::EntityDef,
  store::EntityStore,
};

use crate::{AppState, OVERVIEW_REGION, context::build_context, error::ApiError};

// ─── Payload ─────────────────────────────────────────────────────────────────

/// Boundary view of a record: the field map plus any loaded side
/// relations, keyed by relation kind.
#[derive(Debug, Serialize)]
pub struct RecordPayload {
  pub id:        Option<i64>,
  pub type_name: String,
  pub fields:    BTreeMap<String, Value>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub relations: BTreeMap<&'static str, Vec<RecordPayload>>,
}

impl From<&Record> for RecordPayload {
  fn from(record: &Record) -> Self {
    let mut relations = BTreeMap::new();
    for kind in [
      RelationKind::Logs,
      RelationKind::Comments,
      RelationKind::Tags,
      RelationKind::Todos,
    ] {
      let related = record.relation(kind);
      if !related.is_empty() {
        relations
          .insert(kind.key(), related.iter().map(RecordPayload::from).collect());
      }
    }
    RecordPayload {
      id:        record.id,
      type_name: record.type_name.clone(),
      fields:    record.fields().clone(),
      relations,
    }
  }
}

// ─── Create ──────────────────────────────────────────────────────────────────

/// `POST /{type_name}` — body is a JSON object of field values.
///
/// The record is built through the type's factory (capability defaults
/// applied, ownership stamped from the acting user), the body staged onto
/// it, and the create hooks run inside the insert transaction.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  Path(type_name): Path<String>,
  headers: HeaderMap,
  Query(params): Query<Vec<(String, String)>>,
  Json(values): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let ctx =
    build_context(state.store.as_ref(), &state.sessions, &headers, params)
      .await?;
  let factory = state.registry.factory(&type_name)?;
  let mut record = factory.create(ctx.user.as_ref());
  record.stage(factory.def(), values);

  let record =
    state.store.insert(&ctx, factory.def().clone(), record).await?;
  Ok((StatusCode::CREATED, Json(RecordPayload::from(&record))))
}

// ─── Read ────────────────────────────────────────────────────────────────────

/// `GET /{type_name}/{id}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path((type_name, id)): Path<(String, i64)>,
) -> Result<Json<RecordPayload>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let factory = state
    .registry
    .factory(&type_name)?
    .with_cache_region(OVERVIEW_REGION);
  let record = factory.load(state.store.as_ref(), id).await?;
  Ok(Json(RecordPayload::from(&record)))
}

// ─── Update ──────────────────────────────────────────────────────────────────

/// `PUT /{type_name}/{id}` — body is a JSON object of field values.
///
/// Staging and the update hooks happen inside the store's transaction; a
/// rejected state transition or any other hook failure leaves the record
/// untouched and maps to a client error.
pub async fn update_one<S>(
  State(state): State<AppState<S>>,
  Path((type_name, id)): Path<(String, i64)>,
  headers: HeaderMap,
  Query(params): Query<Vec<(String, String)>>,
  Json(values): Json<Map<String, Value>>,
) -> Result<Json<RecordPayload>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let ctx =
    build_context(state.store.as_ref(), &state.sessions, &headers, params)
      .await?;
  let def = state.registry.get(&type_name)?;
  let record = state.store.update(&ctx, def, id, values).await?;
  Ok(Json(RecordPayload::from(&record)))
}

// ─── Delete ──────────────────────────────────────────────────────────────────

/// `DELETE /{type_name}/{id}` — 204 on success, 404 for unknown ids.
pub async fn delete_one<S>(
  State(state): State<AppState<S>>,
  Path((type_name, id)): Path<(String, i64)>,
) -> Result<StatusCode, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let def = state.registry.get(&type_name)?;
  // Load first so a missing id is a 404 rather than a no-op.
  state.store.fetch(def.clone(), id, None).await?;
  state.store.delete(def, id).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Form ────────────────────────────────────────────────────────────────────

/// `GET /{type_name}/{id}/form` — the form definition governing the
/// record: the stored form referenced by its `fid` when set, else the
/// library's `<type>.xml` lookup.
pub async fn form<S>(
  State(state): State<AppState<S>>,
  Path((type_name, id)): Path<(String, i64)>,
  headers: HeaderMap,
) -> Result<Json<FormConfig>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let ctx =
    build_context(state.store.as_ref(), &state.sessions, &headers, Vec::new())
      .await?;
  let def = state.registry.get(&type_name)?;
  let record = state.store.fetch(def, id, None).await?;
  let form = resolve_form(
    &ctx,
    state.store.as_ref(),
    &state.registry,
    &state.forms,
    &record,
  )
  .await?;
  Ok(Json(FormConfig::clone(&form)))
}

// ─── Hierarchy ───────────────────────────────────────────────────────────────

fn require_nested<S: EntityStore>(
  state: &AppState<S>,
  type_name: &str,
) -> Result<Arc<EntityDef>, ApiError> {
  let def = state.registry.get(type_name)?;
  if !def.composes(Capability::Nested) {
    return Err(ApiError::BadRequest(format!(
      "type {type_name} does not compose nested"
    )));
  }
  Ok(def)
}

/// `GET /{type_name}/{id}/children` — direct children, id order.
pub async fn children<S>(
  State(state): State<AppState<S>>,
  Path((type_name, id)): Path<(String, i64)>,
) -> Result<Json<Vec<RecordPayload>>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let def = require_nested(&state, &type_name)?;
  state.store.fetch(def.clone(), id, None).await?;
  let rows = state.store.fetch_children(def, id).await?;
  Ok(Json(rows.iter().map(RecordPayload::from).collect()))
}

/// `GET /{type_name}/{id}/parents` — ancestor chain, immediate parent
/// first. A parent cycle is a client-visible error, not a hang.
pub async fn parents<S>(
  State(state): State<AppState<S>>,
  Path((type_name, id)): Path<(String, i64)>,
) -> Result<Json<Vec<RecordPayload>>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let def = require_nested(&state, &type_name)?;
  let record = state.store.fetch(def.clone(), id, None).await?;
  let chain = hierarchy::parents(state.store.as_ref(), def, &record).await?;
  Ok(Json(chain.iter().map(RecordPayload::from).collect()))
}

/// `GET /{type_name}/{id}/descendants` — the whole subtree, depth-first.
pub async fn descendants<S>(
  State(state): State<AppState<S>>,
  Path((type_name, id)): Path<(String, i64)>,
) -> Result<Json<Vec<RecordPayload>>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let def = require_nested(&state, &type_name)?;
  let record = state.store.fetch(def.clone(), id, None).await?;
  let subtree =
    hierarchy::descendants(state.store.as_ref(), def, &record).await?;
  Ok(Json(subtree.iter().map(RecordPayload::from).collect()))
}
