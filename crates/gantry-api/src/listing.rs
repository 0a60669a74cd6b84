//! Handler for the overview endpoint.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/{type_name}` | Sorted, filtered listing; engine params in the query string |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::HeaderMap,
};

use gantry_core::{
  overview::{OverviewPage, list_page},
  store::EntityStore,
};

use crate::{AppState, OVERVIEW_REGION, context::build_context, error::ApiError};

/// `GET /{type_name}` — one overview request.
///
/// All listing state rides in the query string: `sort_field`/`sort_order`,
/// `form=search` submissions with `search`, `field`, `saved`, `save` or
/// `delete`, the `enableregexpr`/`disableregexpr` toggles, and `reset`.
/// Resolved sort and search state persists into the caller's session, so a
/// follow-up request without parameters sees the same listing.
pub async fn overview<S>(
  State(state): State<AppState<S>>,
  Path(type_name): Path<String>,
  headers: HeaderMap,
  Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<OverviewPage>, ApiError>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let ctx =
    build_context(state.store.as_ref(), &state.sessions, &headers, params)
      .await?;
  let page = list_page(
    state.store.as_ref(),
    &state.registry,
    state.policy.as_ref(),
    &ctx,
    &type_name,
    Some(OVERVIEW_REGION),
  )
  .await?;
  Ok(Json(page))
}
