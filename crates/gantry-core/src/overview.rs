//! Overview orchestration: one entry point per overview request, plus the
//! two-step bundled-action protocol.
//!
//! `list_page` is the whole listing flow in request order: resolve search
//! and sort state, materialize, sort, filter, persist state, handle
//! saved-search save/delete, and build the payload. The search stack (and
//! any saved-search mutation) is persisted **only when the filtered
//! listing came back non-empty** — a search that matched nothing can be
//! popped away again on the next submission instead of locking the user
//! out of the overview.

use std::sync::Arc;

use serde_json::Value;

use crate::{
  access::{AccessPolicy, Subject},
  context::RequestContext,
  error::{Error, Result},
  listing::Listing,
  record::Record,
  render::{ListPayload, SavedSearchEntry, list_payload},
  schema::{EntityDef, Registry},
  search::{SavedSearch, SortSpec, current_search, current_sort},
  session::{bundle_action_key, bundle_items_key, search_key},
  store::EntityStore,
};

/// Everything an overview response carries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OverviewPage {
  #[serde(flatten)]
  pub payload: ListPayload,
  pub sort:    SortSpec,
}

/// Run one overview request for `type_name`.
pub async fn list_page<S: EntityStore + ?Sized>(
  store: &S,
  registry: &Registry,
  policy: &dyn AccessPolicy,
  ctx: &RequestContext,
  type_name: &str,
  region: Option<&str>,
) -> Result<OverviewPage> {
  let def = registry.get(type_name)?;

  let search = current_search(&def, ctx);
  let sort = current_sort(&def, ctx);

  let mut listing = Listing::load(store, def.clone(), region).await?;
  listing.sort(&sort.field, sort.order);
  listing.filter(&search);

  let mut refreshed_user = None;
  if !listing.is_empty() {
    ctx
      .session
      .set(&search_key(def.name()), serde_json::to_value(&search)?);
    if ctx.param("form") == Some("search") {
      refreshed_user =
        handle_search_settings(store, ctx, &def, &search, &sort).await?;
    }
  }

  let mut page =
    OverviewPage { payload: list_payload(&listing, ctx, policy), sort };
  if let Some(user) = refreshed_user {
    // The settings write happened after the context was built; show the
    // fresh list.
    page.payload.saved_searches = user
      .settings
      .searches_for(def.name())
      .map(|(id, s)| SavedSearchEntry { id: id.clone(), name: s.name.clone() })
      .collect();
  }
  Ok(page)
}

/// Apply a `save`/`delete` saved-search request against a fresh copy of
/// the acting user's settings and persist it. Returns the refreshed user
/// when a write happened.
async fn handle_search_settings<S: EntityStore + ?Sized>(
  store: &S,
  ctx: &RequestContext,
  def: &EntityDef,
  search: &[crate::search::SearchCriterion],
  sort: &SortSpec,
) -> Result<Option<crate::user::User>> {
  let Some(acting) = &ctx.user else { return Ok(None) };

  if let Some(name) = ctx.param("save") {
    let mut user = store.load_user(acting.id).await?;
    user.settings.save_search(def.name(), SavedSearch {
      stack: search.to_vec(),
      sort:  sort.clone(),
      name:  name.to_owned(),
    });
    store.save_user_settings(user.id, user.settings.clone()).await?;
    return Ok(Some(user));
  }
  if let Some(id) = ctx.param("delete") {
    let mut user = store.load_user(acting.id).await?;
    user.settings.delete_search(def.name(), id);
    store.save_user_settings(user.id, user.settings.clone()).await?;
    return Ok(Some(user));
  }
  Ok(None)
}

// ─── Bundled actions ─────────────────────────────────────────────────────────

/// The staged selection read back from the session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BundleSelection {
  pub action: String,
  pub ids:    Vec<i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum BundleOutcome {
  /// JSON export of the permitted records.
  Exported { items: Value },
  Deleted { count: usize },
}

/// Step one of the bundle protocol. A request carrying `bundle_action`
/// replaces the stored selection with the submitted action and `id`
/// values; either way the current selection is read back from the
/// session. `None` means no bundle has been staged for this type.
pub fn stage_bundle(
  def: &EntityDef,
  ctx: &RequestContext,
) -> Option<BundleSelection> {
  let action_key = bundle_action_key(def.name());
  let items_key = bundle_items_key(def.name());

  if let Some(action) = ctx.param("bundle_action") {
    let ids: Vec<i64> = ctx
      .param_all("id")
      .iter()
      .filter_map(|s| s.parse().ok())
      .collect();
    ctx.session.set_str(&action_key, action);
    ctx.session.set(&items_key, serde_json::json!(ids));
  }

  let action = ctx.session.get_str(&action_key)?;
  let ids = ctx
    .session
    .get(&items_key)
    .and_then(|v| serde_json::from_value(v).ok())
    .unwrap_or_default();
  Some(BundleSelection { action, ids })
}

/// Step two: apply the staged action to every selected record the acting
/// user holds the permission for. Records that vanished since selection
/// are skipped like unpermitted ones. Unsupported actions are a
/// configuration error for the boundary to reject.
pub async fn confirm_bundle<S: EntityStore + ?Sized>(
  store: &S,
  policy: &dyn AccessPolicy,
  ctx: &RequestContext,
  def: Arc<EntityDef>,
  selection: BundleSelection,
) -> Result<BundleOutcome> {
  let permission = selection.action.to_lowercase();
  if permission != "export" && permission != "delete" {
    return Err(Error::Configuration(format!(
      "unsupported bundle action {:?}",
      selection.action
    )));
  }

  let mut items: Vec<Record> = Vec::new();
  for id in selection.ids {
    let record = match store.fetch(def.clone(), id, None).await {
      Ok(record) => record,
      Err(Error::NotFound { .. }) => {
        tracing::debug!(type_name = %def.name(), id, "bundle item vanished");
        continue;
      }
      Err(e) => return Err(e),
    };
    if policy.has_permission(&permission, Subject::Item(&def, &record), ctx) {
      items.push(record);
    } else {
      tracing::debug!(type_name = %def.name(), id,
                      action = %permission, "bundle item not permitted");
    }
  }

  match permission.as_str() {
    "export" => Ok(BundleOutcome::Exported { items: export_records(&items) }),
    _ => {
      let mut count = 0;
      for item in &items {
        if let Some(id) = item.id {
          store.delete(def.clone(), id).await?;
          count += 1;
        }
      }
      Ok(BundleOutcome::Deleted { count })
    }
  }
}

/// Flat JSON export: one object per record, `id` plus every field.
pub fn export_records(items: &[Record]) -> Value {
  Value::Array(
    items
      .iter()
      .map(|item| {
        let mut map = serde_json::Map::new();
        map.insert("id".to_owned(), item.id.map(Value::from).unwrap_or(Value::Null));
        for (field, value) in item.fields() {
          map.insert(field.clone(), value.clone());
        }
        Value::Object(map)
      })
      .collect(),
  )
}
