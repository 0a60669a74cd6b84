//! Handler for the `/types` endpoint.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/types` | Descriptors for every registered type, name-ordered |

use axum::{Json, extract::State};
use serde::Serialize;

use gantry_core::{
  capability::Capability,
  schema::{ActionDef, EntityDef, TableConfig},
  store::EntityStore,
};

use crate::AppState;

/// Everything a client needs to render a type: its labels, field set,
/// composed capabilities, action palette, and overview-table layout.
#[derive(Debug, Serialize)]
pub struct TypeDescriptor {
  pub name:         String,
  pub label:        String,
  pub label_plural: String,
  pub fields:       Vec<String>,
  pub capabilities: Vec<Capability>,
  pub actions:      Vec<ActionDef>,
  pub table:        TableConfig,
  pub repr:         Option<String>,
}

impl From<&EntityDef> for TypeDescriptor {
  fn from(def: &EntityDef) -> Self {
    TypeDescriptor {
      name:         def.name().to_owned(),
      label:        def.singular_label().to_owned(),
      label_plural: def.plural_label().to_owned(),
      fields:       def.all_fields().into_iter().map(str::to_owned).collect(),
      capabilities: def.capabilities().to_vec(),
      actions:      def.actions().to_vec(),
      table:        def.table().clone(),
      repr:         def.repr().map(str::to_owned),
    }
  }
}

/// `GET /types`
pub async fn list<S>(
  State(state): State<AppState<S>>,
) -> Json<Vec<TypeDescriptor>>
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  let descriptors =
    state.registry.iter().map(|def| TypeDescriptor::from(def.as_ref())).collect();
  Json(descriptors)
}
