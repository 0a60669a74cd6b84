//! Users and their durable settings.
//!
//! Users are not entity types; they are the actors records are owned by.
//! The interesting part here is [`Settings`]: a JSON document persisted on
//! the user row, carrying the per-type saved searches that survive across
//! sessions.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::search::SavedSearch;

#[derive(Debug, Clone)]
pub struct User {
  pub id:       i64,
  pub name:     String,
  pub gid:      Option<i64>,
  pub settings: Settings,
}

impl User {
  pub fn new(id: i64, name: impl Into<String>) -> Self {
    User { id, name: name.into(), gid: None, settings: Settings::default() }
  }
}

/// Durable per-user settings. Saved searches are keyed first by
/// entity-type name, then by a generated search id. Unknown settings keys
/// are preserved round-trip.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Settings {
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub searches: BTreeMap<String, BTreeMap<String, SavedSearch>>,
  #[serde(flatten)]
  pub extra:    Map<String, Value>,
}

impl Settings {
  pub fn saved_search(
    &self,
    type_name: &str,
    id: &str,
  ) -> Option<&SavedSearch> {
    self.searches.get(type_name)?.get(id)
  }

  pub fn searches_for(
    &self,
    type_name: &str,
  ) -> impl Iterator<Item = (&String, &SavedSearch)> {
    self.searches.get(type_name).into_iter().flatten()
  }

  /// Store a search under a fresh id and return it. A search whose name is
  /// already taken for this type is silently not stored.
  pub fn save_search(
    &mut self,
    type_name: &str,
    search: SavedSearch,
  ) -> Option<String> {
    let per_type = self.searches.entry(type_name.to_owned()).or_default();
    if per_type.values().any(|s| s.name == search.name) {
      return None;
    }
    let id = Uuid::new_v4().to_string();
    per_type.insert(id.clone(), search);
    Some(id)
  }

  /// Remove a saved search. Unknown ids are ignored.
  pub fn delete_search(&mut self, type_name: &str, id: &str) {
    if let Some(per_type) = self.searches.get_mut(type_name) {
      per_type.remove(id);
    }
  }
}
