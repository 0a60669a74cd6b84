//! Per-browser session state.
//!
//! Listing state (sort, search stack, regex flag) and the bundle protocol
//! both live in the session under dotted keys namespaced by entity-type
//! name, so two types' overviews never clobber each other. Values are
//! stored as JSON so the typed state (criterion stacks, id lists) survives
//! the trip.

use std::{collections::HashMap, sync::Mutex};

use serde_json::Value;

// ─── Keys ────────────────────────────────────────────────────────────────────

pub fn sort_field_key(type_name: &str) -> String {
  format!("{type_name}.list.sort_field")
}

pub fn sort_order_key(type_name: &str) -> String {
  format!("{type_name}.list.sort_order")
}

pub fn search_key(type_name: &str) -> String {
  format!("{type_name}.list.search")
}

pub fn regexpr_key(type_name: &str) -> String {
  format!("{type_name}.list.search.regexpr")
}

pub fn bundle_action_key(type_name: &str) -> String {
  format!("{type_name}.bundle.action")
}

pub fn bundle_items_key(type_name: &str) -> String {
  format!("{type_name}.bundle.items")
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// Key-value session storage. Implementations use interior mutability so a
/// session can be shared behind an `Arc` across a request.
pub trait Session: Send + Sync {
  fn get(&self, key: &str) -> Option<Value>;
  fn set(&self, key: &str, value: Value);
  fn remove(&self, key: &str) -> Option<Value>;

  fn get_str(&self, key: &str) -> Option<String> {
    match self.get(key) {
      Some(Value::String(s)) => Some(s),
      _ => None,
    }
  }

  fn get_bool(&self, key: &str) -> bool {
    matches!(self.get(key), Some(Value::Bool(true)))
  }

  fn set_str(&self, key: &str, value: &str) {
    self.set(key, Value::String(value.to_owned()));
  }
}

/// Process-local session backing.
#[derive(Debug, Default)]
pub struct MemorySession {
  values: Mutex<HashMap<String, Value>>,
}

impl MemorySession {
  pub fn new() -> Self { Self::default() }
}

impl Session for MemorySession {
  fn get(&self, key: &str) -> Option<Value> {
    self.values.lock().unwrap().get(key).cloned()
  }

  fn set(&self, key: &str, value: Value) {
    self.values.lock().unwrap().insert(key.to_owned(), value);
  }

  fn remove(&self, key: &str) -> Option<Value> {
    self.values.lock().unwrap().remove(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keys_are_namespaced_per_type() {
    assert_eq!(sort_field_key("notes"), "notes.list.sort_field");
    assert_eq!(search_key("tickets"), "tickets.list.search");
    assert_ne!(regexpr_key("notes"), regexpr_key("tickets"));
    assert_eq!(bundle_action_key("notes"), "notes.bundle.action");
  }

  #[test]
  fn memory_session_round_trips_json() {
    let session = MemorySession::new();
    session.set("k", serde_json::json!([1, 2, 3]));
    assert_eq!(session.get("k"), Some(serde_json::json!([1, 2, 3])));
    assert_eq!(session.remove("k"), Some(serde_json::json!([1, 2, 3])));
    assert_eq!(session.get("k"), None);

    session.set_str("s", "desc");
    assert_eq!(session.get_str("s").as_deref(), Some("desc"));
    assert!(!session.get_bool("s"));
  }
}
