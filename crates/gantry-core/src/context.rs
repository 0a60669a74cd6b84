//! Per-request execution context.
//!
//! Bundles the acting user, the request parameters, the browser session,
//! and the request-scoped caches (state-machine snapshots, parsed forms).
//! The caches live and die with the request; nothing here is shared
//! process state.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
};

use crate::{
  forms::FormConfig,
  record::Record,
  schema::EntityDef,
  session::Session,
  statemachine::MachineSnapshot,
  user::User,
};

type MachineKey = (String, Option<i64>, String);

pub struct RequestContext {
  pub user:    Option<User>,
  pub session: Arc<dyn Session>,
  params:      Vec<(String, String)>,
  machines:    Mutex<HashMap<MachineKey, MachineSnapshot>>,
  forms:       Mutex<HashMap<i64, Arc<FormConfig>>>,
}

impl RequestContext {
  pub fn new(session: Arc<dyn Session>) -> Self {
    RequestContext {
      user: None,
      session,
      params: Vec::new(),
      machines: Mutex::new(HashMap::new()),
      forms: Mutex::new(HashMap::new()),
    }
  }

  pub fn with_user(mut self, user: User) -> Self {
    self.user = Some(user);
    self
  }

  /// Query and form parameters, merged, in arrival order. Repeated names
  /// are kept (bundle selections submit `id` once per item).
  pub fn with_params(
    mut self,
    params: impl IntoIterator<Item = (String, String)>,
  ) -> Self {
    self.params.extend(params);
    self
  }

  /// First value of a parameter.
  pub fn param(&self, name: &str) -> Option<&str> {
    self
      .params
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, v)| v.as_str())
  }

  /// Every value of a repeated parameter, in arrival order.
  pub fn param_all(&self, name: &str) -> Vec<&str> {
    self
      .params
      .iter()
      .filter(|(n, _)| n == name)
      .map(|(_, v)| v.as_str())
      .collect()
  }

  pub fn has_param(&self, name: &str) -> bool {
    self.params.iter().any(|(n, _)| n == name)
  }

  // ── request-scoped caches ──

  /// Snapshot of the machine driving `field` on this record, captured once
  /// per `(type, id, field)` for the request. Returns `None` when the type
  /// declares no machine for the field.
  pub fn statemachine(
    &self,
    def: &EntityDef,
    record: &Record,
    field: &str,
  ) -> Option<MachineSnapshot> {
    let machine = def.statemachines().get(field)?;
    let key = (record.type_name.clone(), record.id, field.to_owned());
    let mut cache = self.machines.lock().unwrap();
    let snapshot = cache.entry(key).or_insert_with(|| {
      MachineSnapshot::capture(field, machine, record.lookup_i64(field))
    });
    Some(snapshot.clone())
  }

  /// Drop a cached snapshot after its state field changed mid-request.
  pub fn invalidate_statemachine(
    &self,
    type_name: &str,
    id: Option<i64>,
    field: &str,
  ) {
    let key = (type_name.to_owned(), id, field.to_owned());
    self.machines.lock().unwrap().remove(&key);
  }

  pub fn cached_form(&self, fid: i64) -> Option<Arc<FormConfig>> {
    self.forms.lock().unwrap().get(&fid).cloned()
  }

  pub fn cache_form(&self, fid: i64, form: Arc<FormConfig>) {
    self.forms.lock().unwrap().insert(fid, form);
  }
}

#[cfg(test)]
mod tests {
  use serde_json::Value;

  use super::*;
  use crate::{session::MemorySession, statemachine::StateMachineDef};

  fn ticket_def() -> EntityDef {
    EntityDef::new("tickets")
      .column("title")
      .column("state")
      .capability(crate::capability::Capability::Stateful)
      .statemachine(
        "state",
        StateMachineDef::new(1)
          .state(1, "open", "")
          .state(2, "closed", "")
          .transition(1, 2, "close"),
      )
  }

  #[test]
  fn params_keep_repeats_and_order() {
    let ctx = RequestContext::new(Arc::new(MemorySession::new()))
      .with_params(vec![
        ("id".into(), "3".into()),
        ("id".into(), "7".into()),
        ("form".into(), "search".into()),
      ]);
    assert_eq!(ctx.param("id"), Some("3"));
    assert_eq!(ctx.param_all("id"), ["3", "7"]);
    assert!(ctx.has_param("form"));
    assert!(!ctx.has_param("reset"));
  }

  #[test]
  fn machine_snapshots_are_cached_until_invalidated() {
    let def = ticket_def();
    let ctx = RequestContext::new(Arc::new(MemorySession::new()));
    let mut record = Record::new("tickets");
    record.id = Some(1);
    record.set("state", Value::from(1));

    let snap = ctx.statemachine(&def, &record, "state").unwrap();
    assert_eq!(snap.current.name, "open");

    // The cache keeps serving the capture even after the field moves on.
    record.set("state", Value::from(2));
    let snap = ctx.statemachine(&def, &record, "state").unwrap();
    assert_eq!(snap.current.name, "open");

    ctx.invalidate_statemachine("tickets", Some(1), "state");
    let snap = ctx.statemachine(&def, &record, "state").unwrap();
    assert_eq!(snap.current.name, "closed");

    assert!(ctx.statemachine(&def, &record, "title").is_none());
  }
}
