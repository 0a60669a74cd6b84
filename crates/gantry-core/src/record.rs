//! Records — the persisted unit of every registered entity type.
//!
//! A record is a thin envelope: an optional id (assigned on first persist),
//! the entity-type name, and a field map. Capability-contributed fields
//! (`uid`, `parent_id`, `created`, …) live in the same map as declared
//! columns; side relations (logs, comments, tags, todos) are carried
//! separately and filled in by the store's eager fetch.
//!
//! Field access is an explicit two-step lookup: the field map first, then —
//! for Blobform types — a key parsed out of the `data` JSON blob. There is
//! no implicit attribute fallback.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  capability::{Capability, RelationKind},
  schema::EntityDef,
  user::User,
};

// ─── Field values ────────────────────────────────────────────────────────────

/// Render a field value the way listings and audit logs display it:
/// strings verbatim, lists flattened to a comma-joined form, everything
/// else (numbers, booleans, null, objects) in its JSON rendering.
pub fn display_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Array(items) => items
      .iter()
      .map(display_value)
      .collect::<Vec<_>>()
      .join(", "),
    other => other.to_string(),
  }
}

/// Total order over field values used by the listing sort: null first, then
/// booleans, numbers, strings; composites compare by display form. Mixed
/// types order by that rank, so sorting never fails on heterogeneous data.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
  fn rank(v: &Value) -> u8 {
    match v {
      Value::Null => 0,
      Value::Bool(_) => 1,
      Value::Number(_) => 2,
      Value::String(_) => 3,
      Value::Array(_) => 4,
      Value::Object(_) => 5,
    }
  }

  match (a, b) {
    (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
    (Value::Number(x), Value::Number(y)) => {
      let xf = x.as_f64().unwrap_or(f64::NAN);
      let yf = y.as_f64().unwrap_or(f64::NAN);
      xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
    }
    (Value::String(x), Value::String(y)) => x.cmp(y),
    _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
    _ => display_value(a).cmp(&display_value(b)),
  }
}

// ─── Change sets ─────────────────────────────────────────────────────────────

/// Old and new value of one field in a pending change-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
  pub old: Value,
  pub new: Value,
}

/// The pending changes of one update, keyed by field name. Only genuine
/// changes are recorded — a write of the current value never enters the set,
/// so downstream consumers (audit diff, state-machine triggers) see exactly
/// what will differ after commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
  changes: BTreeMap<String, FieldChange>,
}

impl ChangeSet {
  pub fn new() -> Self { Self::default() }

  /// Record a change; dropped if `old == new`.
  pub fn record(&mut self, field: &str, old: Value, new: Value) {
    if old != new {
      self.changes.insert(field.to_owned(), FieldChange { old, new });
    }
  }

  pub fn get(&self, field: &str) -> Option<&FieldChange> {
    self.changes.get(field)
  }

  pub fn is_empty(&self) -> bool { self.changes.is_empty() }

  pub fn len(&self) -> usize { self.changes.len() }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
    self.changes.iter()
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A record of a registered entity type. `id` is `None` until the store
/// assigns one on first persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
  pub id:        Option<i64>,
  pub type_name: String,
  fields:        BTreeMap<String, Value>,
  #[serde(skip)]
  relations:     BTreeMap<RelationKind, Vec<Record>>,
}

impl Record {
  /// A transient record with no fields set. Prefer
  /// [`crate::factory::Factory::create`], which applies capability defaults.
  pub fn new(type_name: impl Into<String>) -> Self {
    Record {
      id:        None,
      type_name: type_name.into(),
      fields:    BTreeMap::new(),
      relations: BTreeMap::new(),
    }
  }

  // ── Field access ──────────────────────────────────────────────────────

  /// Direct field-map access; does not consult the blob.
  pub fn get(&self, field: &str) -> Option<&Value> { self.fields.get(field) }

  /// Set a field and return the previous value (if any).
  pub fn set(&mut self, field: &str, value: Value) -> Option<Value> {
    self.fields.insert(field.to_owned(), value)
  }

  pub fn unset(&mut self, field: &str) -> Option<Value> {
    self.fields.remove(field)
  }

  /// Two-step lookup: declared field first, then a key from the `data`
  /// blob. Returns an owned value because blob hits are parsed on demand.
  pub fn lookup(&self, field: &str) -> Option<Value> {
    if let Some(v) = self.fields.get(field) {
      return Some(v.clone());
    }
    self.blob_data().remove(field)
  }

  /// Convenience: the field as i64 via the two-step lookup.
  pub fn lookup_i64(&self, field: &str) -> Option<i64> {
    self.lookup(field).and_then(|v| v.as_i64())
  }

  pub fn fields(&self) -> &BTreeMap<String, Value> { &self.fields }

  /// Parse the `data` blob into a map; anything unparseable reads as empty.
  pub fn blob_data(&self) -> Map<String, Value> {
    match self.fields.get("data") {
      Some(Value::String(raw)) => {
        serde_json::from_str(raw).unwrap_or_default()
      }
      _ => Map::new(),
    }
  }

  // ── Relations ─────────────────────────────────────────────────────────

  pub fn relation(&self, kind: RelationKind) -> &[Record] {
    self.relations.get(&kind).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn set_relation(&mut self, kind: RelationKind, records: Vec<Record>) {
    self.relations.insert(kind, records);
  }

  pub fn push_relation(&mut self, kind: RelationKind, record: Record) {
    self.relations.entry(kind).or_default().push(record);
  }

  // ── Saving ────────────────────────────────────────────────────────────

  /// Stage submitted values onto the record, returning the pending
  /// change-set.
  ///
  /// Keys matching a field the type declares (columns, capability fields,
  /// state fields) are written into the field map. For Blobform types every
  /// remaining key is serialized into the `data` blob — the partition is
  /// computed on every call and the blob replaced wholesale, so stale keys
  /// never linger. For other types unknown keys are ignored.
  pub fn stage(
    &mut self,
    def: &EntityDef,
    values: Map<String, Value>,
  ) -> ChangeSet {
    let mut changes = ChangeSet::new();
    let mut blob = Map::new();
    let blobform = def.composes(Capability::Blobform);

    for (key, value) in values {
      if def.has_field(&key) {
        let old = self.set(&key, value.clone()).unwrap_or(Value::Null);
        changes.record(&key, old, value);
      } else if blobform {
        blob.insert(key, value);
      } else {
        tracing::debug!(type_name = %self.type_name, field = %key,
                        "ignoring unknown field");
      }
    }

    if blobform {
      let old = self
        .get("data")
        .cloned()
        .unwrap_or_else(|| Value::String("{}".into()));
      let new = Value::String(Value::Object(blob).to_string());
      self.set("data", new.clone());
      changes.record("data", old, new);
    }

    changes
  }

  // ── Capability accessors ──────────────────────────────────────────────

  /// Ownership predicate; false when the type does not compose `Owned` or
  /// no owner was recorded.
  pub fn is_owner(&self, user: &User) -> bool {
    self.lookup_i64("uid") == Some(user.id)
  }

  pub fn parent_id(&self) -> Option<i64> { self.lookup_i64("parent_id") }

  /// Human-readable form used in audit-log subjects and listings: the
  /// type's repr field when set and present, otherwise `<type> #<id>`.
  pub fn display(&self, def: &EntityDef) -> String {
    if let Some(field) = def.repr() {
      if let Some(v) = self.lookup(field) {
        if !matches!(v, Value::Null) {
          return display_value(&v);
        }
      }
    }
    match self.id {
      Some(id) => format!("{} #{id}", self.type_name),
      None => format!("{} (new)", self.type_name),
    }
  }
}
