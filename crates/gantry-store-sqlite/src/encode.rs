//! Encoding and decoding between [`Record`]s and the column layout of the
//! `records` table.
//!
//! Capability fields are stored in dedicated columns; everything else a
//! record carries is packed into the `fields` JSON document. Timestamps are
//! RFC 3339 strings, ids are SQLite rowids.

use gantry_core::{
  capability::RelationKind,
  record::Record,
  user::{Settings, User},
};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Fields persisted as dedicated columns rather than in the JSON document.
pub const CAPABILITY_COLUMNS: &[&str] =
  &["uid", "gid", "parent_id", "created", "updated", "data", "fid"];

/// The `records` columns in [`RawRecord::from_row`] order.
pub const RECORD_COLUMNS: &str =
  "id, type_name, uid, gid, parent_id, created, updated, data, fid, fields";

// ─── Relation kinds ──────────────────────────────────────────────────────────

pub fn decode_relation_kind(s: &str) -> Result<RelationKind> {
  match s {
    "logs" => Ok(RelationKind::Logs),
    "comments" => Ok(RelationKind::Comments),
    "tags" => Ok(RelationKind::Tags),
    "todos" => Ok(RelationKind::Todos),
    other => Err(Error::Decode(format!("unknown relation kind: {other:?}"))),
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Column values of one `records` row, ready to bind.
pub struct EncodedRecord {
  pub type_name: String,
  pub uid:       Option<i64>,
  pub gid:       Option<i64>,
  pub parent_id: Option<i64>,
  pub created:   Option<String>,
  pub updated:   Option<String>,
  pub data:      Option<String>,
  pub fid:       Option<i64>,
  pub fields:    String,
}

pub fn encode_record(record: &Record) -> Result<EncodedRecord> {
  let mut fields = Map::new();
  for (key, value) in record.fields() {
    if !CAPABILITY_COLUMNS.contains(&key.as_str()) {
      fields.insert(key.clone(), value.clone());
    }
  }

  Ok(EncodedRecord {
    type_name: record.type_name.clone(),
    uid:       int_column(record, "uid"),
    gid:       int_column(record, "gid"),
    parent_id: int_column(record, "parent_id"),
    created:   text_column(record, "created"),
    updated:   text_column(record, "updated"),
    data:      text_column(record, "data"),
    fid:       int_column(record, "fid"),
    fields:    serde_json::to_string(&Value::Object(fields))?,
  })
}

fn int_column(record: &Record, field: &str) -> Option<i64> {
  record.fields().get(field).and_then(Value::as_i64)
}

fn text_column(record: &Record, field: &str) -> Option<String> {
  match record.fields().get(field) {
    Some(Value::String(s)) => Some(s.clone()),
    Some(Value::Null) | None => None,
    Some(other) => Some(other.to_string()),
  }
}

/// Raw values read directly from a `records` row.
pub struct RawRecord {
  pub id:        i64,
  pub type_name: String,
  pub uid:       Option<i64>,
  pub gid:       Option<i64>,
  pub parent_id: Option<i64>,
  pub created:   Option<String>,
  pub updated:   Option<String>,
  pub data:      Option<String>,
  pub fid:       Option<i64>,
  pub fields:    String,
}

impl RawRecord {
  /// Read the ten record columns beginning at index `start`.
  pub fn from_row(
    row: &rusqlite::Row<'_>,
    start: usize,
  ) -> rusqlite::Result<Self> {
    Ok(RawRecord {
      id:        row.get(start)?,
      type_name: row.get(start + 1)?,
      uid:       row.get(start + 2)?,
      gid:       row.get(start + 3)?,
      parent_id: row.get(start + 4)?,
      created:   row.get(start + 5)?,
      updated:   row.get(start + 6)?,
      data:      row.get(start + 7)?,
      fid:       row.get(start + 8)?,
      fields:    row.get(start + 9)?,
    })
  }

  pub fn into_record(self) -> Result<Record> {
    let mut record = Record::new(self.type_name);
    record.id = Some(self.id);

    let fields: Map<String, Value> = serde_json::from_str(&self.fields)?;
    for (key, value) in fields {
      record.set(&key, value);
    }

    if let Some(uid) = self.uid {
      record.set("uid", Value::from(uid));
    }
    if let Some(gid) = self.gid {
      record.set("gid", Value::from(gid));
    }
    if let Some(parent_id) = self.parent_id {
      record.set("parent_id", Value::from(parent_id));
    }
    if let Some(created) = self.created {
      record.set("created", Value::String(created));
    }
    if let Some(updated) = self.updated {
      record.set("updated", Value::String(updated));
    }
    if let Some(data) = self.data {
      record.set("data", Value::String(data));
    }
    if let Some(fid) = self.fid {
      record.set("fid", Value::from(fid));
    }
    Ok(record)
  }
}

// ─── Users ───────────────────────────────────────────────────────────────────

/// Raw values read directly from a `users` row.
pub struct RawUser {
  pub id:       i64,
  pub name:     String,
  pub gid:      Option<i64>,
  pub settings: String,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    let settings: Settings = serde_json::from_str(&self.settings)?;
    Ok(User { id: self.id, name: self.name, gid: self.gid, settings })
  }
}
