//! Capabilities — composable behavior bundles for entity types.
//!
//! A capability contributes persisted fields, derived relations, and
//! lifecycle hooks to every type that composes it. Composition is declared
//! on the [`crate::schema::EntityDef`] as an ordered list; hooks run once
//! per lifecycle event (create commit, update commit) in exactly that
//! order, and a hook failure aborts the whole triggering transaction.
//!
//! Hooks never touch storage themselves. They mutate the record and stage
//! [`SideRecord`]s (audit-log entries, comments) which the store persists in
//! the same transaction as the triggering write — so either everything
//! lands or nothing does.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::{
  context::RequestContext,
  error::{Error, Result},
  record::{ChangeSet, Record, display_value},
  schema::EntityDef,
};

// ─── Capability ──────────────────────────────────────────────────────────────

/// The set of composable capabilities. Mirrors the columns and relations
/// each one contributes; see the module docs of [`crate::schema`] for the
/// collision rules enforced at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
  /// `uid`/`gid` ownership references, set at creation from the acting user.
  Owned,
  /// `parent_id` self-reference with derived children.
  Nested,
  /// `created`/`updated` timestamps.
  Meta,
  /// Append-only audit log relation with field-level diffs.
  Logged,
  /// One or more state machines driven by integer state fields.
  Stateful,
  /// Free-form JSON `data` blob plus `fid` form reference.
  Blobform,
  /// Comment relation; appends a comment when the request carries one.
  Commented,
  /// Tag relation.
  Tagged,
  /// Todo relation.
  TodoLinked,
}

impl Capability {
  pub fn name(self) -> &'static str {
    match self {
      Capability::Owned => "owned",
      Capability::Nested => "nested",
      Capability::Meta => "meta",
      Capability::Logged => "logged",
      Capability::Stateful => "stateful",
      Capability::Blobform => "blobform",
      Capability::Commented => "commented",
      Capability::Tagged => "tagged",
      Capability::TodoLinked => "todo_linked",
    }
  }

  /// Persisted fields this capability contributes to a composing type.
  pub fn fields(self) -> &'static [&'static str] {
    match self {
      Capability::Owned => &["uid", "gid"],
      Capability::Nested => &["parent_id"],
      Capability::Meta => &["created", "updated"],
      Capability::Blobform => &["data", "fid"],
      _ => &[],
    }
  }

  /// The side relation this capability derives, if any.
  pub fn relation(self) -> Option<RelationKind> {
    match self {
      Capability::Logged => Some(RelationKind::Logs),
      Capability::Commented => Some(RelationKind::Comments),
      Capability::Tagged => Some(RelationKind::Tags),
      Capability::TodoLinked => Some(RelationKind::Todos),
      _ => None,
    }
  }
}

// ─── Relations ───────────────────────────────────────────────────────────────

/// Kinds of many-to-many side relations. Each maps to a built-in side
/// entity type and a junction keyed by the owning entity-type name.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  serde::Serialize,
  serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
  Logs,
  Comments,
  Tags,
  Todos,
}

impl RelationKind {
  /// Junction key and built-in side-type name.
  pub fn key(self) -> &'static str {
    match self {
      RelationKind::Logs => "logs",
      RelationKind::Comments => "comments",
      RelationKind::Tags => "tags",
      RelationKind::Todos => "todos",
    }
  }
}

/// A side record staged by a hook, persisted in the same transaction as the
/// triggering write and linked to the owning record.
#[derive(Debug, Clone)]
pub struct SideRecord {
  pub kind:   RelationKind,
  pub record: Record,
}

// ─── Hook execution ──────────────────────────────────────────────────────────

/// Run the create hooks of every capability the type composes, in declared
/// order. The record has no id yet; `created`/`updated` initialisation is
/// the store's (Meta types get both set to the insertion instant).
pub fn run_create_hooks(
  ctx: &RequestContext,
  def: &EntityDef,
  record: &mut Record,
) -> Result<Vec<SideRecord>> {
  let mut side = Vec::new();
  for cap in def.capabilities() {
    match cap {
      Capability::Logged => {
        let entry = log_entry(ctx, def, record, true, &ChangeSet::new())
          .map_err(|e| Error::in_hook(cap.name(), e))?;
        side.push(entry);
      }
      Capability::Commented => {
        if let Some(comment) = comment_from_params(ctx) {
          side.push(comment);
        }
      }
      _ => {}
    }
  }
  Ok(side)
}

/// Run the update hooks of every capability the type composes, in declared
/// order, against the pending change-set. Hooks may extend the change-set
/// (Meta's `updated` touch) — capabilities declared later see those
/// changes, exactly as the declared order promises.
pub fn run_update_hooks(
  ctx: &RequestContext,
  def: &EntityDef,
  record: &mut Record,
  changes: &mut ChangeSet,
) -> Result<Vec<SideRecord>> {
  let mut side = Vec::new();
  for cap in def.capabilities() {
    match cap {
      Capability::Meta => {
        let now = Value::String(Utc::now().to_rfc3339());
        let old = record.set("updated", now.clone()).unwrap_or(Value::Null);
        changes.record("updated", old, now);
      }
      Capability::Stateful => {
        trigger_transitions(ctx, def, record, changes)
          .map_err(|e| Error::in_hook(cap.name(), e))?;
      }
      Capability::Logged => {
        let entry = log_entry(ctx, def, record, false, changes)
          .map_err(|e| Error::in_hook(cap.name(), e))?;
        side.push(entry);
      }
      Capability::Commented => {
        if let Some(comment) = comment_from_params(ctx) {
          side.push(comment);
        }
      }
      _ => {}
    }
  }
  Ok(side)
}

// ─── Stateful ────────────────────────────────────────────────────────────────

/// Fire state transitions for every machine field whose value genuinely
/// changed. A no-op write never appears in the change-set, so it never
/// re-triggers transition side effects. An old→new pair with no declared
/// transition fails the hook.
fn trigger_transitions(
  ctx: &RequestContext,
  def: &EntityDef,
  record: &Record,
  changes: &ChangeSet,
) -> Result<()> {
  for (field, machine) in def.statemachines() {
    let Some(change) = changes.get(field) else { continue };
    let (Some(old), Some(new)) = (change.old.as_i64(), change.new.as_i64())
    else {
      continue;
    };

    let transition = machine.transition_between(old, new).ok_or(
      Error::InvalidTransition { field: field.clone(), from: old, to: new },
    )?;
    tracing::debug!(type_name = %def.name(), field = %field,
                    action = %transition.action, "{old} -> {new}");

    // The cached machine snapshot reflects the pre-transition state.
    ctx.invalidate_statemachine(&record.type_name, record.id, field);
  }
  Ok(())
}

// ─── Logged ──────────────────────────────────────────────────────────────────

/// Build the audit-log side record for a create or update. Creates record
/// every field's current value flat; updates record the `{old, new}` diff
/// from the pending change-set.
fn log_entry(
  ctx: &RequestContext,
  def: &EntityDef,
  record: &Record,
  create: bool,
  changes: &ChangeSet,
) -> Result<SideRecord> {
  let (subject, text) = if create {
    let mut all = Map::new();
    for (field, value) in record.fields() {
      all.insert(field.clone(), Value::String(display_value(value)));
    }
    (
      format!("Create: {}", record.display(def)),
      serde_json::to_string(&all)?,
    )
  } else {
    (
      format!("Update: {}", record.display(def)),
      serde_json::to_string(changes)?,
    )
  };

  let mut log = Record::new(RelationKind::Logs.key());
  log.set("subject", Value::String(subject));
  log.set("text", Value::String(text));
  if let Some(user) = &ctx.user {
    log.set("uid", Value::from(user.id));
    if let Some(gid) = user.gid {
      log.set("gid", Value::from(gid));
    }
    log.set("author", Value::String(user.name.clone()));
  }
  Ok(SideRecord { kind: RelationKind::Logs, record: log })
}

/// Reconstruct pre-change field values from the most recent log entry only.
/// Earlier history is not replayed — a documented restriction. Entries in
/// the flat create format carry no `old` values and are skipped.
pub fn previous_values(record: &Record) -> Map<String, Value> {
  let mut values = Map::new();
  let Some(last) = record.relation(RelationKind::Logs).last() else {
    return values;
  };
  let Some(Value::String(text)) = last.lookup("text") else { return values };

  match serde_json::from_str::<Map<String, Value>>(&text) {
    Ok(entries) => {
      for (field, entry) in entries {
        if let Some(old) = entry.get("old") {
          values.insert(field, old.clone());
        }
      }
    }
    Err(_) => {
      tracing::warn!(type_name = %record.type_name,
                     "could not parse last log entry; old log format?");
    }
  }
  values
}

// ─── Commented ───────────────────────────────────────────────────────────────

/// A comment staged from the request's `comment` parameter, if non-empty.
fn comment_from_params(ctx: &RequestContext) -> Option<SideRecord> {
  let text = ctx.param("comment")?;
  if text.is_empty() {
    return None;
  }
  let mut comment = Record::new(RelationKind::Comments.key());
  comment.set("text", Value::String(text.to_owned()));
  if let Some(user) = &ctx.user {
    comment.set("uid", Value::from(user.id));
    if let Some(gid) = user.gid {
      comment.set("gid", Value::from(gid));
    }
  }
  Some(SideRecord { kind: RelationKind::Comments, record: comment })
}
