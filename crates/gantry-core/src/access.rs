//! Permission checks at the rendering and bundle boundaries.
//!
//! The engine does not ship an authorization model; it asks an injected
//! policy before offering an action or applying a bundled one. Embedders
//! bring their own rules.

use std::collections::{BTreeMap, BTreeSet};

use crate::{context::RequestContext, record::Record, schema::EntityDef};

/// What a permission is being checked against: the type as a whole (list
/// headers, bundled-action buttons) or one concrete record (bundle items).
#[derive(Clone, Copy)]
pub enum Subject<'a> {
  Type(&'a EntityDef),
  Item(&'a EntityDef, &'a Record),
}

impl<'a> Subject<'a> {
  pub fn def(&self) -> &'a EntityDef {
    match self {
      Subject::Type(def) => def,
      Subject::Item(def, _) => def,
    }
  }
}

/// Decides whether the acting user may perform `action` (lowercased, e.g.
/// `delete`) on a subject.
pub trait AccessPolicy: Send + Sync {
  fn has_permission(
    &self,
    action: &str,
    subject: Subject<'_>,
    ctx: &RequestContext,
  ) -> bool;
}

/// Grants everything. The default for embedded and single-user use.
pub struct AllowAll;

impl AccessPolicy for AllowAll {
  fn has_permission(&self, _: &str, _: Subject<'_>, _: &RequestContext) -> bool {
    true
  }
}

/// A fixed grant table keyed by entity-type name. Item checks additionally
/// pass when the acting user owns the record, so owners keep access to
/// their own rows without a blanket type grant.
#[derive(Default)]
pub struct StaticPolicy {
  grants: BTreeMap<String, BTreeSet<String>>,
}

impl StaticPolicy {
  pub fn new() -> Self { Self::default() }

  pub fn grant(
    mut self,
    type_name: impl Into<String>,
    action: impl Into<String>,
  ) -> Self {
    self
      .grants
      .entry(type_name.into())
      .or_default()
      .insert(action.into());
    self
  }

  fn granted(&self, type_name: &str, action: &str) -> bool {
    self
      .grants
      .get(type_name)
      .is_some_and(|actions| actions.contains(action))
  }
}

impl AccessPolicy for StaticPolicy {
  fn has_permission(
    &self,
    action: &str,
    subject: Subject<'_>,
    ctx: &RequestContext,
  ) -> bool {
    if self.granted(subject.def().name(), action) {
      return true;
    }
    match (subject, &ctx.user) {
      (Subject::Item(_, record), Some(user)) => record.is_owner(user),
      _ => false,
    }
  }
}
