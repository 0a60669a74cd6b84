//! Search criteria, sort state, and the session-backed manager feeding the
//! overview pages.
//!
//! Sort and search state resolve through a fixed precedence (request
//! params, then a referenced saved search, then the session, then the
//! table-config default) and the winner is written back to the session so
//! the next plain GET sees the same listing. The search stack itself is a
//! pile of conjunctive criteria: submitting a pattern pushes, submitting an
//! empty pattern pops, and duplicates are ignored.
//!
//! Persisting the stack is deliberately *not* done here — the overview
//! orchestration stores it only when the filtered listing came back
//! non-empty, so a search that matched nothing can be popped away again.

use crate::{context::RequestContext, schema::EntityDef, session};

// ─── Sorting ─────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  serde::Serialize,
  serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
  Asc,
  Desc,
}

impl SortOrder {
  /// Lenient parse: `desc` sorts descending, any other value degrades to
  /// ascending. Long-standing behavior callers rely on for bad input.
  pub fn parse(s: &str) -> SortOrder {
    if s == "desc" { SortOrder::Desc } else { SortOrder::Asc }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      SortOrder::Asc => "asc",
      SortOrder::Desc => "desc",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SortSpec {
  pub field: String,
  pub order: SortOrder,
}

// ─── Criteria ────────────────────────────────────────────────────────────────

/// One entry of the search stack. `field: None` matches against every
/// configured table column; `regex` records the regex flag at push time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SearchCriterion {
  pub pattern: String,
  #[serde(default)]
  pub field:   Option<String>,
  #[serde(default)]
  pub regex:   bool,
}

impl SearchCriterion {
  pub fn new(pattern: impl Into<String>, field: Option<&str>) -> Self {
    SearchCriterion {
      pattern: pattern.into(),
      field:   field.map(str::to_owned),
      regex:   false,
    }
  }

  pub fn regex(mut self) -> Self {
    self.regex = true;
    self
  }
}

/// A durable named search: the stack, the sorting active when it was
/// saved, and its display name. Lives in [`crate::user::Settings`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SavedSearch {
  pub stack: Vec<SearchCriterion>,
  pub sort:  SortSpec,
  pub name:  String,
}

// ─── State resolution ────────────────────────────────────────────────────────

/// Resolve the sorting for one overview request and store it in the
/// session. Precedence: explicit `sort_field`/`sort_order` params, then
/// the sorting of a referenced saved search, then the session, then the
/// table default. `reset` restores and stores the default instead.
pub fn current_sort(def: &EntityDef, ctx: &RequestContext) -> SortSpec {
  let type_name = def.name();
  let (default_field, default_order) = def.table().default_sort();
  let field_key = session::sort_field_key(type_name);
  let order_key = session::sort_order_key(type_name);

  if ctx.has_param("reset") {
    ctx.session.set_str(&field_key, default_field);
    ctx.session.set_str(&order_key, default_order.as_str());
    return SortSpec { field: default_field.to_owned(), order: default_order };
  }

  let mut field = ctx
    .session
    .get_str(&field_key)
    .unwrap_or_else(|| default_field.to_owned());
  let mut order = ctx
    .session
    .get_str(&order_key)
    .map(|s| SortOrder::parse(&s))
    .unwrap_or(default_order);

  if let (Some(id), Some(user)) = (ctx.param("saved"), &ctx.user) {
    if let Some(saved) = user.settings.saved_search(type_name, id) {
      field = saved.sort.field.clone();
      order = saved.sort.order;
    }
  }

  if let Some(f) = ctx.param("sort_field") {
    field = f.to_owned();
  }
  if let Some(o) = ctx.param("sort_order") {
    order = SortOrder::parse(o);
  }

  ctx.session.set_str(&field_key, &field);
  ctx.session.set_str(&order_key, order.as_str());
  SortSpec { field, order }
}

/// Resolve the search stack for one overview request.
///
/// The regex toggle params flip the session flag and short-circuit with
/// the stack unchanged. `reset` yields an empty stack. Outside a search
/// form submission the session stack is returned as-is. Within one, a
/// `saved` id loads that search's stack, `save`/`delete` leave the stack
/// alone (the overview handles the settings write), an empty pattern pops,
/// and a new `(pattern, field)` pair is pushed carrying the current regex
/// flag.
pub fn current_search(
  def: &EntityDef,
  ctx: &RequestContext,
) -> Vec<SearchCriterion> {
  let type_name = def.name();
  let regex_key = session::regexpr_key(type_name);

  let mut stack: Vec<SearchCriterion> = ctx
    .session
    .get(&session::search_key(type_name))
    .and_then(|v| serde_json::from_value(v).ok())
    .unwrap_or_default();

  let regex = ctx.session.get_bool(&regex_key);
  if ctx.has_param("enableregexpr") {
    ctx.session.set(&regex_key, true.into());
    return stack;
  }
  if ctx.has_param("disableregexpr") {
    ctx.session.set(&regex_key, false.into());
    return stack;
  }

  if ctx.has_param("reset") {
    return Vec::new();
  }
  if ctx.param("form") != Some("search") {
    return stack;
  }

  if let Some(id) = ctx.param("saved") {
    let Some(user) = &ctx.user else { return Vec::new() };
    return user
      .settings
      .saved_search(type_name, id)
      .map(|s| s.stack.clone())
      .unwrap_or_default();
  }
  if ctx.has_param("save") || ctx.has_param("delete") {
    return stack;
  }

  let Some(pattern) = ctx.param("search") else { return stack };
  let field =
    ctx.param("field").filter(|f| !f.is_empty()).map(str::to_owned);

  if pattern.is_empty() {
    if let Some(popped) = stack.pop() {
      tracing::debug!(pattern = %popped.pattern, "popping from search stack");
    }
  } else {
    let present = stack
      .iter()
      .any(|c| c.pattern == pattern && c.field.as_deref() == field.as_deref());
    if !present {
      tracing::debug!(pattern, field = field.as_deref().unwrap_or(""),
                      "pushing onto search stack");
      stack.push(SearchCriterion {
        pattern: pattern.to_owned(),
        field,
        regex,
      });
    }
  }
  stack
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{
    session::{MemorySession, Session, search_key},
    user::User,
  };

  fn notes_def() -> EntityDef {
    EntityDef::new("notes")
      .column("title")
      .column("body")
      .table_column("title", "Title")
      .table_column("body", "Body")
  }

  fn ctx_with(
    session: &Arc<MemorySession>,
    params: &[(&str, &str)],
  ) -> RequestContext {
    RequestContext::new(session.clone() as Arc<dyn Session>).with_params(
      params.iter().map(|(n, v)| ((*n).to_owned(), (*v).to_owned())),
    )
  }

  #[test]
  fn unknown_sort_order_degrades_to_ascending() {
    assert_eq!(SortOrder::parse("desc"), SortOrder::Desc);
    assert_eq!(SortOrder::parse("asc"), SortOrder::Asc);
    assert_eq!(SortOrder::parse("descending"), SortOrder::Asc);
    assert_eq!(SortOrder::parse(""), SortOrder::Asc);
  }

  #[test]
  fn sort_precedence_params_then_session_then_default() {
    let def = notes_def();
    let session = Arc::new(MemorySession::new());

    // Nothing anywhere: table default (first column, asc).
    let sort = current_sort(&def, &ctx_with(&session, &[]));
    assert_eq!((sort.field.as_str(), sort.order), ("title", SortOrder::Asc));

    // Params win and are persisted.
    let ctx =
      ctx_with(&session, &[("sort_field", "body"), ("sort_order", "desc")]);
    let sort = current_sort(&def, &ctx);
    assert_eq!((sort.field.as_str(), sort.order), ("body", SortOrder::Desc));

    // Next plain request sees the session copy.
    let sort = current_sort(&def, &ctx_with(&session, &[]));
    assert_eq!((sort.field.as_str(), sort.order), ("body", SortOrder::Desc));

    // Reset restores the default.
    let sort = current_sort(&def, &ctx_with(&session, &[("reset", "")]));
    assert_eq!((sort.field.as_str(), sort.order), ("title", SortOrder::Asc));
    let sort = current_sort(&def, &ctx_with(&session, &[]));
    assert_eq!(sort.field, "title");
  }

  #[test]
  fn saved_search_supplies_sorting_when_referenced() {
    let def = notes_def();
    let session = Arc::new(MemorySession::new());
    let mut user = User::new(1, "ada");
    let id = user
      .settings
      .save_search("notes", SavedSearch {
        stack: vec![SearchCriterion::new("x", None)],
        sort:  SortSpec { field: "body".into(), order: SortOrder::Desc },
        name:  "bodies".into(),
      })
      .unwrap();

    let ctx = ctx_with(&session, &[("saved", id.as_str())]).with_user(user);
    let sort = current_sort(&def, &ctx);
    assert_eq!((sort.field.as_str(), sort.order), ("body", SortOrder::Desc));
  }

  #[test]
  fn search_stack_pushes_pops_and_ignores_duplicates() {
    let def = notes_def();
    let session = Arc::new(MemorySession::new());
    let persist = |stack: &[SearchCriterion]| {
      session.set(
        &search_key("notes"),
        serde_json::to_value(stack).unwrap(),
      );
    };

    // Plain GET, no form: empty stack.
    assert!(current_search(&def, &ctx_with(&session, &[])).is_empty());

    // Push one.
    let ctx = ctx_with(&session, &[
      ("form", "search"),
      ("search", "alpha"),
      ("field", "title"),
    ]);
    let stack = current_search(&def, &ctx);
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].pattern, "alpha");
    assert_eq!(stack[0].field.as_deref(), Some("title"));
    persist(&stack);

    // Identical resubmission is ignored.
    let ctx = ctx_with(&session, &[
      ("form", "search"),
      ("search", "alpha"),
      ("field", "title"),
    ]);
    let stack = current_search(&def, &ctx);
    assert_eq!(stack.len(), 1);
    persist(&stack);

    // Same pattern over all fields is a different criterion.
    let ctx =
      ctx_with(&session, &[("form", "search"), ("search", "alpha")]);
    let stack = current_search(&def, &ctx);
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[1].field, None);
    persist(&stack);

    // Empty submission pops the most recent entry.
    let ctx = ctx_with(&session, &[("form", "search"), ("search", "")]);
    let stack = current_search(&def, &ctx);
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].field.as_deref(), Some("title"));
    persist(&stack);

    // Reset empties without touching the persisted copy.
    let stack =
      current_search(&def, &ctx_with(&session, &[("reset", "")]));
    assert!(stack.is_empty());
    assert_eq!(
      current_search(&def, &ctx_with(&session, &[])).len(),
      1,
      "session copy untouched until the overview persists"
    );
  }

  #[test]
  fn regex_toggles_flip_the_flag_and_leave_the_stack() {
    let def = notes_def();
    let session = Arc::new(MemorySession::new());

    let stack = current_search(&def, &ctx_with(&session, &[
      ("enableregexpr", ""),
      ("form", "search"),
      ("search", "a.*b"),
    ]));
    assert!(stack.is_empty(), "toggle request never modifies the stack");

    // Flag is now set; the next push records it.
    let stack = current_search(&def, &ctx_with(&session, &[
      ("form", "search"),
      ("search", "a.*b"),
    ]));
    assert_eq!(stack.len(), 1);
    assert!(stack[0].regex);

    current_search(&def, &ctx_with(&session, &[("disableregexpr", "")]));
    let stack = current_search(&def, &ctx_with(&session, &[
      ("form", "search"),
      ("search", "plain"),
    ]));
    assert!(!stack[0].regex);
  }

  #[test]
  fn save_and_delete_params_leave_the_stack_untouched() {
    let def = notes_def();
    let session = Arc::new(MemorySession::new());
    session.set(
      &search_key("notes"),
      serde_json::to_value(vec![SearchCriterion::new("kept", None)]).unwrap(),
    );

    let stack = current_search(&def, &ctx_with(&session, &[
      ("form", "search"),
      ("save", "my search"),
      ("search", "ignored"),
    ]));
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].pattern, "kept");

    let stack = current_search(&def, &ctx_with(&session, &[
      ("form", "search"),
      ("delete", "some-id"),
    ]));
    assert_eq!(stack[0].pattern, "kept");
  }
}
