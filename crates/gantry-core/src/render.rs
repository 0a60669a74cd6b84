//! Adapts a filtered [`Listing`] into the serializable overview payload.
//!
//! Everything the overview page needs in one flat structure: headers from
//! the table config, display-coerced row cells, the state of the search
//! box (the most recent criterion), the user's saved searches, and the
//! bundled actions the acting user may apply.

use crate::{
  access::{AccessPolicy, Subject},
  context::RequestContext,
  listing::Listing,
  record::display_value,
};

#[derive(Debug, Clone, serde::Serialize)]
pub struct ListHeader {
  pub field: String,
  pub label: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ListRow {
  pub id:    Option<i64>,
  pub cells: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BundledAction {
  pub name: String,
  pub icon: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SavedSearchEntry {
  pub id:   String,
  pub name: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ListPayload {
  pub type_name:       String,
  pub headers:         Vec<ListHeader>,
  pub rows:            Vec<ListRow>,
  /// Most recent search criterion, pre-filling the search box.
  pub search:          String,
  pub search_field:    String,
  pub regexpr:         bool,
  pub saved_searches:  Vec<SavedSearchEntry>,
  pub bundled_actions: Vec<BundledAction>,
}

/// Build the overview payload for a listing that has already been sorted
/// and filtered. Bundled actions are the type's `bundle` actions the
/// policy grants on the type (checked against the lowercased action name).
pub fn list_payload(
  listing: &Listing,
  ctx: &RequestContext,
  policy: &dyn AccessPolicy,
) -> ListPayload {
  let def = listing.def();

  let headers = def
    .table()
    .columns
    .iter()
    .map(|c| ListHeader { field: c.field.clone(), label: c.label.clone() })
    .collect();

  let rows = listing
    .items
    .iter()
    .map(|item| ListRow {
      id:    item.id,
      cells: def
        .table()
        .columns
        .iter()
        .map(|c| {
          display_value(&item.lookup(&c.field).unwrap_or(serde_json::Value::Null))
        })
        .collect(),
    })
    .collect();

  let (search, search_field, regexpr) = match listing.applied_search().last() {
    Some(c) => {
      (c.pattern.clone(), c.field.clone().unwrap_or_default(), c.regex)
    }
    None => (String::new(), String::new(), false),
  };

  let saved_searches = ctx
    .user
    .as_ref()
    .map(|user| {
      user
        .settings
        .searches_for(def.name())
        .map(|(id, search)| SavedSearchEntry {
          id:   id.clone(),
          name: search.name.clone(),
        })
        .collect()
    })
    .unwrap_or_default();

  let bundled_actions = def
    .actions()
    .iter()
    .filter(|action| {
      action.bundle
        && policy.has_permission(
          &action.name.to_lowercase(),
          Subject::Type(def),
          ctx,
        )
    })
    .map(|action| BundledAction {
      name: action.name.clone(),
      icon: action.icon.clone(),
    })
    .collect();

  ListPayload {
    type_name: def.name().to_owned(),
    headers,
    rows,
    search,
    search_field,
    regexpr,
    saved_searches,
    bundled_actions,
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use serde_json::json;

  use super::*;
  use crate::{
    access::{AllowAll, StaticPolicy},
    record::Record,
    schema::EntityDef,
    search::{SavedSearch, SearchCriterion, SortOrder, SortSpec},
    session::MemorySession,
    user::User,
  };

  fn listing() -> Listing {
    let def = Arc::new(
      EntityDef::new("notes")
        .column("title")
        .column("rank")
        .table_column("title", "Title")
        .table_column("rank", "Rank"),
    );
    let mut a = Record::new("notes");
    a.id = Some(1);
    a.set("title", json!("alpha"));
    a.set("rank", json!(3));
    let mut b = Record::new("notes");
    b.id = Some(2);
    b.set("title", json!("beta"));
    Listing::new(def, vec![a, b])
  }

  fn ctx() -> RequestContext {
    RequestContext::new(Arc::new(MemorySession::new()))
  }

  #[test]
  fn cells_are_display_coerced_and_missing_fields_render_null() {
    let payload = list_payload(&listing(), &ctx(), &AllowAll);
    assert_eq!(payload.type_name, "notes");
    assert_eq!(payload.headers.len(), 2);
    assert_eq!(payload.headers[1].label, "Rank");
    assert_eq!(payload.rows[0].cells, ["alpha", "3"]);
    assert_eq!(payload.rows[1].cells, ["beta", "null"]);
  }

  #[test]
  fn search_box_reflects_the_most_recent_criterion() {
    let mut l = listing();
    l.filter(&[
      SearchCriterion::new("a", Some("title")),
      SearchCriterion::new("3", None).regex(),
    ]);
    let payload = list_payload(&l, &ctx(), &AllowAll);
    assert_eq!(payload.search, "3");
    assert_eq!(payload.search_field, "");
    assert!(payload.regexpr);

    let payload = list_payload(&listing(), &ctx(), &AllowAll);
    assert_eq!(payload.search, "");
    assert!(!payload.regexpr);
  }

  #[test]
  fn bundled_actions_respect_the_policy() {
    let payload = list_payload(&listing(), &ctx(), &AllowAll);
    let names: Vec<_> =
      payload.bundled_actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["Delete", "Export"]);

    let policy = StaticPolicy::new().grant("notes", "export");
    let payload = list_payload(&listing(), &ctx(), &policy);
    let names: Vec<_> =
      payload.bundled_actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["Export"]);
  }

  #[test]
  fn saved_searches_come_from_the_acting_user() {
    let mut user = User::new(1, "ada");
    user
      .settings
      .save_search("notes", SavedSearch {
        stack: vec![],
        sort:  SortSpec { field: "title".into(), order: SortOrder::Asc },
        name:  "everything".into(),
      })
      .unwrap();
    let ctx = ctx().with_user(user);
    let payload = list_payload(&listing(), &ctx, &AllowAll);
    assert_eq!(payload.saved_searches.len(), 1);
    assert_eq!(payload.saved_searches[0].name, "everything");
  }
}
