//! The listing engine: load everything, then sort and filter in memory.
//!
//! Overviews materialize the full record set for a type and refine it in
//! process. That trades memory for the freedom to sort and match on
//! anything a record can show — declared columns, capability fields, and
//! blob values all behave identically because both operations go through
//! [`Record::lookup`] and the display coercion.

use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::{
  error::Result,
  record::{Record, compare_values, display_value},
  schema::EntityDef,
  search::{SearchCriterion, SortOrder},
  store::EntityStore,
};

pub struct Listing {
  def:            Arc<EntityDef>,
  pub items:      Vec<Record>,
  applied_search: Vec<SearchCriterion>,
}

impl Listing {
  pub fn new(def: Arc<EntityDef>, items: Vec<Record>) -> Self {
    Listing { def, items, applied_search: Vec::new() }
  }

  /// Materialize every record of the type, optionally read-through a
  /// named cache region.
  pub async fn load<S: EntityStore + ?Sized>(
    store: &S,
    def: Arc<EntityDef>,
    region: Option<&str>,
  ) -> Result<Self> {
    let items = store.fetch_all(def.clone(), region).await?;
    Ok(Self::new(def, items))
  }

  pub fn def(&self) -> &Arc<EntityDef> { &self.def }

  pub fn len(&self) -> usize { self.items.len() }

  pub fn is_empty(&self) -> bool { self.items.is_empty() }

  /// The criteria last passed to [`filter`](Self::filter); the renderer
  /// shows the most recent one in the search box.
  pub fn applied_search(&self) -> &[SearchCriterion] { &self.applied_search }

  /// Stable sort on one field. Values of mixed JSON types order by type
  /// rank first (null, bool, number, string, array, object); records tied
  /// on the field keep their relative order in both directions, so
  /// descending is the exact mirror of ascending.
  pub fn sort(&mut self, field: &str, order: SortOrder) {
    let desc = order == SortOrder::Desc;
    let mut keyed: Vec<(Value, Record)> = std::mem::take(&mut self.items)
      .into_iter()
      .map(|r| (r.lookup(field).unwrap_or(Value::Null), r))
      .collect();
    keyed.sort_by(|(a, _), (b, _)| {
      let ord = compare_values(a, b);
      if desc { ord.reverse() } else { ord }
    });
    self.items = keyed.into_iter().map(|(_, r)| r).collect();
  }

  /// Apply a criterion stack conjunctively, in stack order, keeping the
  /// current item order. Matching happens on display strings, so a
  /// list-valued field matches against its `", "`-joined form and a
  /// missing field against `null`. Empty patterns are skipped.
  pub fn filter(&mut self, stack: &[SearchCriterion]) {
    self.applied_search = stack.to_vec();
    for criterion in stack {
      if criterion.pattern.is_empty() {
        continue;
      }
      let re = compile_criterion(criterion);
      let fields: Vec<&str> = match &criterion.field {
        Some(f) => vec![f.as_str()],
        None => {
          self.def.table().columns.iter().map(|c| c.field.as_str()).collect()
        }
      };
      tracing::debug!(pattern = %criterion.pattern, fields = ?fields,
                      "filtering listing");
      self.items.retain(|item| {
        fields.iter().any(|field| {
          let value = item.lookup(field).unwrap_or(Value::Null);
          re.is_match(&display_value(&value))
        })
      });
    }
  }
}

/// Compile a criterion to a regex. Non-regex criteria match literally;
/// a regex criterion whose pattern does not compile degrades to a literal
/// match instead of failing the listing.
fn compile_criterion(criterion: &SearchCriterion) -> Regex {
  let literal =
    |p: &str| Regex::new(&regex::escape(p)).unwrap();
  if criterion.regex {
    Regex::new(&criterion.pattern).unwrap_or_else(|_| {
      tracing::debug!(pattern = %criterion.pattern,
                      "invalid regex, matching literally");
      literal(&criterion.pattern)
    })
  } else {
    literal(&criterion.pattern)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn notes_def() -> Arc<EntityDef> {
    Arc::new(
      EntityDef::new("notes")
        .column("title")
        .column("rank")
        .column("tags")
        .table_column("title", "Title")
        .table_column("rank", "Rank"),
    )
  }

  fn note(id: i64, title: &str, rank: Value) -> Record {
    let mut r = Record::new("notes");
    r.id = Some(id);
    r.set("title", Value::String(title.to_owned()));
    r.set("rank", rank);
    r
  }

  fn titles(listing: &Listing) -> Vec<&str> {
    listing
      .items
      .iter()
      .filter_map(|r| r.fields().get("title").and_then(Value::as_str))
      .collect()
  }

  #[test]
  fn sort_orders_mixed_types_by_rank_then_value() {
    let mut listing = Listing::new(notes_def(), vec![
      note(1, "a", json!("zeta")),
      note(2, "b", json!(10)),
      note(3, "c", Value::Null),
      note(4, "d", json!(2)),
    ]);
    listing.sort("rank", SortOrder::Asc);
    assert_eq!(titles(&listing), ["c", "d", "b", "a"]);
    listing.sort("rank", SortOrder::Desc);
    assert_eq!(titles(&listing), ["a", "b", "d", "c"]);
  }

  #[test]
  fn descending_keeps_tie_order() {
    let mut listing = Listing::new(notes_def(), vec![
      note(1, "first", json!(1)),
      note(2, "second", json!(1)),
      note(3, "third", json!(0)),
    ]);
    listing.sort("rank", SortOrder::Desc);
    // Ties keep insertion order even descending.
    assert_eq!(titles(&listing), ["first", "second", "third"]);
  }

  #[test]
  fn missing_field_sorts_before_everything() {
    let mut extra = Record::new("notes");
    extra.id = Some(9);
    extra.set("title", json!("no rank"));
    let mut listing =
      Listing::new(notes_def(), vec![note(1, "ranked", json!(1)), extra]);
    listing.sort("rank", SortOrder::Asc);
    assert_eq!(titles(&listing), ["no rank", "ranked"]);
  }

  #[test]
  fn filter_is_conjunctive_and_order_preserving() {
    let mut listing = Listing::new(notes_def(), vec![
      note(1, "alpha one", json!(1)),
      note(2, "alpha two", json!(2)),
      note(3, "beta one", json!(3)),
    ]);
    listing.filter(&[
      SearchCriterion::new("alpha", Some("title")),
      SearchCriterion::new("two", Some("title")),
    ]);
    assert_eq!(titles(&listing), ["alpha two"]);
    assert_eq!(listing.applied_search().len(), 2);
  }

  #[test]
  fn fieldless_criterion_matches_any_table_column() {
    let mut listing = Listing::new(notes_def(), vec![
      note(1, "alpha", json!(7)),
      note(2, "seven", json!(1)),
    ]);
    // "7" appears in note 1's rank column only.
    listing.filter(&[SearchCriterion::new("7", None)]);
    assert_eq!(titles(&listing), ["alpha"]);
  }

  #[test]
  fn fieldless_matching_is_case_sensitive_per_column() {
    let def = Arc::new(
      EntityDef::new("widgets")
        .column("name")
        .column("color")
        .table_column("name", "Name")
        .table_column("color", "Color"),
    );
    let mut red = Record::new("widgets");
    red.set("name", json!("Red Box"));
    red.set("color", json!("red"));
    let mut blue = Record::new("widgets");
    blue.set("name", json!("Blue Box"));
    blue.set("color", json!("blue"));

    let mut listing = Listing::new(def, vec![red, blue]);
    // Lowercase "red" misses the "Red Box" name but hits the color cell.
    listing.filter(&[SearchCriterion::new("red", None)]);
    assert_eq!(listing.len(), 1);
    assert_eq!(listing.items[0].lookup("name"), Some(json!("Red Box")));
  }

  #[test]
  fn reapplying_an_applied_stack_changes_nothing() {
    let stack = vec![
      SearchCriterion::new("alpha", Some("title")),
      SearchCriterion::new("one", None),
    ];
    let mut listing = Listing::new(notes_def(), vec![
      note(1, "alpha one", json!(1)),
      note(2, "alpha two", json!(2)),
      note(3, "beta one", json!(3)),
    ]);
    listing.filter(&stack);
    let once: Vec<String> =
      titles(&listing).into_iter().map(str::to_owned).collect();
    listing.filter(&stack);
    assert_eq!(titles(&listing), once);
  }

  #[test]
  fn extending_the_stack_never_grows_the_result() {
    let items = || {
      vec![
        note(1, "alpha one", json!(1)),
        note(2, "alpha two", json!(2)),
        note(3, "beta one", json!(3)),
      ]
    };
    let mut stack = vec![SearchCriterion::new("alpha", Some("title"))];
    let mut counts = Vec::new();
    for extra in ["one", "zzz"] {
      let mut listing = Listing::new(notes_def(), items());
      listing.filter(&stack);
      counts.push(listing.len());
      stack.push(SearchCriterion::new(extra, Some("title")));
    }
    let mut listing = Listing::new(notes_def(), items());
    listing.filter(&stack);
    counts.push(listing.len());
    assert_eq!(counts, [2, 1, 0]);
    assert!(counts.windows(2).all(|w| w[1] <= w[0]));
  }

  #[test]
  fn literal_match_escapes_metacharacters() {
    let mut listing = Listing::new(notes_def(), vec![
      note(1, "a.c", json!(1)),
      note(2, "abc", json!(2)),
    ]);
    listing.filter(&[SearchCriterion::new("a.c", Some("title"))]);
    assert_eq!(titles(&listing), ["a.c"]);
  }

  #[test]
  fn regex_criterion_matches_patterns() {
    let mut listing = Listing::new(notes_def(), vec![
      note(1, "a.c", json!(1)),
      note(2, "abc", json!(2)),
      note(3, "xyz", json!(3)),
    ]);
    listing.filter(&[SearchCriterion::new("a.c", Some("title")).regex()]);
    assert_eq!(titles(&listing), ["a.c", "abc"]);
  }

  #[test]
  fn invalid_regex_degrades_to_literal() {
    let mut listing = Listing::new(notes_def(), vec![
      note(1, "a(b", json!(1)),
      note(2, "ab", json!(2)),
    ]);
    listing.filter(&[SearchCriterion::new("a(b", Some("title")).regex()]);
    assert_eq!(titles(&listing), ["a(b"]);
  }

  #[test]
  fn list_values_match_their_joined_display() {
    let mut tagged = note(1, "tagged", json!(1));
    tagged.set("tags", json!(["red", "green"]));
    let mut listing = Listing::new(notes_def(), vec![tagged]);
    listing.filter(&[SearchCriterion::new("red, green", Some("tags"))]);
    assert_eq!(listing.len(), 1);
  }

  #[test]
  fn missing_field_matches_null_display() {
    let mut listing =
      Listing::new(notes_def(), vec![note(1, "present", json!(1))]);
    listing.filter(&[SearchCriterion::new("null", Some("nonexistent"))]);
    assert_eq!(listing.len(), 1);
    listing.filter(&[SearchCriterion::new("anything", Some("nonexistent"))]);
    assert!(listing.is_empty());
  }
}
