//! Integration tests for `SqliteStore` against an in-memory database.

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value, json};

use gantry_core::{
  Error as CoreError,
  access::AllowAll,
  capability::{Capability, RelationKind, SideRecord, previous_values},
  context::RequestContext,
  overview::list_page,
  record::Record,
  schema::{EntityDef, Registry, RegistryBuilder},
  search::{SavedSearch, SearchCriterion, SortOrder, SortSpec},
  session::{MemorySession, Session},
  statemachine::StateMachineDef,
  store::EntityStore,
  user::User,
};

use crate::{CacheProvider, SqliteStore};

fn build_registry() -> Arc<Registry> {
  let registry = RegistryBuilder::new()
    .register(
      EntityDef::new("notes")
        .column("title")
        .column("rank")
        .capability(Capability::Owned)
        .capability(Capability::Meta)
        .capability(Capability::Logged)
        .capability(Capability::Commented)
        .table_column("title", "Title")
        .table_column("rank", "Rank")
        .repr_field("title"),
    )
    .register(
      EntityDef::new("tickets")
        .column("title")
        .column("state")
        .capability(Capability::Meta)
        .capability(Capability::Stateful)
        .capability(Capability::Logged)
        .table_column("title", "Title")
        .statemachine(
          "state",
          StateMachineDef::new(1)
            .state(1, "open", "work can start")
            .state(2, "closed", "nothing left to do")
            .transition(1, 2, "close"),
        )
        .repr_field("title"),
    )
    .register(
      EntityDef::new("pages")
        .column("title")
        .capability(Capability::Blobform)
        .table_column("title", "Title"),
    )
    .build()
    .expect("test registry");
  Arc::new(registry)
}

async fn store() -> (SqliteStore, Arc<Registry>) {
  let registry = build_registry();
  let store = SqliteStore::open_in_memory(registry.clone())
    .await
    .expect("in-memory store");
  (store, registry)
}

fn ctx(params: &[(&str, &str)]) -> RequestContext {
  let mut user = User::new(1, "ada");
  user.gid = Some(2);
  RequestContext::new(Arc::new(MemorySession::new()))
    .with_user(user)
    .with_params(
      params.iter().map(|(n, v)| ((*n).to_owned(), (*v).to_owned())),
    )
}

fn values(v: Value) -> Map<String, Value> {
  v.as_object().expect("object literal").clone()
}

async fn create_note(
  store: &SqliteStore,
  registry: &Registry,
  title: &str,
  rank: i64,
) -> Record {
  let def = registry.get("notes").unwrap();
  let c = ctx(&[]);
  let mut record = registry.factory("notes").unwrap().create(c.user.as_ref());
  record.stage(&def, values(json!({ "title": title, "rank": rank })));
  store.insert(&c, def, record).await.unwrap()
}

// ─── Create ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_assigns_id_owner_and_meta_stamps() {
  let (s, registry) = store().await;
  let created = create_note(&s, &registry, "alpha", 1).await;
  let id = created.id.expect("id assigned");

  let def = registry.get("notes").unwrap();
  let fetched = s.fetch(def, id, None).await.unwrap();
  assert_eq!(fetched.lookup("title"), Some(json!("alpha")));
  assert_eq!(fetched.lookup_i64("rank"), Some(1));
  assert_eq!(fetched.lookup_i64("uid"), Some(1));
  assert_eq!(fetched.lookup_i64("gid"), Some(2));
  assert!(fetched.lookup("created").is_some());
  assert_eq!(fetched.lookup("created"), fetched.lookup("updated"));
}

#[tokio::test]
async fn insert_writes_a_snapshot_log_in_the_same_transaction() {
  let (s, registry) = store().await;
  let created = create_note(&s, &registry, "alpha", 1).await;

  let logs = created.relation(RelationKind::Logs);
  assert_eq!(logs.len(), 1);
  assert_eq!(logs[0].lookup("subject"), Some(json!("Create: alpha")));
  assert!(logs[0].id.is_some());

  // Round trip: the log is its own record, stamped and linked.
  let def = registry.get("notes").unwrap();
  let fetched = s.fetch(def, created.id.unwrap(), None).await.unwrap();
  let logs = fetched.relation(RelationKind::Logs);
  assert_eq!(logs.len(), 1);
  assert_eq!(logs[0].lookup_i64("uid"), Some(1));
  assert!(logs[0].lookup("created").is_some());
}

#[tokio::test]
async fn comment_parameter_attaches_on_create() {
  let (s, registry) = store().await;
  let def = registry.get("notes").unwrap();
  let c = ctx(&[("comment", "first!")]);
  let mut record = registry.factory("notes").unwrap().create(c.user.as_ref());
  record.stage(&def, values(json!({ "title": "alpha", "rank": 1 })));

  let created = s.insert(&c, def.clone(), record).await.unwrap();
  let id = created.id.unwrap();

  let fetched = s.fetch(def, id, None).await.unwrap();
  let comments = fetched.relation(RelationKind::Comments);
  assert_eq!(comments.len(), 1);
  assert_eq!(comments[0].lookup("text"), Some(json!("first!")));
  assert_eq!(comments[0].lookup_i64("uid"), Some(1));
}

// ─── Update ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_persists_the_diff_and_its_audit_entry() {
  let (s, registry) = store().await;
  let created = create_note(&s, &registry, "alpha", 1).await;
  let id = created.id.unwrap();
  let def = registry.get("notes").unwrap();

  let updated = s
    .update(&ctx(&[]), def.clone(), id, values(json!({ "title": "beta" })))
    .await
    .unwrap();
  assert_eq!(updated.lookup("title"), Some(json!("beta")));

  let fetched = s.fetch(def, id, None).await.unwrap();
  assert_eq!(fetched.lookup("title"), Some(json!("beta")));
  match (fetched.lookup("created"), fetched.lookup("updated")) {
    (Some(Value::String(c)), Some(Value::String(u))) => assert!(c <= u),
    other => panic!("meta stamps missing: {other:?}"),
  }

  let logs = fetched.relation(RelationKind::Logs);
  assert_eq!(logs.len(), 2);
  let text = match logs[1].lookup("text") {
    Some(Value::String(t)) => t,
    other => panic!("log text missing: {other:?}"),
  };
  let diff: Map<String, Value> = serde_json::from_str(&text).unwrap();
  assert_eq!(diff["title"]["old"], json!("alpha"));
  assert_eq!(diff["title"]["new"], json!("beta"));
  assert!(diff.contains_key("updated"), "Meta touch is part of the diff");

  assert_eq!(previous_values(&fetched).get("title"), Some(&json!("alpha")));
}

#[tokio::test]
async fn rejected_transition_leaves_no_partial_state() {
  let (s, registry) = store().await;
  let def = registry.get("tickets").unwrap();
  let c = ctx(&[]);
  let mut record =
    registry.factory("tickets").unwrap().create(c.user.as_ref());
  record.stage(&def, values(json!({ "title": "boiler" })));
  let id = s.insert(&c, def.clone(), record).await.unwrap().id.unwrap();

  let err = s
    .update(&c, def.clone(), id, values(json!({ "state": 9 })))
    .await
    .unwrap_err();
  match err {
    CoreError::Transaction { capability, source } => {
      assert_eq!(capability, "stateful");
      assert!(matches!(
        *source,
        CoreError::InvalidTransition { from: 1, to: 9, .. }
      ));
    }
    other => panic!("unexpected error: {other:?}"),
  }

  // Nothing was written: state unchanged, no extra audit entry.
  let fetched = s.fetch(def, id, None).await.unwrap();
  assert_eq!(fetched.lookup_i64("state"), Some(1));
  assert_eq!(fetched.relation(RelationKind::Logs).len(), 1);
}

#[tokio::test]
async fn declared_transition_is_persisted() {
  let (s, registry) = store().await;
  let def = registry.get("tickets").unwrap();
  let c = ctx(&[]);
  let mut record =
    registry.factory("tickets").unwrap().create(c.user.as_ref());
  record.stage(&def, values(json!({ "title": "boiler" })));
  let id = s.insert(&c, def.clone(), record).await.unwrap().id.unwrap();

  s.update(&c, def.clone(), id, values(json!({ "state": 2 })))
    .await
    .unwrap();

  let fetched = s.fetch(def, id, None).await.unwrap();
  assert_eq!(fetched.lookup_i64("state"), Some(2));
  let logs = fetched.relation(RelationKind::Logs);
  assert_eq!(logs.len(), 2);
  let text = match logs[1].lookup("text") {
    Some(Value::String(t)) => t,
    other => panic!("log text missing: {other:?}"),
  };
  let diff: Map<String, Value> = serde_json::from_str(&text).unwrap();
  assert_eq!(diff["state"]["old"], json!(1));
  assert_eq!(diff["state"]["new"], json!(2));
}

// ─── Delete and side relations ───────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_the_record_but_keeps_side_entities() {
  let (s, registry) = store().await;
  let created = create_note(&s, &registry, "alpha", 1).await;
  let id = created.id.unwrap();
  let log_id = created.relation(RelationKind::Logs)[0].id.unwrap();

  let def = registry.get("notes").unwrap();
  s.delete(def.clone(), id).await.unwrap();

  let err = s.fetch(def, id, None).await.unwrap_err();
  assert!(matches!(
    err,
    CoreError::NotFound { type_name, id: missing }
      if type_name == "notes" && missing == id
  ));

  // The audit entry survives as a record of its own type.
  let logs_def = registry.get("logs").unwrap();
  let log = s.fetch(logs_def, log_id, None).await.unwrap();
  assert_eq!(log.lookup("subject"), Some(json!("Create: alpha")));
}

#[tokio::test]
async fn attach_and_detach_manage_links_not_rows() {
  let (s, registry) = store().await;
  let created = create_note(&s, &registry, "alpha", 1).await;
  let id = created.id.unwrap();
  let def = registry.get("notes").unwrap();

  let mut tag = Record::new("tags");
  tag.set("name", json!("urgent"));
  let tag = s
    .attach(def.clone(), id, SideRecord {
      kind:   RelationKind::Tags,
      record: tag,
    })
    .await
    .unwrap();
  let tag_id = tag.id.expect("tag id assigned");

  let fetched = s.fetch(def.clone(), id, None).await.unwrap();
  let tags = fetched.relation(RelationKind::Tags);
  assert_eq!(tags.len(), 1);
  assert_eq!(tags[0].lookup("name"), Some(json!("urgent")));

  s.detach(def.clone(), id, RelationKind::Tags, tag_id)
    .await
    .unwrap();
  let fetched = s.fetch(def.clone(), id, None).await.unwrap();
  assert!(fetched.relation(RelationKind::Tags).is_empty());

  // The tag row itself is kept.
  let tags_def = registry.get("tags").unwrap();
  assert!(s.fetch(tags_def, tag_id, None).await.is_ok());

  // Attaching to a vanished owner is an error.
  let mut stray = Record::new("tags");
  stray.set("name", json!("stray"));
  let err = s
    .attach(def, 9999, SideRecord {
      kind:   RelationKind::Tags,
      record: stray,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn children_come_back_in_id_order() {
  let (s, registry) = store().await;
  let def = registry.get("comments").unwrap();
  let c = ctx(&[]);

  let mut root = registry.factory("comments").unwrap().create(c.user.as_ref());
  root.stage(&def, values(json!({ "text": "root" })));
  let root_id = s.insert(&c, def.clone(), root).await.unwrap().id.unwrap();

  for text in ["first", "second"] {
    let mut child =
      registry.factory("comments").unwrap().create(c.user.as_ref());
    child.stage(&def, values(json!({ "text": text, "parent_id": root_id })));
    s.insert(&c, def.clone(), child).await.unwrap();
  }

  let children = s.fetch_children(def.clone(), root_id).await.unwrap();
  assert_eq!(children.len(), 2);
  assert_eq!(children[0].lookup("text"), Some(json!("first")));
  assert_eq!(children[1].lookup("text"), Some(json!("second")));
  assert!(children[0].id < children[1].id);

  let leaf_id = children[0].id.unwrap();
  assert!(s.fetch_children(def, leaf_id).await.unwrap().is_empty());
}

// ─── Blobform ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn blob_fields_round_trip_and_replace_wholesale() {
  let (s, registry) = store().await;
  let def = registry.get("pages").unwrap();
  let c = ctx(&[]);

  let mut record = registry.factory("pages").unwrap().create(c.user.as_ref());
  record.stage(&def, values(json!({ "title": "home", "hero": "big" })));
  let id = s.insert(&c, def.clone(), record).await.unwrap().id.unwrap();

  let fetched = s.fetch(def.clone(), id, None).await.unwrap();
  assert_eq!(fetched.lookup("title"), Some(json!("home")));
  assert_eq!(fetched.lookup("hero"), Some(json!("big")));

  s.update(
    &c,
    def.clone(),
    id,
    values(json!({ "hero": "small", "layout": "wide" })),
  )
  .await
  .unwrap();

  let fetched = s.fetch(def, id, None).await.unwrap();
  assert_eq!(fetched.lookup("hero"), Some(json!("small")));
  assert_eq!(fetched.lookup("layout"), Some(json!("wide")));
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn users_round_trip_their_settings() {
  let (s, _) = store().await;

  let user = s.add_user("ada".to_owned()).await.unwrap();
  assert_eq!(user.name, "ada");

  let mut loaded = s.load_user(user.id).await.unwrap();
  assert_eq!(loaded.settings.searches_for("notes").count(), 0);

  loaded.settings.save_search("notes", SavedSearch {
    stack: vec![SearchCriterion::new("al", Some("title"))],
    sort:  SortSpec { field: "title".into(), order: SortOrder::Asc },
    name:  "alphas".into(),
  });
  s.save_user_settings(user.id, loaded.settings.clone())
    .await
    .unwrap();

  let reloaded = s.load_user(user.id).await.unwrap();
  let (_, saved) = reloaded.settings.searches_for("notes").next().unwrap();
  assert_eq!(saved.name, "alphas");
  assert_eq!(saved.stack[0].pattern, "al");

  let err = s.load_user(9999).await.unwrap_err();
  assert!(matches!(err, CoreError::NotFound { .. }));
  let err = s
    .save_user_settings(9999, Default::default())
    .await
    .unwrap_err();
  assert!(matches!(err, CoreError::NotFound { .. }));
}

// ─── Cache regions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn region_reads_serve_from_cache_until_a_write_invalidates() {
  let registry = build_registry();
  let cache = Arc::new(CacheProvider::new(Duration::from_secs(60)));
  let s = SqliteStore::open_in_memory(registry.clone())
    .await
    .unwrap()
    .with_cache(cache.clone());

  create_note(&s, &registry, "alpha", 1).await;
  let def = registry.get("notes").unwrap();

  let all = s.fetch_all(def.clone(), Some("overview")).await.unwrap();
  assert_eq!(all.len(), 1);

  // Prove the region is consulted: poison it and read again.
  cache.put("overview", "notes", Vec::new());
  let all = s.fetch_all(def.clone(), Some("overview")).await.unwrap();
  assert!(all.is_empty());

  // Untagged reads bypass the cache entirely.
  let all = s.fetch_all(def.clone(), None).await.unwrap();
  assert_eq!(all.len(), 1);

  // A write drops the poisoned entry; the next tagged read is fresh.
  create_note(&s, &registry, "beta", 2).await;
  let all = s.fetch_all(def, Some("overview")).await.unwrap();
  assert_eq!(all.len(), 2);
}

// ─── Overview smoke test ─────────────────────────────────────────────────────

#[tokio::test]
async fn overview_pages_run_against_the_real_store() {
  let (s, registry) = store().await;
  create_note(&s, &registry, "beta", 2).await;
  create_note(&s, &registry, "alpha", 1).await;
  create_note(&s, &registry, "gamma", 3).await;

  let session = Arc::new(MemorySession::new());
  let c = RequestContext::new(session.clone() as Arc<dyn Session>)
    .with_params([
      ("form".to_owned(), "search".to_owned()),
      ("search".to_owned(), "a".to_owned()),
      ("field".to_owned(), "title".to_owned()),
      ("sort_field".to_owned(), "rank".to_owned()),
      ("sort_order".to_owned(), "desc".to_owned()),
    ]);

  let page = list_page(&s, &registry, &AllowAll, &c, "notes", None)
    .await
    .unwrap();
  let titles: Vec<&str> =
    page.payload.rows.iter().map(|r| r.cells[0].as_str()).collect();
  assert_eq!(titles, ["gamma", "beta", "alpha"]);
  assert_eq!(page.payload.search, "a");
}
