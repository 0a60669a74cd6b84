//! The `EntityStore` trait — the storage seam of the engine.
//!
//! Implemented by storage backends (e.g. `gantry-store-sqlite`). Higher
//! layers (listing, factory, the HTTP api) depend on this abstraction, not
//! on any concrete backend.
//!
//! Every method returns the crate-wide [`Result`]: backends surface their
//! internal failures through [`Error::Store`](crate::Error::Store) and pass
//! engine errors (hook failures, `NotFound`) through untouched, so callers
//! can match on the taxonomy without knowing the backend.
//!
//! `insert` and `update` run the composed capability hooks *inside* the
//! backing transaction: the row write, the staged side records, and their
//! links commit together or not at all.
//!
//! Reads take an optional cache-region name. A `Some` region is served
//! read-through from the backend's cache provider and may be stale within
//! the region's TTL. Writes drop the written type's cached entries; stale
//! reads remain possible for anything the backend did not see written.

use std::{future::Future, sync::Arc};

use serde_json::{Map, Value};

use crate::{
  capability::{RelationKind, SideRecord},
  context::RequestContext,
  error::Result,
  record::Record,
  schema::EntityDef,
  user::{Settings, User},
};

pub trait EntityStore: Send + Sync {
  // ── Records ───────────────────────────────────────────────────────────

  /// Fetch one record with its side relations loaded eagerly.
  /// Unknown ids are [`Error::NotFound`](crate::Error::NotFound).
  fn fetch<'a>(
    &'a self,
    def: Arc<EntityDef>,
    id: i64,
    region: Option<&'a str>,
  ) -> impl Future<Output = Result<Record>> + Send + 'a;

  /// Fetch every record of the type, side relations included, ordered by
  /// id. Overviews materialize through this.
  fn fetch_all<'a>(
    &'a self,
    def: Arc<EntityDef>,
    region: Option<&'a str>,
  ) -> impl Future<Output = Result<Vec<Record>>> + Send + 'a;

  /// Direct children of `parent_id` (types composing `Nested`), ordered
  /// by id.
  fn fetch_children(
    &self,
    def: Arc<EntityDef>,
    parent_id: i64,
  ) -> impl Future<Output = Result<Vec<Record>>> + Send + '_;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Persist a factory-built record. Runs the type's create hooks; the
  /// row, the staged side records, and their links land in one
  /// transaction. Returns the record as persisted, id assigned.
  fn insert<'a>(
    &'a self,
    ctx: &'a RequestContext,
    def: Arc<EntityDef>,
    record: Record,
  ) -> impl Future<Output = Result<Record>> + Send + 'a;

  /// Stage `values` onto the stored record and persist the result. Runs
  /// the type's update hooks against the resulting change-set in the same
  /// transaction. A hook error rolls everything back.
  fn update<'a>(
    &'a self,
    ctx: &'a RequestContext,
    def: Arc<EntityDef>,
    id: i64,
    values: Map<String, Value>,
  ) -> impl Future<Output = Result<Record>> + Send + 'a;

  /// Delete one record and its relation links. Side entities themselves
  /// are kept.
  fn delete(
    &self,
    def: Arc<EntityDef>,
    id: i64,
  ) -> impl Future<Output = Result<()>> + Send + '_;

  // ── Side relations ────────────────────────────────────────────────────

  /// Persist a side record and link it to `id` in one transaction.
  /// Returns the side record as persisted.
  fn attach(
    &self,
    def: Arc<EntityDef>,
    id: i64,
    side: SideRecord,
  ) -> impl Future<Output = Result<Record>> + Send + '_;

  /// Remove the link between `id` and an existing side record. The side
  /// record itself is kept.
  fn detach(
    &self,
    def: Arc<EntityDef>,
    id: i64,
    kind: RelationKind,
    target_id: i64,
  ) -> impl Future<Output = Result<()>> + Send + '_;

  // ── Users ─────────────────────────────────────────────────────────────

  fn add_user(
    &self,
    name: String,
  ) -> impl Future<Output = Result<User>> + Send + '_;

  fn load_user(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<User>> + Send + '_;

  /// Replace a user's settings document. Saved-search mutations persist
  /// through this.
  fn save_user_settings(
    &self,
    id: i64,
    settings: Settings,
  ) -> impl Future<Output = Result<()>> + Send + '_;
}
