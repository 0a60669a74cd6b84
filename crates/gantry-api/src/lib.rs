//! JSON admin boundary for the gantry engine.
//!
//! Exposes an axum [`Router`] over any [`EntityStore`]: the registered-type
//! listing, overview pages with durable search/sort state, record CRUD with
//! capability hooks, hierarchy walks, and the two-step bundled-action
//! protocol. Engine parameters (search, sort, `comment`, bundle staging)
//! travel in the query string — repeated names included — while record
//! values travel as JSON bodies.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/admin", gantry_api::router(state))
//! ```

pub mod bundle;
pub mod context;
pub mod error;
pub mod listing;
pub mod records;
pub mod types;
pub mod users;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use gantry_core::{
  access::AccessPolicy,
  forms::FormLibrary,
  schema::Registry,
  store::EntityStore,
};

use context::SessionManager;

/// Cache region overview reads and single-record loads go through. One
/// region is enough here; embedders with finer staleness needs bring their
/// own names.
pub const OVERVIEW_REGION: &str = "overview";

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`. Every
/// field has a default so the server runs without one.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:           String,
  pub port:           u16,
  pub store_path:     PathBuf,
  /// Overview cache TTL in seconds; `0` disables the cache provider.
  pub cache_ttl_secs: u64,
  /// Directory searched for `<type>.xml` form definitions.
  pub forms_dir:      Option<PathBuf>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    ServerConfig {
      host:           "127.0.0.1".to_owned(),
      port:           8420,
      store_path:     PathBuf::from("gantry.db"),
      cache_ttl_secs: 30,
      forms_dir:      None,
    }
  }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState<S: EntityStore> {
  pub store:    Arc<S>,
  pub registry: Arc<Registry>,
  pub policy:   Arc<dyn AccessPolicy>,
  pub sessions: Arc<SessionManager>,
  pub forms:    Arc<FormLibrary>,
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the admin [`Router`] for `state`.
///
/// The returned `Router<()>` can be nested into any parent router
/// regardless of its own state type.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: EntityStore + Clone + Send + Sync + 'static,
{
  Router::new()
    // Registry
    .route("/types", get(types::list::<S>))
    // Users
    .route("/users", post(users::create::<S>))
    .route("/users/{id}", get(users::get_one::<S>))
    // Overviews and records
    .route(
      "/{type_name}",
      get(listing::overview::<S>).post(records::create::<S>),
    )
    .route("/{type_name}/bundle", post(bundle::stage::<S>))
    .route("/{type_name}/bundle/confirm", post(bundle::confirm::<S>))
    .route(
      "/{type_name}/{id}",
      get(records::get_one::<S>)
        .put(records::update_one::<S>)
        .delete(records::delete_one::<S>),
    )
    .route("/{type_name}/{id}/form", get(records::form::<S>))
    .route("/{type_name}/{id}/children", get(records::children::<S>))
    .route("/{type_name}/{id}/parents", get(records::parents::<S>))
    .route(
      "/{type_name}/{id}/descendants",
      get(records::descendants::<S>),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
