//! gantry-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens an
//! in-process SQLite store, and serves the JSON admin boundary for a
//! built-in demonstration registry. Embedders normally depend on
//! `gantry-api` as a library and mount [`gantry_api::router`] with a
//! registry of their own instead.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::Parser;
use gantry_api::{AppState, ServerConfig, context::SessionManager};
use gantry_core::{
  access::AllowAll,
  capability::Capability,
  forms::FormLibrary,
  schema::{EntityDef, Registry, RegistryBuilder},
  search::SortOrder,
  statemachine::StateMachineDef,
};
use gantry_store_sqlite::{CacheProvider, SqliteStore};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Gantry admin server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("GANTRY"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let registry =
    Arc::new(demo_registry().context("failed to build registry")?);

  // Expand `~` in store path and open the store.
  let store_path = expand_tilde(&server_cfg.store_path);
  let mut store = SqliteStore::open(&store_path, registry.clone())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  if server_cfg.cache_ttl_secs > 0 {
    let ttl = Duration::from_secs(server_cfg.cache_ttl_secs);
    store = store.with_cache(Arc::new(CacheProvider::new(ttl)));
  }

  let mut forms = FormLibrary::new();
  if let Some(dir) = &server_cfg.forms_dir {
    forms = forms.with_app_dir(expand_tilde(dir));
  }

  // Build application state.
  let state = AppState {
    store:    Arc::new(store),
    registry,
    policy:   Arc::new(AllowAll),
    sessions: Arc::new(SessionManager::new()),
    forms:    Arc::new(forms),
  };

  let app = gantry_api::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// The registry the standalone server speaks for: two showcase types
/// exercising the full capability set on top of the built-in side types.
fn demo_registry() -> gantry_core::Result<Registry> {
  let workflow = StateMachineDef::new(1)
    .state(1, "open", "freshly filed")
    .state(2, "in progress", "someone is on it")
    .state(3, "closed", "resolved or rejected")
    .transition(1, 2, "start")
    .transition(2, 3, "close")
    .transition(2, 1, "stop")
    .transition(3, 1, "reopen");

  RegistryBuilder::new()
    .register(
      EntityDef::new("projects")
        .column("name")
        .column("description")
        .capability(Capability::Owned)
        .capability(Capability::Nested)
        .capability(Capability::Meta)
        .capability(Capability::Logged)
        .capability(Capability::Commented)
        .capability(Capability::Tagged)
        .table_column("name", "Name")
        .table_column("description", "Description")
        .table_column("updated", "Updated")
        .repr_field("name"),
    )
    .register(
      EntityDef::new("tickets")
        .column("title")
        .column("state")
        .capability(Capability::Owned)
        .capability(Capability::Meta)
        .capability(Capability::Logged)
        .capability(Capability::Stateful)
        .capability(Capability::Blobform)
        .capability(Capability::TodoLinked)
        .statemachine("state", workflow)
        .table_column("title", "Title")
        .table_column("state", "State")
        .table_column("created", "Created")
        .default_sort("created", SortOrder::Desc)
        .repr_field("title"),
    )
    .build()
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
