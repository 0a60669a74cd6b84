//! Error type for `gantry-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] gantry_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A stored value did not decode back into its domain type.
  #[error("decode error: {0}")]
  Decode(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Backend failures surface to the engine as [`gantry_core::Error::Store`];
/// engine errors raised inside a store call pass through unchanged so
/// callers can still match on them.
impl From<Error> for gantry_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(core) => core,
      other => gantry_core::Error::Store(Box::new(other)),
    }
  }
}
