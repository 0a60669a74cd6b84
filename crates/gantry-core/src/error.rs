//! Error types for `gantry-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("no {type_name} record with id {id}")]
  NotFound { type_name: String, id: i64 },

  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("field {field:?} declared more than once on entity type {type_name:?}")]
  Composition { type_name: String, field: String },

  /// A capability hook failed during a create or update commit. The store
  /// must not persist anything from the triggering lifecycle event.
  #[error("{capability} hook failed: {source}")]
  Transaction {
    capability: &'static str,
    #[source]
    source:     Box<Error>,
  },

  #[error("hierarchy cycle detected at {type_name} record {id}")]
  CycleDetected { type_name: String, id: i64 },

  #[error("no transition from state {from} to {to} in field {field:?}")]
  InvalidTransition { field: String, from: i64, to: i64 },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("form definition error: {0}")]
  FormDefinition(String),

  /// Storage-backend failure surfaced through the [`crate::store::EntityStore`]
  /// seam. Lookup misses are [`Error::NotFound`], never this variant.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a hook failure so the triggering transaction can surface which
  /// capability aborted it.
  pub fn in_hook(capability: &'static str, source: Error) -> Self {
    Error::Transaction { capability, source: Box::new(source) }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
