//! Factories build transient records with capability defaults applied and
//! load persisted ones through a store.

use std::sync::Arc;

use serde_json::Value;

use crate::{
  capability::Capability,
  error::Result,
  record::Record,
  schema::{EntityDef, Registry},
  store::EntityStore,
  user::User,
};

#[derive(Debug)]
pub struct Factory {
  def:    Arc<EntityDef>,
  region: Option<String>,
}

impl Registry {
  /// Factory for a registered type. Unknown names are a configuration
  /// error.
  pub fn factory(&self, type_name: &str) -> Result<Factory> {
    Ok(Factory::new(self.get(type_name)?))
  }
}

impl Factory {
  pub fn new(def: Arc<EntityDef>) -> Self { Factory { def, region: None } }

  /// Serve this factory's loads read-through from a named cache region.
  pub fn with_cache_region(mut self, region: impl Into<String>) -> Self {
    self.region = Some(region.into());
    self
  }

  pub fn def(&self) -> &Arc<EntityDef> { &self.def }

  /// A transient record with the type's capability defaults: ownership
  /// from the acting user (none for system-originated creation), an empty
  /// blob for form types, and every state machine at its start state.
  /// `created`/`updated` are the store's to set at insertion.
  pub fn create(&self, acting_user: Option<&User>) -> Record {
    let mut record = Record::new(self.def.name());
    for cap in self.def.capabilities() {
      match cap {
        Capability::Owned => {
          if let Some(user) = acting_user {
            record.set("uid", Value::from(user.id));
            if let Some(gid) = user.gid {
              record.set("gid", Value::from(gid));
            }
          }
        }
        Capability::Blobform => {
          record.set("data", Value::String("{}".to_owned()));
        }
        Capability::Stateful => {
          for (field, machine) in self.def.statemachines() {
            record.set(field, Value::from(machine.start()));
          }
        }
        _ => {}
      }
    }
    record
  }

  /// Load one record by id, side relations included.
  pub async fn load<S: EntityStore + ?Sized>(
    &self,
    store: &S,
    id: i64,
  ) -> Result<Record> {
    store.fetch(self.def.clone(), id, self.region.as_deref()).await
  }
}
