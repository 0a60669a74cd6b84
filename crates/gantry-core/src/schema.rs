//! Entity-type descriptors and the registry they live in.
//!
//! An [`EntityDef`] declares everything the engine knows about one entity
//! type: its own columns, the capabilities it composes, listing/table
//! configuration, the actions it offers, and any state machines. Defs are
//! assembled with a builder, validated once, and frozen into a [`Registry`]
//! at startup — nothing mutates a def after that.
//!
//! The collision rules are enforced at build time: a declared column may
//! not shadow a capability-contributed field, no capability may be composed
//! twice, and state machines must drive declared fields on a
//! [`Capability::Stateful`] type.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
  capability::Capability,
  error::{Error, Result},
  search::SortOrder,
  statemachine::StateMachineDef,
};

// ─── Table configuration ─────────────────────────────────────────────────────

/// One column of the overview table.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TableColumn {
  pub field: String,
  pub label: String,
}

/// Overview-table layout and default ordering for one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TableConfig {
  pub columns:            Vec<TableColumn>,
  pub default_sort_field: Option<String>,
  pub default_sort_order: Option<SortOrder>,
}

impl TableConfig {
  /// Effective default sort: the configured field, else the first table
  /// column, else `id`. Order defaults ascending.
  pub fn default_sort(&self) -> (&str, SortOrder) {
    let field = self
      .default_sort_field
      .as_deref()
      .or_else(|| self.columns.first().map(|c| c.field.as_str()))
      .unwrap_or("id");
    (field, self.default_sort_order.unwrap_or(SortOrder::Asc))
  }
}

// ─── Actions ─────────────────────────────────────────────────────────────────

/// A CRUD action offered on a type. `bundle` marks actions that may be
/// applied to a selection of listed items at once.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ActionDef {
  pub name:       String,
  pub icon:       String,
  pub bundle:     bool,
  permission:     Option<String>,
}

impl ActionDef {
  pub fn new(name: impl Into<String>, icon: impl Into<String>) -> Self {
    ActionDef {
      name:       name.into(),
      icon:       icon.into(),
      bundle:     false,
      permission: None,
    }
  }

  pub fn bundled(mut self) -> Self {
    self.bundle = true;
    self
  }

  pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
    self.permission = Some(permission.into());
    self
  }

  /// Permission checked for this action: explicit, else the lowercased
  /// action name.
  pub fn permission(&self) -> String {
    self.permission.clone().unwrap_or_else(|| self.name.to_lowercase())
  }
}

/// The standard action set every type starts with. `Delete` and `Export`
/// are bundleable.
fn default_actions() -> Vec<ActionDef> {
  vec![
    ActionDef::new("List", "icon-list-alt"),
    ActionDef::new("Create", "icon-plus"),
    ActionDef::new("Read", "icon-eye-open"),
    ActionDef::new("Update", "icon-edit"),
    ActionDef::new("Delete", "icon-trash").bundled(),
    ActionDef::new("Export", "icon-download").bundled(),
  ]
}

// ─── Entity definitions ──────────────────────────────────────────────────────

/// The frozen descriptor of one entity type.
#[derive(Debug, Clone)]
pub struct EntityDef {
  name:          String,
  label:         String,
  label_plural:  String,
  columns:       Vec<String>,
  capabilities:  Vec<Capability>,
  table:         TableConfig,
  actions:       Vec<ActionDef>,
  statemachines: BTreeMap<String, StateMachineDef>,
  repr_field:    Option<String>,
}

impl EntityDef {
  /// Start a descriptor with the standard action set and labels derived
  /// from the type name.
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    let label = capitalize(name.trim_end_matches('s'));
    let label_plural = capitalize(&name);
    EntityDef {
      name,
      label,
      label_plural,
      columns: Vec::new(),
      capabilities: Vec::new(),
      table: TableConfig::default(),
      actions: default_actions(),
      statemachines: BTreeMap::new(),
      repr_field: None,
    }
  }

  pub fn label(mut self, singular: impl Into<String>) -> Self {
    self.label = singular.into();
    self
  }

  pub fn label_plural(mut self, plural: impl Into<String>) -> Self {
    self.label_plural = plural.into();
    self
  }

  pub fn column(mut self, name: impl Into<String>) -> Self {
    self.columns.push(name.into());
    self
  }

  /// Compose a capability. Declaration order is hook execution order.
  pub fn capability(mut self, cap: Capability) -> Self {
    self.capabilities.push(cap);
    self
  }

  pub fn table_column(
    mut self,
    field: impl Into<String>,
    label: impl Into<String>,
  ) -> Self {
    self
      .table
      .columns
      .push(TableColumn { field: field.into(), label: label.into() });
    self
  }

  pub fn default_sort(
    mut self,
    field: impl Into<String>,
    order: SortOrder,
  ) -> Self {
    self.table.default_sort_field = Some(field.into());
    self.table.default_sort_order = Some(order);
    self
  }

  pub fn action(mut self, action: ActionDef) -> Self {
    self.actions.push(action);
    self
  }

  pub fn statemachine(
    mut self,
    field: impl Into<String>,
    machine: StateMachineDef,
  ) -> Self {
    self.statemachines.insert(field.into(), machine);
    self
  }

  /// Field whose value stands in for the whole record in log subjects and
  /// overview links. Defaults to `id` rendering.
  pub fn repr_field(mut self, field: impl Into<String>) -> Self {
    self.repr_field = Some(field.into());
    self
  }

  // ── accessors ──

  pub fn name(&self) -> &str { &self.name }

  pub fn singular_label(&self) -> &str { &self.label }

  pub fn plural_label(&self) -> &str { &self.label_plural }

  pub fn table(&self) -> &TableConfig { &self.table }

  pub fn actions(&self) -> &[ActionDef] { &self.actions }

  pub fn capabilities(&self) -> &[Capability] { &self.capabilities }

  pub fn statemachines(&self) -> &BTreeMap<String, StateMachineDef> {
    &self.statemachines
  }

  pub fn repr(&self) -> Option<&str> { self.repr_field.as_deref() }

  pub fn composes(&self, cap: Capability) -> bool {
    self.capabilities.contains(&cap)
  }

  /// Columns the type declares itself, without capability contributions.
  pub fn own_columns(&self) -> &[String] { &self.columns }

  /// Every persisted field: `id`, declared columns, then capability
  /// contributions in composition order.
  pub fn all_fields(&self) -> Vec<&str> {
    let mut fields = vec!["id"];
    fields.extend(self.columns.iter().map(String::as_str));
    for cap in &self.capabilities {
      fields.extend(cap.fields());
    }
    fields
  }

  pub fn has_field(&self, field: &str) -> bool {
    field == "id"
      || self.columns.iter().any(|c| c == field)
      || self.capabilities.iter().any(|c| c.fields().contains(&field))
  }

  /// Build-time validation; called by [`RegistryBuilder::build`].
  fn validate(&self) -> Result<()> {
    for (i, cap) in self.capabilities.iter().enumerate() {
      if self.capabilities[..i].contains(cap) {
        return Err(Error::Configuration(format!(
          "type {}: capability {} composed twice",
          self.name,
          cap.name()
        )));
      }
      for field in cap.fields() {
        if self.columns.iter().any(|c| c == field) {
          return Err(Error::Composition {
            type_name: self.name.clone(),
            field:     (*field).to_owned(),
          });
        }
        for other in &self.capabilities[..i] {
          if other.fields().contains(field) {
            return Err(Error::Composition {
              type_name: self.name.clone(),
              field:     (*field).to_owned(),
            });
          }
        }
      }
    }

    if !self.statemachines.is_empty() && !self.composes(Capability::Stateful)
    {
      return Err(Error::Configuration(format!(
        "type {}: state machines declared without the stateful capability",
        self.name
      )));
    }
    if self.statemachines.is_empty() && self.composes(Capability::Stateful) {
      return Err(Error::Configuration(format!(
        "type {}: stateful capability composed but no state machine declared",
        self.name
      )));
    }
    for (field, machine) in &self.statemachines {
      if !self.has_field(field) {
        return Err(Error::Configuration(format!(
          "type {}: state machine drives unknown field {field}",
          self.name
        )));
      }
      machine.validate(&self.name, field)?;
    }

    for column in &self.table.columns {
      if !self.has_field(&column.field) {
        return Err(Error::Configuration(format!(
          "type {}: table column {} is not a field",
          self.name, column.field
        )));
      }
    }
    if let Some(field) = &self.table.default_sort_field {
      if !self.has_field(field) {
        return Err(Error::Configuration(format!(
          "type {}: default sort field {field} is not a field",
          self.name
        )));
      }
    }
    if let Some(field) = &self.repr_field {
      if !self.has_field(field) {
        return Err(Error::Configuration(format!(
          "type {}: repr field {field} is not a field",
          self.name
        )));
      }
    }
    Ok(())
  }
}

fn capitalize(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    None => String::new(),
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Assembles a [`Registry`]. Starts pre-loaded with the built-in side
/// types (`logs`, `comments`, `tags`, `todos`, `forms`).
pub struct RegistryBuilder {
  defs: BTreeMap<String, EntityDef>,
}

impl RegistryBuilder {
  pub fn new() -> Self {
    let mut builder = RegistryBuilder { defs: BTreeMap::new() };
    for def in builtin_defs() {
      builder.defs.insert(def.name.clone(), def);
    }
    builder
  }

  /// Register a type. Re-registering a built-in replaces it.
  pub fn register(mut self, def: EntityDef) -> Self {
    self.defs.insert(def.name.clone(), def);
    self
  }

  /// Validate every descriptor and freeze the registry.
  pub fn build(self) -> Result<Registry> {
    let mut defs = BTreeMap::new();
    for (name, def) in self.defs {
      def.validate()?;
      defs.insert(name, Arc::new(def));
    }
    Ok(Registry { defs })
  }
}

impl Default for RegistryBuilder {
  fn default() -> Self { Self::new() }
}

/// The immutable set of registered entity types. Built once at startup;
/// lookups of unregistered names are configuration errors, not panics.
#[derive(Debug, Clone)]
pub struct Registry {
  defs: BTreeMap<String, Arc<EntityDef>>,
}

impl Registry {
  pub fn get(&self, name: &str) -> Result<Arc<EntityDef>> {
    self.defs.get(name).cloned().ok_or_else(|| {
      Error::Configuration(format!("no entity type registered as {name:?}"))
    })
  }

  pub fn contains(&self, name: &str) -> bool { self.defs.contains_key(name) }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
    self.defs.values()
  }
}

/// The side types every registry carries. They back the capability
/// relations and are themselves plain entity types — the audit log of a
/// record is a listing of `logs`.
fn builtin_defs() -> Vec<EntityDef> {
  vec![
    EntityDef::new("logs")
      .label("Log")
      .column("subject")
      .column("text")
      .column("author")
      .capability(Capability::Owned)
      .capability(Capability::Meta)
      .table_column("subject", "Subject")
      .table_column("author", "Author")
      .table_column("created", "Created")
      .default_sort("created", SortOrder::Desc)
      .repr_field("subject"),
    EntityDef::new("comments")
      .label("Comment")
      .column("text")
      .capability(Capability::Owned)
      .capability(Capability::Meta)
      .capability(Capability::Nested)
      .table_column("text", "Text")
      .table_column("created", "Created")
      .repr_field("text"),
    EntityDef::new("tags")
      .label("Tag")
      .column("name")
      .table_column("name", "Name")
      .repr_field("name"),
    EntityDef::new("todos")
      .label("Todo")
      .column("task")
      .capability(Capability::Owned)
      .capability(Capability::Meta)
      .table_column("task", "Task")
      .table_column("created", "Created")
      .repr_field("task"),
    EntityDef::new("forms")
      .label("Form")
      .column("name")
      .column("definition")
      .table_column("name", "Name")
      .repr_field("name"),
  ]
}
