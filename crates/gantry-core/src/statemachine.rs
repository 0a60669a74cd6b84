//! Declarative state machines for [`Capability::Stateful`] types.
//!
//! A machine is declared once on the entity type, keyed by the integer
//! field that stores the current state. Transition legality lives here;
//! firing happens in the update hook when the field genuinely changes.
//!
//! [`Capability::Stateful`]: crate::capability::Capability::Stateful

use crate::error::{Error, Result};

// ─── Definitions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StateDef {
  pub id:          i64,
  pub name:        String,
  pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TransitionDef {
  pub from:       i64,
  pub to:         i64,
  /// Action label shown to users ("publish", "archive").
  pub action:     String,
  /// Permission name checked before the transition is offered; `None`
  /// offers it to everyone.
  pub permission: Option<String>,
}

/// One state machine: its states, legal transitions, and start state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StateMachineDef {
  start:       i64,
  states:      Vec<StateDef>,
  transitions: Vec<TransitionDef>,
}

impl StateMachineDef {
  pub fn new(start: i64) -> Self {
    StateMachineDef { start, states: Vec::new(), transitions: Vec::new() }
  }

  pub fn state(
    mut self,
    id: i64,
    name: impl Into<String>,
    description: impl Into<String>,
  ) -> Self {
    self.states.push(StateDef {
      id,
      name: name.into(),
      description: description.into(),
    });
    self
  }

  pub fn transition(
    mut self,
    from: i64,
    to: i64,
    action: impl Into<String>,
  ) -> Self {
    self.transitions.push(TransitionDef {
      from,
      to,
      action: action.into(),
      permission: None,
    });
    self
  }

  /// Like [`transition`](Self::transition), gated behind a permission name.
  pub fn guarded_transition(
    mut self,
    from: i64,
    to: i64,
    action: impl Into<String>,
    permission: impl Into<String>,
  ) -> Self {
    self.transitions.push(TransitionDef {
      from,
      to,
      action: action.into(),
      permission: Some(permission.into()),
    });
    self
  }

  pub fn start(&self) -> i64 { self.start }

  pub fn states(&self) -> &[StateDef] { &self.states }

  pub fn find_state(&self, id: i64) -> Option<&StateDef> {
    self.states.iter().find(|s| s.id == id)
  }

  /// The declared transition covering an exact `from -> to` pair, if any.
  pub fn transition_between(
    &self,
    from: i64,
    to: i64,
  ) -> Option<&TransitionDef> {
    self.transitions.iter().find(|t| t.from == from && t.to == to)
  }

  /// All transitions leaving `from`, in declaration order.
  pub fn available_from(&self, from: i64) -> Vec<&TransitionDef> {
    self.transitions.iter().filter(|t| t.from == from).collect()
  }

  /// Referential integrity check, run once at registry build.
  pub(crate) fn validate(&self, type_name: &str, field: &str) -> Result<()> {
    let known = |id: i64| self.states.iter().any(|s| s.id == id);
    if !known(self.start) {
      return Err(Error::Configuration(format!(
        "state machine {type_name}.{field}: start state {} not declared",
        self.start
      )));
    }
    for t in &self.transitions {
      if !known(t.from) || !known(t.to) {
        return Err(Error::Configuration(format!(
          "state machine {type_name}.{field}: transition {} references \
           undeclared state ({} -> {})",
          t.action, t.from, t.to
        )));
      }
    }
    Ok(())
  }
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

/// A machine evaluated against one record's current state. Request handlers
/// cache these per `(type, id, field)` for the lifetime of a request; the
/// update hook drops the entry when a transition fires.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MachineSnapshot {
  pub field:       String,
  pub current:     StateDef,
  pub transitions: Vec<TransitionDef>,
}

impl MachineSnapshot {
  /// Capture the machine at `current`. Unknown current values fall back to
  /// the start state rather than failing the request.
  pub fn capture(
    field: &str,
    machine: &StateMachineDef,
    current: Option<i64>,
  ) -> Self {
    let id = current.unwrap_or_else(|| machine.start());
    let current = machine
      .find_state(id)
      .or_else(|| machine.find_state(machine.start()))
      .cloned()
      .unwrap_or(StateDef {
        id,
        name: format!("state-{id}"),
        description: String::new(),
      });
    let transitions =
      machine.available_from(current.id).into_iter().cloned().collect();
    MachineSnapshot { field: field.to_owned(), current, transitions }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn review_machine() -> StateMachineDef {
    StateMachineDef::new(1)
      .state(1, "draft", "freshly created")
      .state(2, "review", "waiting for review")
      .state(3, "published", "visible to all")
      .transition(1, 2, "submit")
      .transition(2, 1, "reject")
      .guarded_transition(2, 3, "publish", "publish")
  }

  #[test]
  fn transition_lookup_is_exact() {
    let m = review_machine();
    assert_eq!(m.transition_between(1, 2).unwrap().action, "submit");
    assert!(m.transition_between(1, 3).is_none());
    assert!(m.transition_between(2, 2).is_none());
  }

  #[test]
  fn available_lists_only_outgoing() {
    let m = review_machine();
    let actions: Vec<_> =
      m.available_from(2).into_iter().map(|t| t.action.as_str()).collect();
    assert_eq!(actions, ["reject", "publish"]);
    assert!(m.available_from(3).is_empty());
  }

  #[test]
  fn validate_rejects_dangling_references() {
    let m = StateMachineDef::new(1)
      .state(1, "only", "")
      .transition(1, 9, "leap");
    assert!(m.validate("tickets", "state").is_err());

    let m = StateMachineDef::new(7).state(1, "only", "");
    assert!(m.validate("tickets", "state").is_err());
  }

  #[test]
  fn snapshot_falls_back_to_start() {
    let m = review_machine();
    let snap = MachineSnapshot::capture("state", &m, Some(42));
    assert_eq!(snap.current.id, 1);
    let snap = MachineSnapshot::capture("state", &m, None);
    assert_eq!(snap.current.name, "draft");
  }
}
