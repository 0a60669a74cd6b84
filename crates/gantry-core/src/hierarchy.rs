//! Traversal over the `parent_id` hierarchy of `Nested` types.
//!
//! Writes never validate the hierarchy, so a bad import or a concurrent
//! edit can produce a parent cycle. Traversal carries a visited set and
//! fails fast with [`Error::CycleDetected`] instead of looping.

use std::{collections::HashSet, sync::Arc};

use crate::{
  error::{Error, Result},
  record::Record,
  schema::EntityDef,
  store::EntityStore,
};

/// The ancestor chain of a record: immediate parent first, root last.
pub async fn parents<S: EntityStore + ?Sized>(
  store: &S,
  def: Arc<EntityDef>,
  record: &Record,
) -> Result<Vec<Record>> {
  let mut visited: HashSet<i64> = record.id.into_iter().collect();
  let mut chain = Vec::new();
  let mut next = record.parent_id();
  while let Some(id) = next {
    if !visited.insert(id) {
      return Err(Error::CycleDetected {
        type_name: def.name().to_owned(),
        id,
      });
    }
    let parent = store.fetch(def.clone(), id, None).await?;
    next = parent.parent_id();
    chain.push(parent);
  }
  Ok(chain)
}

/// Every descendant of a record, depth-first, each node before its own
/// children, siblings in id order.
pub async fn descendants<S: EntityStore + ?Sized>(
  store: &S,
  def: Arc<EntityDef>,
  root: &Record,
) -> Result<Vec<Record>> {
  let Some(root_id) = root.id else { return Ok(Vec::new()) };
  let mut visited = HashSet::from([root_id]);
  let mut out = Vec::new();

  let mut stack = store.fetch_children(def.clone(), root_id).await?;
  stack.reverse();
  while let Some(node) = stack.pop() {
    let Some(id) = node.id else { continue };
    if !visited.insert(id) {
      return Err(Error::CycleDetected {
        type_name: def.name().to_owned(),
        id,
      });
    }
    let mut children = store.fetch_children(def.clone(), id).await?;
    children.reverse();
    stack.extend(children);
    out.push(node);
  }
  Ok(out)
}
