//! Deletion-instruction lifecycle management.
//!
//! DELETE mapping instructions are pending delete orders for the downstream
//! apply step. Two operations manage them, both mutating their `bundle`
//! argument in place by contract (they are steps applied to a working
//! bundle, not pure transforms):
//!
//! - [`clean_delete_mappings`] drops delete orders made stale by a source
//!   bundle re-adding the targeted entity
//! - [`reset_mappings`] applies pending deletions locally and clears every
//!   instruction, starting the next reconciliation cycle with a clean slate
//!
//! Both precompute all derived identity sets before touching the bundle, so
//! an error leaves it unmodified.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::bundle::{Bundle, Entity, MappingAction};
use crate::error::ReconcileError;
use crate::identity::entity_identity;
use crate::registry::EntityRegistry;

/// Drop stale DELETE instructions from `bundle` for entities `source` re-adds.
///
/// For every kind, a DELETE instruction in `bundle` is removed iff its
/// identity appears among `source`'s entities and `source` carries no DELETE
/// instruction for that identity itself. A delete order `source` reaffirms
/// is kept.
pub fn clean_delete_mappings(
  bundle: &mut Bundle,
  source: &Bundle,
  registry: &EntityRegistry,
) -> Result<(), ReconcileError> {
  if bundle.properties.as_ref().is_none_or(|p| p.mappings.is_empty()) {
    return Ok(());
  }

  // Collect, per kind, the identities present in source and the subset
  // source itself still orders deleted. Fallible work happens before any
  // mutation of the bundle.
  let mut stale_by_kind: BTreeMap<String, HashSet<String>> = BTreeMap::new();
  for (kind, entities) in &source.entities {
    let mut present = HashSet::new();
    for entity in entities {
      if let Some(id) = entity_identity(kind, entity, registry)? {
        present.insert(id);
      }
    }
    if present.is_empty() {
      continue;
    }

    let fields = registry.identity_fields(kind);
    let reaffirmed: HashSet<String> = source
      .mappings_of(kind)
      .iter()
      .filter(|i| i.action == MappingAction::Delete)
      .filter_map(|i| i.source.identity(fields))
      .collect();

    let stale: HashSet<String> = present.difference(&reaffirmed).cloned().collect();
    if !stale.is_empty() {
      stale_by_kind.insert(kind.clone(), stale);
    }
  }

  if stale_by_kind.is_empty() {
    return Ok(());
  }

  let Some(properties) = &mut bundle.properties else { return Ok(()) };
  let mut dropped = 0usize;
  for (kind, stale) in &stale_by_kind {
    let fields = registry.identity_fields(kind);
    if let Some(instructions) = properties.mappings.get_mut(kind) {
      instructions.retain(|instruction| {
        let is_stale = instruction.action == MappingAction::Delete
          && instruction.source.identity(fields).is_some_and(|id| stale.contains(&id));
        if is_stale {
          dropped += 1;
        }
        !is_stale
      });
    }
  }
  properties.mappings.retain(|_, instructions| !instructions.is_empty());

  debug!(dropped, "dropped stale delete instructions");
  Ok(())
}

/// Apply pending deletions and clear all mapping instructions.
///
/// Every identity referenced by a DELETE instruction (including the
/// host+port composite) has its matching entities removed from the
/// corresponding lists; afterwards `Properties.Mappings` is fully cleared.
/// Safe to call on a bundle with no properties or no mappings (no-op).
pub fn reset_mappings(bundle: &mut Bundle, registry: &EntityRegistry) -> Result<(), ReconcileError> {
  let Some(properties) = &bundle.properties else { return Ok(()) };
  if properties.mappings.is_empty() {
    return Ok(());
  }

  let mut doomed_by_kind: BTreeMap<String, HashSet<String>> = BTreeMap::new();
  for (kind, instructions) in &properties.mappings {
    let fields = registry.identity_fields(kind);
    let doomed: HashSet<String> = instructions
      .iter()
      .filter(|i| i.action == MappingAction::Delete)
      .filter_map(|i| i.source.identity(fields))
      .collect();
    if !doomed.is_empty() {
      doomed_by_kind.insert(kind.clone(), doomed);
    }
  }

  // Compute every surviving list before committing anything.
  let mut survivors: Vec<(String, Vec<Entity>)> = Vec::new();
  let mut removed = 0usize;
  for (kind, doomed) in &doomed_by_kind {
    let entities = bundle.entities_of(kind);
    if entities.is_empty() {
      continue;
    }
    let mut kept = Vec::with_capacity(entities.len());
    for entity in entities {
      match entity_identity(kind, entity, registry)? {
        Some(id) if doomed.contains(&id) => removed += 1,
        _ => kept.push(entity.clone()),
      }
    }
    survivors.push((kind.clone(), kept));
  }

  for (kind, kept) in survivors {
    bundle.entities.insert(kind, kept);
  }
  if let Some(properties) = &mut bundle.properties {
    properties.mappings.clear();
  }

  debug!(removed, "applied pending deletions and cleared mappings");
  Ok(())
}
