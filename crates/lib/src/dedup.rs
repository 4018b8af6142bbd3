//! Duplicate removal within a single bundle.
//!
//! Two identity tags are computed per entity: the primary tag from the
//! registry's identity fields and, when the kind declares one, a secondary
//! tag from its global-id field. Sharing *either* tag with a previously kept
//! entity of the same kind disqualifies an entity — a name collision and a
//! global-id collision both indicate the same underlying object. The signals
//! are independent and first-occurrence-wins each; there is no cross-signal
//! tie-break.

use std::collections::HashSet;

use tracing::debug;

use crate::bundle::{Bundle, Entity};
use crate::error::ReconcileError;
use crate::identity::{entity_identity, secondary_identity};
use crate::registry::EntityRegistry;

/// Decode a bundle, remove duplicate entities, and re-encode it.
pub fn remove_duplicates(bytes: &[u8], registry: &EntityRegistry) -> Result<Vec<u8>, ReconcileError> {
  let mut bundle = Bundle::from_slice(bytes)?;
  dedup_bundle(&mut bundle, registry)?;
  bundle.to_vec()
}

/// Remove duplicate entities from each kind in place.
///
/// Walks every list in order; an entity is a duplicate when its primary or
/// secondary tag was already seen in that kind. First occurrence wins; later
/// duplicates are dropped silently. Entities with neither tag derivable are
/// always kept — they cannot be judged duplicates.
pub fn dedup_bundle(bundle: &mut Bundle, registry: &EntityRegistry) -> Result<(), ReconcileError> {
  // Kept lists are computed in full before committing, so an error leaves
  // the bundle unmodified.
  let mut kept_lists: Vec<(String, Vec<Entity>)> = Vec::new();
  let mut dropped = 0usize;

  for (kind, entities) in &bundle.entities {
    let mut seen_primary: HashSet<String> = HashSet::new();
    let mut seen_secondary: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(entities.len());

    for entity in entities {
      let primary = entity_identity(kind, entity, registry)?;
      let secondary = secondary_identity(kind, entity, registry);

      let duplicate = primary.as_ref().is_some_and(|tag| seen_primary.contains(tag))
        || secondary.as_ref().is_some_and(|tag| seen_secondary.contains(tag));
      if duplicate {
        dropped += 1;
        continue;
      }

      if let Some(tag) = primary {
        seen_primary.insert(tag);
      }
      if let Some(tag) = secondary {
        seen_secondary.insert(tag);
      }
      kept.push(entity.clone());
    }

    if kept.len() != entities.len() {
      kept_lists.push((kind.clone(), kept));
    }
  }

  for (kind, kept) in kept_lists {
    bundle.entities.insert(kind, kept);
  }

  debug!(dropped, "removed duplicate entities");
  Ok(())
}
