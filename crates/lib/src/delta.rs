//! Delta computation between a current and a desired snapshot.
//!
//! This module computes the minimal set of operations an apply step must
//! perform to move the managed system from `current` to `desired`, plus a
//! combined bundle representing the complete post-apply state (the desired
//! entities annotated with removal markers), useful as the next cycle's
//! authoritative snapshot.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::bundle::{Bundle, MappingInstruction, MappingSource};
use crate::error::ReconcileError;
use crate::identity::entity_identity;
use crate::registry::EntityRegistry;

/// Per-run counters describing what the delta contains.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeltaStats {
  /// Entities present in desired but not current.
  pub added: usize,
  /// Entities present in both but structurally unequal.
  pub changed: usize,
  /// Entities present in current but not desired.
  pub removed: usize,
  /// Entities identical on both sides (omitted from the delta).
  pub unchanged: usize,
}

impl DeltaStats {
  /// Returns true if current and desired already agree.
  pub fn is_empty(&self) -> bool {
    self.total_changes() == 0
  }

  pub fn total_changes(&self) -> usize {
    self.added + self.changed + self.removed
  }
}

/// Result of a delta computation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeltaOutcome {
  /// The minimal delta: added and changed entities, removed entities tagged
  /// with DELETE instructions.
  pub delta: Bundle,
  /// The full desired state plus removal markers.
  pub combined: Bundle,
  pub stats: DeltaStats,
}

/// Compute the minimal delta between `current` and `desired`.
///
/// Per kind, entities are classified by identity:
/// - **added** (desired only) and **changed** (both sides, full structural
///   inequality — not limited to identity fields) land in `delta`
/// - **unchanged** entities are omitted from `delta` and present in
///   `combined` only
/// - **removed** (current only) entities are appended to *both* bundles so
///   the apply step still sees them, and a DELETE instruction built from the
///   current entity's identity fields is appended to both bundles' mappings
///
/// `combined` starts as a clone of `desired`'s entity lists; its properties
/// accumulate deletions only. A desired entity without an identity is always
/// an addition; a current entity without one is skipped, since no
/// addressable DELETE instruction can be produced for it.
pub fn calculate_delta(
  current: &Bundle,
  desired: &Bundle,
  registry: &EntityRegistry,
) -> Result<DeltaOutcome, ReconcileError> {
  let mut delta = Bundle::default();
  let mut combined = Bundle::default();
  let mut stats = DeltaStats::default();

  let kinds: BTreeSet<&String> = current.entities.keys().chain(desired.entities.keys()).collect();
  for kind in kinds {
    let current_list = current.entities_of(kind);
    let desired_list = desired.entities_of(kind);

    let mut current_by_id = HashMap::with_capacity(current_list.len());
    for entity in current_list {
      if let Some(id) = entity_identity(kind, entity, registry)? {
        current_by_id.insert(id, entity);
      }
    }

    let mut combined_list = desired_list.to_vec();
    let mut delta_list = Vec::new();
    let mut desired_ids: HashSet<String> = HashSet::with_capacity(desired_list.len());
    let kind_stats_before = stats;

    for entity in desired_list {
      match entity_identity(kind, entity, registry)? {
        Some(id) => {
          match current_by_id.get(&id) {
            Some(existing) if *existing == entity => stats.unchanged += 1,
            Some(_) => {
              delta_list.push(entity.clone());
              stats.changed += 1;
            }
            None => {
              delta_list.push(entity.clone());
              stats.added += 1;
            }
          }
          desired_ids.insert(id);
        }
        // Cannot match anything: always an addition.
        None => {
          delta_list.push(entity.clone());
          stats.added += 1;
        }
      }
    }

    let fields = registry.identity_fields(kind);
    for entity in current_list {
      let Some(id) = entity_identity(kind, entity, registry)? else {
        continue;
      };
      if desired_ids.contains(&id) {
        continue;
      }
      delta_list.push(entity.clone());
      combined_list.push(entity.clone());
      let instruction = MappingInstruction::delete_of(MappingSource::from_entity(entity, fields));
      delta.push_mapping(kind, instruction.clone());
      combined.push_mapping(kind, instruction);
      stats.removed += 1;
    }

    if !delta_list.is_empty() {
      delta.entities.insert(kind.clone(), delta_list);
    }
    if !combined_list.is_empty() {
      combined.entities.insert(kind.clone(), combined_list);
    }

    debug!(
      kind,
      added = stats.added - kind_stats_before.added,
      changed = stats.changed - kind_stats_before.changed,
      removed = stats.removed - kind_stats_before.removed,
      "classified entity kind"
    );
  }

  info!(
    added = stats.added,
    changed = stats.changed,
    removed = stats.removed,
    unchanged = stats.unchanged,
    "computed bundle delta"
  );

  Ok(DeltaOutcome { delta, combined, stats })
}
