//! Overwrite-merge of two bundles.
//!
//! Entities from the incoming bundle replace same-identity entities in the
//! existing one ("latest wins"); everything else is retained or appended.
//! Two variants exist: [`merge`] additionally drops stale DELETE
//! instructions for entities the incoming bundle re-adds, while
//! [`merge_preserving_mappings`] keeps deletion instructions verbatim for
//! already-authoritative bundles.
//!
//! Both variants are fail-fast: on any error the inputs are untouched and no
//! partial result is produced, since the merged bundle is built fresh from
//! immutable borrows.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::bundle::{Bundle, Entity, Properties};
use crate::error::ReconcileError;
use crate::identity::entity_identity;
use crate::mappings::clean_delete_mappings;
use crate::registry::{Cardinality, EntityRegistry};

/// Overwrite-merge `src` into `dest`, then drop stale DELETE instructions.
///
/// A DELETE instruction in the merged bundle is stale when `src` carries the
/// entity it targets without an accompanying DELETE instruction of its own:
/// the entity is being re-added, so the old delete order no longer applies.
pub fn merge(src: &Bundle, dest: &Bundle, registry: &EntityRegistry) -> Result<Bundle, ReconcileError> {
  let mut merged = merge_preserving_mappings(src, dest, registry)?;
  clean_delete_mappings(&mut merged, src, registry)?;
  Ok(merged)
}

/// Overwrite-merge `src` into `dest`, keeping deletion instructions verbatim.
///
/// Per kind: `dest` order is preserved; a `src` entity sharing an identity
/// replaces the `dest` entity in place; `src`-only entities append in `src`
/// order; identity-less entities always append. SINGLETON kinds adopt
/// `src`'s whole list only when `dest`'s list is empty, otherwise `dest`
/// wins untouched.
///
/// Properties: `src`'s default action overwrites when present, `src`'s meta
/// overwrites when it carries a non-empty id, and mapping-instruction lists
/// are appended per kind without deduplication.
pub fn merge_preserving_mappings(
  src: &Bundle,
  dest: &Bundle,
  registry: &EntityRegistry,
) -> Result<Bundle, ReconcileError> {
  let mut merged = Bundle::default();

  let kinds: BTreeSet<&String> = dest.entities.keys().chain(src.entities.keys()).collect();
  for kind in kinds {
    let src_list = src.entities_of(kind);
    let dest_list = dest.entities_of(kind);

    let merged_list = match registry.cardinality(kind) {
      Cardinality::Singleton => merge_singleton(kind, src_list, dest_list),
      Cardinality::Many => merge_kind(kind, src_list, dest_list, registry)?,
    };

    if !merged_list.is_empty() {
      merged.entities.insert(kind.clone(), merged_list);
    }
  }

  merged.properties = merge_properties(src.properties.as_ref(), dest.properties.as_ref());
  Ok(merged)
}

/// Merge one MANY kind with an identity-keyed index, O(n) per kind.
fn merge_kind(
  kind: &str,
  src_list: &[Entity],
  dest_list: &[Entity],
  registry: &EntityRegistry,
) -> Result<Vec<Entity>, ReconcileError> {
  let mut merged: Vec<Entity> = dest_list.to_vec();
  let mut index: HashMap<String, usize> = HashMap::with_capacity(merged.len());
  for (position, entity) in merged.iter().enumerate() {
    if let Some(id) = entity_identity(kind, entity, registry)? {
      index.insert(id, position);
    }
  }

  let mut replaced = 0usize;
  let mut appended = 0usize;
  for entity in src_list {
    match entity_identity(kind, entity, registry)? {
      Some(id) => match index.get(&id) {
        Some(&position) => {
          merged[position] = entity.clone();
          replaced += 1;
        }
        None => {
          index.insert(id, merged.len());
          merged.push(entity.clone());
          appended += 1;
        }
      },
      // No identity: never matched, always appended.
      None => {
        merged.push(entity.clone());
        appended += 1;
      }
    }
  }

  debug!(kind, replaced, appended, total = merged.len(), "merged entity kind");
  Ok(merged)
}

/// Singleton rule: an existing global setting is never overwritten.
fn merge_singleton(kind: &str, src_list: &[Entity], dest_list: &[Entity]) -> Vec<Entity> {
  if dest_list.is_empty() {
    debug!(kind, adopted = src_list.len(), "adopted singleton kind from source");
    src_list.to_vec()
  } else {
    dest_list.to_vec()
  }
}

fn merge_properties(src: Option<&Properties>, dest: Option<&Properties>) -> Option<Properties> {
  let mut merged = dest.cloned();
  let Some(src) = src else { return merged };

  if let Some(action) = src.default_action {
    merged.get_or_insert_with(Properties::default).default_action = Some(action);
  }

  if let Some(meta) = &src.meta {
    if !meta.id.is_empty() {
      merged.get_or_insert_with(Properties::default).meta = Some(meta.clone());
    }
  }

  for (kind, instructions) in &src.mappings {
    if instructions.is_empty() {
      continue;
    }
    merged
      .get_or_insert_with(Properties::default)
      .mappings
      .entry(kind.clone())
      .or_default()
      .extend(instructions.iter().cloned());
  }

  merged
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::bundle::{MappingAction, MappingInstruction, MappingSource};

  fn bundle(doc: serde_json::Value) -> Bundle {
    serde_json::from_value(doc).unwrap()
  }

  fn registry() -> EntityRegistry {
    EntityRegistry::builtin()
  }

  fn names(bundle: &Bundle, kind: &str) -> Vec<String> {
    bundle
      .entities_of(kind)
      .iter()
      .map(|e| e["name"].as_str().unwrap().to_string())
      .collect()
  }

  #[test]
  fn latest_wins_for_shared_identity() {
    let dest = bundle(json!({"services": [{"name": "api1", "path": "/old"}]}));
    let src = bundle(json!({"services": [{"name": "api1", "path": "/new"}]}));

    let merged = merge(&src, &dest, &registry()).unwrap();

    let services = merged.entities_of("services");
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["path"], "/new");
  }

  #[test]
  fn dest_order_preserved_and_new_entities_appended() {
    let dest = bundle(json!({"services": [{"name": "a"}, {"name": "b"}]}));
    let src = bundle(json!({"services": [{"name": "c"}, {"name": "b", "updated": true}]}));

    let merged = merge(&src, &dest, &registry()).unwrap();

    assert_eq!(names(&merged, "services"), ["a", "b", "c"]);
    assert_eq!(merged.entities_of("services")[1]["updated"], true);
  }

  #[test]
  fn kinds_unique_to_either_side_are_kept() {
    let dest = bundle(json!({"services": [{"name": "api1"}]}));
    let src = bundle(json!({"keys": [{"alias": "signing"}]}));

    let merged = merge(&src, &dest, &registry()).unwrap();

    assert_eq!(merged.entities_of("services").len(), 1);
    assert_eq!(merged.entities_of("keys").len(), 1);
  }

  #[test]
  fn composite_identity_merges_only_matching_config() {
    let dest = bundle(json!({"httpConfigurations": [
      {"host": "h", "port": 8080, "path": "/old"},
      {"host": "h", "port": 8443}
    ]}));
    let src = bundle(json!({"httpConfigurations": [
      {"host": "h", "port": 8080, "path": "/new"}
    ]}));

    let merged = merge(&src, &dest, &registry()).unwrap();

    let configs = merged.entities_of("httpConfigurations");
    assert_eq!(configs.len(), 2);
    assert_eq!(configs[0]["path"], "/new");
    assert_eq!(configs[1]["port"], 8443);
    assert!(configs[1].get("path").is_none());
  }

  #[test]
  fn identity_less_entities_always_append() {
    let dest = bundle(json!({"services": [{"path": "/anon1"}]}));
    let src = bundle(json!({"services": [{"path": "/anon2"}]}));

    let merged = merge(&src, &dest, &registry()).unwrap();
    assert_eq!(merged.entities_of("services").len(), 2);
  }

  #[test]
  fn singleton_dest_wins_when_present() {
    let dest = bundle(json!({"passwordPolicies": [{"name": "strict"}]}));
    let src = bundle(json!({"passwordPolicies": [{"name": "lax"}]}));

    let merged = merge(&src, &dest, &registry()).unwrap();

    let policies = merged.entities_of("passwordPolicies");
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0]["name"], "strict");
  }

  #[test]
  fn singleton_adopted_when_dest_empty() {
    let dest = bundle(json!({"services": [{"name": "api1"}]}));
    let src = bundle(json!({"passwordPolicies": [{"name": "lax"}]}));

    let merged = merge(&src, &dest, &registry()).unwrap();
    assert_eq!(merged.entities_of("passwordPolicies")[0]["name"], "lax");
  }

  #[test]
  fn merge_yields_unique_identities() {
    let dest = bundle(json!({"services": [{"name": "a"}, {"name": "b"}]}));
    let src = bundle(json!({"services": [{"name": "b"}, {"name": "c"}]}));
    let reg = registry();

    let merged = merge(&src, &dest, &reg).unwrap();

    let mut seen = std::collections::HashSet::new();
    for entity in merged.entities_of("services") {
      let id = entity_identity("services", entity, &reg).unwrap().unwrap();
      assert!(seen.insert(id), "duplicate identity after merge");
    }
  }

  #[test]
  fn properties_default_action_and_meta_overwrite() {
    let dest = bundle(json!({"properties": {
      "defaultAction": "NEW_OR_UPDATE",
      "meta": {"id": "old", "author": "a"}
    }}));
    let src = bundle(json!({"properties": {
      "defaultAction": "NEW_OR_EXISTING",
      "meta": {"id": "new", "author": "b"}
    }}));

    let merged = merge(&src, &dest, &registry()).unwrap();

    let props = merged.properties.unwrap();
    assert_eq!(props.default_action, Some(MappingAction::NewOrExisting));
    assert_eq!(props.meta.unwrap().id, "new");
  }

  #[test]
  fn meta_without_id_does_not_overwrite() {
    let dest = bundle(json!({"properties": {"meta": {"id": "keep", "author": "a"}}}));
    let src = bundle(json!({"properties": {"meta": {"author": "b"}}}));

    let merged = merge(&src, &dest, &registry()).unwrap();
    assert_eq!(merged.properties.unwrap().meta.unwrap().id, "keep");
  }

  #[test]
  fn mapping_instructions_append_per_kind() {
    let dest = bundle(json!({"properties": {"mappings": {
      "services": [{"action": "IGNORE", "source": {"name": "a"}}]
    }}}));
    let src = bundle(json!({"properties": {"mappings": {
      "services": [{"action": "IGNORE", "source": {"name": "a"}}],
      "keys": [{"action": "NEW_OR_EXISTING", "source": {"alias": "k"}}]
    }}}));

    let merged = merge_preserving_mappings(&src, &dest, &registry()).unwrap();

    // Appended, not deduplicated: last-wins semantics are the apply layer's.
    assert_eq!(merged.mappings_of("services").len(), 2);
    assert_eq!(merged.mappings_of("keys").len(), 1);
  }

  #[test]
  fn merge_drops_stale_delete_for_readded_entity() {
    let mut dest = bundle(json!({"services": [{"name": "api2"}]}));
    dest.push_mapping(
      "services",
      MappingInstruction::delete_of(MappingSource {
        name: Some("api1".to_string()),
        ..MappingSource::default()
      }),
    );
    let src = bundle(json!({"services": [{"name": "api1"}]}));

    let merged = merge(&src, &dest, &registry()).unwrap();

    assert!(merged.mappings_of("services").is_empty());
    assert_eq!(names(&merged, "services"), ["api2", "api1"]);
  }

  #[test]
  fn merge_keeps_reaffirmed_delete() {
    let mut dest = bundle(json!({}));
    let delete = MappingInstruction::delete_of(MappingSource {
      name: Some("api1".to_string()),
      ..MappingSource::default()
    });
    dest.push_mapping("services", delete.clone());

    let mut src = bundle(json!({"services": [{"name": "api1"}]}));
    src.push_mapping("services", delete);

    let merged = merge(&src, &dest, &registry()).unwrap();

    let deletes: Vec<_> = merged
      .mappings_of("services")
      .iter()
      .filter(|i| i.action == MappingAction::Delete)
      .collect();
    assert_eq!(deletes.len(), 2);
  }

  #[test]
  fn preserving_variant_keeps_stale_deletes() {
    let mut dest = bundle(json!({}));
    dest.push_mapping(
      "services",
      MappingInstruction::delete_of(MappingSource {
        name: Some("api1".to_string()),
        ..MappingSource::default()
      }),
    );
    let src = bundle(json!({"services": [{"name": "api1"}]}));

    let merged = merge_preserving_mappings(&src, &dest, &registry()).unwrap();
    assert_eq!(merged.mappings_of("services").len(), 1);
  }

  #[test]
  fn merge_fails_fast_on_bad_identity_field() {
    let dest = bundle(json!({"services": [{"name": "ok"}]}));
    let src = bundle(json!({"services": [{"name": ["not", "scalar"]}]}));

    let result = merge(&src, &dest, &registry());
    assert!(matches!(result, Err(ReconcileError::IdentityField { .. })));
    // Inputs are borrowed immutably; dest is untouched by construction.
    assert_eq!(dest.entities_of("services").len(), 1);
  }
}
