//! Bundle types for rebundle.
//!
//! The bundle is the central data structure of the engine. It is produced by
//! an external loader (or decoded from the wire format), transformed by the
//! merge/delta/dedup operations, and handed to an external apply layer.
//!
//! # Structure
//!
//! A bundle contains:
//! - one ordered entity list per entity kind, captured as a flattened map so
//!   absent kinds decode as empty collections
//! - an optional [`Properties`] block: metadata, a default reconciliation
//!   action, and per-kind [`MappingInstruction`] lists
//!
//! # Opacity
//!
//! Entities are opaque JSON objects. The engine reads only the fields the
//! entity-type registry designates as identity fields; everything else is
//! carried through untouched.
//!
//! # Ordering
//!
//! Entity lists are order-preserving and enforce no uniqueness at
//! construction time (deduplication is a separate operation). Kind maps use
//! [`BTreeMap`] for deterministic serialization order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

/// An opaque configuration entity.
///
/// The engine treats entities as plain JSON objects; only the identity
/// fields declared by the registry are ever interpreted.
pub type Entity = serde_json::Map<String, serde_json::Value>;

/// Per-kind mapping instruction lists, keyed by entity kind name.
pub type Mappings = BTreeMap<String, Vec<MappingInstruction>>;

/// A full or partial configuration snapshot.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
  /// Bundle metadata, default action, and mapping instructions.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub properties: Option<Properties>,

  /// One ordered entity list per entity kind.
  #[serde(flatten)]
  pub entities: BTreeMap<String, Vec<Entity>>,
}

impl Bundle {
  /// Decode a bundle from its JSON wire encoding.
  pub fn from_slice(bytes: &[u8]) -> Result<Self, ReconcileError> {
    serde_json::from_slice(bytes).map_err(ReconcileError::Decode)
  }

  /// Encode the bundle to its JSON wire encoding.
  pub fn to_vec(&self) -> Result<Vec<u8>, ReconcileError> {
    serde_json::to_vec(self).map_err(ReconcileError::Encode)
  }

  /// Encode the bundle as pretty-printed JSON.
  pub fn to_vec_pretty(&self) -> Result<Vec<u8>, ReconcileError> {
    serde_json::to_vec_pretty(self).map_err(ReconcileError::Encode)
  }

  /// The entities of a kind, or an empty slice when the kind is absent.
  pub fn entities_of(&self, kind: &str) -> &[Entity] {
    self.entities.get(kind).map(Vec::as_slice).unwrap_or_default()
  }

  /// Mutable access to a kind's entity list, creating it if absent.
  pub fn entities_of_mut(&mut self, kind: &str) -> &mut Vec<Entity> {
    self.entities.entry(kind.to_string()).or_default()
  }

  /// Iterate over the kind names present in this bundle.
  pub fn kinds(&self) -> impl Iterator<Item = &str> {
    self.entities.keys().map(String::as_str)
  }

  /// Total number of entities across all kinds.
  pub fn entity_count(&self) -> usize {
    self.entities.values().map(Vec::len).sum()
  }

  /// Returns true if the bundle carries no entities and no properties.
  pub fn is_empty(&self) -> bool {
    self.entities.values().all(Vec::is_empty) && self.properties.as_ref().map_or(true, Properties::is_empty)
  }

  /// The mapping instructions recorded for a kind, or an empty slice.
  pub fn mappings_of(&self, kind: &str) -> &[MappingInstruction] {
    self
      .properties
      .as_ref()
      .and_then(|p| p.mappings.get(kind))
      .map(Vec::as_slice)
      .unwrap_or_default()
  }

  /// Append a mapping instruction for a kind, creating the properties and
  /// mappings containers on demand.
  pub fn push_mapping(&mut self, kind: &str, instruction: MappingInstruction) {
    self
      .properties
      .get_or_insert_with(Properties::default)
      .mappings
      .entry(kind.to_string())
      .or_default()
      .push(instruction);
  }
}

/// Bundle metadata and reconciliation directives.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub meta: Option<BundleMeta>,

  /// Reconciliation action applied when an entity has no instruction of its own.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_action: Option<MappingAction>,

  /// One ordered instruction list per entity kind. Order within a kind is
  /// insertion order; merging appends rather than deduplicating.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub mappings: Mappings,
}

impl Properties {
  pub fn is_empty(&self) -> bool {
    self.meta.is_none() && self.default_action.is_none() && self.mappings.is_empty()
  }
}

/// Descriptive metadata about a bundle's origin.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,

  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub display_name: String,

  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub author: String,

  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub host: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timestamp: Option<u64>,
}

/// Reconciliation action carried by a mapping instruction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingAction {
  #[default]
  NewOrUpdate,
  NewOrExisting,
  AlwaysCreateNew,
  Delete,
  Ignore,
}

/// A declarative directive attached to an entity identity, consumed by the
/// downstream apply layer.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingInstruction {
  #[serde(default)]
  pub action: MappingAction,

  #[serde(default, skip_serializing_if = "is_false")]
  pub default: bool,

  #[serde(default, skip_serializing_if = "is_false")]
  pub fail_on_new: bool,

  #[serde(default, skip_serializing_if = "is_false")]
  pub fail_on_existing: bool,

  #[serde(default, skip_serializing_if = "is_false")]
  pub nodef: bool,

  /// Identifies the target entity by the same fields the registry declares
  /// for its kind.
  #[serde(default, skip_serializing_if = "MappingSource::is_empty")]
  pub source: MappingSource,
}

impl MappingInstruction {
  /// A DELETE instruction for the given source identity.
  pub fn delete_of(source: MappingSource) -> Self {
    Self {
      action: MappingAction::Delete,
      source,
      ..Self::default()
    }
  }
}

fn is_false(value: &bool) -> bool {
  !*value
}

/// The typed identity record of a mapping instruction's target.
///
/// Heterogeneous decoded `source` values are normalized into this single
/// record at the codec boundary, so downstream logic never branches on
/// representation. Which sub-fields are meaningful for a given kind is
/// decided by the registry's identity-field table.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSource {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub alias: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub system_id: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub key: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resolution_path: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub thumbprint_sha1: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub host: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub port: Option<u64>,
}

impl MappingSource {
  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }

  /// The value this source carries for a named identity field.
  ///
  /// Empty strings and a zero port count as absent, matching the identity
  /// resolver's unset-sentinel convention. Ports render as decimal.
  pub fn field(&self, name: &str) -> Option<String> {
    let text = match name {
      "name" => self.name.as_deref(),
      "alias" => self.alias.as_deref(),
      "systemId" => self.system_id.as_deref(),
      "key" => self.key.as_deref(),
      "resolutionPath" => self.resolution_path.as_deref(),
      "thumbprintSha1" => self.thumbprint_sha1.as_deref(),
      "host" => self.host.as_deref(),
      "port" => return self.port.filter(|p| *p != 0).map(|p| p.to_string()),
      _ => None,
    };
    text.filter(|s| !s.is_empty()).map(str::to_string)
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn decode(doc: serde_json::Value) -> Bundle {
    serde_json::from_value(doc).unwrap()
  }

  #[test]
  fn absent_kinds_decode_as_empty() {
    let bundle = decode(json!({}));
    assert!(bundle.is_empty());
    assert!(bundle.entities_of("services").is_empty());
    assert!(bundle.mappings_of("services").is_empty());
  }

  #[test]
  fn entity_lists_preserve_order() {
    let bundle = decode(json!({
      "services": [{"name": "b"}, {"name": "a"}, {"name": "c"}]
    }));
    let names: Vec<_> = bundle
      .entities_of("services")
      .iter()
      .map(|e| e["name"].as_str().unwrap())
      .collect();
    assert_eq!(names, ["b", "a", "c"]);
  }

  #[test]
  fn codec_roundtrip() {
    let bundle = decode(json!({
      "services": [{"name": "api1", "path": "/v1"}],
      "keys": [{"alias": "signing"}],
      "properties": {
        "defaultAction": "NEW_OR_EXISTING",
        "meta": {"id": "b1", "displayName": "layer", "author": "ops"},
        "mappings": {
          "services": [{"action": "DELETE", "source": {"name": "gone"}}]
        }
      }
    }));

    let bytes = bundle.to_vec().unwrap();
    let decoded = Bundle::from_slice(&bytes).unwrap();
    assert_eq!(bundle, decoded);
  }

  #[test]
  fn from_slice_rejects_malformed_document() {
    let result = Bundle::from_slice(b"not json {{{");
    assert!(matches!(result, Err(ReconcileError::Decode(_))));
  }

  #[test]
  fn mapping_action_wire_names() {
    let instr: MappingInstruction = serde_json::from_value(json!({
      "action": "ALWAYS_CREATE_NEW",
      "failOnNew": true,
      "source": {"host": "h", "port": 8080}
    }))
    .unwrap();

    assert_eq!(instr.action, MappingAction::AlwaysCreateNew);
    assert!(instr.fail_on_new);
    assert_eq!(instr.source.field("host").as_deref(), Some("h"));
    assert_eq!(instr.source.field("port").as_deref(), Some("8080"));
  }

  #[test]
  fn mapping_source_treats_empty_and_zero_as_absent() {
    let source = MappingSource {
      name: Some(String::new()),
      port: Some(0),
      ..MappingSource::default()
    };
    assert_eq!(source.field("name"), None);
    assert_eq!(source.field("port"), None);
  }

  #[test]
  fn push_mapping_creates_containers_on_demand() {
    let mut bundle = Bundle::default();
    bundle.push_mapping("services", MappingInstruction::delete_of(MappingSource {
      name: Some("api1".to_string()),
      ..MappingSource::default()
    }));

    assert_eq!(bundle.mappings_of("services").len(), 1);
    assert_eq!(bundle.mappings_of("services")[0].action, MappingAction::Delete);
  }

  #[test]
  fn instruction_flags_roundtrip_with_defaults_omitted() {
    let instr = MappingInstruction::delete_of(MappingSource::default());
    let encoded = serde_json::to_value(&instr).unwrap();
    assert_eq!(encoded, json!({"action": "DELETE"}));
  }
}
