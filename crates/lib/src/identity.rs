//! Identity resolution for entities and mapping sources.
//!
//! The canonical identity of an entity is the ordered, pipe-joined
//! concatenation of its kind's identity-field values. Empty strings, JSON
//! nulls, absent fields, and numeric zero (the product's unset sentinel) are
//! excluded; when nothing contributes, the entity has no identity and is
//! never matched, merged, or deduplicated by identity.
//!
//! [`MappingSource`] records participate symmetrically: an instruction's
//! source yields the same identity string an entity with those field values
//! would, including the host+port composite.

use serde_json::Value;

use crate::bundle::{Entity, MappingSource};
use crate::error::ReconcileError;
use crate::registry::EntityRegistry;

/// Separator joining identity-field values. Not expected in field values.
pub const IDENTITY_SEPARATOR: &str = "|";

/// Derive the canonical identity of an entity within its kind.
///
/// Returns `Ok(None)` when no identity field contributes a value, and
/// [`ReconcileError::IdentityField`] when a declared identity field holds a
/// non-scalar value (array, object, or boolean).
pub fn entity_identity(
  kind: &str,
  entity: &Entity,
  registry: &EntityRegistry,
) -> Result<Option<String>, ReconcileError> {
  let mut parts = Vec::new();
  for field in registry.identity_fields(kind) {
    if let Some(part) = scalar_field(kind, entity, field)? {
      parts.push(part);
    }
  }
  if parts.is_empty() {
    Ok(None)
  } else {
    Ok(Some(parts.join(IDENTITY_SEPARATOR)))
  }
}

/// The secondary (global-id) tag of an entity, if its kind declares one and
/// the entity carries a non-empty string value for it.
///
/// This signal is used only by deduplication, never for merge matching.
pub fn secondary_identity(kind: &str, entity: &Entity, registry: &EntityRegistry) -> Option<String> {
  let field = registry.secondary_id_field(kind)?;
  entity
    .get(field)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
}

/// Render one identity field of an entity.
///
/// Strings pass through (empty counts as absent); numbers render as decimal
/// with zero treated as unset; null and missing fields are absent. Any other
/// JSON type is an invariant violation.
fn scalar_field(kind: &str, entity: &Entity, field: &str) -> Result<Option<String>, ReconcileError> {
  match entity.get(field) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) if s.is_empty() => Ok(None),
    Some(Value::String(s)) => Ok(Some(s.clone())),
    Some(Value::Number(n)) => {
      if n.as_f64().is_some_and(|v| v == 0.0) {
        Ok(None)
      } else {
        Ok(Some(n.to_string()))
      }
    }
    Some(_) => Err(ReconcileError::IdentityField {
      kind: kind.to_string(),
      field: field.to_string(),
    }),
  }
}

impl MappingSource {
  /// Derive the identity this source addresses, using a kind's identity
  /// fields. Same joining and unset rules as [`entity_identity`].
  pub fn identity(&self, identity_fields: &[String]) -> Option<String> {
    let parts: Vec<String> = identity_fields.iter().filter_map(|f| self.field(f)).collect();
    if parts.is_empty() {
      None
    } else {
      Some(parts.join(IDENTITY_SEPARATOR))
    }
  }

  /// Build a source from an entity's identity fields.
  ///
  /// Only recognized identity sub-fields are carried over; the port is kept
  /// numeric. Fields the entity lacks stay unset.
  pub fn from_entity(entity: &Entity, identity_fields: &[String]) -> Self {
    let mut source = Self::default();
    for field in identity_fields {
      let value = match entity.get(field) {
        Some(v) => v,
        None => continue,
      };
      if field == "port" {
        source.port = value
          .as_u64()
          .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
          .filter(|p| *p != 0);
        continue;
      }
      let text = match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if !n.as_f64().is_some_and(|v| v == 0.0) => Some(n.to_string()),
        _ => None,
      };
      let Some(text) = text else { continue };
      match field.as_str() {
        "name" => source.name = Some(text),
        "alias" => source.alias = Some(text),
        "systemId" => source.system_id = Some(text),
        "key" => source.key = Some(text),
        "resolutionPath" => source.resolution_path = Some(text),
        "thumbprintSha1" => source.thumbprint_sha1 = Some(text),
        "host" => source.host = Some(text),
        _ => {}
      }
    }
    source
  }
}
