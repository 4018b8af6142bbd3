//! Entity-type registry: identity rules as data, not code.
//!
//! Every entity kind declares which fields form its identity, an optional
//! secondary global-id field used only for deduplication, and a cardinality
//! policy. The merge/delta/dedup logic consults this table and nothing else,
//! so supporting a new entity kind is a data-only addition.
//!
//! The registry is serializable: deployments can ship their own table as
//! configuration and deserialize it instead of using [`EntityRegistry::builtin`].

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Cardinality policy of an entity kind.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
  /// A keyed collection: entities match and merge by identity.
  #[default]
  Many,
  /// At most one logical instance, modeling a single global setting.
  /// Merge adopts the whole incoming list only when the existing one is empty.
  Singleton,
}

impl Cardinality {
  fn is_many(&self) -> bool {
    matches!(self, Cardinality::Many)
  }
}

/// Identity rules for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSpec {
  /// Fields whose ordered, pipe-joined values form the entity identity.
  pub identity_fields: Vec<String>,

  /// Optional global-id field, a secondary duplicate-detection signal.
  /// Never used for merge matching.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub secondary_id_field: Option<String>,

  #[serde(default, skip_serializing_if = "Cardinality::is_many")]
  pub cardinality: Cardinality,
}

impl KindSpec {
  pub fn new<I, S>(identity_fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      identity_fields: identity_fields.into_iter().map(Into::into).collect(),
      secondary_id_field: None,
      cardinality: Cardinality::Many,
    }
  }

  pub fn secondary_id(mut self, field: impl Into<String>) -> Self {
    self.secondary_id_field = Some(field.into());
    self
  }

  pub fn singleton(mut self) -> Self {
    self.cardinality = Cardinality::Singleton;
    self
  }
}

/// Spec applied to kinds the registry does not know about.
static FALLBACK_SPEC: LazyLock<KindSpec> = LazyLock::new(|| KindSpec::new(["name"]));

/// The entity-kind table driving identity resolution.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRegistry {
  kinds: BTreeMap<String, KindSpec>,
}

impl EntityRegistry {
  /// An empty registry; every kind resolves to the `name` fallback.
  pub fn new() -> Self {
    Self::default()
  }

  /// The default identity-field table.
  pub fn builtin() -> Self {
    let mut registry = Self::new();
    for kind in ["services", "policies", "policyFragments", "folders"] {
      registry.register(kind, KindSpec::new(["name"]).secondary_id("goid"));
    }
    registry.register("httpConfigurations", KindSpec::new(["host", "port"]).secondary_id("goid"));
    registry.register("keys", KindSpec::new(["alias"]).secondary_id("goid"));
    registry.register("trustedCertificates", KindSpec::new(["thumbprintSha1"]).secondary_id("goid"));
    registry.register("schemas", KindSpec::new(["systemId"]).secondary_id("goid"));
    registry.register("dtds", KindSpec::new(["systemId"]).secondary_id("goid"));
    registry.register("clusterProperties", KindSpec::new(["key"]).secondary_id("goid"));
    registry.register("passwordPolicies", KindSpec::new(["name"]).singleton());
    registry.register("serviceResolutionConfigs", KindSpec::new(["name"]).singleton());
    registry
  }

  /// Add or replace a kind's spec.
  pub fn register(&mut self, kind: impl Into<String>, spec: KindSpec) {
    self.kinds.insert(kind.into(), spec);
  }

  /// The spec for a kind, falling back to `name` identity for unknown kinds.
  pub fn spec(&self, kind: &str) -> &KindSpec {
    self.kinds.get(kind).unwrap_or(&FALLBACK_SPEC)
  }

  pub fn identity_fields(&self, kind: &str) -> &[String] {
    &self.spec(kind).identity_fields
  }

  pub fn secondary_id_field(&self, kind: &str) -> Option<&str> {
    self.spec(kind).secondary_id_field.as_deref()
  }

  pub fn cardinality(&self, kind: &str) -> Cardinality {
    self.spec(kind).cardinality
  }
}
