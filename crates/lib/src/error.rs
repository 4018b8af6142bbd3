//! Error types for the reconciliation engine.

use thiserror::Error;

/// Errors that can occur during bundle reconciliation.
///
/// Codec errors abort the operation with no partial result. An
/// `IdentityField` error means an entity carried a non-scalar value in a
/// registry-declared identity field; reconciliation functions fail fast and
/// leave their inputs untouched rather than returning a partial bundle.
#[derive(Debug, Error)]
pub enum ReconcileError {
  #[error("failed to decode bundle: {0}")]
  Decode(serde_json::Error),

  #[error("failed to encode bundle: {0}")]
  Encode(serde_json::Error),

  #[error("identity field `{field}` of `{kind}` entity is not a scalar value")]
  IdentityField { kind: String, field: String },
}
