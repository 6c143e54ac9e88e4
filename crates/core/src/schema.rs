//! Declarative JSON Schema validation and stable fingerprinting.
//!
//! Every LM-produced structure and every tool input is validated against a
//! JSON Schema fragment; the same schema is rendered into the planner's tool
//! index and fingerprinted so drift between a registered tool and a
//! previously-audited schema can be detected.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while compiling or evaluating a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema document itself is not a valid JSON Schema.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// The instance failed validation; each entry is one violated constraint.
    #[error("schema validation failed: {0:?}")]
    ValidationFailed(Vec<String>),
}

/// A compiled, reusable JSON Schema validator.
pub struct CompiledSchema {
    schema: JSONSchema,
}

impl CompiledSchema {
    /// Compile a schema document against JSON Schema Draft 7.
    pub fn compile(schema: &Value) -> Result<Self, SchemaError> {
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        Ok(Self { schema })
    }

    /// Validate `instance` against the compiled schema, collecting every
    /// violation rather than stopping at the first (mirrors the Criteria
    /// Evaluator's "collect, don't short-circuit" philosophy).
    pub fn validate(&self, instance: &Value) -> Result<(), SchemaError> {
        match self.schema.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => {
                Err(SchemaError::ValidationFailed(errors.map(|e| e.to_string()).collect()))
            }
        }
    }
}

/// Canonical JSON serialization used for fingerprinting: `serde_json`
/// serializes object keys in sorted (`BTreeMap`) order by default whenever
/// the `preserve_order` feature is not enabled, which this workspace never
/// enables, so `to_vec` already produces a stable, key-sorted encoding.
fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// Stable input-schema fingerprint: SHA-256 of the canonical key-sorted JSON,
/// truncated to a 16-hex-character prefix.
pub fn fingerprint(schema: &Value) -> String {
    let bytes = canonical_bytes(schema);
    let digest = Sha256::digest(&bytes);
    let hex = hex::encode(digest);
    hex[..16].to_string()
}
