//! Error types for the versioning engine
//!
//! Two layers of errors:
//! - [`MigrationError`] - what individual migration functions return
//! - [`RollverError`] - everything the engine surfaces to callers

use serde_json::Value;

/// Errors returned by migration functions.
///
/// A migration receives exactly one decoded node and must fail explicitly
/// when the node does not have the shape it expects. The engine never
/// coerces shapes on a migration's behalf.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The decoded node did not have the shape the migration expects
    #[error("unexpected shape: expected {expected}, found {found}")]
    UnexpectedShape {
        /// Shape the migration was written against
        expected: &'static str,
        /// Shape actually present in the decoded tree
        found: &'static str,
    },

    /// A field the migration relies on is absent
    #[error("missing field: {0}")]
    MissingField(String),

    /// The bound context was cancelled or its deadline passed
    #[error("migration cancelled")]
    Cancelled,

    /// Migration-specific failure
    #[error("{0}")]
    Other(String),
}

impl MigrationError {
    /// Create a shape error from the offending value
    pub fn unexpected_shape(expected: &'static str, found: &Value) -> Self {
        Self::UnexpectedShape {
            expected,
            found: value_kind(found),
        }
    }

    /// Create a missing-field error
    pub fn missing_field(name: impl Into<String>) -> Self {
        Self::MissingField(name.into())
    }

    /// Create a migration-specific error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Errors surfaced by the versioning engine.
#[derive(Debug, thiserror::Error)]
pub enum RollverError {
    /// A version string could not be parsed in the configured format
    #[error("invalid version: '{0}'")]
    InvalidVersion(String),

    /// Registration attempted for a built-in primitive or an anonymous
    /// composite type; only user-declared named types carry migrations
    #[error("unsupported type for migration: {name}")]
    UnsupportedType {
        /// Rust path of the rejected type
        name: &'static str,
    },

    /// A type's declared shape never resolves to a concrete underlying
    /// shape (a newtype chain that loops back onto itself)
    #[error("unresolvable type shape: {name}")]
    UnresolvableShape {
        /// Rust path of the offending type
        name: &'static str,
    },

    /// A migration function failed; surfaced verbatim, the traversal is
    /// aborted and the caller's input is left untouched
    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    /// Encoding or decoding the payload failed
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type RollverResult<T> = Result<T, RollverError>;

/// Human-readable kind of a decoded tree node, for shape errors.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
