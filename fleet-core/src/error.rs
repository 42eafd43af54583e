//! Error types for fleet cache operations

use crate::ValueType;
use thiserror::Error;

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Write failed for {kind} '{key_name}': {reason}")]
    WriteFailed {
        kind: String,
        key_name: String,
        reason: String,
    },

    #[error("Delete failed for {kind} '{key_name}': {reason}")]
    DeleteFailed {
        kind: String,
        key_name: String,
        reason: String,
    },

    #[error("Query failed on {kind}: {reason}")]
    QueryFailed { kind: String, reason: String },

    #[error("Invalid cursor for {kind}: {cursor}")]
    InvalidCursor { kind: String, cursor: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Cache client errors.
///
/// The entity cache never propagates these; they are logged and the
/// operation continues against the durable store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache payload of {size} bytes exceeds limit of {limit} bytes")]
    Oversized { size: usize, limit: usize },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Serialization adapter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Corrupt cache payload: {reason}")]
    Corrupt { reason: String },

    #[error("Failed to encode {kind}: {reason}")]
    Encode { kind: String, reason: String },
}

/// Schema validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown field '{field}' on {kind}")]
    UnknownField { kind: String, field: String },

    #[error("Field '{field}' belongs to {expected}, not {got}")]
    KindMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("Type mismatch on field '{field}': expected {expected:?}, got {got:?}")]
    TypeMismatch {
        field: String,
        expected: ValueType,
        got: ValueType,
    },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Invalid call shapes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("Key name must not be empty for {kind}")]
    EmptyKeyName { kind: String },

    #[error("Entity of kind {got} passed to the {expected} cache")]
    KindMismatch { expected: String, got: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all fleet cache errors.
#[derive(Debug, Clone, Error)]
pub enum FleetError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for fleet cache operations.
pub type FleetResult<T> = Result<T, FleetError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_write_failed() {
        let err = StoreError::WriteFailed {
            kind: "Computer".to_string(),
            key_name: "abc".to_string(),
            reason: "backend down".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Write failed"));
        assert!(msg.contains("Computer"));
        assert!(msg.contains("backend down"));
    }

    #[test]
    fn test_cache_error_display_oversized() {
        let err = CacheError::Oversized {
            size: 2048,
            limit: 1024,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn test_validation_error_display_type_mismatch() {
        let err = ValidationError::TypeMismatch {
            field: "active".to_string(),
            expected: ValueType::Bool,
            got: ValueType::Str,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("active"));
        assert!(msg.contains("Bool"));
        assert!(msg.contains("Str"));
    }

    #[test]
    fn test_usage_error_display_empty_key() {
        let err = UsageError::EmptyKeyName {
            kind: "Tag".to_string(),
        };
        assert!(format!("{}", err).contains("Tag"));
    }

    #[test]
    fn test_fleet_error_from_variants() {
        let store = FleetError::from(StoreError::LockPoisoned);
        assert!(matches!(store, FleetError::Store(_)));

        let cache = FleetError::from(CacheError::LockPoisoned);
        assert!(matches!(cache, FleetError::Cache(_)));

        let codec = FleetError::from(CodecError::Corrupt {
            reason: "bad magic".to_string(),
        });
        assert!(matches!(codec, FleetError::Codec(_)));

        let usage = FleetError::from(UsageError::EmptyKeyName {
            kind: "Tag".to_string(),
        });
        assert!(matches!(usage, FleetError::Usage(_)));

        let config = FleetError::from(ConfigError::MissingRequired {
            field: "entry_ttl".to_string(),
        });
        assert!(matches!(config, FleetError::Config(_)));
    }
}
