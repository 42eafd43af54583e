//! Fleet Core - Entity Types
//!
//! Values, schemas, entities, filters, errors and configuration shared by
//! the storage and model crates. No I/O lives here.

pub mod config;
pub mod entity;
pub mod error;
pub mod filter;
pub mod schema;
pub mod telemetry;
pub mod value;

pub use config::CacheConfig;
pub use entity::{Entity, EntityRef};
pub use error::{
    CacheError, CodecError, ConfigError, FleetError, FleetResult, StoreError, UsageError,
    ValidationError,
};
pub use filter::{matches_all, FilterExpr, FilterOperator};
pub use schema::{Field, FieldDef, FieldDefault, Schema, Stamp};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use value::{Value, ValueType};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
