//! Per-kind field reflection tables.
//!
//! Every entity kind declares one `static` [`Schema`]. Field names are only
//! ever resolved through it, so a misspelled field fails when the [`Field`]
//! handle is built rather than on some later cache read.
//!
//! ```
//! use fleet_core::{FieldDef, FieldDefault, Schema, ValueType};
//!
//! static ALIAS: Schema = Schema::new(
//!     "PackageAlias",
//!     1,
//!     &[
//!         FieldDef::new("munki_pkg_name", ValueType::Str),
//!         FieldDef::new("enabled", ValueType::Bool).with_default(FieldDefault::Bool(true)),
//!     ],
//! );
//!
//! assert!(ALIAS.field("enabled").is_ok());
//! assert!(ALIAS.field("enabld").is_err());
//! ```

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::{Entity, ValidationError, Value, ValueType};

/// Default applied to a field when an entity is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    None,
    Bool(bool),
    Int(i64),
    EmptyStr,
    EmptyList,
}

impl FieldDefault {
    pub fn to_value(self) -> Option<Value> {
        match self {
            FieldDefault::None => None,
            FieldDefault::Bool(b) => Some(Value::Bool(b)),
            FieldDefault::Int(i) => Some(Value::Int(i)),
            FieldDefault::EmptyStr => Some(Value::Str(String::new())),
            FieldDefault::EmptyList => Some(Value::List(Vec::new())),
        }
    }
}

/// Automatic timestamping applied before a durable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    None,
    /// Set once, when the entity is first written.
    OnCreate,
    /// Set on every write.
    OnWrite,
}

/// Declaration of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    name: &'static str,
    value_type: ValueType,
    default: FieldDefault,
    stamp: Stamp,
}

impl FieldDef {
    pub const fn new(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            value_type,
            default: FieldDefault::None,
            stamp: Stamp::None,
        }
    }

    pub const fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = default;
        self
    }

    /// Mark a timestamp field as automatically maintained.
    pub const fn stamped(mut self, stamp: Stamp) -> Self {
        self.stamp = stamp;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn default(&self) -> FieldDefault {
        self.default
    }

    pub fn stamp(&self) -> Stamp {
        self.stamp
    }
}

/// A resolved field handle, only obtainable through [`Schema::field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    kind: &'static str,
    def: &'static FieldDef,
}

impl Field {
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn value_type(&self) -> ValueType {
        self.def.value_type
    }

    /// Check that `value` may be stored in this field.
    pub fn check(&self, value: &Value) -> Result<(), ValidationError> {
        if value.value_type() != self.def.value_type {
            return Err(ValidationError::TypeMismatch {
                field: self.def.name.to_string(),
                expected: self.def.value_type,
                got: value.value_type(),
            });
        }
        Ok(())
    }
}

/// Field reflection table for one entity kind.
#[derive(Debug)]
pub struct Schema {
    kind: &'static str,
    version: u32,
    fields: &'static [FieldDef],
}

impl Schema {
    pub const fn new(kind: &'static str, version: u32, fields: &'static [FieldDef]) -> Self {
        Self {
            kind,
            version,
            fields,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        self.fields
    }

    /// Resolve a field handle by name.
    pub fn field(&self, name: &str) -> Result<Field, ValidationError> {
        self.fields
            .iter()
            .find(|def| def.name == name)
            .map(|def| Field {
                kind: self.kind,
                def,
            })
            .ok_or_else(|| ValidationError::UnknownField {
                kind: self.kind.to_string(),
                field: name.to_string(),
            })
    }

    /// All field handles, in declaration order.
    pub fn all_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.iter().map(move |def| Field {
            kind: self.kind,
            def,
        })
    }

    /// Stable hash of the kind, version and field layout.
    ///
    /// Two schemas with the same fingerprint serialize entities identically.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_bytes());
        hasher.update(self.version.to_be_bytes());
        for def in self.fields {
            hasher.update([0u8]);
            hasher.update(def.name.as_bytes());
            hasher.update([value_type_byte(def.value_type)]);
        }
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(head)
    }

    /// Check that every field present on `entity` is declared and well typed.
    pub fn validate(&self, entity: &Entity) -> Result<(), ValidationError> {
        if entity.kind() != self.kind {
            return Err(ValidationError::KindMismatch {
                field: String::new(),
                expected: self.kind.to_string(),
                got: entity.kind().to_string(),
            });
        }
        for (name, value) in entity.fields() {
            self.field(name)?.check(value)?;
        }
        Ok(())
    }

    /// Apply automatic timestamps before a durable write.
    pub fn stamp(&self, entity: &mut Entity, now: DateTime<Utc>, is_new: bool) {
        for def in self.fields {
            let apply = match def.stamp {
                Stamp::None => false,
                Stamp::OnWrite => true,
                Stamp::OnCreate => is_new || entity.get_by_name(def.name).is_none(),
            };
            if apply {
                entity.insert_raw(def.name, Value::Timestamp(now));
            }
        }
    }
}

fn value_type_byte(value_type: ValueType) -> u8 {
    match value_type {
        ValueType::Str => 0,
        ValueType::Int => 1,
        ValueType::Bool => 2,
        ValueType::Timestamp => 3,
        ValueType::Bytes => 4,
        ValueType::List => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static WIDGET: Schema = Schema::new(
        "Widget",
        1,
        &[
            FieldDef::new("name", ValueType::Str),
            FieldDef::new("enabled", ValueType::Bool).with_default(FieldDefault::Bool(true)),
            FieldDef::new("created", ValueType::Timestamp).stamped(Stamp::OnCreate),
            FieldDef::new("mtime", ValueType::Timestamp).stamped(Stamp::OnWrite),
        ],
    );

    static WIDGET_V2: Schema = Schema::new(
        "Widget",
        2,
        &[
            FieldDef::new("name", ValueType::Str),
            FieldDef::new("enabled", ValueType::Bool).with_default(FieldDefault::Bool(true)),
            FieldDef::new("created", ValueType::Timestamp).stamped(Stamp::OnCreate),
            FieldDef::new("mtime", ValueType::Timestamp).stamped(Stamp::OnWrite),
        ],
    );

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = WIDGET.field("nmae").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownField { .. }));
    }

    #[test]
    fn test_field_check_types() {
        let enabled = WIDGET.field("enabled").unwrap();
        assert!(enabled.check(&Value::Bool(false)).is_ok());
        assert!(enabled.check(&Value::Str("yes".into())).is_err());
    }

    #[test]
    fn test_fingerprint_is_stable_and_versioned() {
        assert_eq!(WIDGET.fingerprint(), WIDGET.fingerprint());
        assert_ne!(WIDGET.fingerprint(), WIDGET_V2.fingerprint());
    }

    #[test]
    fn test_stamp_on_create_only_once() {
        let mut entity = Entity::new(&WIDGET, "w1");
        let first = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let later = DateTime::from_timestamp(1_700_000_500, 0).unwrap();

        WIDGET.stamp(&mut entity, first, true);
        WIDGET.stamp(&mut entity, later, false);

        assert_eq!(
            entity.get_by_name("created"),
            Some(&Value::Timestamp(first))
        );
        assert_eq!(entity.get_by_name("mtime"), Some(&Value::Timestamp(later)));
    }

    #[test]
    fn test_validate_rejects_foreign_fields() {
        let mut entity = Entity::new(&WIDGET, "w1");
        entity.insert_raw("colour", Value::Str("red".into()));
        assert!(WIDGET.validate(&entity).is_err());
    }
}
