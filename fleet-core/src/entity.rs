//! Keyed entity records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Field, Schema, ValidationError, Value};

/// A keyed record of one kind.
///
/// Every durable write replaces the full record; there are no partial
/// updates at the store level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    kind: String,
    key_name: String,
    fields: BTreeMap<String, Value>,
}

impl Entity {
    /// Construct an entity with the schema's field defaults applied.
    pub fn new(schema: &Schema, key_name: impl Into<String>) -> Self {
        let fields = schema
            .fields()
            .iter()
            .filter_map(|def| {
                def.default()
                    .to_value()
                    .map(|value| (def.name().to_string(), value))
            })
            .collect();
        Self {
            kind: schema.kind().to_string(),
            key_name: key_name.into(),
            fields,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Reference to this entity, usable as a field value on other entities.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind.clone(), self.key_name.clone())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn get(&self, field: &Field) -> Option<&Value> {
        if field.kind() != self.kind {
            return None;
        }
        self.fields.get(field.name())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field, rejecting fields of another kind and mistyped values.
    pub fn set(&mut self, field: &Field, value: Value) -> Result<(), ValidationError> {
        if field.kind() != self.kind {
            return Err(ValidationError::KindMismatch {
                field: field.name().to_string(),
                expected: field.kind().to_string(),
                got: self.kind.clone(),
            });
        }
        field.check(&value)?;
        self.fields.insert(field.name().to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, field: &Field) -> Option<Value> {
        if field.kind() != self.kind {
            return None;
        }
        self.fields.remove(field.name())
    }

    pub(crate) fn insert_raw(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    // Typed accessors used by the model layer.

    pub fn str_field(&self, field: &Field) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn bool_field(&self, field: &Field) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    pub fn int_field(&self, field: &Field) -> Option<i64> {
        self.get(field).and_then(Value::as_int)
    }
}

/// Reference to another entity by kind and key name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    kind: String,
    key_name: String,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key_name: key_name.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Parse the `Kind:key_name` form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, key_name) = s.split_once(':')?;
        if kind.is_empty() || key_name.is_empty() {
            return None;
        }
        Some(Self::new(kind, key_name))
    }

    pub fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDef, FieldDefault, ValueType};

    static GADGET: Schema = Schema::new(
        "Gadget",
        1,
        &[
            FieldDef::new("label", ValueType::Str),
            FieldDef::new("count", ValueType::Int).with_default(FieldDefault::Int(0)),
            FieldDef::new("parts", ValueType::List).with_default(FieldDefault::EmptyList),
        ],
    );

    static OTHER: Schema = Schema::new("Other", 1, &[FieldDef::new("label", ValueType::Str)]);

    #[test]
    fn test_new_applies_defaults() {
        let gadget = Entity::new(&GADGET, "g1");
        assert_eq!(gadget.kind(), "Gadget");
        assert_eq!(gadget.key_name(), "g1");
        assert_eq!(gadget.get_by_name("count"), Some(&Value::Int(0)));
        assert_eq!(gadget.get_by_name("parts"), Some(&Value::List(vec![])));
        assert_eq!(gadget.get_by_name("label"), None);
    }

    #[test]
    fn test_set_checks_kind_and_type() {
        let mut gadget = Entity::new(&GADGET, "g1");
        let label = GADGET.field("label").unwrap();
        let other_label = OTHER.field("label").unwrap();

        assert!(gadget.set(&label, Value::from("hello")).is_ok());
        assert_eq!(gadget.str_field(&label), Some("hello"));

        assert!(matches!(
            gadget.set(&label, Value::Int(1)),
            Err(ValidationError::TypeMismatch { .. })
        ));
        assert!(matches!(
            gadget.set(&other_label, Value::from("x")),
            Err(ValidationError::KindMismatch { .. })
        ));
        assert_eq!(gadget.get(&other_label), None);
    }

    #[test]
    fn test_entity_ref_display_and_parse() {
        let gadget = Entity::new(&GADGET, "g1");
        let r = gadget.entity_ref();
        assert_eq!(r.to_string(), "Gadget:g1");
        assert_eq!(EntityRef::parse("Gadget:g1"), Some(r));
        assert_eq!(EntityRef::parse("nocolon"), None);
        assert_eq!(EntityRef::parse(":g1"), None);
    }
}
