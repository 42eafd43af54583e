//! Filter predicates for range queries.
//!
//! A query takes an ordered list of [`FilterExpr`]; an entity matches when
//! every predicate matches. Entities lacking the filtered field never match.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Entity, Field, ValidationError, Value, ValueType};

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to. Against a list field, matches if any element is equal.
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Field value is one of the values in a list
    In,
}

impl FilterOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Lt => "<",
            FilterOperator::Gte => ">=",
            FilterOperator::Lte => "<=",
            FilterOperator::In => "IN",
        }
    }

    fn compare(&self, actual: &Value, expected: &Value) -> bool {
        match self {
            FilterOperator::Eq => actual == expected,
            FilterOperator::Ne => actual != expected,
            FilterOperator::Gt => actual > expected,
            FilterOperator::Lt => actual < expected,
            FilterOperator::Gte => actual >= expected,
            FilterOperator::Lte => actual <= expected,
            FilterOperator::In => expected
                .as_list()
                .map(|candidates| candidates.contains(actual))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Field to filter on
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against
    pub value: Value,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(field: &Field, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.name().to_string(),
            operator,
            value: value.into(),
        }
    }

    /// Create an equality filter.
    pub fn eq(field: &Field, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a less-than filter.
    pub fn lt(field: &Field, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Lt, value)
    }

    /// Check whether `entity` satisfies this predicate.
    pub fn matches(&self, entity: &Entity) -> bool {
        let Some(actual) = entity.get_by_name(&self.field) else {
            return false;
        };
        match (actual, self.operator) {
            // List fields match element-wise, except when comparing whole lists.
            (Value::List(items), op) if self.value.as_list().is_none() || op == FilterOperator::In => {
                items.iter().any(|item| op.compare(item, &self.value))
            }
            (actual, op) => op.compare(actual, &self.value),
        }
    }

    /// Check the comparison value against the field's declared type.
    ///
    /// List fields accept any value, since scalars compare element-wise.
    /// `In` takes a list whose elements have the field's type.
    pub fn check(&self, field: &Field) -> Result<(), ValidationError> {
        let mismatch = |expected: ValueType, got: &Value| ValidationError::TypeMismatch {
            field: self.field.clone(),
            expected,
            got: got.value_type(),
        };
        if field.value_type() == ValueType::List {
            return Ok(());
        }
        match (self.operator, &self.value) {
            (FilterOperator::In, Value::List(items)) => {
                match items.iter().find(|item| item.value_type() != field.value_type()) {
                    Some(item) => Err(mismatch(field.value_type(), item)),
                    None => Ok(()),
                }
            }
            (FilterOperator::In, other) => Err(mismatch(ValueType::List, other)),
            (_, value) => field.check(value),
        }
    }

    /// Stable key fragment for this predicate: the JSON form of the whole
    /// expression, e.g. `{"field":"active","operator":"eq","value":{"Bool":true}}`.
    ///
    /// Values keep their type tag and strings are escaped, so fragments of
    /// distinct predicates never concatenate to the same text.
    pub fn cache_fragment(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Check a list of predicates against an entity.
pub fn matches_all(filters: &[FilterExpr], entity: &Entity) -> bool {
    filters.iter().all(|f| f.matches(entity))
}
