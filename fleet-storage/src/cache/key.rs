//! Cache key namespaces.
//!
//! Every cache entry lives under exactly one namespace. `CacheKey` has no
//! public constructor other than the per-namespace functions below, so an
//! entity-level key can never be confused with a field-level or filter key.

use std::fmt;

use fleet_core::{Field, FilterExpr};

/// Namespace a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScope {
    /// Whole serialized entity.
    Entity,
    /// Single field value of one entity.
    Field,
    /// Result list of a filtered fetch.
    Query,
    /// Derived aggregate owned by a model helper.
    Derived,
}

impl KeyScope {
    fn prefix(self) -> &'static str {
        match self {
            KeyScope::Entity => "ent",
            KeyScope::Field => "fld",
            KeyScope::Query => "qry",
            KeyScope::Derived => "drv",
        }
    }
}

/// A cache key scoped to one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    scope: KeyScope,
    encoded: String,
}

impl CacheKey {
    fn scoped(scope: KeyScope, rest: String) -> Self {
        Self {
            inner: CacheKeyInner {
                scope,
                encoded: format!("{}_{}", scope.prefix(), rest),
            },
        }
    }

    /// Key of a whole entity: `ent_{kind}_{key_name}`.
    pub fn entity(kind: &str, key_name: &str) -> Self {
        Self::scoped(KeyScope::Entity, format!("{kind}_{key_name}"))
    }

    /// Key of one field: `fld_{kind}_{key_name}_{field}`.
    pub fn field(field: &Field, key_name: &str) -> Self {
        Self::scoped(
            KeyScope::Field,
            format!("{}_{}_{}", field.kind(), key_name, field.name()),
        )
    }

    /// Key of a filtered fetch: `qry_{kind}{fragment...}#{limit}`, one JSON
    /// fragment per filter.
    ///
    /// Filter order is significant; callers that build the same filter list
    /// share the entry.
    pub fn query(kind: &str, filters: &[FilterExpr], limit: usize) -> Self {
        let fragments: String = filters.iter().map(FilterExpr::cache_fragment).collect();
        Self::scoped(KeyScope::Query, format!("{kind}{fragments}#{limit}"))
    }

    /// Key of a derived aggregate: `drv_{name}`.
    pub fn derived(name: &str) -> Self {
        Self::scoped(KeyScope::Derived, name.to_string())
    }

    pub fn scope(&self) -> KeyScope {
        self.inner.scope
    }

    pub fn as_str(&self) -> &str {
        &self.inner.encoded
    }

    /// Bytes handed to the cache backend.
    pub fn encode(&self) -> &[u8] {
        self.inner.encoded.as_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.encoded)
    }
}
