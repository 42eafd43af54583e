//! Result of a cached read.

/// Outcome of [`EntityCache::get`](crate::EntityCache::get) and
/// [`EntityCache::get_field`](crate::EntityCache::get_field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The entity (or field value) exists.
    Found(T),
    /// No entity with that key exists in the store.
    NotFound,
    /// The entity exists but does not carry the requested field.
    MissingField,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound | Lookup::MissingField => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn as_ref(&self) -> Lookup<&T> {
        match self {
            Lookup::Found(value) => Lookup::Found(value),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::MissingField => Lookup::MissingField,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::MissingField => Lookup::MissingField,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Lookup::NotFound, Lookup::Found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_accessors() {
        assert_eq!(Lookup::Found(3).found(), Some(3));
        assert_eq!(Lookup::<i32>::MissingField.found(), None);
        assert!(!Lookup::<i32>::NotFound.is_found());
        assert_eq!(Lookup::Found(2).map(|v| v * 2), Lookup::Found(4));
        assert_eq!(Lookup::from(None::<i32>), Lookup::NotFound);
    }
}
