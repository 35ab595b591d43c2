use std::fmt;

use serde::Deserialize;

/// How an object is identified inside its cache.
///
/// This is what callers pass in for lookups, and what cached objects report about
/// themselves. It is turned into a normalized [`ObjectKey`] by the cache's [`KeyPolicy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Identity<'a> {
    /// The object is addressed by its name.
    Name(&'a str),
    /// The object is addressed by a numeric id, like a PostgreSQL `oid`.
    Id(u64),
}

impl<'a> From<&'a str> for Identity<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl<'a> From<&'a String> for Identity<'a> {
    fn from(name: &'a String) -> Self {
        Self::Name(name)
    }
}

impl From<u64> for Identity<'_> {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for Identity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "#{id}"),
        }
    }
}

/// A normalized lookup key.
///
/// Two objects with equal keys are considered the same object, a cache never holds
/// two entries with the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKey {
    /// A normalized name.
    Name(Box<str>),
    /// A numeric id.
    Id(u64),
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "#{id}"),
        }
    }
}

/// The case sensitivity policy applied to names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Names are compared exactly as given.
    #[default]
    Exact,
    /// Names are folded to lower case, the way unquoted PostgreSQL identifiers are.
    Lowercase,
    /// Names are folded to upper case.
    Uppercase,
}

impl KeyPolicy {
    /// Normalizes an [`Identity`] into an [`ObjectKey`].
    pub fn key(self, identity: Identity<'_>) -> ObjectKey {
        match identity {
            Identity::Id(id) => ObjectKey::Id(id),
            Identity::Name(name) => ObjectKey::Name(match self {
                Self::Exact => name.into(),
                Self::Lowercase => name.to_lowercase().into(),
                Self::Uppercase => name.to_uppercase().into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_keys() {
        let policy = KeyPolicy::Exact;
        assert_ne!(
            policy.key(Identity::Name("Public")),
            policy.key(Identity::Name("public"))
        );
        assert_eq!(policy.key("public".into()), ObjectKey::Name("public".into()));
    }

    #[test]
    fn test_folded_keys() {
        assert_eq!(
            KeyPolicy::Lowercase.key("Work_Mem".into()),
            KeyPolicy::Lowercase.key("work_mem".into()),
        );
        assert_eq!(
            KeyPolicy::Uppercase.key("dual".into()),
            ObjectKey::Name("DUAL".into())
        );
    }

    #[test]
    fn test_ids_are_not_names() {
        let policy = KeyPolicy::Lowercase;
        assert_eq!(policy.key(Identity::Id(16384)), ObjectKey::Id(16384));
        assert_ne!(policy.key(Identity::Id(1)), policy.key(Identity::Name("#1")));
        assert_eq!(ObjectKey::Id(1).to_string(), "#1");
    }
}
