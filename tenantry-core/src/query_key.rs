//! Opaque client-side cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a cached view in the client-side result cache.
///
/// A key is an ordered list of string segments, e.g. `["employees"]` for the
/// employee list or `["employee", "<id>"]` for a single employee. Keys are
/// compared segment-wise; a key is a prefix of another when its segments
/// lead the other's.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Build a key from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Single-segment key, the form used for list views.
    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Extend the key with one more segment.
    pub fn with(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns true if `self` addresses `other` or one of its descendants.
    pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

impl From<&str> for QueryKey {
    fn from(name: &str) -> Self {
        Self::root(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prefix_matching() {
        let list = QueryKey::root("employees");
        let nested = QueryKey::new(["employees", "active"]);
        let other = QueryKey::root("employee");

        assert!(list.is_prefix_of(&list));
        assert!(list.is_prefix_of(&nested));
        assert!(!nested.is_prefix_of(&list));
        assert!(!other.is_prefix_of(&list));
    }

    #[test]
    fn test_with_appends_segment() {
        let key = QueryKey::root("employee").with("42");
        assert_eq!(key.segments(), ["employee", "42"]);
        assert_eq!(key.to_string(), "[employee, 42]");
    }

    proptest! {
        #[test]
        fn prop_extended_key_keeps_prefix(
            segments in prop::collection::vec("[a-z-]{1,10}", 1..4),
            extra in prop::collection::vec("[a-z0-9]{1,6}", 0..3),
        ) {
            let base = QueryKey::new(segments.clone());
            let extended = extra.iter().fold(base.clone(), |key, s| key.with(s.as_str()));

            prop_assert!(base.is_prefix_of(&extended));
            prop_assert_eq!(extended.is_prefix_of(&base), extra.is_empty());
        }
    }
}
