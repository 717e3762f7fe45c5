//! Path parameters extracted while walking the routing tree.
use std::{borrow::Cow, slice};

use crate::core::pool::Recycle;

/// A single `{key, value}` pair captured by a `:name` or `*name` segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: String,
}

/// Ordered list of path parameters, in the order their wildcards appear in
/// the route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<Param>);

impl Params {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Value of the first parameter named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|param| param.key == key)
            .map(|param| param.value.as_str())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Param {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn iter(&self) -> slice::Iter<'_, Param> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Make room for at least `additional` parameters without reallocating
    /// during traversal.
    pub fn reserve(&mut self, additional: usize) {
        self.0.reserve(additional);
    }

    pub fn as_slice(&self) -> &[Param] {
        &self.0
    }

    /// Percent-decode every value in place. Values that do not decode to valid
    /// UTF-8 are left untouched.
    pub fn decode_values(&mut self) {
        for param in &mut self.0 {
            if !param.value.contains('%') {
                continue;
            }
            if let Ok(Cow::Owned(decoded)) = urlencoding::decode(&param.value) {
                param.value = decoded;
            }
        }
    }
}

impl Recycle for Params {
    fn recycle(&mut self) {
        self.0.clear();
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Param;
    type IntoIter = slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_first_match() {
        let mut params = Params::new();
        params.push("dir", "js");
        params.push("filepath", "/inc/framework.js");

        assert_eq!(params.get("dir"), Some("js"));
        assert_eq!(params.get("filepath"), Some("/inc/framework.js"));
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_decode_values() {
        let mut params = Params::new();
        params.push("name", "caf%C3%A9");
        params.push("raw", "a%2Fb");
        params.push("broken", "%FF");
        params.decode_values();

        assert_eq!(params.get("name"), Some("café"));
        assert_eq!(params.get("raw"), Some("a/b"));
        assert_eq!(params.get("broken"), Some("%FF"));
    }
}
