//! # Root Configuration Tuple

use alloc::collections::BTreeMap;
use alloc::string::String;

/// A value stored under a tuple key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    String(String),
    Tuple(Tuple),
}

/// Symbol-keyed configuration tree, as parsed from the boot filesystem.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tuple {
    entries: BTreeMap<String, Value>,
}

impl Tuple {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Builder-style insert of a string value.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, Value::String(value.into()));
        self
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.entries.insert(key.into(), value);
    }

    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Presence test; flag-style keys such as `noaslr` carry no value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.lookup(key)? {
            Value::String(s) => Some(s),
            Value::Tuple(_) => None,
        }
    }

    #[must_use]
    pub fn get_tuple(&self, key: &str) -> Option<&Tuple> {
        match self.lookup(key)? {
            Value::Tuple(t) => Some(t),
            Value::String(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_distinguish_value_kinds() {
        let mut root = Tuple::new().with("kernel", "kernel.img").with("noaslr", "");
        root.set("children", Value::Tuple(Tuple::new().with("etc", "")));

        assert_eq!(root.get_str("kernel"), Some("kernel.img"));
        assert!(root.contains("noaslr"));
        assert!(!root.contains("fault"));
        assert!(root.get_str("children").is_none());
        assert!(root.get_tuple("children").is_some_and(|t| t.contains("etc")));
    }
}
