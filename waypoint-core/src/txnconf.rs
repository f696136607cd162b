//! Transaction-scoped configuration overrides: global named defaults a
//! directive can override for the lifetime of a single transaction.

use crate::value::Feature;
use std::collections::HashMap;

/// Process-wide defaults, set once at config load (e.g.
/// `proxy.config.http.cache.http` style names borrowed from the original
/// plugin's target, reused here as opaque string keys).
#[derive(Debug, Default)]
pub struct TxnConfDefaults {
    defaults: HashMap<String, Feature>,
}

impl TxnConfDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, name: impl Into<String>, value: Feature) {
        self.defaults.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Feature> {
        self.defaults.get(name).cloned()
    }
}

/// Per-transaction overrides, consulted before falling back to
/// [`TxnConfDefaults`]. Lives on `Context`.
#[derive(Debug, Default)]
pub struct TxnConfOverrides {
    overrides: HashMap<String, Feature>,
}

impl TxnConfOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Feature) {
        self.overrides.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Feature> {
        self.overrides.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_shadows_default_lookup_path() {
        let mut defaults = TxnConfDefaults::new();
        defaults.set_default("timeout", Feature::Integer(30));
        let mut overrides = TxnConfOverrides::new();
        assert!(overrides.get("timeout").is_none());
        overrides.set("timeout", Feature::Integer(5));
        assert!(matches!(overrides.get("timeout"), Some(Feature::Integer(5))));
        assert!(matches!(defaults.get("timeout"), Some(Feature::Integer(30))));
    }
}
