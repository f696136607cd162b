//! Text-block engine: named string constants, definable either at config
//! load or at runtime via the `text-block-define` directive on
//! `POST_LOAD`. Backed by `dashmap` (like the extractor/modifier/comparison
//! registries) so a `POST_LOAD` define can run without needing a mutable
//! borrow of the whole `Shared` bundle.

use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct TextBlockStore {
    blocks: DashMap<String, Arc<str>>,
}

impl TextBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, name: impl Into<String>, content: impl Into<Arc<str>>) {
        self.blocks.insert(name.into(), content.into());
    }

    pub fn get(&self, name: &str) -> Option<Arc<str>> {
        self.blocks.get(name).map(|e| Arc::clone(&e))
    }

    pub fn names(&self) -> Vec<String> {
        self.blocks.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_get_round_trips() {
        let store = TextBlockStore::new();
        store.define("banner", "hello world");
        assert_eq!(store.get("banner").as_deref(), Some("hello world"));
        assert!(store.get("missing").is_none());
    }
}
