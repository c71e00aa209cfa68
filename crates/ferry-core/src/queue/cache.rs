//! Result cache: source URL -> destination URL.

use std::collections::HashMap;

/// Successful uploads of one manager instance.
///
/// Owned by the manager state and only touched under its lock.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<String, String>,
    hits: usize,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a destination URL, counting the hit.
    pub fn lookup(&mut self, source_url: &str) -> Option<String> {
        let found = self.entries.get(source_url).cloned();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    pub fn insert(&mut self, source_url: impl Into<String>, result_url: impl Into<String>) {
        self.entries.insert(source_url.into(), result_url.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}
