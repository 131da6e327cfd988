//! Published set of directors.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::director::BackendDirector;

/// Immutable snapshot of the active directors, swapped as a whole on load.
#[derive(Debug, Default)]
pub struct DirectorTable {
    generation: u64,
    directors: BTreeMap<String, Arc<BackendDirector>>,
}

impl DirectorTable {
    pub(crate) fn new(generation: u64, directors: Vec<Arc<BackendDirector>>) -> Self {
        let directors = directors
            .into_iter()
            .map(|director| (director.config().name.clone(), director))
            .collect();
        Self { generation, directors }
    }

    /// Number of loads that preceded this table.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<&Arc<BackendDirector>> {
        self.directors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.directors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BackendDirector>> {
        self.directors.values()
    }

    pub fn len(&self) -> usize {
        self.directors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directors.is_empty()
    }
}
