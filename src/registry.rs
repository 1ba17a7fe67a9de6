// registry.rs — append-only, deduplicating name → index table.
//
// Kernel names and argument names are both interned through a `Registry`.
// Indices are dense and assigned in first-seen order, so they double as
// positions in the parallel vectors the staging model keeps (declarations,
// sizes, device handles).

use std::collections::HashMap;

/// Deduplicating string table.
///
/// `insert` of an already-known name returns the original index and
/// `newly_inserted == false`; nothing is ever removed or reordered.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning `(index, newly_inserted)`.
    pub fn insert(&mut self, name: &str) -> (usize, bool) {
        if let Some(&index) = self.lookup.get(name) {
            return (index, false);
        }
        let index = self.names.len();
        self.names.push(name.to_owned());
        self.lookup.insert(name.to_owned(), index);
        (index, true)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
