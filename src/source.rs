//! Registered source units.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::rc::Rc;

use covenant_core::{Result, StateError};
use covenant_parser::ast::SourceUnit;

/// One named unit of source text.
#[derive(Debug, Clone)]
pub struct Source {
    text: String,
    is_library: bool,
    /// Set by a successful parse, cleared by any registry mutation.
    pub(crate) ast: Option<Rc<SourceUnit>>,
}

impl Source {
    pub fn new(text: impl Into<String>, is_library: bool) -> Self {
        Self {
            text: text.into(),
            is_library,
            ast: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Libraries are compiled only when another unit imports them.
    pub fn is_library(&self) -> bool {
        self.is_library
    }

    pub fn ast(&self) -> Option<&Rc<SourceUnit>> {
        self.ast.as_ref()
    }
}

/// Source units by name, iterated in name order.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace `name`. Returns whether it replaced an entry.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        text: impl Into<String>,
        is_library: bool,
    ) -> bool {
        self.sources
            .insert(name.into(), Source::new(text, is_library))
            .is_some()
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Drop every parsed tree, keeping the text.
    pub fn clear_derived(&mut self) {
        for source in self.sources.values_mut() {
            source.ast = None;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// The registry's own copy of `name`, if registered.
    pub fn key(&self, name: &str) -> Option<&str> {
        self.sources.get_key_value(name).map(|(key, _)| key.as_str())
    }

    pub fn get(&self, name: &str) -> Result<&Source> {
        self.sources
            .get(name)
            .ok_or_else(|| StateError::SourceNotFound(name.to_string()).into())
    }

    /// Parsed tree of `name`.
    pub fn ast(&self, name: &str) -> Result<&Rc<SourceUnit>> {
        self.get(name)?.ast().ok_or_else(|| StateError::NotParsed.into())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Source> {
        self.sources.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, Source> {
        self.sources.iter_mut()
    }
}

impl<'a> IntoIterator for &'a SourceRegistry {
    type Item = (&'a String, &'a Source);
    type IntoIter = btree_map::Iter<'a, String, Source>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reports_replacement() {
        let mut sources = SourceRegistry::new();
        assert!(!sources.add("a", "contract A {}", false));
        assert!(sources.add("a", "contract B {}", false));
        assert_eq!(sources.len(), 1);
        assert_eq!(sources.get("a").unwrap().text(), "contract B {}");
    }

    #[test]
    fn names_are_sorted() {
        let mut sources = SourceRegistry::new();
        sources.add("b", "", false);
        sources.add("a", "", true);
        sources.add("", "", false);
        assert_eq!(sources.names().collect::<Vec<_>>(), vec!["", "a", "b"]);
    }

    #[test]
    fn unknown_and_unparsed_sources() {
        let mut sources = SourceRegistry::new();
        sources.add("a", "", false);
        let err = sources.get("b").unwrap_err();
        assert!(err.is_state());
        assert!(matches!(
            sources.ast("a").unwrap_err(),
            covenant_core::CompilerError::State(StateError::NotParsed)
        ));
    }
}
