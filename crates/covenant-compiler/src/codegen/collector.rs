//! Run-wide store of generated utility routines.

use std::collections::{BTreeMap, BTreeSet};

use crate::assembly::AssemblyItem;

/// Utility routines generated during one compile run, keyed by name.
///
/// A routine's name fully determines its code, so asking for the same name
/// twice generates it once. Every codegen context of the run shares one
/// collector.
#[derive(Debug, Default)]
pub struct FunctionCollector {
    functions: BTreeMap<String, Vec<AssemblyItem>>,
}

impl FunctionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the routine `name`, generating its body with `generate` if
    /// it does not exist yet. Returns `name`.
    pub fn create_function(
        &mut self,
        name: String,
        generate: impl FnOnce(&str) -> Vec<AssemblyItem>,
    ) -> String {
        if !self.functions.contains_key(&name) {
            let body = generate(&name);
            self.functions.insert(name.clone(), body);
        }
        name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Bodies of the routines `items` jump to, directly or through other
    /// routines, in name order.
    pub fn requested_by<'a>(
        &self,
        items: impl IntoIterator<Item = &'a AssemblyItem>,
    ) -> Vec<AssemblyItem> {
        let mut needed: BTreeSet<&str> = BTreeSet::new();
        let mut work: Vec<&AssemblyItem> = items.into_iter().collect();
        while let Some(item) = work.pop() {
            let AssemblyItem::PushLabel(label) = item else {
                continue;
            };
            if let Some((name, body)) = self.functions.get_key_value(label.as_str()) {
                if needed.insert(name.as_str()) {
                    work.extend(body);
                }
            }
        }
        needed
            .into_iter()
            .flat_map(|name| self.functions[name].iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Instruction;

    #[test]
    fn routines_are_generated_once() {
        let mut collector = FunctionCollector::new();
        let mut calls = 0;
        for _ in 0..2 {
            collector.create_function("f".to_string(), |name| {
                calls += 1;
                vec![AssemblyItem::Label(name.to_string())]
            });
        }
        assert_eq!(calls, 1);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn requested_routines_are_transitive_and_sorted() {
        let mut collector = FunctionCollector::new();
        collector.create_function("b".to_string(), |name| {
            vec![AssemblyItem::Label(name.to_string()), AssemblyItem::PushLabel("c".into())]
        });
        collector.create_function("c".to_string(), |name| {
            vec![AssemblyItem::Label(name.to_string()), AssemblyItem::Op(Instruction::Stop)]
        });
        collector.create_function("unused".to_string(), |name| {
            vec![AssemblyItem::Label(name.to_string())]
        });

        let code = [AssemblyItem::PushLabel("b".into()), AssemblyItem::PushLabel("local".into())];
        let included = collector.requested_by(&code);
        assert_eq!(
            included,
            vec![
                AssemblyItem::Label("b".into()),
                AssemblyItem::PushLabel("c".into()),
                AssemblyItem::Label("c".into()),
                AssemblyItem::Op(Instruction::Stop),
            ]
        );
    }
}
