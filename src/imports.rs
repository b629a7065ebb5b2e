//! Compile order from import directives.

use rustc_hash::FxHashSet;

use covenant_core::{CompilerError, Result, SourceLocation};
use covenant_parser::ast::SourceUnit;

use crate::source::SourceRegistry;

/// Order the parsed units so that every unit follows everything it imports.
///
/// Traversal starts from each non-library unit in name order. A unit is
/// marked before its imports are visited, so an import cycle is cut at its
/// back edge and every reachable unit appears once. Library units appear only
/// when something reaches them.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn resolve_imports(sources: &SourceRegistry) -> Result<Vec<String>> {
    let mut resolver = ImportResolver {
        sources,
        seen: FxHashSet::default(),
        order: Vec::with_capacity(sources.len()),
    };
    for (name, source) in sources {
        if !source.is_library() {
            resolver.visit(name)?;
        }
    }
    Ok(resolver.order)
}

struct ImportResolver<'a> {
    sources: &'a SourceRegistry,
    seen: FxHashSet<&'a str>,
    order: Vec<String>,
}

impl<'a> ImportResolver<'a> {
    fn visit(&mut self, name: &'a str) -> Result<()> {
        if !self.seen.insert(name) {
            return Ok(());
        }
        let unit: &'a SourceUnit = self.sources.ast(name)?;
        for import in unit.imports() {
            let Some(target) = self.sources.key(&import.path) else {
                return Err(CompilerError::UnresolvedImport {
                    path: import.path.clone(),
                    location: SourceLocation::new(name, import.span),
                });
            };
            self.visit(target)?;
        }
        self.order.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::NodeIdGen;
    use covenant_parser::Parser;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::rc::Rc;

    fn parsed(units: &[(&str, &str, bool)]) -> SourceRegistry {
        let mut sources = SourceRegistry::new();
        for (name, text, is_library) in units {
            sources.add(*name, *text, *is_library);
        }
        let mut ids = NodeIdGen::new();
        for (name, source) in sources.iter_mut() {
            let unit = Parser::parse(name, source.text(), &mut ids).unwrap();
            source.ast = Some(Rc::new(unit));
        }
        sources
    }

    #[test]
    fn imports_come_first() {
        let sources = parsed(&[
            ("a", "import \"c\"; contract A {}", false),
            ("b", "import \"a\"; contract B {}", false),
            ("c", "contract C {}", false),
        ]);
        assert_eq!(resolve_imports(&sources).unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn libraries_only_when_imported() {
        let sources = parsed(&[
            ("lib", "contract L {}", true),
            ("unused", "contract U {}", true),
            ("main", "import \"lib\"; contract M is L {}", false),
        ]);
        assert_eq!(resolve_imports(&sources).unwrap(), vec!["lib", "main"]);
    }

    #[test]
    fn cycles_visit_each_unit_once() {
        let sources = parsed(&[
            ("a", "import \"b\"; contract A {}", false),
            ("b", "import \"a\"; contract B {}", false),
        ]);
        assert_eq!(resolve_imports(&sources).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn missing_import_is_located() {
        let text = "contract A {}\nimport \"missing\";";
        let sources = parsed(&[("a", text, false)]);
        let err = resolve_imports(&sources).unwrap_err();
        assert!(err.is_unresolved_import());
        let location = err.location().unwrap();
        assert_eq!(location.source, "a");
        assert_eq!(location.span.start, 14);
        assert_eq!(location.span.end as usize, text.len());
    }

    fn import_matrix() -> impl Strategy<Value = Vec<Vec<bool>>> {
        prop::collection::vec(prop::collection::vec(any::<bool>(), 0..8), 1..8)
    }

    proptest! {
        #[test]
        fn acyclic_imports_are_ordered(edges in import_matrix()) {
            // Unit i may import any unit j < i.
            let texts: Vec<String> = edges
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    row.iter()
                        .take(i)
                        .enumerate()
                        .filter(|(_, imported)| **imported)
                        .map(|(j, _)| format!("import \"u{j}\";"))
                        .collect::<String>()
                })
                .collect();
            let names: Vec<String> = (0..texts.len()).map(|i| format!("u{i}")).collect();
            let units: Vec<(&str, &str, bool)> = names
                .iter()
                .zip(&texts)
                .map(|(name, text)| (name.as_str(), text.as_str(), false))
                .collect();
            let sources = parsed(&units);
            let order = resolve_imports(&sources).unwrap();

            prop_assert_eq!(order.len(), names.len());
            let position = |name: &str| order.iter().position(|n| n == name).unwrap();
            for (i, row) in edges.iter().enumerate() {
                for (j, imported) in row.iter().take(i).enumerate() {
                    if *imported {
                        prop_assert!(position(&names[j]) < position(&names[i]));
                    }
                }
            }
        }
    }
}
