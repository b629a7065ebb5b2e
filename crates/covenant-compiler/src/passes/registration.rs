//! Registration pass - materialize every declaration of the program.
//!
//! This pass walks every source unit in compile order and records each
//! contract and each of its members in the [`DeclarationRegistry`]. No
//! reference is resolved here; types of state variables are filled in by
//! the resolution pass. Once all declarations exist, the contract names
//! visible in each unit are computed.
//!
//! ## Responsibilities
//!
//! - Register contracts, functions, modifiers and state variables
//! - Reject duplicate contract names program-wide and duplicate member
//!   names within one contract
//! - Build per-unit scopes: own contracts plus everything reachable through
//!   imports

use std::rc::Rc;

use covenant_core::{NodeId, ResolutionError, Result, SourceLocation, Span};
use covenant_parser::ast::{ContractDefinition, ContractMember, FunctionKind, SourceUnit};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::registry::{DeclarationRegistry, VariableKind};
use crate::types::Type;

/// Output of the registration pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationOutput {
    pub contracts_registered: usize,
    pub functions_registered: usize,
    pub modifiers_registered: usize,
    pub variables_registered: usize,
}

/// Pass 1: register all declarations.
pub struct RegistrationPass<'a> {
    registry: &'a mut DeclarationRegistry,
    contract_names: FxHashSet<String>,
    output: RegistrationOutput,
}

impl<'a> RegistrationPass<'a> {
    pub fn new(registry: &'a mut DeclarationRegistry) -> Self {
        Self {
            registry,
            contract_names: FxHashSet::default(),
            output: RegistrationOutput::default(),
        }
    }

    /// Register every declaration of `units`, which must be in compile
    /// order.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self, units: &[Rc<SourceUnit>]) -> Result<RegistrationOutput> {
        for unit in units {
            for contract in unit.contracts() {
                self.register_contract(contract)?;
            }
        }
        self.build_scopes(units);
        Ok(self.output)
    }

    fn register_contract(&mut self, contract: &Rc<ContractDefinition>) -> Result<()> {
        if !self.contract_names.insert(contract.name.name.clone()) {
            return Err(ResolutionError::DuplicateDeclaration {
                name: contract.name.name.clone(),
                location: SourceLocation::new(&contract.source, contract.name.span),
            }
            .into());
        }
        self.registry.add_contract(contract.clone());
        self.output.contracts_registered += 1;

        let mut names: FxHashSet<&str> = FxHashSet::default();
        let mut constructor_seen = false;
        let mut fallback_seen = false;
        for member in &contract.members {
            let (name, span) = match member {
                ContractMember::Function(f) => match f.kind {
                    FunctionKind::Function => (f.name.name.as_str(), f.name.span),
                    FunctionKind::Constructor => {
                        check_unique(&mut constructor_seen, "constructor", contract, f.span)?;
                        ("", f.span)
                    }
                    FunctionKind::Fallback => {
                        check_unique(&mut fallback_seen, "fallback", contract, f.span)?;
                        ("", f.span)
                    }
                },
                ContractMember::Modifier(m) => (m.name.name.as_str(), m.name.span),
                ContractMember::StateVariable(v) => (v.name.name.as_str(), v.name.span),
            };
            if !name.is_empty() && !names.insert(name) {
                return Err(ResolutionError::DuplicateDeclaration {
                    name: name.to_string(),
                    location: SourceLocation::new(&contract.source, span),
                }
                .into());
            }

            match member {
                ContractMember::Function(f) => {
                    self.registry.add_function(f.clone(), contract.id);
                    self.output.functions_registered += 1;
                }
                ContractMember::Modifier(m) => {
                    self.registry.add_modifier(m.clone(), contract.id);
                    self.output.modifiers_registered += 1;
                }
                ContractMember::StateVariable(v) => {
                    self.registry.add_variable(
                        v.clone(),
                        VariableKind::State {
                            contract: contract.id,
                        },
                        Type::Tuple(Vec::new()),
                    );
                    self.output.variables_registered += 1;
                }
            }
        }
        Ok(())
    }

    /// Each unit sees its own contracts and, transitively, those of every
    /// unit it imports. Import cycles are followed once.
    fn build_scopes(&mut self, units: &[Rc<SourceUnit>]) {
        let by_name: FxHashMap<&str, &SourceUnit> =
            units.iter().map(|u| (u.name.as_str(), u.as_ref())).collect();

        for unit in units {
            let mut scope: FxHashMap<String, NodeId> = FxHashMap::default();
            let mut visited: FxHashSet<&str> = FxHashSet::default();
            let mut stack = vec![unit.as_ref()];
            while let Some(current) = stack.pop() {
                if !visited.insert(current.name.as_str()) {
                    continue;
                }
                for contract in current.contracts() {
                    scope.insert(contract.name.name.clone(), contract.id);
                }
                for import in current.imports() {
                    if let Some(imported) = by_name.get(import.path.as_str()) {
                        stack.push(imported);
                    }
                }
            }
            self.registry.set_scope(&unit.name, scope);
        }
    }
}

fn check_unique(
    seen: &mut bool,
    what: &str,
    contract: &ContractDefinition,
    span: Span,
) -> Result<()> {
    if std::mem::replace(seen, true) {
        return Err(ResolutionError::DuplicateDeclaration {
            name: what.to_string(),
            location: SourceLocation::new(&contract.source, span),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::NodeIdGen;
    use covenant_parser::Parser;

    fn units(sources: &[(&str, &str)]) -> Vec<Rc<SourceUnit>> {
        let mut ids = NodeIdGen::new();
        sources
            .iter()
            .map(|(name, text)| Rc::new(Parser::parse(name, text, &mut ids).unwrap()))
            .collect()
    }

    #[test]
    fn registers_members() {
        let units = units(&[(
            "a",
            "contract A { uint x; modifier m { _; } function f() {} constructor() {} }",
        )]);
        let mut registry = DeclarationRegistry::new();
        let output = RegistrationPass::new(&mut registry).run(&units).unwrap();
        assert_eq!(output.contracts_registered, 1);
        assert_eq!(output.functions_registered, 2);
        assert_eq!(output.modifiers_registered, 1);
        assert_eq!(output.variables_registered, 1);
    }

    #[test]
    fn duplicate_member_names_are_rejected() {
        let units = units(&[("a", "contract A { uint f; function f() {} }")]);
        let mut registry = DeclarationRegistry::new();
        let err = RegistrationPass::new(&mut registry).run(&units).unwrap_err();
        assert!(err.is_resolution());
    }

    #[test]
    fn duplicate_constructor_is_rejected() {
        let units = units(&[("a", "contract A { constructor() {} constructor() {} }")]);
        let mut registry = DeclarationRegistry::new();
        assert!(RegistrationPass::new(&mut registry).run(&units).is_err());
    }

    #[test]
    fn scopes_follow_imports_transitively() {
        let units = units(&[
            ("c", "contract C {}"),
            ("b", "import \"c\"; contract B {}"),
            ("a", "import \"b\"; contract A {}"),
        ]);
        let mut registry = DeclarationRegistry::new();
        RegistrationPass::new(&mut registry).run(&units).unwrap();
        assert!(registry.contract_in_scope("a", "C").is_some());
        assert!(registry.contract_in_scope("a", "B").is_some());
        assert!(registry.contract_in_scope("c", "A").is_none());
    }

    #[test]
    fn contract_names_are_unique_across_unrelated_units() {
        let units = units(&[
            ("a", "contract T { function a() public {} }"),
            ("b", "contract T { function b() public {} }"),
        ]);
        let mut registry = DeclarationRegistry::new();
        let err = RegistrationPass::new(&mut registry).run(&units).unwrap_err();
        assert!(err.is_resolution());
        assert_eq!(err.location().unwrap().source, "b");
    }

    #[test]
    fn clashing_contract_names_in_one_scope() {
        let units = units(&[
            ("b", "contract A {}"),
            ("a", "import \"b\"; contract A {}"),
        ]);
        let mut registry = DeclarationRegistry::new();
        let err = RegistrationPass::new(&mut registry).run(&units).unwrap_err();
        assert!(err.is_resolution());
    }
}
