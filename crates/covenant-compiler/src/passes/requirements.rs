//! Requirements pass - rules that need the fully resolved program.
//!
//! After every contract has been resolved this pass sweeps the program once
//! more and checks:
//!
//! - overrides keep the signature of the overridden function
//! - `msg.value` is only read by payable entry points
//! - private members are only used by their own contract
//! - public signatures only use ABI-encodable types
//! - constants are initialized with compile-time constant expressions
//! - `new` is only applied to fully implemented contracts
//! - contract creation does not form a cycle
//! - constructors of bases that take arguments receive them
//!
//! As a side effect it renders the NatSpec documentation of every contract.

use std::collections::BTreeMap;
use std::rc::Rc;

use covenant_core::{CompilerError, NodeId, ResolutionError, Result, SourceLocation, Span};
use covenant_parser::ast::{
    ContractDefinition, ContractMember, ExprKind, Expression, FunctionKind, SourceUnit,
    StateMutability, Visibility,
};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::docs::InterfaceHandler;
use crate::passes::{walk_block, walk_expression};
use crate::registry::{Declaration, DeclarationRegistry, Member, MemberRef, VariableKind};
use crate::types::Type;

/// NatSpec output attached to a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDocumentation {
    pub user: String,
    pub dev: String,
}

/// Output of the requirements pass.
#[derive(Debug, Default)]
pub struct RequirementsOutput {
    pub documentation: BTreeMap<NodeId, ContractDocumentation>,
}

/// Pass 3: check requirements and attach documentation.
pub struct RequirementsPass<'a> {
    registry: &'a DeclarationRegistry,
}

impl<'a> RequirementsPass<'a> {
    pub fn new(registry: &'a DeclarationRegistry) -> Self {
        Self { registry }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(self, units: &[Rc<SourceUnit>]) -> Result<RequirementsOutput> {
        let mut output = RequirementsOutput::default();
        let handler = InterfaceHandler::new(self.registry);
        for unit in units {
            for contract in unit.contracts() {
                self.check_overrides(contract)?;
                self.check_abi_signatures(contract)?;
                self.check_constants(contract)?;
                self.check_code(contract)?;
                self.check_base_arguments(contract)?;
                output.documentation.insert(
                    contract.id,
                    ContractDocumentation {
                        user: handler.user_documentation(contract.id)?,
                        dev: handler.dev_documentation(contract.id)?,
                    },
                );
            }
        }
        self.check_creation_cycles(units)?;
        Ok(output)
    }

    fn location(contract: &ContractDefinition, span: Span) -> SourceLocation {
        SourceLocation::new(&contract.source, span)
    }

    // =========================================
    // Inheritance
    // =========================================

    fn check_overrides(&self, contract: &ContractDefinition) -> Result<()> {
        let linearization = self.registry.linearization(contract.id)?;
        for member in &contract.members {
            let own = match member {
                ContractMember::Function(f) if f.kind == FunctionKind::Function => {
                    (Member::Function(f.id), &f.name)
                }
                ContractMember::Function(_) => continue,
                ContractMember::Modifier(m) => (Member::Modifier(m.id), &m.name),
                ContractMember::StateVariable(v) => (Member::StateVariable(v.id), &v.name),
            };
            for &base in &linearization[1..] {
                let Some(inherited) = self.own_member(base, &own.1.name)? else {
                    continue;
                };
                match (own.0, inherited) {
                    (Member::Function(derived), Member::Function(overridden)) => {
                        let derived = self.registry.function(derived)?;
                        let overridden = self.registry.function(overridden)?;
                        if !derived.ty.same_signature(&overridden.ty)
                            || derived.definition.visibility.is_externally_visible()
                                != overridden.definition.visibility.is_externally_visible()
                        {
                            return Err(ResolutionError::OverrideMismatch {
                                name: own.1.name.clone(),
                                location: Self::location(contract, own.1.span),
                            }
                            .into());
                        }
                    }
                    (Member::Modifier(_), Member::Modifier(_)) => {}
                    _ => {
                        return Err(ResolutionError::DuplicateDeclaration {
                            name: own.1.name.clone(),
                            location: Self::location(contract, own.1.span),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// A member declared directly in `contract`.
    fn own_member(&self, contract: NodeId, name: &str) -> Result<Option<Member>> {
        let definition = &self.registry.contract(contract)?.definition;
        Ok(definition.members.iter().find_map(|member| match member {
            ContractMember::Function(f)
                if f.kind == FunctionKind::Function && f.name.name == name =>
            {
                Some(Member::Function(f.id))
            }
            ContractMember::Modifier(m) if m.name.name == name => Some(Member::Modifier(m.id)),
            ContractMember::StateVariable(v) if v.name.name == name => {
                Some(Member::StateVariable(v.id))
            }
            _ => None,
        }))
    }

    fn check_base_arguments(&self, contract: &ContractDefinition) -> Result<()> {
        if contract.is_abstract {
            return Ok(());
        }
        for &base in &self.registry.linearization(contract.id)?[1..] {
            let base_definition = &self.registry.contract(base)?.definition;
            let Some(constructor) = base_definition.constructor() else {
                continue;
            };
            if !constructor.parameters.is_empty()
                && self.registry.base_arguments(contract.id, base)?.is_none()
            {
                return Err(ResolutionError::MissingBaseArguments {
                    base: base_definition.name.name.clone(),
                    location: Self::location(contract, contract.name.span),
                }
                .into());
            }
        }
        Ok(())
    }

    // =========================================
    // Signatures
    // =========================================

    fn check_abi_signatures(&self, contract: &ContractDefinition) -> Result<()> {
        for function in contract.functions() {
            if function.kind == FunctionKind::Fallback {
                if !function.parameters.is_empty() || !function.returns.is_empty() {
                    return Err(ResolutionError::InvalidOperation {
                        message: "fallback function cannot take parameters or return values"
                            .to_string(),
                        location: Self::location(contract, function.span),
                    }
                    .into());
                }
                continue;
            }
            if !function.visibility.is_externally_visible() {
                continue;
            }
            for variable in function.parameters.iter().chain(&function.returns) {
                if self.registry.variable(variable.id)?.ty.abi_name().is_none() {
                    let name = if variable.name.name.is_empty() {
                        function.name.name.clone()
                    } else {
                        variable.name.name.clone()
                    };
                    return Err(ResolutionError::NotAbiEncodable {
                        name,
                        location: Self::location(contract, variable.span),
                    }
                    .into());
                }
            }
        }
        for variable in contract.state_variables() {
            if variable.visibility == Visibility::Public
                && self.registry.variable(variable.id)?.ty.abi_name().is_none()
            {
                return Err(ResolutionError::NotAbiEncodable {
                    name: variable.name.name.clone(),
                    location: Self::location(contract, variable.span),
                }
                .into());
            }
        }
        Ok(())
    }

    // =========================================
    // Constants
    // =========================================

    fn check_constants(&self, contract: &ContractDefinition) -> Result<()> {
        for variable in contract.state_variables() {
            let info = self.registry.variable(variable.id)?;
            if !info.is_constant() {
                continue;
            }
            let error = || -> CompilerError {
                ResolutionError::ConstantInitializer {
                    name: variable.name.name.clone(),
                    location: Self::location(contract, variable.span),
                }
                .into()
            };
            if !info.ty.is_value_type() || matches!(info.ty, Type::Function(_)) {
                return Err(error());
            }
            let Some(value) = &variable.value else {
                return Err(error());
            };
            let mut visiting = FxHashSet::default();
            visiting.insert(variable.id);
            if !self.is_compile_time_constant(value, &mut visiting)? {
                return Err(error());
            }
        }
        Ok(())
    }

    /// Literals, operators, conversions and references to other constants,
    /// without reference cycles.
    fn is_compile_time_constant(
        &self,
        expr: &Expression,
        visiting: &mut FxHashSet<NodeId>,
    ) -> Result<bool> {
        Ok(match &expr.kind {
            ExprKind::Number(_) | ExprKind::HexNumber(_) | ExprKind::Bool(_) => true,
            ExprKind::Binary { lhs, rhs, .. } => {
                self.is_compile_time_constant(lhs, visiting)?
                    && self.is_compile_time_constant(rhs, visiting)?
            }
            ExprKind::Unary { operand, .. } => self.is_compile_time_constant(operand, visiting)?,
            ExprKind::Call { callee, arguments } => {
                matches!(self.registry.expression_type(callee.id)?, Type::TypeType(_))
                    && arguments.len() == 1
                    && self.is_compile_time_constant(&arguments[0], visiting)?
            }
            ExprKind::Identifier(_) => match self.registry.reference(expr.id)? {
                Declaration::Variable(id) => {
                    let info = self.registry.variable(id)?;
                    if !info.is_constant() || !visiting.insert(id) {
                        return Ok(false);
                    }
                    let constant = match &info.definition.value {
                        Some(value) => self.is_compile_time_constant(value, visiting)?,
                        None => false,
                    };
                    visiting.remove(&id);
                    constant
                }
                _ => false,
            },
            _ => false,
        })
    }

    // =========================================
    // Code
    // =========================================

    /// Checks on every expression written inside `contract`.
    fn check_code(&self, contract: &ContractDefinition) -> Result<()> {
        let mut roots: Vec<&Expression> = Vec::new();
        for specifier in &contract.bases {
            roots.extend(specifier.arguments.iter().flatten());
        }
        for variable in contract.state_variables() {
            roots.extend(variable.value.as_ref());
        }
        let mut expressions: Vec<&Expression> = Vec::new();
        for root in roots {
            walk_expression(root, &mut |e| expressions.push(e));
        }

        for function in contract.functions() {
            let mut body: Vec<&Expression> = Vec::new();
            for invocation in &function.modifiers {
                for argument in &invocation.arguments {
                    walk_expression(argument, &mut |e| body.push(e));
                }
            }
            if let Some(block) = &function.body {
                walk_block(block, &mut |e| body.push(e));
            }

            let entry_point = (function.visibility.is_externally_visible()
                && function.kind != FunctionKind::Constructor)
                || function.kind == FunctionKind::Fallback;
            if entry_point && function.mutability != StateMutability::Payable {
                for expr in &body {
                    if matches!(expr.kind, ExprKind::Member { .. })
                        && self.registry.member_ref(expr.id)? == MemberRef::MsgValue
                    {
                        return Err(ResolutionError::NotPayable {
                            message: "\"msg.value\" can only be used in payable public functions"
                                .to_string(),
                            location: Self::location(contract, expr.span),
                        }
                        .into());
                    }
                }
            }
            expressions.extend(body);
        }
        for modifier in contract.modifiers() {
            walk_block(&modifier.body, &mut |e| expressions.push(e));
        }

        for expr in expressions {
            match &expr.kind {
                ExprKind::Identifier(name) => self.check_private_access(contract, expr, name)?,
                ExprKind::New { contract: created } => {
                    let Declaration::Contract(id) = self.registry.reference(expr.id)? else {
                        return Err(CompilerError::internal("'new' does not reference a contract"));
                    };
                    if !self.registry.is_fully_implemented(id)? {
                        return Err(ResolutionError::AbstractInstantiation {
                            name: created.name.clone(),
                            location: Self::location(contract, expr.span),
                        }
                        .into());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_private_access(
        &self,
        contract: &ContractDefinition,
        expr: &Expression,
        name: &str,
    ) -> Result<()> {
        let (owner, visibility) = match self.registry.reference(expr.id)? {
            Declaration::Function(id) => {
                let info = self.registry.function(id)?;
                (info.contract, info.definition.visibility)
            }
            Declaration::Variable(id) => {
                let info = self.registry.variable(id)?;
                match info.kind {
                    VariableKind::State { contract } => (contract, info.definition.visibility),
                    _ => return Ok(()),
                }
            }
            _ => return Ok(()),
        };
        if visibility == Visibility::Private && owner != contract.id {
            return Err(ResolutionError::Visibility {
                message: format!(
                    "'{name}' is private and not accessible from '{}'",
                    contract.name.name
                ),
                location: Self::location(contract, expr.span),
            }
            .into());
        }
        Ok(())
    }

    // =========================================
    // Creation graph
    // =========================================

    fn check_creation_cycles(&self, units: &[Rc<SourceUnit>]) -> Result<()> {
        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let mut nodes: FxHashMap<NodeId, NodeIndex> = FxHashMap::default();
        let contracts: Vec<&Rc<ContractDefinition>> =
            units.iter().flat_map(|u| u.contracts()).collect();
        for contract in &contracts {
            nodes.insert(contract.id, graph.add_node(contract.id));
        }
        for contract in &contracts {
            for created in self.registry.creation_dependencies(contract.id)? {
                if let (Some(&from), Some(&to)) = (nodes.get(&contract.id), nodes.get(&created)) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        if let Err(cycle) = toposort(&graph, None) {
            let id = graph[cycle.node_id()];
            let definition = &self.registry.contract(id)?.definition;
            return Err(ResolutionError::CreationCycle {
                name: definition.name.name.clone(),
                location: SourceLocation::new(&definition.source, definition.name.span),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{RegistrationPass, ResolutionPass};
    use covenant_core::NodeIdGen;
    use covenant_parser::Parser;

    fn check(source: &str) -> Result<RequirementsOutput> {
        let mut ids = NodeIdGen::new();
        let units = vec![Rc::new(Parser::parse("a", source, &mut ids).unwrap())];
        let mut registry = DeclarationRegistry::new();
        RegistrationPass::new(&mut registry).run(&units)?;
        ResolutionPass::new(&mut registry).run(&units)?;
        RequirementsPass::new(&registry).run(&units)
    }

    fn message(source: &str) -> String {
        match check(source).unwrap_err() {
            CompilerError::Resolution(e) => e.to_string(),
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[test]
    fn override_must_keep_signature() {
        let base = "contract A { function f(uint a) {} }";
        assert!(check(&format!("{base} contract B is A {{ function f(uint b) {{}} }}")).is_ok());
        let changed = format!("{base} contract B is A {{ function f(bool b) {{}} }}");
        assert!(message(&changed).contains("override of 'f'"));
    }

    #[test]
    fn state_variable_cannot_shadow_inherited_member() {
        let source = "contract A { uint x; } contract B is A { uint x; }";
        assert!(message(source).contains("already declared"));
    }

    #[test]
    fn msg_value_requires_payable() {
        let payable = "contract A { function f() payable returns (uint) { return msg.value; } }";
        assert!(check(payable).is_ok());
        let internal = "contract A { function f() internal returns (uint) { return msg.value; } }";
        assert!(check(internal).is_ok());
        let public = "contract A { function f() returns (uint) { return msg.value; } }";
        assert!(message(public).contains("payable"));
    }

    #[test]
    fn private_members_are_not_inherited() {
        let derived = "contract B is A { function f() returns (uint) { return x; } }";
        let private = format!("contract A {{ uint private x; }} {derived}");
        assert!(message(&private).contains("private"));
        let internal = format!("contract A {{ uint internal x; }} {derived}");
        assert!(check(&internal).is_ok());
    }

    #[test]
    fn function_types_are_not_abi_encodable() {
        let public = "contract A { function f(function (uint) returns (uint) g) {} }";
        assert!(message(public).contains("public signature"));
        let internal = "contract A { function f(function (uint) returns (uint) g) internal {} }";
        assert!(check(internal).is_ok());
    }

    #[test]
    fn constant_initializers() {
        let folded = "contract A { uint constant X = 2 * 3; uint constant Y = X + uint(1); }";
        assert!(check(folded).is_ok());
        let from_state = "contract A { uint x; uint constant Y = x; }";
        assert!(message(from_state).contains("compile-time constant"));
        let cyclic = "contract A { uint constant X = Y; uint constant Y = X; }";
        assert!(message(cyclic).contains("compile-time constant"));
    }

    #[test]
    fn cannot_create_abstract_contracts() {
        let source = "contract A { function f(); } contract B { function g() { new A(); } }";
        assert!(message(source).contains("abstract"));
    }

    #[test]
    fn creation_cycles() {
        let mutual = "contract A { function f() { new B(); } } \
                      contract B { function g() { new A(); } }";
        assert!(message(mutual).contains("circular reference"));
        assert!(message("contract A { function f() { new A(); } }").contains("circular reference"));
    }

    #[test]
    fn base_constructor_arguments_required() {
        let base = "contract A { constructor(uint x) {} }";
        let missing = format!("{base} contract B is A {{}}");
        assert!(message(&missing).contains("missing constructor arguments"));
        assert!(check(&format!("{base} abstract contract B is A {{}}")).is_ok());
        assert!(check(&format!("{base} contract B is A(1) {{}} contract C is B {{}}")).is_ok());
    }

    #[test]
    fn documentation_is_attached() {
        let source = "/// @title Coin\n/// @notice A coin\ncontract A {\n\
                      /// @notice Sends\n/// @param to who\nfunction send(address to) {} }";
        let output = check(source).unwrap();
        let doc = output.documentation.values().next().unwrap();
        assert!(doc.user.contains("\"send(address)\""));
        assert!(doc.user.contains("Sends"));
        assert!(doc.dev.contains("\"title\": \"Coin\""));
        assert!(doc.dev.contains("\"to\": \"who\""));
    }
}
