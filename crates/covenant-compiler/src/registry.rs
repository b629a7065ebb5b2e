//! Whole-program declaration registry.
//!
//! The registration pass materializes every contract and member here before
//! any reference is resolved. The resolution pass then records what every
//! identifier and member access refers to and the type of every expression.
//! Code generation only reads from the registry.
//!
//! Contracts are kept in a `BTreeMap` keyed by [`NodeId`], so iterating
//! them is deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use covenant_core::{CompilerError, NodeId, Result};
use covenant_parser::ast::{
    ContractDefinition, Expression, FunctionDefinition, FunctionKind, ModifierDefinition,
    VariableDeclaration, VariableMutability, Visibility,
};
use rustc_hash::{FxHashMap, FxHashSet};
use sha3::{Digest, Keccak256};

use crate::types::{FunctionType, FunctionTypeKind, MagicKind, Type};

// ============================================================================
// Registered declarations
// ============================================================================

#[derive(Debug, Clone)]
pub struct ContractInfo {
    pub definition: Rc<ContractDefinition>,
    /// C3 linearization, most derived first, starting with the contract.
    /// Empty until the resolution pass has run.
    pub linearization: Vec<NodeId>,
}

impl ContractInfo {
    pub fn name(&self) -> &str {
        &self.definition.name.name
    }
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub definition: Rc<FunctionDefinition>,
    pub contract: NodeId,
    /// Internal function type. Filled in by the resolution pass.
    pub ty: FunctionType,
}

#[derive(Debug, Clone)]
pub struct ModifierInfo {
    pub definition: Rc<ModifierDefinition>,
    pub contract: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    State { contract: NodeId },
    Parameter,
    Return,
    Local,
}

#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub definition: Rc<VariableDeclaration>,
    pub kind: VariableKind,
    pub ty: Type,
}

impl VariableInfo {
    pub fn is_constant(&self) -> bool {
        self.definition.mutability == VariableMutability::Constant
    }

    pub fn is_immutable(&self) -> bool {
        self.definition.mutability == VariableMutability::Immutable
    }

    /// Whether the variable occupies a storage slot.
    pub fn is_stored(&self) -> bool {
        matches!(self.kind, VariableKind::State { .. })
            && self.definition.mutability == VariableMutability::Mutable
    }
}

/// A contract member found by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member {
    Function(NodeId),
    Modifier(NodeId),
    StateVariable(NodeId),
}

/// What an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration {
    Contract(NodeId),
    Function(NodeId),
    Modifier(NodeId),
    Variable(NodeId),
    Magic(MagicKind),
    This,
    Builtin(FunctionTypeKind),
}

/// What a member access refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRef {
    ExternalFunction(NodeId),
    /// Getter of a public state variable on another contract.
    ExternalGetter(NodeId),
    Balance,
    MsgSender,
    MsgValue,
    BlockNumber,
    BlockTimestamp,
}

/// An entry of a contract's external interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceItem {
    Function(NodeId),
    Getter(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceFunction {
    pub selector: [u8; 4],
    pub signature: String,
    pub item: InterfaceItem,
}

/// Function selector: the first four bytes of the signature's Keccak-256.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Default)]
pub struct DeclarationRegistry {
    contracts: BTreeMap<NodeId, ContractInfo>,
    functions: FxHashMap<NodeId, FunctionInfo>,
    modifiers: FxHashMap<NodeId, ModifierInfo>,
    variables: FxHashMap<NodeId, VariableInfo>,
    /// Contract names visible in each source unit.
    scopes: FxHashMap<String, FxHashMap<String, NodeId>>,
    references: FxHashMap<NodeId, Declaration>,
    member_refs: FxHashMap<NodeId, MemberRef>,
    expression_types: FxHashMap<NodeId, Type>,
    /// Common operand type of each binary operation.
    operand_types: FxHashMap<NodeId, Type>,
    /// Contracts instantiated with `new` by code written in each contract.
    creates: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl DeclarationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================
    // Registration
    // =========================================

    pub(crate) fn add_contract(&mut self, definition: Rc<ContractDefinition>) {
        self.contracts.insert(
            definition.id,
            ContractInfo {
                definition,
                linearization: Vec::new(),
            },
        );
    }

    pub(crate) fn add_function(&mut self, definition: Rc<FunctionDefinition>, contract: NodeId) {
        self.functions.insert(
            definition.id,
            FunctionInfo {
                definition,
                contract,
                ty: FunctionType::internal(Vec::new(), Vec::new()),
            },
        );
    }

    pub(crate) fn add_modifier(&mut self, definition: Rc<ModifierDefinition>, contract: NodeId) {
        let info = ModifierInfo {
            definition,
            contract,
        };
        self.modifiers.insert(info.definition.id, info);
    }

    pub(crate) fn add_variable(
        &mut self,
        definition: Rc<VariableDeclaration>,
        kind: VariableKind,
        ty: Type,
    ) {
        let info = VariableInfo {
            definition,
            kind,
            ty,
        };
        self.variables.insert(info.definition.id, info);
    }

    pub(crate) fn set_scope(&mut self, source: &str, scope: FxHashMap<String, NodeId>) {
        self.scopes.insert(source.to_string(), scope);
    }

    pub(crate) fn set_linearization(
        &mut self,
        contract: NodeId,
        linearization: Vec<NodeId>,
    ) -> Result<()> {
        self.contracts
            .get_mut(&contract)
            .ok_or_else(|| unknown("contract", contract))?
            .linearization = linearization;
        Ok(())
    }

    pub(crate) fn set_function_type(&mut self, function: NodeId, ty: FunctionType) -> Result<()> {
        self.functions
            .get_mut(&function)
            .ok_or_else(|| unknown("function", function))?
            .ty = ty;
        Ok(())
    }

    pub(crate) fn set_variable_type(&mut self, variable: NodeId, ty: Type) -> Result<()> {
        self.variables
            .get_mut(&variable)
            .ok_or_else(|| unknown("variable", variable))?
            .ty = ty;
        Ok(())
    }

    pub(crate) fn record_reference(&mut self, expression: NodeId, declaration: Declaration) {
        self.references.insert(expression, declaration);
    }

    pub(crate) fn record_member(&mut self, expression: NodeId, member: MemberRef) {
        self.member_refs.insert(expression, member);
    }

    pub(crate) fn record_type(&mut self, expression: NodeId, ty: Type) {
        self.expression_types.insert(expression, ty);
    }

    pub(crate) fn record_operand_type(&mut self, expression: NodeId, ty: Type) {
        self.operand_types.insert(expression, ty);
    }

    pub(crate) fn record_creation(&mut self, site: NodeId, created: NodeId) {
        self.creates.entry(site).or_default().insert(created);
    }

    // =========================================
    // Lookup
    // =========================================

    pub fn contracts(&self) -> impl Iterator<Item = &ContractInfo> {
        self.contracts.values()
    }

    pub fn contract(&self, id: NodeId) -> Result<&ContractInfo> {
        self.contracts.get(&id).ok_or_else(|| unknown("contract", id))
    }

    pub fn function(&self, id: NodeId) -> Result<&FunctionInfo> {
        self.functions.get(&id).ok_or_else(|| unknown("function", id))
    }

    pub fn modifier(&self, id: NodeId) -> Result<&ModifierInfo> {
        self.modifiers.get(&id).ok_or_else(|| unknown("modifier", id))
    }

    pub fn variable(&self, id: NodeId) -> Result<&VariableInfo> {
        self.variables.get(&id).ok_or_else(|| unknown("variable", id))
    }

    pub fn contract_in_scope(&self, source: &str, name: &str) -> Option<NodeId> {
        self.scopes.get(source)?.get(name).copied()
    }

    pub fn reference(&self, expression: NodeId) -> Result<Declaration> {
        self.references
            .get(&expression)
            .copied()
            .ok_or_else(|| unknown("reference for expression", expression))
    }

    pub fn member_ref(&self, expression: NodeId) -> Result<MemberRef> {
        self.member_refs
            .get(&expression)
            .copied()
            .ok_or_else(|| unknown("member reference for expression", expression))
    }

    pub fn expression_type(&self, expression: NodeId) -> Result<&Type> {
        self.expression_types
            .get(&expression)
            .ok_or_else(|| unknown("type of expression", expression))
    }

    pub fn operand_type(&self, expression: NodeId) -> Result<&Type> {
        self.operand_types
            .get(&expression)
            .ok_or_else(|| unknown("operand type of expression", expression))
    }

    /// Linearization of `contract`, most derived first.
    pub fn linearization(&self, contract: NodeId) -> Result<&[NodeId]> {
        Ok(&self.contract(contract)?.linearization)
    }

    /// Find a member by name, searching the linearization of `contract`
    /// from most to least derived.
    pub fn find_member(&self, contract: NodeId, name: &str) -> Result<Option<Member>> {
        for &id in self.linearization(contract)? {
            let definition = &self.contract(id)?.definition;
            for f in definition.functions() {
                if f.kind == FunctionKind::Function && f.name.name == name {
                    return Ok(Some(Member::Function(f.id)));
                }
            }
            for m in definition.modifiers() {
                if m.name.name == name {
                    return Ok(Some(Member::Modifier(m.id)));
                }
            }
            for v in definition.state_variables() {
                if v.name.name == name {
                    return Ok(Some(Member::StateVariable(v.id)));
                }
            }
        }
        Ok(None)
    }

    /// The definition of `function` that is actually called on an
    /// instance of `most_derived`.
    pub fn resolve_virtual_function(
        &self,
        most_derived: NodeId,
        function: NodeId,
    ) -> Result<NodeId> {
        let info = self.function(function)?;
        if info.definition.kind != FunctionKind::Function {
            return Ok(function);
        }
        match self.find_member(most_derived, &info.definition.name.name)? {
            Some(Member::Function(id)) => Ok(id),
            _ => Ok(function),
        }
    }

    /// The modifier named `name` that applies on an instance of
    /// `most_derived`.
    pub fn resolve_virtual_modifier(&self, most_derived: NodeId, name: &str) -> Result<NodeId> {
        match self.find_member(most_derived, name)? {
            Some(Member::Modifier(id)) => Ok(id),
            _ => Err(CompilerError::internal(format!("modifier '{name}' not found"))),
        }
    }

    /// Whether every function reachable on `contract` has a body and the
    /// contract is not declared abstract.
    pub fn is_fully_implemented(&self, contract: NodeId) -> Result<bool> {
        let info = self.contract(contract)?;
        if info.definition.is_abstract {
            return Ok(false);
        }
        let mut seen = FxHashSet::default();
        for &id in &info.linearization {
            for f in self.contract(id)?.definition.functions() {
                let key = match f.kind {
                    FunctionKind::Function => f.name.name.as_str(),
                    FunctionKind::Fallback => "()",
                    FunctionKind::Constructor => {
                        if !f.is_implemented() {
                            return Ok(false);
                        }
                        continue;
                    }
                };
                if seen.insert(key) && !f.is_implemented() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// External interface of `contract`, sorted by selector.
    pub fn interface_functions(&self, contract: NodeId) -> Result<Vec<InterfaceFunction>> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for &id in self.linearization(contract)? {
            let definition = &self.contract(id)?.definition;
            for f in definition.functions() {
                if f.kind != FunctionKind::Function || !seen.insert(f.name.name.clone()) {
                    continue;
                }
                if f.visibility.is_externally_visible() {
                    let signature = self.function_signature(f.id)?;
                    out.push(InterfaceFunction {
                        selector: selector(&signature),
                        signature,
                        item: InterfaceItem::Function(f.id),
                    });
                }
            }
            for v in definition.state_variables() {
                if !seen.insert(v.name.name.clone()) {
                    continue;
                }
                if v.visibility == Visibility::Public {
                    let signature = format!("{}()", v.name.name);
                    out.push(InterfaceFunction {
                        selector: selector(&signature),
                        signature,
                        item: InterfaceItem::Getter(v.id),
                    });
                }
            }
        }
        out.sort_by(|a, b| a.selector.cmp(&b.selector));
        Ok(out)
    }

    /// `name(type1,type2)` using canonical ABI type names.
    pub fn function_signature(&self, function: NodeId) -> Result<String> {
        let info = self.function(function)?;
        let params = info
            .ty
            .parameters
            .iter()
            .map(|ty| {
                ty.abi_name().ok_or_else(|| {
                    CompilerError::internal(format!(
                        "parameter of '{}' has no ABI encoding",
                        info.definition.name.name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("{}({})", info.definition.name.name, params.join(",")))
    }

    /// Storage variables in slot order: base-most contract first, then
    /// declaration order.
    pub fn storage_variables(&self, contract: NodeId) -> Result<Vec<NodeId>> {
        self.state_variables_where(contract, VariableMutability::Mutable)
    }

    /// Immutable variables in the same order as storage variables.
    pub fn immutable_variables(&self, contract: NodeId) -> Result<Vec<NodeId>> {
        self.state_variables_where(contract, VariableMutability::Immutable)
    }

    fn state_variables_where(
        &self,
        contract: NodeId,
        mutability: VariableMutability,
    ) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        for &id in self.linearization(contract)?.iter().rev() {
            for v in self.contract(id)?.definition.state_variables() {
                if v.mutability == mutability {
                    out.push(v.id);
                }
            }
        }
        Ok(out)
    }

    /// The fallback function that applies to `contract`, if any.
    pub fn fallback(&self, contract: NodeId) -> Result<Option<NodeId>> {
        for &id in self.linearization(contract)? {
            if let Some(f) = self
                .contract(id)?
                .definition
                .functions()
                .find(|f| f.kind == FunctionKind::Fallback)
            {
                return Ok(Some(f.id));
            }
        }
        Ok(None)
    }

    /// Arguments given to the constructor of `base` somewhere in the
    /// inheritance hierarchy of `contract`, with the contract that wrote
    /// them.
    pub fn base_arguments(
        &self,
        contract: NodeId,
        base: NodeId,
    ) -> Result<Option<(NodeId, &[Expression])>> {
        for &id in self.linearization(contract)? {
            let info = self.contract(id)?;
            for specifier in &info.definition.bases {
                let Some(arguments) = &specifier.arguments else {
                    continue;
                };
                let named = self.contract_in_scope(&info.definition.source, &specifier.name.name);
                if named == Some(base) {
                    return Ok(Some((id, arguments.as_slice())));
                }
            }
        }
        Ok(None)
    }

    /// Contracts created by code that ends up in `contract`.
    pub fn creation_dependencies(&self, contract: NodeId) -> Result<BTreeSet<NodeId>> {
        let mut out = BTreeSet::new();
        for id in self.linearization(contract)? {
            if let Some(created) = self.creates.get(id) {
                out.extend(created.iter().copied());
            }
        }
        Ok(out)
    }

    /// Implicit conversion including contract-to-base conversions.
    pub fn is_implicitly_convertible(&self, from: &Type, to: &Type) -> bool {
        match (from, to) {
            (Type::Contract(derived), Type::Contract(base)) => self
                .linearization(*derived)
                .is_ok_and(|lin| lin.contains(base)),
            _ => from.is_implicitly_convertible_to(to),
        }
    }

    /// Human-readable type name for diagnostics.
    pub fn describe(&self, ty: &Type) -> String {
        match ty {
            Type::Contract(id) => match self.contract(*id) {
                Ok(info) => format!("contract {}", info.name()),
                Err(_) => format!("contract #{id}"),
            },
            Type::IntegerLiteral(value) => format!("int_const {value}"),
            Type::StringLiteral(value) => format!("literal_string \"{value}\""),
            Type::Function(f) => format!(
                "function ({}) returns ({})",
                self.describe_list(&f.parameters),
                self.describe_list(&f.returns)
            ),
            Type::Tuple(items) => format!("tuple({})", self.describe_list(items)),
            Type::TypeType(inner) => format!("type({})", self.describe(inner)),
            Type::Magic(MagicKind::Msg) => "msg".to_string(),
            Type::Magic(MagicKind::Block) => "block".to_string(),
            other => other.abi_name().unwrap_or_default(),
        }
    }

    fn describe_list(&self, types: &[Type]) -> String {
        types
            .iter()
            .map(|t| self.describe(t))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn unknown(what: &str, id: NodeId) -> CompilerError {
    CompilerError::internal(format!("unknown {what} {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_stable() {
        assert_eq!(selector("f()"), [0x26, 0x12, 0x1f, 0xf0]);
        assert_eq!(
            selector("transfer(address,uint256)"),
            [0xa9, 0x05, 0x9c, 0xbb]
        );
        assert_ne!(selector("f()"), selector("g()"));
    }

    #[test]
    fn missing_entries_are_internal_errors() {
        let registry = DeclarationRegistry::new();
        assert!(registry.contract(NodeId(1)).unwrap_err().is_internal());
        assert!(registry.expression_type(NodeId(1)).unwrap_err().is_internal());
        assert!(registry.reference(NodeId(1)).unwrap_err().is_internal());
    }

    #[test]
    fn describe_types() {
        let registry = DeclarationRegistry::new();
        assert_eq!(registry.describe(&Type::Uint(8)), "uint8");
        let tuple = Type::Tuple(vec![Type::Bool, Type::Address]);
        assert_eq!(registry.describe(&tuple), "tuple(bool,address)");
        assert_eq!(registry.describe(&Type::Contract(NodeId(9))), "contract #9");
    }
}
