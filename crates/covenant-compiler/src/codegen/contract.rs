//! Code generation for one contract.
//!
//! A contract yields three code objects:
//!
//! - **creation code**: sets up memory, decodes constructor arguments,
//!   runs state initializers and constructors base-most first, then copies
//!   the runtime code out with its immutables filled in
//! - **runtime code**: selector dispatch over the external interface
//! - **clone code**: deploys a forwarder that delegates every call to a
//!   linked instance of the contract
//!
//! Creation and runtime code are generated in separate contexts. Functions
//! reachable through function pointers in creation code are handed to the
//! runtime context, since pointers can be stored and called later.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use covenant_core::{CompilerError, NodeId, Result};
use covenant_parser::ast::{StateMutability, VariableMutability};
use tracing::debug;

use super::collector::FunctionCollector;
use super::context::{
    CodegenContext, CodegenMode, FREE_MEMORY_POINTER, InternalDispatchMap, RESERVED_MEMORY_START,
    RevertStrings, dispatch_label, function_label,
};
use super::lower::{Lowerer, immutable_name, lower_function};
use super::utils::{Code, PanicCode};
use crate::assembly::{Assembly, AssemblyItem, Instruction, LinkerObject, Word};
use crate::registry::{DeclarationRegistry, InterfaceFunction, InterfaceItem};
use crate::types::{Arity, Type};

use Instruction::*;

/// Code objects produced for one contract.
#[derive(Debug, Clone)]
pub struct ContractArtifacts {
    pub assembly: Rc<Assembly>,
    pub runtime_assembly: Rc<Assembly>,
    pub clone_assembly: Rc<Assembly>,
    pub object: LinkerObject,
    pub runtime_object: LinkerObject,
    pub clone_object: LinkerObject,
}

/// Generates the code objects of contracts.
///
/// `compiled` holds the creation code of every contract compiled so far;
/// a contract can only instantiate contracts that appear in it.
pub struct ContractCompiler<'a> {
    registry: &'a DeclarationRegistry,
    compiled: &'a BTreeMap<NodeId, Rc<Assembly>>,
    collector: Rc<RefCell<FunctionCollector>>,
    revert_strings: RevertStrings,
}

impl<'a> ContractCompiler<'a> {
    pub fn new(
        registry: &'a DeclarationRegistry,
        compiled: &'a BTreeMap<NodeId, Rc<Assembly>>,
        collector: Rc<RefCell<FunctionCollector>>,
        revert_strings: RevertStrings,
    ) -> Self {
        Self {
            registry,
            compiled,
            collector,
            revert_strings,
        }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn compile(&self, contract: NodeId) -> Result<ContractArtifacts> {
        let name = self.registry.contract(contract)?.name();
        debug!(contract = name, "generating code");

        let mut creation = self.context(CodegenMode::Creation, contract)?;
        let mut runtime = self.context(CodegenMode::Runtime, contract)?;

        let mut creation_items = self.creation_code(&mut creation, contract)?;
        let dispatch = self.generate_queued_functions(&mut creation)?;
        runtime.initialize_internal_dispatch(dispatch);

        let runtime_items = self.runtime_code(&mut runtime, contract)?;
        self.generate_queued_functions(&mut runtime)?;
        let runtime_subs = runtime.take_subs();
        let runtime_name = format!("{name}_deployed");
        let runtime_assembly =
            Rc::new(assemble(runtime_name, &runtime, runtime_items, runtime_subs));
        let runtime_object = runtime_assembly.assemble()?;

        let mut subs = creation.take_subs();
        let runtime_index = subs.len();
        subs.push(runtime_assembly.clone());
        let deploy = self.deploy_items(&creation, contract, runtime_index, &runtime_object)?;
        creation_items.extend(deploy);
        let assembly = Rc::new(assemble(name, &creation, creation_items, subs));
        let object = assembly.assemble()?;

        let clone_assembly = Rc::new(clone_assembly(name));
        let clone_object = clone_assembly.assemble()?;

        debug!(
            contract = name,
            creation_bytes = object.bytecode.len(),
            runtime_bytes = runtime_object.bytecode.len(),
            "code generated"
        );
        Ok(ContractArtifacts {
            assembly,
            runtime_assembly,
            clone_assembly,
            object,
            runtime_object,
            clone_object,
        })
    }

    fn context(&self, mode: CodegenMode, contract: NodeId) -> Result<CodegenContext> {
        let mut ctx = CodegenContext::new(mode, self.revert_strings, self.collector.clone());
        ctx.set_most_derived_contract(contract);
        for (slot, variable) in self.registry.storage_variables(contract)?.into_iter().enumerate() {
            ctx.add_state_variable(variable, Word::from_u64(slot as u64), 0);
        }
        if mode == CodegenMode::Creation {
            for variable in self.registry.immutable_variables(contract)? {
                ctx.register_immutable_variable(variable, 32)?;
            }
        }
        Ok(ctx)
    }

    // =========================================
    // Creation code
    // =========================================

    fn creation_code(
        &self,
        ctx: &mut CodegenContext,
        contract: NodeId,
    ) -> Result<Vec<AssemblyItem>> {
        let info = self.registry.contract(contract)?;
        let constructor = info.definition.constructor();
        let reserved = ctx.reserved_memory()?;

        let source = &info.definition.source;
        let mut lowerer = Lowerer::new(ctx, self.registry, self.compiled, source, 0);
        let mut c = Code::new();
        c.push((RESERVED_MEMORY_START + reserved) as u64)
            .push(FREE_MEMORY_POINTER)
            .op(Mstore);
        if constructor.is_none_or(|c| c.mutability != StateMutability::Payable) {
            let ok = lowerer.context().new_label();
            c.extend(lowerer.context().abi_functions().callvalue_check_items(&ok));
        }
        lowerer.emit_all(c.into_items());

        let mut argument_slots = Vec::new();
        if let Some(constructor) = constructor.filter(|c| !c.parameters.is_empty()) {
            let parameters = &self.registry.function(constructor.id)?.ty.parameters;
            let items = constructor_argument_items(lowerer.context(), parameters);
            lowerer.emit_all(items);
            argument_slots = (1..=parameters.len()).collect();
        }

        for &base in info.linearization.iter().rev() {
            let definition = &self.registry.contract(base)?.definition;
            lowerer.set_source(&definition.source);
            for variable in definition.state_variables() {
                if variable.mutability == VariableMutability::Constant {
                    continue;
                }
                let Some(value) = &variable.value else {
                    continue;
                };
                lowerer.expression_to(value, &self.registry.variable(variable.id)?.ty)?;
                lowerer.write_variable(variable.id, variable.span)?;
            }

            let Some(base_constructor) = definition.constructor() else {
                continue;
            };
            if base == contract {
                lowerer.call_constructor_with_slots(base_constructor, &argument_slots)?;
                continue;
            }
            match self.registry.base_arguments(contract, base)? {
                Some((site, arguments)) => {
                    lowerer.set_source(&self.registry.contract(site)?.definition.source);
                    lowerer.call_constructor_with_arguments(base_constructor, arguments)?;
                }
                None => lowerer.call_constructor_with_slots(base_constructor, &[])?,
            }
        }

        for _ in 0..lowerer.height() {
            lowerer.emit(AssemblyItem::Op(Pop));
        }
        Ok(lowerer.into_items())
    }

    /// Copy the runtime code to memory, fill in immutables and return it.
    fn deploy_items(
        &self,
        ctx: &CodegenContext,
        contract: NodeId,
        runtime: usize,
        runtime_object: &LinkerObject,
    ) -> Result<Vec<AssemblyItem>> {
        let mut c = Code::new();
        c.push(FREE_MEMORY_POINTER).op(Mload);
        c.extend([
            AssemblyItem::PushSubSize(runtime),
            AssemblyItem::PushSubOffset(runtime),
        ])
        .dup(3)
        .op(CodeCopy);
        for variable in self.registry.immutable_variables(contract)? {
            let references = &runtime_object.immutable_references;
            let Some(positions) = references.get(&immutable_name(variable)) else {
                continue;
            };
            let offset = ctx.immutable_memory_offset(variable)? as u64;
            for &position in positions {
                c.push(offset).op(Mload).dup(2).push(position as u64).op(Add).op(Mstore);
            }
        }
        c.extend([AssemblyItem::PushSubSize(runtime)]).swap(1).op(Return);
        Ok(c.into_items())
    }

    // =========================================
    // Runtime code
    // =========================================

    fn runtime_code(
        &self,
        ctx: &mut CodegenContext,
        contract: NodeId,
    ) -> Result<Vec<AssemblyItem>> {
        let info = self.registry.contract(contract)?;
        let interface = self.registry.interface_functions(contract)?;
        let source = &info.definition.source;
        let mut lowerer = Lowerer::new(ctx, self.registry, self.compiled, source, 0);

        let fallback = lowerer.context().new_label();
        let wrappers: Vec<(String, &InterfaceFunction)> =
            interface.iter().map(|function| (self.wrapper_label(function), function)).collect();

        let mut c = Code::new();
        c.push(RESERVED_MEMORY_START as u64).push(FREE_MEMORY_POINTER).op(Mstore);
        c.push(4).op(CallDataSize).op(Lt).jumpi_to(&fallback);
        c.push(0).op(CallDataLoad).push(0xe0).op(Shr);
        for (label, function) in &wrappers {
            c.dup(1)
                .push_word(Word::from_be_slice(&function.selector))
                .op(Eq)
                .jumpi_to(label);
        }
        c.op(Pop).label(&fallback);
        lowerer.emit_all(c.into_items());
        lowerer.set_height(0);

        let mut c = Code::new();
        match self.registry.fallback(contract)? {
            Some(id) => {
                let definition = &self.registry.function(id)?.definition;
                let ctx = lowerer.context();
                if definition.mutability != StateMutability::Payable {
                    let ok = ctx.new_label();
                    c.extend(ctx.abi_functions().callvalue_check_items(&ok));
                }
                let ret = ctx.new_label();
                let entry = ctx.enqueue_function(definition);
                c.push_label(&ret).jump_to(&entry).label(&ret).op(Stop);
            }
            None => {
                let ctx = lowerer.context();
                let reason =
                    ctx.revert_reason_if_debug("Unknown signature and no fallback defined");
                c.jump_to(&ctx.utils().revert_function(&reason));
            }
        }
        lowerer.emit_all(c.into_items());

        for (label, function) in wrappers {
            lowerer.set_height(1);
            let mut c = Code::new();
            c.label(&label).op(Pop);
            match function.item {
                InterfaceItem::Function(id) => {
                    let info = self.registry.function(id)?;
                    let ctx = lowerer.context();
                    let abi = ctx.abi_functions();
                    if info.definition.mutability != StateMutability::Payable {
                        let ok = ctx.new_label();
                        c.extend(abi.callvalue_check_items(&ok));
                    }
                    let ret = ctx.new_label();
                    let entry = ctx.enqueue_function(&info.definition);
                    c.push_label(&ret)
                        .extend(abi.decode_calldata_items(&info.ty.parameters))
                        .jump_to(&entry)
                        .label(&ret)
                        .extend(abi.encode_and_return_items(info.ty.arity().outputs));
                    lowerer.emit_all(c.into_items());
                }
                InterfaceItem::Getter(id) => {
                    let ctx = lowerer.context();
                    let ok = ctx.new_label();
                    c.extend(ctx.abi_functions().callvalue_check_items(&ok));
                    lowerer.emit_all(c.into_items());
                    lowerer.state_variable_value(id, self.registry.variable(id)?.definition.span)?;
                    let items = lowerer.context().abi_functions().encode_and_return_items(1);
                    lowerer.emit_all(items);
                }
            }
        }
        Ok(lowerer.into_items())
    }

    fn wrapper_label(&self, function: &InterfaceFunction) -> String {
        let (kind, id) = match function.item {
            InterfaceItem::Function(id) => ("external", id),
            InterfaceItem::Getter(id) => ("getter", id),
        };
        let name = function.signature.split('(').next().unwrap_or_default();
        format!("{kind}_fun_{name}_{id}")
    }

    // =========================================
    // Function queue and internal dispatch
    // =========================================

    /// Lower every queued function, including everything reachable through
    /// function pointers, then generate the internal dispatchers. Returns
    /// the dispatch table that was consumed.
    fn generate_queued_functions(&self, ctx: &mut CodegenContext) -> Result<InternalDispatchMap> {
        let most_derived = ctx.most_derived_contract()?;
        loop {
            while let Some(function) = ctx.dequeue_function() {
                let items = lower_function(ctx, self.registry, self.compiled, function)?;
                let label = function_label(&self.registry.function(function)?.definition);
                ctx.add_lowered_function(label, items);
            }
            let pointed_to: Vec<NodeId> = ctx
                .internal_dispatch()
                .values()
                .flatten()
                .flatten()
                .copied()
                .collect();
            for function in pointed_to {
                let target = self.registry.resolve_virtual_function(most_derived, function)?;
                ctx.enqueue_function(&self.registry.function(target)?.definition);
            }
            if ctx.function_generation_queue_empty() {
                break;
            }
        }

        let dispatch = ctx.consume_internal_dispatch_map()?;
        for (&arity, functions) in &dispatch {
            let items = self.dispatch_routine(ctx, arity, functions)?;
            ctx.add_lowered_function(dispatch_label(arity), items);
        }
        if !ctx.function_generation_queue_empty() || !ctx.internal_dispatch_clean() {
            return Err(CompilerError::internal(
                "functions were requested after the internal dispatch was generated",
            ));
        }
        Ok(dispatch)
    }

    /// `[ret args.. fid] -> [results..]`: jump to the function `fid` names.
    fn dispatch_routine(
        &self,
        ctx: &mut CodegenContext,
        arity: Arity,
        functions: &BTreeSet<Option<NodeId>>,
    ) -> Result<Vec<AssemblyItem>> {
        let most_derived = ctx.most_derived_contract()?;
        let invalid = ctx.utils().panic_function(PanicCode::InvalidInternalFunction);
        let mut c = Code::new();
        c.label(&dispatch_label(arity));
        let mut cases = Vec::new();
        for &function in functions.iter().flatten() {
            let case = ctx.new_label();
            c.dup(1).push(u64::from(function.as_u32())).op(Eq).jumpi_to(&case);
            cases.push((case, function));
        }
        c.jump_to(&invalid);
        for (case, function) in cases {
            let target = self.registry.resolve_virtual_function(most_derived, function)?;
            let entry = ctx.enqueue_function(&self.registry.function(target)?.definition);
            c.label(&case).op(Pop).jump_to(&entry);
        }
        Ok(c.into_items())
    }
}

/// `[] -> [memptr args..]`: constructor arguments are appended to the
/// creation code and copied to memory before decoding.
fn constructor_argument_items(ctx: &CodegenContext, parameters: &[Type]) -> Vec<AssemblyItem> {
    let abi = ctx.abi_functions();
    let invalid = abi.invalid_input_function();
    let mut c = Code::new();
    c.extend([AssemblyItem::PushProgramSize]).op(CodeSize).op(Sub);
    c.push(32 * parameters.len() as u64).dup(2).op(Lt).jumpi_to(&invalid);
    c.push(FREE_MEMORY_POINTER).op(Mload);
    c.dup(2).extend([AssemblyItem::PushProgramSize]).dup(3).op(CodeCopy);
    c.dup(2).dup(2).op(Add).push(FREE_MEMORY_POINTER).op(Mstore);
    c.swap(1).op(Pop);
    for (index, ty) in parameters.iter().enumerate() {
        c.dup(index as u8 + 1);
        if index > 0 {
            c.push(32 * index as u64).op(Add);
        }
        c.op(Mload).extend(abi.validate_items(ty, &invalid));
    }
    c.into_items()
}

/// Main code followed by every lowered routine and the utilities they use.
fn assemble(
    name: impl Into<String>,
    ctx: &CodegenContext,
    main: Vec<AssemblyItem>,
    subs: Vec<Rc<Assembly>>,
) -> Assembly {
    let mut assembly = Assembly::new(name);
    assembly.extend(main);
    for items in ctx.lowered_functions().values() {
        assembly.extend(items.iter().cloned());
    }
    let utilities = ctx.function_collector().borrow().requested_by(assembly.items());
    assembly.extend(utilities);
    for sub in subs {
        assembly.add_sub(sub);
    }
    assembly
}

/// Deploys a forwarder that delegates every call to the linked instance
/// named `contract`.
fn clone_assembly(contract: &str) -> Assembly {
    let success = "forward_success";
    let mut c = Code::new();
    c.op(CallDataSize).push(0).dup(1).op(CallDataCopy);
    c.push(0)
        .dup(1)
        .op(CallDataSize)
        .push(0)
        .extend([AssemblyItem::PushLinkerPlaceholder(contract.to_string())])
        .op(Gas)
        .op(DelegateCall);
    c.op(ReturnDataSize).push(0).dup(1).op(ReturnDataCopy);
    c.jumpi_to(success);
    c.op(ReturnDataSize).push(0).op(Revert);
    c.label(success).op(ReturnDataSize).push(0).op(Return);
    let mut forwarder = Assembly::new(format!("{contract}_clone_deployed"));
    forwarder.extend(c.into_items());

    let mut assembly = Assembly::new(format!("{contract}_clone"));
    let sub = assembly.add_sub(Rc::new(forwarder));
    let mut c = Code::new();
    c.extend([AssemblyItem::PushSubSize(sub)])
        .dup(1)
        .extend([AssemblyItem::PushSubOffset(sub)])
        .push(0)
        .op(CodeCopy)
        .push(0)
        .op(Return);
    assembly.extend(c.into_items());
    assembly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{RegistrationPass, ResolutionPass};
    use covenant_core::NodeIdGen;
    use covenant_parser::Parser;
    use pretty_assertions::assert_eq;

    struct Program {
        registry: DeclarationRegistry,
        contracts: BTreeMap<String, NodeId>,
    }

    fn program(source: &str) -> Program {
        let mut ids = NodeIdGen::new();
        let units = vec![Rc::new(Parser::parse("a", source, &mut ids).unwrap())];
        let mut registry = DeclarationRegistry::new();
        RegistrationPass::new(&mut registry).run(&units).unwrap();
        ResolutionPass::new(&mut registry).run(&units).unwrap();
        let contracts = registry
            .contracts()
            .map(|c| (c.name().to_string(), c.definition.id))
            .collect();
        Program {
            registry,
            contracts,
        }
    }

    fn compile(
        program: &Program,
        name: &str,
        compiled: &BTreeMap<NodeId, Rc<Assembly>>,
    ) -> ContractArtifacts {
        let collector = Rc::new(RefCell::new(FunctionCollector::new()));
        let registry = &program.registry;
        ContractCompiler::new(registry, compiled, collector, RevertStrings::Default)
            .compile(program.contracts[name])
            .unwrap()
    }

    #[test]
    fn empty_contract_has_runtime_sub() {
        let program = program("contract A {}");
        let artifacts = compile(&program, "A", &BTreeMap::new());
        assert!(!artifacts.object.is_empty());
        assert!(!artifacts.runtime_object.is_empty());
        assert_eq!(artifacts.assembly.subs().len(), 1);
        assert_eq!(artifacts.assembly.subs()[0].name(), "A_deployed");
    }

    #[test]
    fn clone_links_to_the_contract() {
        let program = program("contract A { function f() public {} }");
        let artifacts = compile(&program, "A", &BTreeMap::new());
        let references: Vec<_> = artifacts.clone_object.link_references.values().collect();
        assert_eq!(references, vec!["A"]);
        assert!(artifacts.object.link_references.is_empty());
    }

    #[test]
    fn runtime_dispatches_on_selectors() {
        let source = "contract A { uint public x; function set(uint v) public { x = v; } }";
        let program = program(source);
        let artifacts = compile(&program, "A", &BTreeMap::new());
        let runtime = artifacts.runtime_assembly.items();
        let selectors = program.registry.interface_functions(program.contracts["A"]).unwrap();
        assert_eq!(selectors.len(), 2);
        for function in selectors {
            assert!(runtime.contains(&AssemblyItem::Push(Word::from_be_slice(&function.selector))));
        }
    }

    #[test]
    fn immutables_are_patched_during_deployment() {
        let program = program(
            "contract A { uint immutable x; constructor(uint v) { x = v; } \
             function get() public returns (uint) { return x; } }",
        );
        let artifacts = compile(&program, "A", &BTreeMap::new());
        assert_eq!(artifacts.runtime_object.immutable_references.len(), 1);
        let references = &artifacts.runtime_object.immutable_references;
        let positions: usize = references.values().map(Vec::len).sum();
        let stores = artifacts
            .assembly
            .items()
            .windows(2)
            .filter(|w| w[0] == AssemblyItem::Op(Add) && w[1] == AssemblyItem::Op(Mstore))
            .count();
        assert!(stores >= positions);
    }

    #[test]
    fn pointer_targets_are_lowered_in_both_contexts() {
        let program = program(
            "contract A {
                function (uint) returns (uint) op;
                function double(uint v) internal returns (uint) { return v + v; }
                constructor() { op = double; }
                function run(uint v) public returns (uint) { return op(v); }
            }",
        );
        let artifacts = compile(&program, "A", &BTreeMap::new());
        let has_double = |assembly: &Assembly| {
            assembly
                .items()
                .iter()
                .any(|i| matches!(i, AssemblyItem::Label(l) if l.starts_with("fun_double_")))
        };
        assert!(has_double(&artifacts.assembly));
        assert!(has_double(&artifacts.runtime_assembly));
        assert!(artifacts
            .runtime_assembly
            .label_position("dispatch_internal_in_1_out_1")
            .is_some());
    }

    #[test]
    fn created_contracts_are_embedded() {
        let program = program(
            "contract B {} contract A { function make() public returns (B) { return new B(); } }",
        );
        let mut compiled = BTreeMap::new();
        let b = compile(&program, "B", &compiled);
        compiled.insert(program.contracts["B"], b.assembly.clone());
        let a = compile(&program, "A", &compiled);
        let runtime_subs = a.runtime_assembly.subs();
        assert_eq!(runtime_subs.len(), 1);
        assert_eq!(runtime_subs[0].name(), "B");
    }

    #[test]
    fn generation_is_deterministic() {
        let source = "contract A { uint x; \
                      function f(uint a) public returns (uint) { x += a; return x * 2; } }";
        let first = compile(&program(source), "A", &BTreeMap::new());
        let second = compile(&program(source), "A", &BTreeMap::new());
        assert_eq!(first.object, second.object);
        assert_eq!(first.runtime_object, second.runtime_object);
    }
}
