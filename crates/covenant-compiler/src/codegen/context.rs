//! Per-contract code generation state.
//!
//! A [`CodegenContext`] lives for the generation of one code object: either
//! the creation code or the runtime code of one contract. It owns the
//! variable bindings, the queue of internal functions still to be lowered,
//! the internal dispatch table and the sub-objects referenced so far.
//! Utility routines are shared across all contexts of a compile run through
//! the [`FunctionCollector`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use covenant_core::{CompilerError, NodeId, Result};
use covenant_parser::ast::{FunctionDefinition, FunctionKind, VariableDeclaration};
use rustc_hash::{FxHashMap, FxHashSet};

use super::collector::FunctionCollector;
use super::utils::{AbiFunctions, UtilFunctions};
use crate::assembly::{Assembly, AssemblyItem, Word};
use crate::types::Arity;

/// First free memory address; everything below is scratch space, the free
/// memory pointer and the zero slot.
pub const RESERVED_MEMORY_START: usize = 0x80;
/// Address of the free memory pointer.
pub const FREE_MEMORY_POINTER: u64 = 0x40;

/// Which code object a context generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodegenMode {
    Creation,
    Runtime,
}

/// What revert reasons end up in the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RevertStrings {
    /// Keep user-supplied reasons.
    #[default]
    Default,
    /// Drop every reason and revert with empty data.
    Strip,
    /// Keep user-supplied reasons and add reasons to compiler-generated
    /// reverts.
    Debug,
}

impl RevertStrings {
    pub fn as_str(self) -> &'static str {
        match self {
            RevertStrings::Default => "default",
            RevertStrings::Strip => "strip",
            RevertStrings::Debug => "debug",
        }
    }
}

impl std::str::FromStr for RevertStrings {
    type Err = CompilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(RevertStrings::Default),
            "strip" => Ok(RevertStrings::Strip),
            "debug" => Ok(RevertStrings::Debug),
            other => Err(CompilerError::internal(format!(
                "unknown revert strings setting '{other}'"
            ))),
        }
    }
}

/// A local variable bound to a stack slot of the function being lowered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrVariable {
    /// `var_{name}_{id}`, unique within the run.
    pub name: String,
    /// Slot relative to the frame base: the return address is slot 0.
    pub slot: usize,
}

/// Functions called through the internal dispatcher, grouped by arity.
/// `None` stands for the zero function pointer and sorts first.
pub type InternalDispatchMap = BTreeMap<Arity, BTreeSet<Option<NodeId>>>;

/// Label of the routine implementing `function`.
pub fn function_label(function: &FunctionDefinition) -> String {
    let name = match function.kind {
        FunctionKind::Function => function.name.name.as_str(),
        FunctionKind::Constructor => "constructor",
        FunctionKind::Fallback => "fallback",
    };
    format!("fun_{name}_{}", function.id)
}

/// Label of the internal dispatcher for `arity`.
pub fn dispatch_label(arity: Arity) -> String {
    format!("dispatch_internal_in_{}_out_{}", arity.inputs, arity.outputs)
}

#[derive(Debug)]
pub struct CodegenContext {
    mode: CodegenMode,
    revert_strings: RevertStrings,
    most_derived: Option<NodeId>,

    locals: FxHashMap<NodeId, IrVariable>,
    /// Offsets into the reserved memory area, in registration order.
    immutables: BTreeMap<NodeId, usize>,
    reserved_memory: usize,
    reserved_memory_taken: bool,
    state_variables: FxHashMap<NodeId, (Word, u32)>,

    pending: BTreeSet<NodeId>,
    enqueued: FxHashSet<NodeId>,
    lowered: BTreeMap<String, Vec<AssemblyItem>>,

    dispatch: InternalDispatchMap,
    dispatch_consumed: bool,

    collector: Rc<RefCell<FunctionCollector>>,
    subs: Vec<Rc<Assembly>>,
    sub_objects: BTreeMap<NodeId, usize>,

    var_counter: usize,
    label_counter: usize,
}

impl CodegenContext {
    pub fn new(
        mode: CodegenMode,
        revert_strings: RevertStrings,
        collector: Rc<RefCell<FunctionCollector>>,
    ) -> Self {
        Self {
            mode,
            revert_strings,
            most_derived: None,
            locals: FxHashMap::default(),
            immutables: BTreeMap::new(),
            reserved_memory: 0,
            reserved_memory_taken: false,
            state_variables: FxHashMap::default(),
            pending: BTreeSet::new(),
            enqueued: FxHashSet::default(),
            lowered: BTreeMap::new(),
            dispatch: InternalDispatchMap::new(),
            dispatch_consumed: false,
            collector,
            subs: Vec::new(),
            sub_objects: BTreeMap::new(),
            var_counter: 0,
            label_counter: 0,
        }
    }

    pub fn mode(&self) -> CodegenMode {
        self.mode
    }

    pub fn set_most_derived_contract(&mut self, contract: NodeId) {
        self.most_derived = Some(contract);
    }

    pub fn most_derived_contract(&self) -> Result<NodeId> {
        self.most_derived
            .ok_or_else(|| CompilerError::internal("most derived contract not set"))
    }

    // =========================================
    // Local variables
    // =========================================

    /// Bind `declaration` to `slot`. A declaration that is already bound
    /// keeps its binding.
    pub fn add_local_variable(
        &mut self,
        declaration: &VariableDeclaration,
        slot: usize,
    ) -> &IrVariable {
        self.locals.entry(declaration.id).or_insert_with(|| IrVariable {
            name: format!("var_{}_{}", declaration.name.name, declaration.id),
            slot,
        })
    }

    /// Drop the binding of a variable that went out of scope.
    pub fn remove_local_variable(&mut self, declaration: NodeId) {
        self.locals.remove(&declaration);
    }

    pub fn is_local_variable(&self, declaration: NodeId) -> bool {
        self.locals.contains_key(&declaration)
    }

    pub fn local_variable(&self, declaration: NodeId) -> Result<&IrVariable> {
        self.locals
            .get(&declaration)
            .ok_or_else(|| {
                CompilerError::internal(format!("unknown local variable {declaration:?}"))
            })
    }

    // =========================================
    // Immutables
    // =========================================

    /// Reserve `size` bytes of memory for an immutable during construction.
    pub fn register_immutable_variable(&mut self, declaration: NodeId, size: usize) -> Result<()> {
        if self.mode != CodegenMode::Creation {
            return Err(CompilerError::internal(
                "immutable variables can only be registered in creation code",
            ));
        }
        if self.reserved_memory_taken {
            return Err(CompilerError::internal(
                "immutable variable registered after reserved memory was taken",
            ));
        }
        if self.immutables.contains_key(&declaration) {
            return Err(CompilerError::internal(format!(
                "immutable variable {declaration:?} registered twice"
            )));
        }
        self.immutables.insert(declaration, self.reserved_memory);
        self.reserved_memory += size;
        Ok(())
    }

    /// Memory address holding the value of an immutable during construction.
    pub fn immutable_memory_offset(&self, declaration: NodeId) -> Result<usize> {
        self.immutables
            .get(&declaration)
            .map(|offset| RESERVED_MEMORY_START + offset)
            .ok_or_else(|| {
                CompilerError::internal(format!("unknown immutable variable {declaration:?}"))
            })
    }

    /// Total reserved memory. Can be taken exactly once, after which no more
    /// immutables can be registered.
    pub fn reserved_memory(&mut self) -> Result<usize> {
        if self.reserved_memory_taken {
            return Err(CompilerError::internal("reserved memory has already been taken"));
        }
        self.reserved_memory_taken = true;
        Ok(self.reserved_memory)
    }

    // =========================================
    // State variables
    // =========================================

    pub fn add_state_variable(&mut self, declaration: NodeId, slot: Word, byte_offset: u32) {
        self.state_variables.insert(declaration, (slot, byte_offset));
    }

    pub fn is_state_variable(&self, declaration: NodeId) -> bool {
        self.state_variables.contains_key(&declaration)
    }

    pub fn storage_location_of_state_variable(&self, declaration: NodeId) -> Result<(Word, u32)> {
        self.state_variables
            .get(&declaration)
            .copied()
            .ok_or_else(|| {
                CompilerError::internal(format!("unknown state variable {declaration:?}"))
            })
    }

    // =========================================
    // Function generation queue
    // =========================================

    /// Request that `function` be lowered and return its label. A function
    /// is queued at most once per context.
    pub fn enqueue_function(&mut self, function: &FunctionDefinition) -> String {
        if self.enqueued.insert(function.id) {
            self.pending.insert(function.id);
        }
        function_label(function)
    }

    /// Next function to lower, lowest id first.
    pub fn dequeue_function(&mut self) -> Option<NodeId> {
        self.pending.pop_first()
    }

    pub fn function_generation_queue_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Store the code of a lowered routine. The first body stored under a
    /// label wins.
    pub fn add_lowered_function(&mut self, label: String, items: Vec<AssemblyItem>) {
        self.lowered.entry(label).or_insert(items);
    }

    pub fn lowered_functions(&self) -> &BTreeMap<String, Vec<AssemblyItem>> {
        &self.lowered
    }

    // =========================================
    // Internal dispatch
    // =========================================

    /// Note that some function of `arity` is called through a pointer.
    pub fn internal_function_called_through_dispatch(&mut self, arity: Arity) {
        self.dispatch.entry(arity).or_default();
    }

    /// Note that `function` (or the zero pointer) may be called through the
    /// dispatcher for `arity`.
    pub fn add_to_internal_dispatch(&mut self, arity: Arity, function: Option<NodeId>) {
        self.dispatch.entry(arity).or_default().insert(function);
    }

    /// Seed the dispatch table, typically with the one handed off by the
    /// creation context.
    pub fn initialize_internal_dispatch(&mut self, map: InternalDispatchMap) {
        for (arity, functions) in map {
            self.dispatch.entry(arity).or_default().extend(functions);
        }
    }

    pub fn internal_dispatch(&self) -> &InternalDispatchMap {
        &self.dispatch
    }

    /// Hand off the dispatch table. Can be called once; the context's table
    /// is empty afterwards.
    pub fn consume_internal_dispatch_map(&mut self) -> Result<InternalDispatchMap> {
        if self.dispatch_consumed {
            return Err(CompilerError::internal("internal dispatch map consumed twice"));
        }
        self.dispatch_consumed = true;
        Ok(std::mem::take(&mut self.dispatch))
    }

    /// Whether no dispatch entry was added since the table was handed off.
    pub fn internal_dispatch_clean(&self) -> bool {
        self.dispatch.is_empty()
    }

    // =========================================
    // Shared utilities
    // =========================================

    pub fn utils(&self) -> UtilFunctions {
        UtilFunctions::new(self.collector.clone(), self.revert_strings)
    }

    pub fn abi_functions(&self) -> AbiFunctions {
        AbiFunctions::new(self.collector.clone(), self.revert_strings)
    }

    pub fn function_collector(&self) -> &Rc<RefCell<FunctionCollector>> {
        &self.collector
    }

    pub fn revert_strings(&self) -> RevertStrings {
        self.revert_strings
    }

    /// `message` when compiler-generated reverts carry reasons, else empty.
    pub fn revert_reason_if_debug(&self, message: &str) -> String {
        if self.revert_strings == RevertStrings::Debug {
            message.to_string()
        } else {
            String::new()
        }
    }

    // =========================================
    // Sub-objects
    // =========================================

    /// Index of the sub-object for `contract`, adding `assembly` if the
    /// contract is not embedded yet.
    pub fn sub_object_index(
        &mut self,
        contract: NodeId,
        assembly: impl FnOnce() -> Result<Rc<Assembly>>,
    ) -> Result<usize> {
        if let Some(&index) = self.sub_objects.get(&contract) {
            return Ok(index);
        }
        self.subs.push(assembly()?);
        let index = self.subs.len() - 1;
        self.sub_objects.insert(contract, index);
        Ok(index)
    }

    /// Contracts embedded as sub-objects so far.
    pub fn sub_objects_created(&self) -> &BTreeMap<NodeId, usize> {
        &self.sub_objects
    }

    pub fn take_subs(&mut self) -> Vec<Rc<Assembly>> {
        std::mem::take(&mut self.subs)
    }

    // =========================================
    // Names
    // =========================================

    /// A fresh variable name that cannot clash with a declared one.
    pub fn new_ir_variable(&mut self) -> String {
        self.var_counter += 1;
        format!("_{}", self.var_counter)
    }

    pub fn new_label(&mut self) -> String {
        self.label_counter += 1;
        format!("tag_{}", self.label_counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::Span;
    use covenant_parser::ast::{ElementaryType, Ident, TypeName, VariableMutability, Visibility};

    fn context(mode: CodegenMode) -> CodegenContext {
        let collector = Rc::new(RefCell::new(FunctionCollector::new()));
        CodegenContext::new(mode, RevertStrings::Default, collector)
    }

    fn variable(id: u32, name: &str) -> VariableDeclaration {
        VariableDeclaration {
            id: NodeId(id),
            name: Ident {
                name: name.to_string(),
                span: Span::default(),
            },
            type_name: TypeName::Elementary {
                ty: ElementaryType::Uint(256),
                span: Span::default(),
            },
            visibility: Visibility::Internal,
            mutability: VariableMutability::Mutable,
            value: None,
            span: Span::default(),
        }
    }

    #[test]
    fn locals_bind_once() {
        let mut ctx = context(CodegenMode::Runtime);
        let x = variable(7, "x");
        assert_eq!(ctx.add_local_variable(&x, 3).name, "var_x_7");
        assert_eq!(ctx.add_local_variable(&x, 5).slot, 3);
        assert!(ctx.is_local_variable(NodeId(7)));
        ctx.remove_local_variable(NodeId(7));
        assert!(ctx.local_variable(NodeId(7)).unwrap_err().is_internal());
    }

    #[test]
    fn immutables_do_not_overlap() {
        let mut ctx = context(CodegenMode::Creation);
        ctx.register_immutable_variable(NodeId(1), 32).unwrap();
        ctx.register_immutable_variable(NodeId(2), 32).unwrap();
        let a = ctx.immutable_memory_offset(NodeId(1)).unwrap();
        let b = ctx.immutable_memory_offset(NodeId(2)).unwrap();
        assert_eq!(a, RESERVED_MEMORY_START);
        assert_eq!(b, a + 32);
        assert!(ctx.register_immutable_variable(NodeId(1), 32).unwrap_err().is_internal());
    }

    #[test]
    fn reserved_memory_is_taken_once() {
        let mut ctx = context(CodegenMode::Creation);
        ctx.register_immutable_variable(NodeId(1), 32).unwrap();
        assert_eq!(ctx.reserved_memory().unwrap(), 32);
        assert!(ctx.reserved_memory().unwrap_err().is_internal());
        assert!(ctx.register_immutable_variable(NodeId(2), 32).is_err());
    }

    #[test]
    fn immutables_need_creation_mode() {
        let mut ctx = context(CodegenMode::Runtime);
        assert!(ctx.register_immutable_variable(NodeId(1), 32).unwrap_err().is_internal());
    }

    #[test]
    fn state_variable_locations() {
        let mut ctx = context(CodegenMode::Runtime);
        ctx.add_state_variable(NodeId(4), Word::from_u64(2), 0);
        assert!(ctx.is_state_variable(NodeId(4)));
        assert_eq!(
            ctx.storage_location_of_state_variable(NodeId(4)).unwrap(),
            (Word::from_u64(2), 0)
        );
        assert!(ctx.storage_location_of_state_variable(NodeId(5)).is_err());
    }

    #[test]
    fn lowered_functions_keep_first_body() {
        let mut ctx = context(CodegenMode::Runtime);
        ctx.add_lowered_function("f".into(), vec![AssemblyItem::push(1)]);
        ctx.add_lowered_function("f".into(), vec![AssemblyItem::push(2)]);
        assert_eq!(ctx.lowered_functions().len(), 1);
        assert_eq!(ctx.lowered_functions()["f"], vec![AssemblyItem::push(1)]);
    }

    #[test]
    fn dispatch_hand_off() {
        let mut ctx = context(CodegenMode::Creation);
        let arity = Arity::new(1, 0);
        ctx.internal_function_called_through_dispatch(arity);
        ctx.add_to_internal_dispatch(Arity::new(0, 1), Some(NodeId(9)));
        ctx.add_to_internal_dispatch(Arity::new(0, 1), None);
        assert!(!ctx.internal_dispatch_clean());

        let map = ctx.consume_internal_dispatch_map().unwrap();
        assert!(ctx.internal_dispatch_clean());
        assert!(map[&arity].is_empty());
        let entries: Vec<_> = map[&Arity::new(0, 1)].iter().copied().collect();
        assert_eq!(entries, vec![None, Some(NodeId(9))]);
        assert!(ctx.consume_internal_dispatch_map().unwrap_err().is_internal());

        let mut runtime = context(CodegenMode::Runtime);
        runtime.initialize_internal_dispatch(map);
        assert!(runtime.internal_dispatch().contains_key(&arity));
    }

    #[test]
    fn debug_reasons() {
        let ctx = CodegenContext::new(
            CodegenMode::Runtime,
            RevertStrings::Debug,
            Rc::new(RefCell::new(FunctionCollector::new())),
        );
        assert_eq!(ctx.revert_reason_if_debug("boom"), "boom");
        assert_eq!(
            context(CodegenMode::Runtime).revert_reason_if_debug("boom"),
            ""
        );
        assert_eq!(
            "strip".parse::<RevertStrings>().unwrap(),
            RevertStrings::Strip
        );
    }
}
