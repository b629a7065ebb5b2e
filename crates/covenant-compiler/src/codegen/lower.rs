//! Lowering of function bodies, statements and expressions to stack code.
//!
//! The lowerer tracks the stack height statically. Variables live in stack
//! slots counted from the frame base, so reading one is a `DUPn` and writing
//! one is a `SWAPn POP`; anything deeper than sixteen slots is a
//! stack-too-deep error.
//!
//! Internal routines are called with the return label pushed below the
//! arguments. On entry the frame is `[ret, params..]`; return variables are
//! then pushed zero-initialised, locals on top of them. On exit the frame
//! is shuffled into `[returns.., ret]` and the routine jumps back.

use std::collections::BTreeMap;
use std::rc::Rc;

use covenant_core::{CodegenError, CompilerError, NodeId, Result, SourceLocation, Span};
use covenant_parser::ast::{
    AssignOp, BinaryOp, Block, ExprKind, Expression, FunctionDefinition, Statement, UnaryOp,
};

use super::context::{CodegenContext, CodegenMode, FREE_MEMORY_POINTER, dispatch_label};
use super::utils::{cleanup_items, conversion_items, return_layout, stack_layout_items};
use crate::assembly::{Assembly, AssemblyItem, Instruction, Word};
use crate::registry::{Declaration, DeclarationRegistry, MemberRef, VariableKind, selector};
use crate::types::{FunctionType, FunctionTypeKind, Type};

use Instruction::*;

/// Name under which an immutable is referenced in runtime code.
pub fn immutable_name(variable: NodeId) -> String {
    format!("immutable_{variable}")
}

/// Where `return` jumps to and the stack height it leaves behind.
#[derive(Debug, Clone)]
struct ReturnTarget {
    label: String,
    height: usize,
}

/// What a `_` placeholder expands to.
#[derive(Debug, Clone)]
struct Placeholder {
    function: Rc<FunctionDefinition>,
    next_modifier: usize,
    source: String,
}

/// Lowers code into items while tracking the stack height.
pub struct Lowerer<'a, 'c> {
    ctx: &'c mut CodegenContext,
    registry: &'a DeclarationRegistry,
    /// Creation code of contracts that can be instantiated with `new`.
    compiled: &'a BTreeMap<NodeId, Rc<Assembly>>,
    items: Vec<AssemblyItem>,
    height: usize,
    source: String,
    returns: Vec<ReturnTarget>,
    placeholders: Vec<Placeholder>,
    return_slots: Vec<usize>,
    return_types: Vec<Type>,
}

impl<'a, 'c> Lowerer<'a, 'c> {
    pub fn new(
        ctx: &'c mut CodegenContext,
        registry: &'a DeclarationRegistry,
        compiled: &'a BTreeMap<NodeId, Rc<Assembly>>,
        source: &str,
        height: usize,
    ) -> Self {
        Self {
            ctx,
            registry,
            compiled,
            items: Vec::new(),
            height,
            source: source.to_string(),
            returns: Vec::new(),
            placeholders: Vec::new(),
            return_slots: Vec::new(),
            return_types: Vec::new(),
        }
    }

    pub fn into_items(self) -> Vec<AssemblyItem> {
        self.items
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Override the tracked height, for code reached only by jumps.
    pub fn set_height(&mut self, height: usize) {
        self.height = height;
    }

    pub fn set_source(&mut self, source: &str) {
        self.source = source.to_string();
    }

    pub fn context(&mut self) -> &mut CodegenContext {
        self.ctx
    }

    pub fn emit(&mut self, item: AssemblyItem) {
        self.height = self.height.saturating_add_signed(item.stack_delta() as isize);
        self.items.push(item);
    }

    pub fn emit_all(&mut self, items: impl IntoIterator<Item = AssemblyItem>) {
        for item in items {
            self.emit(item);
        }
    }

    fn op(&mut self, op: Instruction) {
        self.emit(AssemblyItem::Op(op));
    }

    fn push(&mut self, value: u64) {
        self.emit(AssemblyItem::push(value));
    }

    fn push_label(&mut self, label: &str) {
        self.emit(AssemblyItem::PushLabel(label.to_string()));
    }

    fn label(&mut self, label: &str, height: usize) {
        self.emit(AssemblyItem::Label(label.to_string()));
        self.height = height;
    }

    fn location(&self, span: Span) -> SourceLocation {
        SourceLocation::new(self.source.clone(), span)
    }

    fn too_deep(&self, span: Span) -> CompilerError {
        CodegenError::StackTooDeep {
            location: self.location(span),
        }
        .into()
    }

    fn unsupported(&self, message: impl Into<String>, span: Span) -> CompilerError {
        CodegenError::Unsupported {
            message: message.into(),
            location: self.location(span),
        }
        .into()
    }

    /// Push a copy of the value in `slot`.
    pub fn dup_slot(&mut self, slot: usize, span: Span) -> Result<()> {
        let depth = self.height.checked_sub(slot).unwrap_or(0);
        if !(1..=16).contains(&depth) {
            return Err(self.too_deep(span));
        }
        self.emit(AssemblyItem::Dup(depth as u8));
        Ok(())
    }

    /// Move the stack top into `slot`.
    fn store_slot(&mut self, slot: usize, span: Span) -> Result<()> {
        let depth = self.height.checked_sub(slot + 1).unwrap_or(0);
        if !(1..=16).contains(&depth) {
            return Err(self.too_deep(span));
        }
        self.emit(AssemblyItem::Swap(depth as u8));
        self.op(Pop);
        Ok(())
    }

    fn pop_to(&mut self, height: usize) {
        while self.height > height {
            self.op(Pop);
        }
    }

    fn push_default(&mut self, ty: &Type) {
        if let Type::Function(f) = ty {
            self.ctx.add_to_internal_dispatch(f.arity(), None);
        }
        self.push(0);
    }

    // =========================================
    // Functions
    // =========================================

    /// Lower the routine for `function`, including its modifiers.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn function(&mut self, function: &Rc<FunctionDefinition>) -> Result<()> {
        let info = self.registry.function(function.id)?;
        self.return_types = info.ty.returns.clone();
        let label = super::context::function_label(function);
        self.label(&label, 1 + function.parameters.len());
        for (index, parameter) in function.parameters.iter().enumerate() {
            self.ctx.add_local_variable(parameter, 1 + index);
        }
        self.return_slots.clear();
        for (variable, ty) in function.returns.iter().zip(&info.ty.returns) {
            let slot = self.height;
            self.push_default(ty);
            self.ctx.add_local_variable(variable, slot);
            self.return_slots.push(slot);
        }

        self.modifier_level(function, 0)?;

        let layout = return_layout(function.parameters.len(), function.returns.len());
        let shuffle = stack_layout_items(layout).ok_or_else(|| self.too_deep(function.span))?;
        self.emit_all(shuffle);
        self.op(Jump);
        for variable in function.parameters.iter().chain(&function.returns) {
            self.ctx.remove_local_variable(variable.id);
        }
        Ok(())
    }

    fn modifier_level(&mut self, function: &Rc<FunctionDefinition>, index: usize) -> Result<()> {
        let Some(invocation) = function.modifiers.get(index) else {
            let body = function.body.as_ref().ok_or_else(|| {
                CompilerError::internal(format!(
                    "lowering unimplemented function '{}'",
                    function.name.name
                ))
            })?;
            return self.with_return_target(|this| this.block(body));
        };

        let most_derived = self.ctx.most_derived_contract()?;
        let target = self
            .registry
            .resolve_virtual_modifier(most_derived, &invocation.name.name)?;
        let modifier = self.registry.modifier(target)?;
        let base = self.height;
        let parameters = &modifier.definition.parameters;
        for (argument, parameter) in invocation.arguments.iter().zip(parameters) {
            let ty = &self.registry.variable(parameter.id)?.ty;
            let slot = self.height;
            self.expression_to(argument, ty)?;
            self.ctx.add_local_variable(parameter, slot);
        }

        let function_source = std::mem::replace(
            &mut self.source,
            self.registry.contract(modifier.contract)?.definition.source.clone(),
        );
        self.placeholders.push(Placeholder {
            function: function.clone(),
            next_modifier: index + 1,
            source: function_source.clone(),
        });
        let result = self.with_return_target(|this| this.block(&modifier.definition.body));
        self.placeholders.pop();
        self.source = function_source;
        result?;

        self.pop_to(base);
        for parameter in &modifier.definition.parameters {
            self.ctx.remove_local_variable(parameter.id);
        }
        Ok(())
    }

    fn with_return_target(&mut self, lower: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let target = ReturnTarget {
            label: self.ctx.new_label(),
            height: self.height,
        };
        self.returns.push(target.clone());
        let result = lower(self);
        self.returns.pop();
        result?;
        self.label(&target.label, target.height);
        Ok(())
    }

    /// Call the constructor of a contract in the hierarchy with arguments
    /// copied from stack slots.
    pub fn call_constructor_with_slots(
        &mut self,
        constructor: &FunctionDefinition,
        slots: &[usize],
    ) -> Result<()> {
        let before = self.height;
        let ret = self.ctx.new_label();
        self.push_label(&ret);
        for &slot in slots {
            self.dup_slot(slot, constructor.span)?;
        }
        let label = self.ctx.enqueue_function(constructor);
        self.push_label(&label);
        self.op(Jump);
        self.label(&ret, before);
        Ok(())
    }

    /// Call the constructor of a base with the arguments written in an
    /// inheritance specifier.
    pub fn call_constructor_with_arguments(
        &mut self,
        constructor: &FunctionDefinition,
        arguments: &[Expression],
    ) -> Result<()> {
        let before = self.height;
        let ret = self.ctx.new_label();
        self.push_label(&ret);
        let parameters = &self.registry.function(constructor.id)?.ty.parameters;
        for (argument, ty) in arguments.iter().zip(parameters) {
            self.expression_to(argument, ty)?;
        }
        let label = self.ctx.enqueue_function(constructor);
        self.push_label(&label);
        self.op(Jump);
        self.label(&ret, before);
        Ok(())
    }

    // =========================================
    // Statements
    // =========================================

    fn block(&mut self, block: &Block) -> Result<()> {
        let start = self.height;
        let mut declared = Vec::new();
        for statement in &block.statements {
            self.statement(statement, &mut declared)?;
        }
        self.pop_to(start);
        for id in declared {
            self.ctx.remove_local_variable(id);
        }
        Ok(())
    }

    fn scoped_statement(&mut self, statement: &Statement) -> Result<()> {
        let start = self.height;
        let mut declared = Vec::new();
        self.statement(statement, &mut declared)?;
        self.pop_to(start);
        for id in declared {
            self.ctx.remove_local_variable(id);
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement, declared: &mut Vec<NodeId>) -> Result<()> {
        match statement {
            Statement::Block(block) => self.block(block),
            Statement::VariableDeclaration { declaration, .. } => {
                let ty = &self.registry.variable(declaration.id)?.ty;
                let slot = self.height;
                match &declaration.value {
                    Some(value) => self.expression_to(value, ty)?,
                    None => self.push_default(ty),
                }
                self.ctx.add_local_variable(declaration, slot);
                declared.push(declaration.id);
                Ok(())
            }
            Statement::Expression(expr) => {
                self.expression(expr)?;
                let size = self.registry.expression_type(expr.id)?.stack_size();
                for _ in 0..size {
                    self.op(Pop);
                }
                Ok(())
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.expression_to(condition, &Type::Bool)?;
                self.op(IsZero);
                let height = self.height - 1;
                let otherwise = self.ctx.new_label();
                self.push_label(&otherwise);
                self.op(JumpI);
                self.scoped_statement(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let end = self.ctx.new_label();
                        self.push_label(&end);
                        self.op(Jump);
                        self.label(&otherwise, height);
                        self.scoped_statement(else_branch)?;
                        self.label(&end, height);
                    }
                    None => self.label(&otherwise, height),
                }
                Ok(())
            }
            Statement::Return { value, span, .. } => self.return_statement(value.as_ref(), *span),
            Statement::Placeholder { span, .. } => {
                let placeholder = self
                    .placeholders
                    .last()
                    .cloned()
                    .ok_or_else(|| self.unsupported("placeholder outside of a modifier", *span))?;
                let modifier_source =
                    std::mem::replace(&mut self.source, placeholder.source.clone());
                let result = self.modifier_level(&placeholder.function, placeholder.next_modifier);
                self.source = modifier_source;
                result
            }
        }
    }

    fn return_statement(&mut self, value: Option<&Expression>, span: Span) -> Result<()> {
        if let Some(value) = value {
            match self.return_types.clone().as_slice() {
                [single] => self.expression_to(value, single)?,
                _ => self.expression(value)?,
            }
            for slot in self.return_slots.clone().into_iter().rev() {
                self.store_slot(slot, span)?;
            }
        }
        let target = self
            .returns
            .last()
            .cloned()
            .ok_or_else(|| CompilerError::internal("return outside of a function body"))?;
        let height = self.height;
        self.pop_to(target.height);
        self.push_label(&target.label);
        self.op(Jump);
        self.height = height;
        Ok(())
    }

    // =========================================
    // Variables
    // =========================================

    fn read_variable(&mut self, variable: NodeId, span: Span) -> Result<()> {
        if self.ctx.is_local_variable(variable) {
            let slot = self.ctx.local_variable(variable)?.slot;
            return self.dup_slot(slot, span);
        }
        let info = self.registry.variable(variable)?;
        if info.is_constant() {
            let value = info.definition.value.as_ref().ok_or_else(|| {
                CompilerError::internal(format!(
                    "constant '{}' has no value",
                    info.definition.name.name
                ))
            })?;
            let source = match info.kind {
                VariableKind::State { contract } => {
                    self.registry.contract(contract)?.definition.source.clone()
                }
                _ => self.source.clone(),
            };
            let previous = std::mem::replace(&mut self.source, source);
            let result = self.expression_to(value, &info.ty);
            self.source = previous;
            return result;
        }
        if info.is_immutable() {
            match self.ctx.mode() {
                CodegenMode::Creation => {
                    let offset = self.ctx.immutable_memory_offset(variable)?;
                    self.push(offset as u64);
                    self.op(Mload);
                }
                CodegenMode::Runtime => {
                    self.emit(AssemblyItem::PushImmutable(immutable_name(variable)))
                }
            }
            return Ok(());
        }
        let (slot, _) = self.ctx.storage_location_of_state_variable(variable)?;
        self.emit(AssemblyItem::Push(slot));
        self.op(Sload);
        Ok(())
    }

    /// Store the stack top into `variable`, consuming it.
    pub fn write_variable(&mut self, variable: NodeId, span: Span) -> Result<()> {
        if self.ctx.is_local_variable(variable) {
            let slot = self.ctx.local_variable(variable)?.slot;
            return self.store_slot(slot, span);
        }
        let info = self.registry.variable(variable)?;
        if info.is_immutable() {
            if self.ctx.mode() != CodegenMode::Creation {
                return Err(CompilerError::internal(format!(
                    "immutable '{}' assigned outside of creation code",
                    info.definition.name.name
                )));
            }
            let offset = self.ctx.immutable_memory_offset(variable)?;
            self.push(offset as u64);
            self.op(Mstore);
            return Ok(());
        }
        let (slot, _) = self.ctx.storage_location_of_state_variable(variable)?;
        self.emit(AssemblyItem::Push(slot));
        self.op(Sstore);
        Ok(())
    }

    /// Push the value of a state variable, for getters.
    pub fn state_variable_value(&mut self, variable: NodeId, span: Span) -> Result<()> {
        self.read_variable(variable, span)
    }

    // =========================================
    // Expressions
    // =========================================

    /// Lower `expr` and convert the result to `target`.
    pub fn expression_to(&mut self, expr: &Expression, target: &Type) -> Result<()> {
        self.expression(expr)?;
        let from = self.registry.expression_type(expr.id)?;
        if from.stack_size() == 1 && target.stack_size() == 1 {
            self.emit_all(conversion_items(from, target));
        }
        Ok(())
    }

    /// Lower `expr`, leaving `stack_size` of its type on the stack.
    pub fn expression(&mut self, expr: &Expression) -> Result<()> {
        match &expr.kind {
            ExprKind::Number(_) | ExprKind::HexNumber(_) => {
                match self.registry.expression_type(expr.id)? {
                    Type::IntegerLiteral(value) => {
                        self.emit(AssemblyItem::Push(*value));
                        Ok(())
                    }
                    other => Err(CompilerError::internal(format!(
                        "number literal typed as {other:?}"
                    ))),
                }
            }
            ExprKind::Bool(value) => {
                self.push(u64::from(*value));
                Ok(())
            }
            ExprKind::String(_) | ExprKind::ElementaryType(_) | ExprKind::New { .. } => Ok(()),
            ExprKind::Identifier(_) => self.identifier(expr),
            ExprKind::Member { base, .. } => self.member(expr, base),
            ExprKind::Call { callee, arguments } => self.call(expr, callee, arguments),
            ExprKind::Binary { op, lhs, rhs } => self.binary(expr, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => self.unary(expr, *op, operand),
            ExprKind::Assign { op, target, value } => self.assignment(*op, target, value),
        }
    }

    fn identifier(&mut self, expr: &Expression) -> Result<()> {
        match self.registry.reference(expr.id)? {
            Declaration::Variable(variable) => self.read_variable(variable, expr.span),
            Declaration::Function(function) => {
                let arity = self.registry.function(function)?.ty.arity();
                self.ctx.add_to_internal_dispatch(arity, Some(function));
                self.push(u64::from(function.as_u32()));
                Ok(())
            }
            Declaration::This => {
                self.op(Address);
                Ok(())
            }
            Declaration::Contract(_) | Declaration::Magic(_) | Declaration::Builtin(_) => Ok(()),
            Declaration::Modifier(_) => {
                Err(self.unsupported("a modifier cannot be used as a value", expr.span))
            }
        }
    }

    fn member(&mut self, expr: &Expression, base: &Expression) -> Result<()> {
        match self.registry.member_ref(expr.id)? {
            MemberRef::MsgSender => self.op(Caller),
            MemberRef::MsgValue => self.op(CallValue),
            MemberRef::BlockNumber => self.op(Number),
            MemberRef::BlockTimestamp => self.op(Timestamp),
            MemberRef::Balance => {
                self.expression_to(base, &Type::Address)?;
                self.op(Balance);
            }
            MemberRef::ExternalFunction(_) | MemberRef::ExternalGetter(_) => {
                return Err(self.unsupported("external functions can only be called", expr.span));
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        expr: &Expression,
        callee: &Expression,
        arguments: &[Expression],
    ) -> Result<()> {
        match self.registry.expression_type(callee.id)? {
            Type::TypeType(target) => {
                let [argument] = arguments else {
                    return Err(CompilerError::internal("conversion with more than one argument"));
                };
                self.expression_to(argument, target)
            }
            Type::Function(function) => match function.kind {
                FunctionTypeKind::Require => self.require(arguments),
                FunctionTypeKind::Revert => {
                    let reason = string_argument(arguments.first());
                    let label = self.ctx.utils().revert_function(reason);
                    self.push_label(&label);
                    self.op(Jump);
                    Ok(())
                }
                FunctionTypeKind::SelfDestruct => {
                    let [beneficiary] = arguments else {
                        return Err(CompilerError::internal("selfdestruct takes one argument"));
                    };
                    self.expression_to(beneficiary, &Type::Address)?;
                    self.op(SelfDestruct);
                    Ok(())
                }
                FunctionTypeKind::Creation => self.creation(callee, arguments, function),
                FunctionTypeKind::External => self.external_call(callee, arguments, function),
                FunctionTypeKind::Internal => self.internal_call(callee, arguments, function),
            },
            other => Err(self.unsupported(
                format!("cannot call a value of type {other:?}"),
                expr.span,
            )),
        }
    }

    fn require(&mut self, arguments: &[Expression]) -> Result<()> {
        let condition = arguments
            .first()
            .ok_or_else(|| CompilerError::internal("require without a condition"))?;
        self.expression_to(condition, &Type::Bool)?;
        let ok = self.ctx.new_label();
        self.push_label(&ok);
        self.op(JumpI);
        let height = self.height;
        let label = self.ctx.utils().revert_function(string_argument(arguments.get(1)));
        self.push_label(&label);
        self.op(Jump);
        self.label(&ok, height);
        Ok(())
    }

    fn internal_call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        function: &FunctionType,
    ) -> Result<()> {
        let before = self.height;
        let ret = self.ctx.new_label();
        self.push_label(&ret);
        for (argument, ty) in arguments.iter().zip(&function.parameters) {
            self.expression_to(argument, ty)?;
        }
        let direct = match (&callee.kind, self.registry.reference(callee.id)) {
            (ExprKind::Identifier(_), Ok(Declaration::Function(id))) => Some(id),
            _ => None,
        };
        match direct {
            Some(id) => {
                let target = self
                    .registry
                    .resolve_virtual_function(self.ctx.most_derived_contract()?, id)?;
                let label = self.ctx.enqueue_function(&self.registry.function(target)?.definition);
                self.push_label(&label);
            }
            None => {
                self.expression(callee)?;
                let arity = function.arity();
                self.ctx.internal_function_called_through_dispatch(arity);
                self.push_label(&dispatch_label(arity));
            }
        }
        self.op(Jump);
        self.label(&ret, before + function.arity().outputs);
        Ok(())
    }

    fn external_call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        function: &FunctionType,
    ) -> Result<()> {
        let ExprKind::Member { base, .. } = &callee.kind else {
            return Err(self.unsupported("external call without a target contract", callee.span));
        };
        let signature = match self.registry.member_ref(callee.id)? {
            MemberRef::ExternalFunction(id) => self.registry.function_signature(id)?,
            MemberRef::ExternalGetter(id) => {
                format!("{}()", self.registry.variable(id)?.definition.name.name)
            }
            _ => return Err(self.unsupported("member is not an external function", callee.span)),
        };
        let arity = function.arity();
        let Some(routine) = self.ctx.abi_functions().external_call_function(arity) else {
            return Err(self.too_deep(callee.span));
        };

        let before = self.height;
        let ret = self.ctx.new_label();
        self.push_label(&ret);
        self.expression_to(base, &Type::Address)?;
        for (argument, ty) in arguments.iter().zip(&function.parameters) {
            self.expression_to(argument, ty)?;
        }
        self.emit(AssemblyItem::Push(Word::from_be_slice(&selector(&signature))));
        self.push_label(&routine);
        self.op(Jump);
        self.label(&ret, before + arity.outputs);

        let count = function.returns.len();
        for (index, ty) in function.returns.iter().enumerate() {
            let cleanup = cleanup_items(ty);
            if cleanup.is_empty() {
                continue;
            }
            let depth = (count - index - 1) as u8;
            if depth > 0 {
                self.emit(AssemblyItem::Swap(depth));
            }
            self.emit_all(cleanup);
            if depth > 0 {
                self.emit(AssemblyItem::Swap(depth));
            }
        }
        Ok(())
    }

    fn creation(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        function: &FunctionType,
    ) -> Result<()> {
        let Declaration::Contract(contract) = self.registry.reference(callee.id)? else {
            return Err(CompilerError::internal("creation of something that is not a contract"));
        };
        let assembly = self.compiled.get(&contract).cloned().ok_or_else(|| {
            CompilerError::internal(format!("contract {contract:?} created before it was compiled"))
        })?;
        let sub = self.ctx.sub_object_index(contract, || Ok(assembly))?;

        for (argument, ty) in arguments.iter().zip(&function.parameters) {
            self.expression_to(argument, ty)?;
        }
        self.push(FREE_MEMORY_POINTER);
        self.op(Mload);
        self.emit(AssemblyItem::PushSubSize(sub));
        self.emit(AssemblyItem::PushSubOffset(sub));
        self.emit(AssemblyItem::Dup(3));
        self.op(CodeCopy);
        for index in (0..arguments.len()).rev() {
            self.emit(AssemblyItem::Swap(1));
            self.emit(AssemblyItem::Dup(2));
            self.emit(AssemblyItem::PushSubSize(sub));
            self.op(Add);
            if index > 0 {
                self.push(32 * index as u64);
                self.op(Add);
            }
            self.op(Mstore);
        }
        self.emit(AssemblyItem::PushSubSize(sub));
        if !arguments.is_empty() {
            self.push(32 * arguments.len() as u64);
            self.op(Add);
        }
        self.emit(AssemblyItem::Dup(2));
        self.push(0);
        self.op(Create);
        self.emit(AssemblyItem::Swap(1));
        self.op(Pop);

        let forward = self.ctx.utils().revert_forward_function();
        self.emit(AssemblyItem::Dup(1));
        self.op(IsZero);
        self.push_label(&forward);
        self.op(JumpI);
        Ok(())
    }

    fn binary(
        &mut self,
        expr: &Expression,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
    ) -> Result<()> {
        if op.is_logical() {
            let before = self.height;
            let end = self.ctx.new_label();
            self.expression_to(lhs, &Type::Bool)?;
            self.emit(AssemblyItem::Dup(1));
            if op == BinaryOp::And {
                self.op(IsZero);
            }
            self.push_label(&end);
            self.op(JumpI);
            self.op(Pop);
            self.expression_to(rhs, &Type::Bool)?;
            self.label(&end, before + 1);
            return Ok(());
        }

        let operand = self.registry.operand_type(expr.id)?.clone();
        if matches!(
            op,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        ) {
            let routine = self.ctx.utils().checked_function(op, &operand)?;
            let before = self.height;
            let ret = self.ctx.new_label();
            self.push_label(&ret);
            self.expression_to(lhs, &operand)?;
            self.expression_to(rhs, &operand)?;
            self.push_label(&routine);
            self.op(Jump);
            self.label(&ret, before + 1);
            return Ok(());
        }

        self.expression_to(lhs, &operand)?;
        self.expression_to(rhs, &operand)?;
        let signed = operand.is_signed();
        let (less, greater) = if signed { (Slt, Sgt) } else { (Lt, Gt) };
        // [l r]: LT computes r < l
        match op {
            BinaryOp::Eq => self.op(Eq),
            BinaryOp::NotEq => {
                self.op(Eq);
                self.op(IsZero);
            }
            BinaryOp::Less => self.op(greater),
            BinaryOp::Greater => self.op(less),
            BinaryOp::LessEq => {
                self.op(less);
                self.op(IsZero);
            }
            BinaryOp::GreaterEq => {
                self.op(greater);
                self.op(IsZero);
            }
            BinaryOp::BitAnd => self.op(And),
            BinaryOp::BitOr => self.op(Or),
            BinaryOp::BitXor => self.op(Xor),
            other => {
                return Err(CompilerError::internal(format!(
                    "operator '{}' lowered as a comparison",
                    other.as_str()
                )));
            }
        }
        Ok(())
    }

    fn unary(&mut self, expr: &Expression, op: UnaryOp, operand: &Expression) -> Result<()> {
        match op {
            UnaryOp::Not => {
                self.expression_to(operand, &Type::Bool)?;
                self.op(IsZero);
            }
            UnaryOp::Neg => match self.registry.expression_type(operand.id)? {
                Type::IntegerLiteral(_) => {
                    self.expression(operand)?;
                    self.push(0);
                    self.op(Sub);
                }
                _ => {
                    let ty = self.registry.expression_type(expr.id)?.clone();
                    let routine = self.ctx.utils().checked_negation_function(&ty)?;
                    let before = self.height;
                    let ret = self.ctx.new_label();
                    self.push_label(&ret);
                    self.expression(operand)?;
                    self.push_label(&routine);
                    self.op(Jump);
                    self.label(&ret, before + 1);
                }
            },
        }
        Ok(())
    }

    fn assignment(&mut self, op: AssignOp, target: &Expression, value: &Expression) -> Result<()> {
        let Declaration::Variable(variable) = self.registry.reference(target.id)? else {
            return Err(self.unsupported("expression is not assignable", target.span));
        };
        let ty = self.registry.variable(variable)?.ty.clone();
        match op.binary_op() {
            None => self.expression_to(value, &ty)?,
            Some(op) => {
                let routine = self.ctx.utils().checked_function(op, &ty)?;
                let before = self.height;
                let ret = self.ctx.new_label();
                self.push_label(&ret);
                self.read_variable(variable, target.span)?;
                self.expression_to(value, &ty)?;
                self.push_label(&routine);
                self.op(Jump);
                self.label(&ret, before + 1);
            }
        }
        self.emit(AssemblyItem::Dup(1));
        self.write_variable(variable, target.span)
    }
}

fn string_argument(argument: Option<&Expression>) -> &str {
    match argument.map(|a| &a.kind) {
        Some(ExprKind::String(value)) => value,
        _ => "",
    }
}

/// Lower the routine for `function` in `ctx`.
pub fn lower_function(
    ctx: &mut CodegenContext,
    registry: &DeclarationRegistry,
    compiled: &BTreeMap<NodeId, Rc<Assembly>>,
    function: NodeId,
) -> Result<Vec<AssemblyItem>> {
    let info = registry.function(function)?;
    let source = &registry.contract(info.contract)?.definition.source;
    let mut lowerer = Lowerer::new(ctx, registry, compiled, source, 0);
    lowerer.function(&info.definition)?;
    Ok(lowerer.into_items())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::collector::FunctionCollector;
    use crate::codegen::context::RevertStrings;
    use crate::passes::{RegistrationPass, ResolutionPass};
    use covenant_core::NodeIdGen;
    use covenant_parser::Parser;
    use std::cell::RefCell;

    fn resolve(source: &str) -> DeclarationRegistry {
        let mut ids = NodeIdGen::new();
        let units = vec![Rc::new(Parser::parse("a", source, &mut ids).unwrap())];
        let mut registry = DeclarationRegistry::new();
        RegistrationPass::new(&mut registry).run(&units).unwrap();
        ResolutionPass::new(&mut registry).run(&units).unwrap();
        registry
    }

    fn function_id(registry: &DeclarationRegistry, name: &str) -> (NodeId, NodeId) {
        for contract in registry.contracts() {
            if let Some(f) = contract.definition.functions().find(|f| f.name.name == name) {
                return (contract.definition.id, f.id);
            }
        }
        panic!("no function {name}");
    }

    fn lower(source: &str, name: &str) -> (Result<Vec<AssemblyItem>>, CodegenContext) {
        let registry = resolve(source);
        let (contract, function) = function_id(&registry, name);
        let mut ctx = CodegenContext::new(
            CodegenMode::Runtime,
            RevertStrings::Default,
            Rc::new(RefCell::new(FunctionCollector::new())),
        );
        ctx.set_most_derived_contract(contract);
        for (slot, v) in registry.storage_variables(contract).unwrap().into_iter().enumerate() {
            ctx.add_state_variable(v, Word::from_u64(slot as u64), 0);
        }
        let items = lower_function(&mut ctx, &registry, &BTreeMap::new(), function);
        (items, ctx)
    }

    fn net_height(items: &[AssemblyItem]) -> i32 {
        items.iter().map(AssemblyItem::stack_delta).sum()
    }

    #[test]
    fn routine_starts_at_its_label_and_jumps_back() {
        let source = "contract A { function f(uint a, uint b) internal returns (uint) { \
                      uint c = a; return c; } }";
        let (items, _) = lower(source, "f");
        let items = items.unwrap();
        assert!(
            matches!(items.first(), Some(AssemblyItem::Label(label)) if label.starts_with("fun_f_"))
        );
        assert_eq!(items.last(), Some(&AssemblyItem::Op(Jump)));
    }

    #[test]
    fn straight_line_body_nets_to_results() {
        // [ret a] -> [r] before the final jump: one in, one out.
        let (items, _) = lower(
            "contract A { function f(uint a) internal returns (uint r) { r = a; } }",
            "f",
        );
        let items = items.unwrap();
        let body = &items[1..items.len() - 1];
        // Entry height 2 ([ret a]); exit height 2 ([r ret]).
        assert_eq!(net_height(body), 0);
    }

    #[test]
    fn calls_are_queued_once() {
        let (items, mut ctx) = lower(
            "contract A { function g() internal {} function f() internal { g(); g(); } }",
            "f",
        );
        items.unwrap();
        let queued = ctx.dequeue_function();
        assert!(queued.is_some());
        assert!(ctx.function_generation_queue_empty());
    }

    #[test]
    fn arithmetic_uses_checked_routines() {
        let (items, ctx) = lower(
            "contract A { function f(uint8 a) internal returns (uint8) { return a + 1; } }",
            "f",
        );
        let items = items.unwrap();
        assert!(items.contains(&AssemblyItem::PushLabel("checked_add_uint8".into())));
        assert!(ctx.function_collector().borrow().contains("panic_error_0x11"));
    }

    #[test]
    fn function_pointers_go_through_dispatch() {
        let (items, ctx) = lower(
            "contract A {
                function g(uint x) internal returns (uint) { return x; }
                function f() internal returns (uint) {
                    function (uint) returns (uint) p = g;
                    return p(1);
                }
            }",
            "f",
        );
        let items = items.unwrap();
        assert!(items.contains(&AssemblyItem::PushLabel("dispatch_internal_in_1_out_1".into())));
        let entries = &ctx.internal_dispatch()[&crate::types::Arity::new(1, 1)];
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn unassigned_function_pointer_registers_zero_entry() {
        let (items, ctx) = lower(
            "contract A {
                function f() internal {
                    function (uint) returns (uint) p;
                }
            }",
            "f",
        );
        items.unwrap();
        let entries = &ctx.internal_dispatch()[&crate::types::Arity::new(1, 1)];
        assert_eq!(entries.iter().next(), Some(&None));
    }

    #[test]
    fn modifiers_are_inlined() {
        let (items, _) = lower(
            "contract A {
                uint count;
                modifier twice { _; _; }
                function f() public twice { count += 1; }
            }",
            "f",
        );
        let items = items.unwrap();
        let stores = items.iter().filter(|i| **i == AssemblyItem::Op(Sstore)).count();
        assert_eq!(stores, 2);
    }

    #[test]
    fn too_many_locals() {
        let mut body = String::new();
        for i in 0..18 {
            body.push_str(&format!("uint v{i} = {i};"));
        }
        body.push_str("v0 = 1;");
        let source = format!("contract A {{ function f() internal {{ {body} }} }}");
        let (items, _) = lower(&source, "f");
        let err = items.unwrap_err();
        assert!(matches!(err, CompilerError::Codegen(CodegenError::StackTooDeep { .. })));
    }

    #[test]
    fn too_many_external_results() {
        let results = vec!["uint"; 17].join(", ");
        let source = format!(
            "contract B {{ function many() public returns ({results}) {{}} }}
             contract A {{ function f(address target) internal {{ B(target).many(); }} }}"
        );
        let (items, _) = lower(&source, "f");
        let err = items.unwrap_err();
        assert!(matches!(err, CompilerError::Codegen(CodegenError::StackTooDeep { .. })));
        assert_eq!(err.location().unwrap().source, "a");
    }

    #[test]
    fn immutables_read_as_placeholders_at_runtime() {
        let source = "contract A { uint immutable x; constructor() { x = 1; } \
                      function f() public returns (uint) { return x; } }";
        let (items, _) = lower(source, "f");
        let items = items.unwrap();
        assert!(items.iter().any(|i| matches!(i, AssemblyItem::PushImmutable(_))));
    }
}
