//! Resolution pass - bind every name and type every expression.
//!
//! Runs three sweeps over the compile-ordered units, each completing for
//! the whole program before the next:
//!
//! 1. **Bases**: resolve inheritance specifiers, reject cycles, compute the
//!    C3 linearization of every contract.
//! 2. **Signatures**: resolve the types of state variables, parameters and
//!    return values.
//! 3. **Bodies**: with the current contract bound, resolve every identifier
//!    and member access and check every expression against its context.
//!
//! Results are recorded in the [`DeclarationRegistry`].

use std::rc::Rc;

use covenant_core::{NodeId, ResolutionError, Result, SourceLocation, Span};
use covenant_parser::ast::{
    BinaryOp, Block, ContractDefinition, ExprKind, Expression, FunctionDefinition, FunctionKind,
    ModifierDefinition, SourceUnit, Statement, TypeName, UnaryOp, VariableDeclaration, Visibility,
};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

use crate::assembly::Word;
use crate::registry::{Declaration, DeclarationRegistry, Member, MemberRef, VariableKind};
use crate::types::{FunctionType, FunctionTypeKind, MagicKind, Type};

/// Output of the resolution pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionOutput {
    pub contracts_linearized: usize,
    pub functions_checked: usize,
    pub expressions_typed: usize,
}

/// Pass 2: resolve names and types.
pub struct ResolutionPass<'a> {
    registry: &'a mut DeclarationRegistry,
    output: ResolutionOutput,
}

impl<'a> ResolutionPass<'a> {
    pub fn new(registry: &'a mut DeclarationRegistry) -> Self {
        Self {
            registry,
            output: ResolutionOutput::default(),
        }
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self, units: &[Rc<SourceUnit>]) -> Result<ResolutionOutput> {
        let contracts: Vec<Rc<ContractDefinition>> = units
            .iter()
            .flat_map(|unit| unit.contracts().cloned())
            .collect();

        self.linearize_all(&contracts)?;

        for contract in &contracts {
            self.resolve_signatures(contract)?;
        }

        for contract in &contracts {
            let mut checker = BodyChecker::new(self.registry, contract);
            checker.check_contract()?;
            self.output.functions_checked += checker.functions_checked;
            self.output.expressions_typed += checker.expressions_typed;
        }
        Ok(self.output)
    }

    // =========================================
    // Sweep 1: inheritance
    // =========================================

    fn linearize_all(&mut self, contracts: &[Rc<ContractDefinition>]) -> Result<()> {
        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let mut nodes: FxHashMap<NodeId, NodeIndex> = FxHashMap::default();
        for contract in contracts {
            nodes.insert(contract.id, graph.add_node(contract.id));
        }

        let mut direct_bases: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for contract in contracts {
            let mut bases = Vec::with_capacity(contract.bases.len());
            for specifier in &contract.bases {
                let base = self
                    .registry
                    .contract_in_scope(&contract.source, &specifier.name.name)
                    .ok_or_else(|| ResolutionError::UnknownType {
                        name: specifier.name.name.clone(),
                        location: SourceLocation::new(&contract.source, specifier.name.span),
                    })?;
                if base == contract.id {
                    return Err(cyclic(contract).into());
                }
                if bases.contains(&base) {
                    return Err(ResolutionError::DuplicateDeclaration {
                        name: specifier.name.name.clone(),
                        location: SourceLocation::new(&contract.source, specifier.span),
                    }
                    .into());
                }
                self.registry
                    .record_reference(specifier.id, Declaration::Contract(base));
                graph.add_edge(nodes[&contract.id], nodes[&base], ());
                bases.push(base);
            }
            direct_bases.insert(contract.id, bases);
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let id = graph[cycle.node_id()];
            match contracts.iter().find(|c| c.id == id) {
                Some(contract) => cyclic(contract).into(),
                None => covenant_core::CompilerError::internal("cycle through unknown contract"),
            }
        })?;

        // Bases come after their derived contracts in topological order.
        for index in order.into_iter().rev() {
            let id = graph[index];
            let bases = &direct_bases[&id];
            let linearization = self.c3(id, bases)?;
            self.registry.set_linearization(id, linearization)?;
            self.output.contracts_linearized += 1;
        }
        Ok(())
    }

    /// `L(C) = C + merge(L(Bn), ..., L(B1), [Bn, ..., B1])`
    fn c3(&self, contract: NodeId, bases: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut lists: Vec<Vec<NodeId>> = Vec::with_capacity(bases.len() + 1);
        for base in bases.iter().rev() {
            lists.push(self.registry.linearization(*base)?.to_vec());
        }
        lists.push(bases.iter().rev().copied().collect());

        let mut result = vec![contract];
        loop {
            lists.retain(|list| !list.is_empty());
            if lists.is_empty() {
                return Ok(result);
            }
            let candidate = lists.iter().map(|list| list[0]).find(|head| {
                lists.iter().all(|list| !list[1..].contains(head))
            });
            let Some(next) = candidate else {
                let definition = &self.registry.contract(contract)?.definition;
                return Err(ResolutionError::LinearizationImpossible {
                    name: definition.name.name.clone(),
                    location: SourceLocation::new(&definition.source, definition.name.span),
                }
                .into());
            };
            result.push(next);
            for list in &mut lists {
                if list[0] == next {
                    list.remove(0);
                }
            }
        }
    }

    // =========================================
    // Sweep 2: signatures
    // =========================================

    fn resolve_signatures(&mut self, contract: &ContractDefinition) -> Result<()> {
        for variable in contract.state_variables() {
            let ty = resolve_type_name(self.registry, &contract.source, &variable.type_name)?;
            self.registry.set_variable_type(variable.id, ty)?;
        }
        for function in contract.functions() {
            let parameters = self.register_parameters(
                &contract.source,
                &function.parameters,
                VariableKind::Parameter,
            )?;
            let returns = self.register_parameters(
                &contract.source,
                &function.returns,
                VariableKind::Return,
            )?;
            self.registry
                .set_function_type(function.id, FunctionType::internal(parameters, returns))?;
        }
        for modifier in contract.modifiers() {
            self.register_parameters(
                &contract.source,
                &modifier.parameters,
                VariableKind::Parameter,
            )?;
        }
        Ok(())
    }

    fn register_parameters(
        &mut self,
        source: &str,
        parameters: &[Rc<VariableDeclaration>],
        kind: VariableKind,
    ) -> Result<Vec<Type>> {
        let mut types = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            let ty = resolve_type_name(self.registry, source, &parameter.type_name)?;
            self.registry.add_variable(parameter.clone(), kind, ty.clone());
            types.push(ty);
        }
        Ok(types)
    }
}

fn cyclic(contract: &ContractDefinition) -> ResolutionError {
    ResolutionError::CyclicInheritance {
        name: contract.name.name.clone(),
        location: SourceLocation::new(&contract.source, contract.name.span),
    }
}

/// Resolve a written type in the scope of `source`.
pub fn resolve_type_name(
    registry: &DeclarationRegistry,
    source: &str,
    type_name: &TypeName,
) -> Result<Type> {
    match type_name {
        TypeName::Elementary { ty, .. } => Ok(Type::from_elementary(*ty)),
        TypeName::UserDefined(ident) => registry
            .contract_in_scope(source, &ident.name)
            .map(Type::Contract)
            .ok_or_else(|| {
                ResolutionError::UnknownType {
                    name: ident.name.clone(),
                    location: SourceLocation::new(source, ident.span),
                }
                .into()
            }),
        TypeName::Function(f) => {
            let parameters = f
                .parameters
                .iter()
                .map(|p| resolve_type_name(registry, source, p))
                .collect::<Result<Vec<_>>>()?;
            let returns = f
                .returns
                .iter()
                .map(|r| resolve_type_name(registry, source, r))
                .collect::<Result<Vec<_>>>()?;
            Ok(Type::Function(FunctionType::internal(parameters, returns)))
        }
    }
}

// ============================================================================
// Sweep 3: bodies
// ============================================================================

/// What kind of code is being checked.
#[derive(Debug, Clone)]
enum BodyKind {
    Function {
        kind: FunctionKind,
        returns: Vec<Type>,
    },
    Modifier,
    /// State variable initializers and base constructor arguments.
    Initializer,
}

struct BodyChecker<'r> {
    registry: &'r mut DeclarationRegistry,
    contract: Rc<ContractDefinition>,
    body: BodyKind,
    scopes: Vec<FxHashMap<String, NodeId>>,
    functions_checked: usize,
    expressions_typed: usize,
}

impl<'r> BodyChecker<'r> {
    fn new(registry: &'r mut DeclarationRegistry, contract: &Rc<ContractDefinition>) -> Self {
        Self {
            registry,
            contract: contract.clone(),
            body: BodyKind::Initializer,
            scopes: Vec::new(),
            functions_checked: 0,
            expressions_typed: 0,
        }
    }

    fn location(&self, span: Span) -> SourceLocation {
        SourceLocation::new(&self.contract.source, span)
    }

    fn check_contract(&mut self) -> Result<()> {
        let contract = self.contract.clone();

        self.body = BodyKind::Initializer;
        for specifier in &contract.bases {
            let Some(arguments) = &specifier.arguments else {
                continue;
            };
            let Declaration::Contract(base) = self.registry.reference(specifier.id)? else {
                return Err(covenant_core::CompilerError::internal(
                    "base specifier is not a contract",
                ));
            };
            let parameters = self.constructor_parameters(base)?;
            self.check_arguments(arguments, &parameters, specifier.span)?;
        }
        for variable in contract.state_variables() {
            if let Some(value) = &variable.value {
                let expected = self.registry.variable(variable.id)?.ty.clone();
                let found = self.expr(value)?;
                self.expect(value, &found, &expected)?;
            }
        }

        for function in contract.functions() {
            self.check_function(function)?;
        }
        for modifier in contract.modifiers() {
            self.check_modifier(modifier)?;
        }
        Ok(())
    }

    fn constructor_parameters(&self, contract: NodeId) -> Result<Vec<Type>> {
        match self.registry.contract(contract)?.definition.constructor() {
            Some(constructor) => Ok(self.registry.function(constructor.id)?.ty.parameters.clone()),
            None => Ok(Vec::new()),
        }
    }

    fn check_function(&mut self, function: &FunctionDefinition) -> Result<()> {
        let ty = self.registry.function(function.id)?.ty.clone();
        self.body = BodyKind::Function {
            kind: function.kind,
            returns: ty.returns.clone(),
        };
        self.scopes = vec![FxHashMap::default()];
        for variable in function.parameters.iter().chain(&function.returns) {
            self.declare(variable)?;
        }

        for invocation in &function.modifiers {
            let member = self
                .registry
                .find_member(self.contract.id, &invocation.name.name)?;
            let modifier = match member {
                Some(Member::Modifier(id)) => id,
                _ => {
                    return Err(ResolutionError::UndeclaredIdentifier {
                        name: invocation.name.name.clone(),
                        location: self.location(invocation.name.span),
                    }
                    .into());
                }
            };
            self.registry
                .record_reference(invocation.id, Declaration::Modifier(modifier));
            let parameters = self
                .registry
                .modifier(modifier)?
                .definition
                .parameters
                .iter()
                .map(|p| self.registry.variable(p.id).map(|v| v.ty.clone()))
                .collect::<Result<Vec<_>>>()?;
            self.check_arguments(&invocation.arguments, &parameters, invocation.span)?;
        }

        if let Some(body) = &function.body {
            self.check_block(body)?;
        }
        self.scopes.clear();
        self.functions_checked += 1;
        Ok(())
    }

    fn check_modifier(&mut self, modifier: &ModifierDefinition) -> Result<()> {
        self.body = BodyKind::Modifier;
        self.scopes = vec![FxHashMap::default()];
        for parameter in &modifier.parameters {
            self.declare(parameter)?;
        }
        self.check_block(&modifier.body)?;
        self.scopes.clear();
        Ok(())
    }

    /// Bring a parameter or local into the innermost scope.
    fn declare(&mut self, variable: &VariableDeclaration) -> Result<()> {
        if variable.name.name.is_empty() {
            return Ok(());
        }
        if self.scopes.iter().any(|s| s.contains_key(&variable.name.name)) {
            return Err(ResolutionError::DuplicateDeclaration {
                name: variable.name.name.clone(),
                location: self.location(variable.name.span),
            }
            .into());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(variable.name.name.clone(), variable.id);
        }
        Ok(())
    }

    // =========================================
    // Statements
    // =========================================

    fn check_block(&mut self, block: &Block) -> Result<()> {
        self.scopes.push(FxHashMap::default());
        for statement in &block.statements {
            self.check_statement(statement)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn check_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Block(block) => self.check_block(block),
            Statement::VariableDeclaration { declaration, .. } => {
                let source = &self.contract.source;
                let ty = resolve_type_name(self.registry, source, &declaration.type_name)?;
                if let Some(value) = &declaration.value {
                    let found = self.expr(value)?;
                    self.expect(value, &found, &ty)?;
                }
                self.registry
                    .add_variable(declaration.clone(), VariableKind::Local, ty);
                self.declare(declaration)
            }
            Statement::Expression(expr) => self.expr(expr).map(drop),
            Statement::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                let found = self.expr(condition)?;
                self.expect(condition, &found, &Type::Bool)?;
                self.check_branch(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.check_branch(else_branch)?;
                }
                Ok(())
            }
            Statement::Return { value, span, .. } => self.check_return(value.as_ref(), *span),
            Statement::Placeholder { span, .. } => match self.body {
                BodyKind::Modifier => Ok(()),
                _ => Err(self.invalid("'_' is only allowed inside modifiers", *span)),
            },
        }
    }

    fn check_branch(&mut self, statement: &Statement) -> Result<()> {
        self.scopes.push(FxHashMap::default());
        let result = self.check_statement(statement);
        self.scopes.pop();
        result
    }

    fn check_return(&mut self, value: Option<&Expression>, span: Span) -> Result<()> {
        let returns = match &self.body {
            BodyKind::Function { returns, .. } => returns.clone(),
            BodyKind::Modifier => Vec::new(),
            BodyKind::Initializer => return Err(self.invalid("return outside of a function", span)),
        };
        let Some(value) = value else {
            return Ok(());
        };
        let found = self.expr(value)?;
        match (returns.as_slice(), &found) {
            ([], _) => Err(ResolutionError::ArgumentCount {
                expected: 0,
                found: 1,
                location: self.location(value.span),
            }
            .into()),
            ([single], _) => self.expect(value, &found, single),
            (many, Type::Tuple(items)) if many.len() == items.len() => {
                for (item, expected) in items.iter().zip(many) {
                    self.expect(value, item, expected)?;
                }
                Ok(())
            }
            (many, _) => Err(ResolutionError::TypeMismatch {
                expected: self.registry.describe(&Type::Tuple(many.to_vec())),
                found: self.registry.describe(&found),
                location: self.location(value.span),
            }
            .into()),
        }
    }

    // =========================================
    // Expressions
    // =========================================

    fn expr(&mut self, expr: &Expression) -> Result<Type> {
        let ty = self.expr_inner(expr)?;
        self.registry.record_type(expr.id, ty.clone());
        self.expressions_typed += 1;
        Ok(ty)
    }

    fn expr_inner(&mut self, expr: &Expression) -> Result<Type> {
        match &expr.kind {
            ExprKind::Number(digits) => Word::from_dec_str(digits)
                .map(Type::IntegerLiteral)
                .ok_or_else(|| {
                    self.invalid("number literal does not fit into 256 bits", expr.span)
                }),
            ExprKind::HexNumber(digits) => Word::from_hex_str(digits)
                .map(Type::IntegerLiteral)
                .ok_or_else(|| self.invalid("hex literal does not fit into 256 bits", expr.span)),
            ExprKind::Bool(_) => Ok(Type::Bool),
            ExprKind::String(value) => Ok(Type::StringLiteral(value.clone())),
            ExprKind::ElementaryType(ty) => {
                Ok(Type::TypeType(Box::new(Type::from_elementary(*ty))))
            }
            ExprKind::Identifier(name) => {
                let declaration = self.resolve_identifier(name, expr.span)?;
                self.registry.record_reference(expr.id, declaration);
                self.declaration_type(declaration, expr.span)
            }
            ExprKind::New { contract } => {
                let id = self
                    .registry
                    .contract_in_scope(&self.contract.source, &contract.name)
                    .ok_or_else(|| ResolutionError::UnknownType {
                        name: contract.name.clone(),
                        location: self.location(contract.span),
                    })?;
                self.registry.record_reference(expr.id, Declaration::Contract(id));
                self.registry.record_creation(self.contract.id, id);
                Ok(Type::Function(FunctionType {
                    kind: FunctionTypeKind::Creation,
                    parameters: self.constructor_parameters(id)?,
                    returns: vec![Type::Contract(id)],
                }))
            }
            ExprKind::Member { base, member } => {
                let base_ty = self.expr(base)?;
                let (member_ref, ty) = self.resolve_member(&base_ty, &member.name, member.span)?;
                self.registry.record_member(expr.id, member_ref);
                Ok(ty)
            }
            ExprKind::Call { callee, arguments } => self.check_call(expr, callee, arguments),
            ExprKind::Binary { op, lhs, rhs } => self.check_binary(expr, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => {
                let found = self.expr(operand)?;
                match op {
                    UnaryOp::Not => {
                        self.expect(operand, &found, &Type::Bool)?;
                        Ok(Type::Bool)
                    }
                    UnaryOp::Neg => match found {
                        Type::IntegerLiteral(_) => Ok(Type::Int(256)),
                        Type::Int(bits) => Ok(Type::Int(bits)),
                        other => Err(self.invalid(
                            format!("unary - is not allowed on {}", self.registry.describe(&other)),
                            expr.span,
                        )),
                    },
                }
            }
            ExprKind::Assign { op, target, value } => {
                if !matches!(target.kind, ExprKind::Identifier(_)) {
                    return Err(self.invalid("expression is not assignable", target.span));
                }
                let target_ty = self.expr(target)?;
                let Declaration::Variable(variable) = self.registry.reference(target.id)? else {
                    return Err(self.invalid("expression is not assignable", target.span));
                };
                let info = self.registry.variable(variable)?;
                if info.is_constant() {
                    return Err(self.invalid("cannot assign to a constant variable", target.span));
                }
                if info.is_immutable() {
                    let in_constructor = matches!(
                        self.body,
                        BodyKind::Function {
                            kind: FunctionKind::Constructor,
                            ..
                        }
                    );
                    let own = info.kind
                        == VariableKind::State {
                            contract: self.contract.id,
                        };
                    if !in_constructor || !own {
                        let message = "immutable variables can only be assigned in the constructor \
                                       of their contract";
                        return Err(self.invalid(message, target.span));
                    }
                }
                if op.binary_op().is_some() && !target_ty.is_integer() {
                    let described = self.registry.describe(&target_ty);
                    return Err(self.invalid(
                        format!("compound assignment is not allowed on {described}"),
                        expr.span,
                    ));
                }
                let found = self.expr(value)?;
                self.expect(value, &found, &target_ty)?;
                Ok(target_ty)
            }
        }
    }

    fn resolve_identifier(&self, name: &str, span: Span) -> Result<Declaration> {
        for scope in self.scopes.iter().rev() {
            if let Some(&id) = scope.get(name) {
                return Ok(Declaration::Variable(id));
            }
        }
        match self.registry.find_member(self.contract.id, name)? {
            Some(Member::Function(id)) => return Ok(Declaration::Function(id)),
            Some(Member::Modifier(id)) => return Ok(Declaration::Modifier(id)),
            Some(Member::StateVariable(id)) => return Ok(Declaration::Variable(id)),
            None => {}
        }
        if let Some(id) = self.registry.contract_in_scope(&self.contract.source, name) {
            return Ok(Declaration::Contract(id));
        }
        Ok(match name {
            "msg" => Declaration::Magic(MagicKind::Msg),
            "block" => Declaration::Magic(MagicKind::Block),
            "this" => Declaration::This,
            "require" => Declaration::Builtin(FunctionTypeKind::Require),
            "revert" => Declaration::Builtin(FunctionTypeKind::Revert),
            "selfdestruct" => Declaration::Builtin(FunctionTypeKind::SelfDestruct),
            _ => {
                return Err(ResolutionError::UndeclaredIdentifier {
                    name: name.to_string(),
                    location: self.location(span),
                }
                .into());
            }
        })
    }

    fn declaration_type(&self, declaration: Declaration, span: Span) -> Result<Type> {
        Ok(match declaration {
            Declaration::Variable(id) => self.registry.variable(id)?.ty.clone(),
            Declaration::Function(id) => Type::Function(self.registry.function(id)?.ty.clone()),
            Declaration::Contract(id) => Type::TypeType(Box::new(Type::Contract(id))),
            Declaration::Magic(kind) => Type::Magic(kind),
            Declaration::This => Type::Contract(self.contract.id),
            Declaration::Builtin(kind) => Type::Function(FunctionType {
                kind,
                parameters: Vec::new(),
                returns: Vec::new(),
            }),
            Declaration::Modifier(_) => {
                return Err(self.invalid("a modifier cannot be used as a value", span));
            }
        })
    }

    fn resolve_member(&self, base: &Type, name: &str, span: Span) -> Result<(MemberRef, Type)> {
        let found = match (base, name) {
            (Type::Magic(MagicKind::Msg), "sender") => Some((MemberRef::MsgSender, Type::Address)),
            (Type::Magic(MagicKind::Msg), "value") => Some((MemberRef::MsgValue, Type::Uint(256))),
            (Type::Magic(MagicKind::Block), "number") => {
                Some((MemberRef::BlockNumber, Type::Uint(256)))
            }
            (Type::Magic(MagicKind::Block), "timestamp") => {
                Some((MemberRef::BlockTimestamp, Type::Uint(256)))
            }
            (Type::Contract(contract), _) => match self.registry.find_member(*contract, name)? {
                Some(Member::Function(id)) => {
                    let info = self.registry.function(id)?;
                    info.definition.visibility.is_externally_visible().then(|| {
                        (
                            MemberRef::ExternalFunction(id),
                            Type::Function(FunctionType {
                                kind: FunctionTypeKind::External,
                                ..info.ty.clone()
                            }),
                        )
                    })
                }
                Some(Member::StateVariable(id)) => {
                    let info = self.registry.variable(id)?;
                    let public = info.definition.visibility == Visibility::Public;
                    public.then(|| {
                        (
                            MemberRef::ExternalGetter(id),
                            Type::Function(FunctionType {
                                kind: FunctionTypeKind::External,
                                parameters: Vec::new(),
                                returns: vec![info.ty.clone()],
                            }),
                        )
                    })
                }
                Some(Member::Modifier(_)) => None,
                None if name == "balance" => Some((MemberRef::Balance, Type::Uint(256))),
                None => None,
            },
            (Type::Address, "balance") => Some((MemberRef::Balance, Type::Uint(256))),
            _ => None,
        };
        found.ok_or_else(|| {
            ResolutionError::UnknownMember {
                member: name.to_string(),
                ty: self.registry.describe(base),
                location: self.location(span),
            }
            .into()
        })
    }

    fn check_call(
        &mut self,
        expr: &Expression,
        callee: &Expression,
        arguments: &[Expression],
    ) -> Result<Type> {
        let callee_ty = self.expr(callee)?;
        match callee_ty {
            Type::TypeType(target) => {
                let [argument] = arguments else {
                    return Err(ResolutionError::ArgumentCount {
                        expected: 1,
                        found: arguments.len(),
                        location: self.location(expr.span),
                    }
                    .into());
                };
                let found = self.expr(argument)?;
                if !found.is_explicitly_convertible_to(&target)
                    && !self.registry.is_implicitly_convertible(&found, &target)
                {
                    return Err(self.mismatch(argument, &target, &found));
                }
                Ok(*target)
            }
            Type::Function(function) => match function.kind {
                FunctionTypeKind::Require => {
                    self.check_count(arguments, 1..=2, expr.span)?;
                    let found = self.expr(&arguments[0])?;
                    self.expect(&arguments[0], &found, &Type::Bool)?;
                    if let Some(reason) = arguments.get(1) {
                        self.expect_string(reason)?;
                    }
                    Ok(Type::Tuple(Vec::new()))
                }
                FunctionTypeKind::Revert => {
                    self.check_count(arguments, 0..=1, expr.span)?;
                    if let Some(reason) = arguments.first() {
                        self.expect_string(reason)?;
                    }
                    Ok(Type::Tuple(Vec::new()))
                }
                FunctionTypeKind::SelfDestruct => {
                    self.check_count(arguments, 1..=1, expr.span)?;
                    let found = self.expr(&arguments[0])?;
                    self.expect(&arguments[0], &found, &Type::Address)?;
                    Ok(Type::Tuple(Vec::new()))
                }
                FunctionTypeKind::Internal
                | FunctionTypeKind::External
                | FunctionTypeKind::Creation => {
                    self.check_arguments(arguments, &function.parameters, expr.span)?;
                    Ok(function.call_result())
                }
            },
            other => Err(self.invalid(
                format!("expression of type {} is not callable", self.registry.describe(&other)),
                callee.span,
            )),
        }
    }

    fn check_count(
        &self,
        arguments: &[Expression],
        range: std::ops::RangeInclusive<usize>,
        span: Span,
    ) -> Result<()> {
        if range.contains(&arguments.len()) {
            return Ok(());
        }
        Err(ResolutionError::ArgumentCount {
            expected: *range.end(),
            found: arguments.len(),
            location: self.location(span),
        }
        .into())
    }

    fn check_arguments(
        &mut self,
        arguments: &[Expression],
        parameters: &[Type],
        span: Span,
    ) -> Result<()> {
        if arguments.len() != parameters.len() {
            return Err(ResolutionError::ArgumentCount {
                expected: parameters.len(),
                found: arguments.len(),
                location: self.location(span),
            }
            .into());
        }
        for (argument, parameter) in arguments.iter().zip(parameters) {
            let found = self.expr(argument)?;
            self.expect(argument, &found, parameter)?;
        }
        Ok(())
    }

    fn expect_string(&mut self, expr: &Expression) -> Result<()> {
        match self.expr(expr)? {
            Type::StringLiteral(_) => Ok(()),
            other => Err(ResolutionError::TypeMismatch {
                expected: "literal_string".to_string(),
                found: self.registry.describe(&other),
                location: self.location(expr.span),
            }
            .into()),
        }
    }

    fn check_binary(
        &mut self,
        expr: &Expression,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
    ) -> Result<Type> {
        let left = self.expr(lhs)?;
        let right = self.expr(rhs)?;

        if op.is_logical() {
            self.expect(lhs, &left, &Type::Bool)?;
            self.expect(rhs, &right, &Type::Bool)?;
            self.registry.record_operand_type(expr.id, Type::Bool);
            return Ok(Type::Bool);
        }

        let common = self.common_type(&left, &right).ok_or_else(|| {
            self.invalid(
                format!(
                    "operator {op} not compatible with types {} and {}",
                    self.registry.describe(&left),
                    self.registry.describe(&right)
                ),
                expr.span,
            )
        })?;
        let allowed = match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                common.is_integer()
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                common.is_integer() || matches!(common, Type::FixedBytes(_))
            }
            BinaryOp::Eq | BinaryOp::NotEq => {
                common.is_value_type() && !matches!(common, Type::Function(_))
            }
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                common.is_integer() || matches!(common, Type::Address | Type::FixedBytes(_))
            }
            BinaryOp::And | BinaryOp::Or => false,
        };
        if !allowed {
            let described = self.registry.describe(&common);
            return Err(self.invalid(
                format!("operator {op} not compatible with type {described}"),
                expr.span,
            ));
        }
        self.registry.record_operand_type(expr.id, common.clone());
        Ok(if op.is_comparison() { Type::Bool } else { common })
    }

    /// Type both operands of a binary operation are converted to.
    fn common_type(&self, left: &Type, right: &Type) -> Option<Type> {
        if let (Type::IntegerLiteral(_), Type::IntegerLiteral(_)) = (left, right) {
            return Some(Type::Uint(256));
        }
        if self.registry.is_implicitly_convertible(right, left) {
            Some(left.mobile())
        } else if self.registry.is_implicitly_convertible(left, right) {
            Some(right.mobile())
        } else {
            None
        }
    }

    // =========================================
    // Diagnostics
    // =========================================

    fn expect(&self, expr: &Expression, found: &Type, expected: &Type) -> Result<()> {
        if self.registry.is_implicitly_convertible(found, expected) {
            Ok(())
        } else {
            Err(self.mismatch(expr, expected, found))
        }
    }

    fn mismatch(
        &self,
        expr: &Expression,
        expected: &Type,
        found: &Type,
    ) -> covenant_core::CompilerError {
        ResolutionError::TypeMismatch {
            expected: self.registry.describe(expected),
            found: self.registry.describe(found),
            location: self.location(expr.span),
        }
        .into()
    }

    fn invalid(&self, message: impl Into<String>, span: Span) -> covenant_core::CompilerError {
        ResolutionError::InvalidOperation {
            message: message.into(),
            location: self.location(span),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::RegistrationPass;
    use covenant_core::{CompilerError, NodeIdGen};
    use covenant_parser::Parser;

    fn resolve(sources: &[(&str, &str)]) -> Result<DeclarationRegistry> {
        let mut ids = NodeIdGen::new();
        let units: Vec<Rc<SourceUnit>> = sources
            .iter()
            .map(|(name, text)| Rc::new(Parser::parse(name, text, &mut ids).unwrap()))
            .collect();
        let mut registry = DeclarationRegistry::new();
        RegistrationPass::new(&mut registry).run(&units)?;
        ResolutionPass::new(&mut registry).run(&units)?;
        Ok(registry)
    }

    fn linearization_names(registry: &DeclarationRegistry, name: &str) -> Vec<String> {
        let contract = registry.contracts().find(|c| c.name() == name).unwrap();
        contract
            .linearization
            .iter()
            .map(|id| registry.contract(*id).unwrap().name().to_string())
            .collect()
    }

    fn resolution_message(err: CompilerError) -> String {
        match err {
            CompilerError::Resolution(e) => e.to_string(),
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[test]
    fn c3_linearization_of_a_diamond() {
        let registry = resolve(&[(
            "a",
            "contract A {} contract B is A {} contract C is A {} contract D is B, C {}",
        )])
        .unwrap();
        assert_eq!(
            linearization_names(&registry, "D"),
            vec!["D", "C", "B", "A"]
        );
        assert_eq!(linearization_names(&registry, "A"), vec!["A"]);
    }

    #[test]
    fn impossible_linearization() {
        let source = "contract X {} contract A is X {} contract B is A, X {}";
        let err = resolve(&[("a", source)]).unwrap_err();
        assert!(resolution_message(err).contains("linearization"));
    }

    #[test]
    fn inheritance_cycles_are_rejected() {
        let err = resolve(&[("a", "contract A is B {} contract B is A {}")]).unwrap_err();
        assert!(resolution_message(err).contains("inherits from itself"));
    }

    #[test]
    fn unknown_base() {
        let err = resolve(&[("a", "contract A is Missing {}")]).unwrap_err();
        assert!(resolution_message(err).contains("unknown type 'Missing'"));
    }

    #[test]
    fn identifiers_bind_to_locals_then_members() {
        let source = "contract A { uint x; \
                      function f(uint y) returns (uint) { uint z = x + y; return z; } }";
        let registry = resolve(&[("a", source)]).unwrap();
        let contract = registry.contracts().next().unwrap();
        let f = contract.definition.functions().next().unwrap();
        assert_eq!(
            registry.function(f.id).unwrap().ty.returns,
            vec![Type::Uint(256)]
        );
    }

    #[test]
    fn literal_arithmetic_is_uint256() {
        let source = "contract A { function f() returns (uint8) { return 1 + 2; } }";
        let registry = resolve(&[("a", source)]);
        // uint256 does not implicitly narrow to uint8.
        assert!(registry.is_err());
    }

    #[test]
    fn undeclared_identifier() {
        let err = resolve(&[("a", "contract A { function f() { y = 1; } }")]).unwrap_err();
        assert!(resolution_message(err).contains("undeclared identifier 'y'"));
    }

    #[test]
    fn constants_cannot_be_assigned() {
        let source = "contract A { uint constant C = 1; function f() { C = 2; } }";
        let err = resolve(&[("a", source)]).unwrap_err();
        assert!(resolution_message(err).contains("constant"));
    }

    #[test]
    fn immutables_only_in_constructor() {
        let in_constructor = "contract A { uint immutable x; constructor() { x = 1; } }";
        assert!(resolve(&[("a", in_constructor)]).is_ok());
        let in_function = "contract A { uint immutable x; function f() { x = 1; } }";
        let err = resolve(&[("a", in_function)]).unwrap_err();
        assert!(resolution_message(err).contains("immutable"));
    }

    #[test]
    fn member_access_on_contracts_and_magic() {
        let registry = resolve(&[(
            "a",
            "contract T { function get() external returns (uint) { return 1; } } \
             contract A { function f(T t) returns (uint) { \
                 require(msg.sender == address(t), \"no\"); return t.get() + block.number; } }",
        )]);
        assert!(registry.is_ok(), "{registry:?}");
    }

    #[test]
    fn internal_members_are_not_external() {
        let err = resolve(&[(
            "a",
            "contract T { function get() internal returns (uint) { return 1; } } \
             contract A { function f(T t) returns (uint) { return t.get(); } }",
        )])
        .unwrap_err();
        assert!(resolution_message(err).contains("member 'get' not found in contract T"));
    }

    #[test]
    fn multi_value_returns() {
        let forwarded = "contract A { function g() returns (uint, bool) { return (g()); } \
                         function h() returns (uint, bool) { return g(); } }";
        assert!(resolve(&[("a", forwarded)]).is_ok());
        let narrowed = "contract A { function g() returns (uint, bool) { return g(); } \
                        function h() { uint x = g(); } }";
        assert!(resolve(&[("a", narrowed)]).is_err());
    }

    #[test]
    fn placeholder_outside_modifier() {
        let err = resolve(&[("a", "contract A { function f() { _; } }")]).unwrap_err();
        assert!(resolution_message(err).contains("'_'"));
    }

    #[test]
    fn modifier_arguments_are_checked() {
        let matching = "contract A { modifier costs(uint p) { require(msg.value >= p); _; } \
                        function f() payable costs(2) {} }";
        assert!(resolve(&[("a", matching)]).is_ok());
        let missing = "contract A { modifier costs(uint p) { _; } function f() costs() {} }";
        assert!(resolve(&[("a", missing)]).is_err());
    }

    #[test]
    fn function_values_convert_by_signature() {
        assert!(resolve(&[(
            "a",
            "contract A { function g(uint a) returns (uint) { return a; } \
             function f() returns (uint) { function (uint) returns (uint) p = g; return p(1); } }",
        )])
        .is_ok());
        assert!(resolve(&[(
            "a",
            "contract A { function g(bool a) returns (uint) { return 1; } \
             function f() { function (uint) returns (uint) p = g; } }",
        )])
        .is_err());
    }

    #[test]
    fn base_constructor_arguments_are_checked() {
        assert!(resolve(&[(
            "a",
            "contract B { constructor(uint x) {} } contract C is B(1) {}",
        )])
        .is_ok());
        assert!(resolve(&[(
            "a",
            "contract B { constructor(uint x) {} } contract C is B(true) {}",
        )])
        .is_err());
    }

    #[test]
    fn creations_are_recorded() {
        let registry = resolve(&[(
            "a",
            "contract B {} contract A { function f() returns (B) { return new B(); } }",
        )])
        .unwrap();
        let a = registry.contracts().find(|c| c.name() == "A").unwrap().definition.id;
        let b = registry.contracts().find(|c| c.name() == "B").unwrap().definition.id;
        assert!(registry.creation_dependencies(a).unwrap().contains(&b));
    }
}
