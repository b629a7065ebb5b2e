//! Declaration AST nodes.
//!
//! Declarations that other passes need to look up by id (contracts,
//! functions, modifiers, variables) are reference-counted so the
//! declaration registry can hold on to them without borrowing the tree.

use std::rc::Rc;

use covenant_core::{NodeId, Span};

use crate::ast::expr::Expression;
use crate::ast::stmt::Block;
use crate::ast::types::TypeName;

/// A name with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

/// A parsed source unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    /// Name the unit was registered under.
    pub name: String,
    pub items: Vec<Item>,
}

impl SourceUnit {
    /// Import directives in textual order.
    pub fn imports(&self) -> impl Iterator<Item = &ImportDirective> {
        self.items.iter().filter_map(|item| match item {
            Item::Import(import) => Some(import),
            Item::Contract(_) => None,
        })
    }

    /// Contract definitions in textual order.
    pub fn contracts(&self) -> impl Iterator<Item = &Rc<ContractDefinition>> {
        self.items.iter().filter_map(|item| match item {
            Item::Contract(contract) => Some(contract),
            Item::Import(_) => None,
        })
    }
}

/// A top-level item in a source unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Import(ImportDirective),
    Contract(Rc<ContractDefinition>),
}

/// `import "path";`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDirective {
    pub id: NodeId,
    /// Unescaped path, which names another registered source unit.
    pub path: String,
    pub span: Span,
}

/// A contract definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDefinition {
    pub id: NodeId,
    pub name: Ident,
    pub is_abstract: bool,
    /// Direct bases in the order they were written.
    pub bases: Vec<InheritanceSpecifier>,
    pub members: Vec<ContractMember>,
    pub documentation: Option<String>,
    /// Name of the source unit this contract was parsed from.
    pub source: String,
    pub span: Span,
}

impl ContractDefinition {
    pub fn functions(&self) -> impl Iterator<Item = &Rc<FunctionDefinition>> {
        self.members.iter().filter_map(|m| match m {
            ContractMember::Function(f) => Some(f),
            _ => None,
        })
    }

    pub fn modifiers(&self) -> impl Iterator<Item = &Rc<ModifierDefinition>> {
        self.members.iter().filter_map(|m| match m {
            ContractMember::Modifier(m) => Some(m),
            _ => None,
        })
    }

    pub fn state_variables(&self) -> impl Iterator<Item = &Rc<VariableDeclaration>> {
        self.members.iter().filter_map(|m| match m {
            ContractMember::StateVariable(v) => Some(v),
            _ => None,
        })
    }

    /// The constructor, if one is declared.
    pub fn constructor(&self) -> Option<&Rc<FunctionDefinition>> {
        self.functions().find(|f| f.kind == FunctionKind::Constructor)
    }
}

/// `is Base(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct InheritanceSpecifier {
    pub id: NodeId,
    pub name: Ident,
    /// `None` when written without parentheses.
    pub arguments: Option<Vec<Expression>>,
    pub span: Span,
}

/// A member of a contract body.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractMember {
    Function(Rc<FunctionDefinition>),
    Modifier(Rc<ModifierDefinition>),
    StateVariable(Rc<VariableDeclaration>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Function,
    Constructor,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Visibility {
    Private,
    Internal,
    Public,
    External,
}

impl Visibility {
    /// Whether the declaration is reachable through the contract's ABI.
    pub fn is_externally_visible(self) -> bool {
        matches!(self, Visibility::Public | Visibility::External)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Internal => "internal",
            Visibility::Public => "public",
            Visibility::External => "external",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StateMutability {
    #[default]
    NonPayable,
    View,
    Payable,
}

impl StateMutability {
    pub fn as_str(self) -> &'static str {
        match self {
            StateMutability::NonPayable => "nonpayable",
            StateMutability::View => "view",
            StateMutability::Payable => "payable",
        }
    }
}

/// `onlyOwner` or `costs(10)` after a function's parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierInvocation {
    pub id: NodeId,
    pub name: Ident,
    pub arguments: Vec<Expression>,
    pub span: Span,
}

/// A function, constructor or fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub id: NodeId,
    pub kind: FunctionKind,
    /// Empty for constructors and fallbacks.
    pub name: Ident,
    pub parameters: Vec<Rc<VariableDeclaration>>,
    pub returns: Vec<Rc<VariableDeclaration>>,
    pub visibility: Visibility,
    pub mutability: StateMutability,
    pub modifiers: Vec<ModifierInvocation>,
    /// `None` for unimplemented functions.
    pub body: Option<Block>,
    pub documentation: Option<String>,
    pub span: Span,
}

impl FunctionDefinition {
    pub fn is_implemented(&self) -> bool {
        self.body.is_some()
    }
}

/// `modifier name(params) { ... _; ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierDefinition {
    pub id: NodeId,
    pub name: Ident,
    pub parameters: Vec<Rc<VariableDeclaration>>,
    pub body: Block,
    pub documentation: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VariableMutability {
    #[default]
    Mutable,
    Constant,
    Immutable,
}

/// Any variable: state variable, parameter, return variable or local.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub id: NodeId,
    /// Empty for unnamed parameters and return values.
    pub name: Ident,
    pub type_name: TypeName,
    pub visibility: Visibility,
    pub mutability: VariableMutability,
    /// Initial value, for state variables and locals.
    pub value: Option<Expression>,
    pub span: Span,
}
