//! Statement AST nodes.

use std::rc::Rc;

use covenant_core::{NodeId, Span};

use crate::ast::decl::VariableDeclaration;
use crate::ast::expr::Expression;

/// `{ statements }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: NodeId,
    pub statements: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Block(Block),
    /// `uint x = 1;` The initial value lives on the declaration.
    VariableDeclaration {
        id: NodeId,
        declaration: Rc<VariableDeclaration>,
        span: Span,
    },
    Expression(Expression),
    If {
        id: NodeId,
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
        span: Span,
    },
    Return {
        id: NodeId,
        value: Option<Expression>,
        span: Span,
    },
    /// `_;` inside a modifier.
    Placeholder { id: NodeId, span: Span },
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Block(block) => block.span,
            Statement::Expression(expr) => expr.span,
            Statement::VariableDeclaration { span, .. }
            | Statement::If { span, .. }
            | Statement::Return { span, .. }
            | Statement::Placeholder { span, .. } => *span,
        }
    }
}
