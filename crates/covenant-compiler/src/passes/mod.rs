//! Whole-program semantic passes.
//!
//! - [`registration`]: Pass 1 - register every declaration of every unit
//! - [`resolution`]: Pass 2 - linearize inheritance, type signatures, then
//!   type-check bodies
//! - [`requirements`]: Pass 3 - check rules that need the fully resolved
//!   program and attach documentation
//!
//! Each pass is one sweep over the compile-ordered units and completes for
//! all of them before the next one starts.

pub mod registration;
pub mod requirements;
pub mod resolution;

pub use registration::{RegistrationOutput, RegistrationPass};
pub use requirements::{ContractDocumentation, RequirementsOutput, RequirementsPass};
pub use resolution::{ResolutionOutput, ResolutionPass};

use covenant_parser::ast::{Block, ExprKind, Expression, Statement};

/// Call `f` on every expression inside `block`, outer expressions first.
pub(crate) fn walk_block<'a>(block: &'a Block, f: &mut impl FnMut(&'a Expression)) {
    for statement in &block.statements {
        walk_statement(statement, f);
    }
}

pub(crate) fn walk_statement<'a>(statement: &'a Statement, f: &mut impl FnMut(&'a Expression)) {
    match statement {
        Statement::Block(block) => walk_block(block, f),
        Statement::VariableDeclaration { declaration, .. } => {
            if let Some(value) = &declaration.value {
                walk_expression(value, f);
            }
        }
        Statement::Expression(expr) => walk_expression(expr, f),
        Statement::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            walk_expression(condition, f);
            walk_statement(then_branch, f);
            if let Some(else_branch) = else_branch {
                walk_statement(else_branch, f);
            }
        }
        Statement::Return { value, .. } => {
            if let Some(value) = value {
                walk_expression(value, f);
            }
        }
        Statement::Placeholder { .. } => {}
    }
}

pub(crate) fn walk_expression<'a>(expr: &'a Expression, f: &mut impl FnMut(&'a Expression)) {
    f(expr);
    match &expr.kind {
        ExprKind::Member { base, .. } => walk_expression(base, f),
        ExprKind::Call { callee, arguments } => {
            walk_expression(callee, f);
            for argument in arguments {
                walk_expression(argument, f);
            }
        }
        ExprKind::Binary { lhs, rhs, .. } => {
            walk_expression(lhs, f);
            walk_expression(rhs, f);
        }
        ExprKind::Unary { operand, .. } => walk_expression(operand, f),
        ExprKind::Assign { target, value, .. } => {
            walk_expression(target, f);
            walk_expression(value, f);
        }
        ExprKind::Number(_)
        | ExprKind::HexNumber(_)
        | ExprKind::Bool(_)
        | ExprKind::String(_)
        | ExprKind::Identifier(_)
        | ExprKind::ElementaryType(_)
        | ExprKind::New { .. } => {}
    }
}
