//! Statement parsing.

use std::rc::Rc;

use covenant_core::{ParseError, ParseErrorKind};

use super::parser::Parser;
use crate::ast::decl::{VariableDeclaration, VariableMutability, Visibility};
use crate::ast::stmt::{Block, Statement};
use crate::lexer::TokenKind;

impl<'src, 'ids> Parser<'src, 'ids> {
    pub(crate) fn parse_block(&mut self) -> Result<Block, ParseError> {
        let start = self.expect(TokenKind::LeftBrace)?.span;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) {
            if self.is_eof() {
                return Err(ParseError::unexpected_eof(self.location(self.peek().span)));
            }
            statements.push(self.parse_statement()?);
        }
        let end = self.expect(TokenKind::RightBrace)?.span;
        Ok(Block {
            id: self.next_id(),
            statements,
            span: start.merge(end),
        })
    }

    pub(crate) fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.peek().kind {
            TokenKind::LeftBrace => Ok(Statement::Block(self.parse_block()?)),
            TokenKind::If => self.parse_if(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Placeholder => {
                let start = self.advance().span;
                let end = self.expect(TokenKind::Semicolon)?.span;
                Ok(Statement::Placeholder {
                    id: self.next_id(),
                    span: start.merge(end),
                })
            }
            _ if self.is_var_decl() => self.parse_var_decl(),
            TokenKind::Semicolon => Err(self.error_here(
                ParseErrorKind::ExpectedStatement,
                "empty statement",
            )),
            _ => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Statement::Expression(expr))
            }
        }
    }

    /// Distinguish `T x ...` from an expression statement.
    fn is_var_decl(&self) -> bool {
        match self.peek().kind {
            TokenKind::Function => self.peek_nth(1).kind == TokenKind::LeftParen,
            TokenKind::ElementaryType => self.peek_nth(1).kind != TokenKind::LeftParen,
            TokenKind::Identifier => self.peek_nth(1).kind == TokenKind::Identifier,
            _ => false,
        }
    }

    fn parse_var_decl(&mut self) -> Result<Statement, ParseError> {
        let start = self.peek().span;
        let type_name = self.parse_type_name()?;
        let name = self.parse_ident()?;
        let value = if self.eat(TokenKind::Equal).is_some() {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let end = self.expect(TokenKind::Semicolon)?.span;
        let span = start.merge(end);
        let declaration = Rc::new(VariableDeclaration {
            id: self.next_id(),
            name,
            type_name,
            visibility: Visibility::Internal,
            mutability: VariableMutability::Mutable,
            value,
            span,
        });
        Ok(Statement::VariableDeclaration {
            id: self.next_id(),
            declaration,
            span,
        })
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        let start = self.expect(TokenKind::If)?.span;
        self.expect(TokenKind::LeftParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RightParen)?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.eat(TokenKind::Else).is_some() {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Statement::If {
            id: self.next_id(),
            condition,
            then_branch,
            else_branch,
            span: start.merge(self.previous_span()),
        })
    }

    fn parse_return(&mut self) -> Result<Statement, ParseError> {
        let start = self.expect(TokenKind::Return)?.span;
        let value = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let end = self.expect(TokenKind::Semicolon)?.span;
        Ok(Statement::Return {
            id: self.next_id(),
            value,
            span: start.merge(end),
        })
    }
}
