//! Expression parsing using precedence climbing.

use covenant_core::{ParseError, ParseErrorKind, Span};

use super::parser::{Parser, unescape};
use crate::ast::decl::Ident;
use crate::ast::expr::{AssignOp, BinaryOp, ExprKind, Expression, UnaryOp};
use crate::ast::types::ElementaryType;
use crate::lexer::TokenKind;

impl<'src, 'ids> Parser<'src, 'ids> {
    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        let target = self.parse_binary(1)?;
        let op = match self.peek().kind {
            TokenKind::Equal => AssignOp::Assign,
            TokenKind::PlusEqual => AssignOp::AddAssign,
            TokenKind::MinusEqual => AssignOp::SubAssign,
            _ => return Ok(target),
        };
        self.advance();
        let value = self.parse_expression()?;
        let span = target.span.merge(value.span);
        Ok(self.make_expr(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = binary_op(self.peek().kind) {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(precedence + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = self.make_expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_postfix(),
        };
        let start = self.advance().span;
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        Ok(self.make_expr(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let member = self.parse_ident()?;
                    let span = expr.span.merge(member.span);
                    expr = self.make_expr(
                        ExprKind::Member {
                            base: Box::new(expr),
                            member,
                        },
                        span,
                    );
                }
                TokenKind::LeftParen => {
                    let arguments = self.parse_call_arguments()?;
                    let span = expr.span.merge(self.previous_span());
                    expr = self.make_expr(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            arguments,
                        },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let token = self.peek().clone();
        let kind = match token.kind {
            TokenKind::Number => ExprKind::Number(token.lexeme.to_string()),
            TokenKind::HexNumber => ExprKind::HexNumber(token.lexeme[2..].to_string()),
            TokenKind::True => ExprKind::Bool(true),
            TokenKind::False => ExprKind::Bool(false),
            TokenKind::StringLiteral => {
                let value = unescape(token.lexeme).ok_or_else(|| {
                    ParseError::new(
                        ParseErrorKind::InvalidLiteral,
                        self.location(token.span),
                        "invalid escape sequence",
                    )
                })?;
                ExprKind::String(value)
            }
            TokenKind::Identifier => ExprKind::Identifier(token.lexeme.to_string()),
            TokenKind::ElementaryType => {
                let ty = ElementaryType::from_name(token.lexeme).ok_or_else(|| {
                    ParseError::new(
                        ParseErrorKind::ExpectedType,
                        self.location(token.span),
                        format!("unknown type '{}'", token.lexeme),
                    )
                })?;
                ExprKind::ElementaryType(ty)
            }
            TokenKind::New => {
                self.advance();
                let name_token = self.expect(TokenKind::Identifier)?;
                let span = token.span.merge(name_token.span);
                let contract = Ident::new(name_token.lexeme, name_token.span);
                return Ok(self.make_expr(ExprKind::New { contract }, span));
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RightParen)?;
                return Ok(inner);
            }
            TokenKind::Eof => return Err(ParseError::unexpected_eof(self.location(token.span))),
            _ => {
                return Err(ParseError::new(
                    ParseErrorKind::ExpectedExpression,
                    self.location(token.span),
                    format!("expected expression, found {}", token.kind),
                ));
            }
        };
        self.advance();
        Ok(self.make_expr(kind, token.span))
    }

    /// `(expr, expr, ...)`
    pub(crate) fn parse_call_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        self.expect(TokenKind::LeftParen)?;
        let mut arguments = Vec::new();
        if self.eat(TokenKind::RightParen).is_some() {
            return Ok(arguments);
        }
        loop {
            arguments.push(self.parse_expression()?);
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(arguments)
    }

    fn make_expr(&mut self, kind: ExprKind, span: Span) -> Expression {
        Expression {
            id: self.next_id(),
            kind,
            span,
        }
    }
}

fn binary_op(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::EqualEqual => BinaryOp::Eq,
        TokenKind::BangEqual => BinaryOp::NotEq,
        TokenKind::Less => BinaryOp::Less,
        TokenKind::LessEqual => BinaryOp::LessEq,
        TokenKind::Greater => BinaryOp::Greater,
        TokenKind::GreaterEqual => BinaryOp::GreaterEq,
        TokenKind::AmpAmp => BinaryOp::And,
        TokenKind::PipePipe => BinaryOp::Or,
        TokenKind::Amp => BinaryOp::BitAnd,
        TokenKind::Pipe => BinaryOp::BitOr,
        TokenKind::Caret => BinaryOp::BitXor,
        _ => return None,
    })
}
