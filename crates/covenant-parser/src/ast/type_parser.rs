//! Type name parsing.

use covenant_core::{ParseError, ParseErrorKind};

use super::parser::Parser;
use crate::ast::decl::Ident;
use crate::ast::types::{ElementaryType, FunctionTypeName, TypeName};
use crate::lexer::TokenKind;

impl<'src, 'ids> Parser<'src, 'ids> {
    /// Whether the current token can begin a type name.
    pub(crate) fn is_type_start(&self) -> bool {
        match self.peek().kind {
            TokenKind::ElementaryType | TokenKind::Identifier => true,
            TokenKind::Function => self.peek_nth(1).kind == TokenKind::LeftParen,
            _ => false,
        }
    }

    pub(crate) fn parse_type_name(&mut self) -> Result<TypeName, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::ElementaryType => {
                self.advance();
                let ty = ElementaryType::from_name(token.lexeme).ok_or_else(|| {
                    ParseError::new(
                        ParseErrorKind::ExpectedType,
                        self.location(token.span),
                        format!("unknown type '{}'", token.lexeme),
                    )
                })?;
                Ok(TypeName::Elementary {
                    ty,
                    span: token.span,
                })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(TypeName::UserDefined(Ident::new(token.lexeme, token.span)))
            }
            TokenKind::Function => {
                self.advance();
                let parameters = self.parse_type_list()?;
                let returns = if self.eat(TokenKind::Returns).is_some() {
                    self.parse_type_list()?
                } else {
                    Vec::new()
                };
                Ok(TypeName::Function(FunctionTypeName {
                    parameters,
                    returns,
                    span: token.span.merge(self.previous_span()),
                }))
            }
            _ => Err(ParseError::new(
                ParseErrorKind::ExpectedType,
                self.location(token.span),
                format!("expected type, found {}", token.kind),
            )),
        }
    }

    /// `(type, type, ...)`
    fn parse_type_list(&mut self) -> Result<Vec<TypeName>, ParseError> {
        self.expect(TokenKind::LeftParen)?;
        let mut types = Vec::new();
        if self.eat(TokenKind::RightParen).is_some() {
            return Ok(types);
        }
        loop {
            types.push(self.parse_type_name()?);
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(types)
    }
}
