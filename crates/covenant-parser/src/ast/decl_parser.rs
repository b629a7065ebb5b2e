//! Declaration parsing: imports, contracts and contract members.

use std::rc::Rc;

use covenant_core::{ParseError, ParseErrorKind, Span};

use super::parser::{Parser, unescape};
use crate::ast::decl::*;
use crate::lexer::TokenKind;

impl<'src, 'ids> Parser<'src, 'ids> {
    /// `import "path";`
    pub(crate) fn parse_import(&mut self) -> Result<ImportDirective, ParseError> {
        let start = self.expect(TokenKind::Import)?.span;
        let path_token = self.expect(TokenKind::StringLiteral)?;
        let path = unescape(path_token.lexeme).ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::InvalidLiteral,
                self.location(path_token.span),
                "invalid escape sequence in import path",
            )
        })?;
        let end = self.expect(TokenKind::Semicolon)?.span;
        Ok(ImportDirective {
            id: self.next_id(),
            path,
            span: start.merge(end),
        })
    }

    /// `abstract? contract Name is A, B(1) { members }`
    pub(crate) fn parse_contract(&mut self) -> Result<Rc<ContractDefinition>, ParseError> {
        let first = self.peek().clone();
        let is_abstract = self.eat(TokenKind::Abstract).is_some();
        self.expect(TokenKind::Contract)?;
        let name = self.parse_ident()?;
        let id = self.next_id();

        let mut bases = Vec::new();
        if self.eat(TokenKind::Is).is_some() {
            loop {
                bases.push(self.parse_inheritance_specifier()?);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }

        self.expect(TokenKind::LeftBrace)?;
        let mut members = Vec::new();
        while !self.check(TokenKind::RightBrace) {
            if self.is_eof() {
                return Err(ParseError::unexpected_eof(self.location(self.peek().span)));
            }
            members.push(self.parse_contract_member()?);
        }
        let end = self.expect(TokenKind::RightBrace)?.span;

        Ok(Rc::new(ContractDefinition {
            id,
            name,
            is_abstract,
            bases,
            members,
            documentation: first.doc,
            source: self.source_name().to_string(),
            span: first.span.merge(end),
        }))
    }

    fn parse_inheritance_specifier(&mut self) -> Result<InheritanceSpecifier, ParseError> {
        let name = self.parse_ident()?;
        let arguments = if self.check(TokenKind::LeftParen) {
            Some(self.parse_call_arguments()?)
        } else {
            None
        };
        Ok(InheritanceSpecifier {
            id: self.next_id(),
            span: name.span.merge(self.previous_span()),
            name,
            arguments,
        })
    }

    fn parse_contract_member(&mut self) -> Result<ContractMember, ParseError> {
        match self.peek().kind {
            TokenKind::Function if self.peek_nth(1).kind != TokenKind::LeftParen => {
                Ok(ContractMember::Function(self.parse_function()?))
            }
            TokenKind::Constructor | TokenKind::Fallback => {
                Ok(ContractMember::Function(self.parse_function()?))
            }
            TokenKind::Modifier => Ok(ContractMember::Modifier(self.parse_modifier()?)),
            _ if self.is_type_start() => {
                Ok(ContractMember::StateVariable(self.parse_state_variable()?))
            }
            _ => Err(self.error_here(
                ParseErrorKind::ExpectedDeclaration,
                format!("expected contract member, found {}", self.peek().kind),
            )),
        }
    }

    /// Functions, constructors and fallbacks.
    fn parse_function(&mut self) -> Result<Rc<FunctionDefinition>, ParseError> {
        let first = self.advance();
        let (kind, name, mut visibility) = match first.kind {
            TokenKind::Constructor => (
                FunctionKind::Constructor,
                Ident::new("", first.span),
                Visibility::Public,
            ),
            TokenKind::Fallback => (
                FunctionKind::Fallback,
                Ident::new("", first.span),
                Visibility::External,
            ),
            _ => (FunctionKind::Function, self.parse_ident()?, Visibility::Public),
        };
        let id = self.next_id();
        let parameters = self.parse_parameter_list()?;

        let mut seen_visibility = false;
        let mut mutability = None;
        let mut modifiers = Vec::new();
        let mut returns = Vec::new();
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Public
                | TokenKind::Private
                | TokenKind::Internal
                | TokenKind::External => {
                    if seen_visibility {
                        return Err(ParseError::new(
                            ParseErrorKind::ConflictingModifiers,
                            self.location(token.span),
                            "visibility already specified",
                        ));
                    }
                    seen_visibility = true;
                    visibility = visibility_of(token.kind);
                    self.advance();
                }
                TokenKind::View | TokenKind::Payable => {
                    if mutability.is_some() {
                        return Err(ParseError::new(
                            ParseErrorKind::ConflictingModifiers,
                            self.location(token.span),
                            "state mutability already specified",
                        ));
                    }
                    mutability = Some(if token.kind == TokenKind::View {
                        StateMutability::View
                    } else {
                        StateMutability::Payable
                    });
                    self.advance();
                }
                TokenKind::Identifier => {
                    let name = self.parse_ident()?;
                    let arguments = if self.check(TokenKind::LeftParen) {
                        self.parse_call_arguments()?
                    } else {
                        Vec::new()
                    };
                    modifiers.push(ModifierInvocation {
                        id: self.next_id(),
                        span: name.span.merge(self.previous_span()),
                        name,
                        arguments,
                    });
                }
                TokenKind::Returns => {
                    self.advance();
                    returns = self.parse_parameter_list()?;
                }
                _ => break,
            }
        }

        let body = if self.eat(TokenKind::Semicolon).is_some() {
            None
        } else {
            Some(self.parse_block()?)
        };

        Ok(Rc::new(FunctionDefinition {
            id,
            kind,
            name,
            parameters,
            returns,
            visibility,
            mutability: mutability.unwrap_or_default(),
            modifiers,
            body,
            documentation: first.doc,
            span: first.span.merge(self.previous_span()),
        }))
    }

    fn parse_modifier(&mut self) -> Result<Rc<ModifierDefinition>, ParseError> {
        let first = self.expect(TokenKind::Modifier)?;
        let name = self.parse_ident()?;
        let id = self.next_id();
        let parameters = if self.check(TokenKind::LeftParen) {
            self.parse_parameter_list()?
        } else {
            Vec::new()
        };
        let body = self.parse_block()?;
        Ok(Rc::new(ModifierDefinition {
            id,
            name,
            parameters,
            span: first.span.merge(body.span),
            body,
            documentation: first.doc,
        }))
    }

    /// `type (visibility | constant | immutable)* name (= value)? ;`
    fn parse_state_variable(&mut self) -> Result<Rc<VariableDeclaration>, ParseError> {
        let start = self.peek().span;
        let type_name = self.parse_type_name()?;
        let mut visibility = None;
        let mut mutability = None;
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Public
                | TokenKind::Private
                | TokenKind::Internal
                | TokenKind::External => {
                    if visibility.is_some() || token.kind == TokenKind::External {
                        return Err(ParseError::new(
                            ParseErrorKind::ConflictingModifiers,
                            self.location(token.span),
                            "invalid visibility for a state variable",
                        ));
                    }
                    visibility = Some(visibility_of(token.kind));
                }
                TokenKind::Constant | TokenKind::Immutable => {
                    if mutability.is_some() {
                        return Err(ParseError::new(
                            ParseErrorKind::ConflictingModifiers,
                            self.location(token.span),
                            "mutability already specified",
                        ));
                    }
                    mutability = Some(if token.kind == TokenKind::Constant {
                        VariableMutability::Constant
                    } else {
                        VariableMutability::Immutable
                    });
                }
                _ => break,
            }
            self.advance();
        }
        let name = self.parse_ident()?;
        let value = if self.eat(TokenKind::Equal).is_some() {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let end = self.expect(TokenKind::Semicolon)?.span;
        Ok(Rc::new(VariableDeclaration {
            id: self.next_id(),
            name,
            type_name,
            visibility: visibility.unwrap_or(Visibility::Internal),
            mutability: mutability.unwrap_or_default(),
            value,
            span: start.merge(end),
        }))
    }

    /// `(type name?, ...)`
    pub(crate) fn parse_parameter_list(
        &mut self,
    ) -> Result<Vec<Rc<VariableDeclaration>>, ParseError> {
        self.expect(TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if self.eat(TokenKind::RightParen).is_some() {
            return Ok(params);
        }
        loop {
            let type_name = self.parse_type_name()?;
            let name = match self.eat(TokenKind::Identifier) {
                Some(token) => Ident::new(token.lexeme, token.span),
                None => Ident::new("", Span::point(type_name.span().end)),
            };
            params.push(Rc::new(VariableDeclaration {
                id: self.next_id(),
                span: type_name.span().merge(name.span),
                name,
                type_name,
                visibility: Visibility::Internal,
                mutability: VariableMutability::Mutable,
                value: None,
            }));
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(params)
    }

    pub(crate) fn parse_ident(&mut self) -> Result<Ident, ParseError> {
        let token = self.peek().clone();
        if token.kind != TokenKind::Identifier {
            return Err(ParseError::new(
                ParseErrorKind::ExpectedIdentifier,
                self.location(token.span),
                format!("expected identifier, found {}", token.kind),
            ));
        }
        self.advance();
        Ok(Ident::new(token.lexeme, token.span))
    }
}

fn visibility_of(kind: TokenKind) -> Visibility {
    match kind {
        TokenKind::Private => Visibility::Private,
        TokenKind::Internal => Visibility::Internal,
        TokenKind::External => Visibility::External,
        _ => Visibility::Public,
    }
}
