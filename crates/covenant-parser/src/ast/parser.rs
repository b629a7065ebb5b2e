//! Core parser state and token helpers.
//!
//! The grammar productions live in the sibling `*_parser` modules, each as
//! an `impl Parser` block.

use covenant_core::{NodeId, NodeIdGen, ParseError, ParseErrorKind, SourceLocation, Span};

use crate::ast::decl::{Item, SourceUnit};
use crate::lexer::{Lexer, Token, TokenKind};

/// Recursive descent parser over a fully lexed token stream.
pub struct Parser<'src, 'ids> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    source_name: &'src str,
    ids: &'ids mut NodeIdGen,
}

impl<'src, 'ids> Parser<'src, 'ids> {
    /// Parse one source unit.
    ///
    /// Node ids are drawn from `ids`, so parsing several units with the
    /// same generator yields ids that are unique across all of them.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn parse(
        source_name: &'src str,
        source: &'src str,
        ids: &'ids mut NodeIdGen,
    ) -> Result<SourceUnit, ParseError> {
        let tokens = Lexer::new(source_name, source).tokenize()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            source_name,
            ids,
        };
        parser.parse_source_unit()
    }

    fn parse_source_unit(&mut self) -> Result<SourceUnit, ParseError> {
        let mut items = Vec::new();
        while !self.is_eof() {
            let item = match self.peek().kind {
                TokenKind::Import => Item::Import(self.parse_import()?),
                TokenKind::Contract | TokenKind::Abstract => Item::Contract(self.parse_contract()?),
                _ => {
                    return Err(self.error_here(
                        ParseErrorKind::ExpectedDeclaration,
                        format!("expected import or contract, found {}", self.peek().kind),
                    ));
                }
            };
            items.push(item);
        }
        Ok(SourceUnit {
            name: self.source_name.to_string(),
            items,
        })
    }

    // =========================================
    // Token helpers
    // =========================================

    pub(crate) fn source_name(&self) -> &'src str {
        self.source_name
    }

    pub(crate) fn next_id(&mut self) -> NodeId {
        self.ids.next_id()
    }

    /// The current token. The stream always ends with `Eof`, which is
    /// never consumed.
    pub(crate) fn peek(&self) -> &Token<'src> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    /// The token `n` positions ahead of the current one.
    pub(crate) fn peek_nth(&self, n: usize) -> &Token<'src> {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    pub(crate) fn advance(&mut self) -> Token<'src> {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> Option<Token<'src>> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        let found = self.peek();
        if found.kind == TokenKind::Eof {
            return Err(ParseError::unexpected_eof(self.location(found.span)));
        }
        Err(ParseError::expected_token(
            self.location(found.span),
            kind.description(),
            found.kind.description(),
        ))
    }

    /// Span of the most recently consumed token.
    pub(crate) fn previous_span(&self) -> Span {
        match self.pos.checked_sub(1) {
            Some(pos) => self.tokens[pos].span,
            None => Span::point(0),
        }
    }

    pub(crate) fn location(&self, span: Span) -> SourceLocation {
        SourceLocation::new(self.source_name, span)
    }

    pub(crate) fn error_here(
        &self,
        kind: ParseErrorKind,
        message: impl Into<String>,
    ) -> ParseError {
        ParseError::new(kind, self.location(self.peek().span), message)
    }
}

/// Resolve escape sequences in a string literal lexeme (quotes included).
pub(crate) fn unescape(lexeme: &str) -> Option<String> {
    let inner = lexeme.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16).ok().filter(|b| b.is_ascii())?;
                out.push(byte as char);
            }
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r#""a\nb""#).as_deref(), Some("a\nb"));
        assert_eq!(unescape(r#""\x41\"""#).as_deref(), Some("A\""));
        assert_eq!(unescape(r#""\q""#), None);
        assert_eq!(unescape(r#""\xff""#), None);
    }
}
