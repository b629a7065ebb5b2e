//! Main lexer implementation for Covenant.
//!
//! The [`Lexer`] converts source text into a stream of [`Token`]s.
//! It uses direct dispatch based on the first character.

use covenant_core::{ParseError, ParseErrorKind, SourceLocation, Span};

use super::cursor::{Cursor, is_ident_continue, is_ident_start};
use super::token::{Token, TokenKind, lookup_keyword};

/// Lexer for Covenant source code.
pub struct Lexer<'src> {
    /// Low-level character cursor.
    cursor: Cursor<'src>,
    /// Name of the unit being lexed, for diagnostics.
    source_name: &'src str,
    /// Doc comment lines seen since the last token.
    pending_doc: Vec<String>,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source text.
    pub fn new(source_name: &'src str, source: &'src str) -> Self {
        Self {
            cursor: Cursor::new(source),
            source_name,
            pending_doc: Vec::new(),
        }
    }

    /// Lex the whole input. The returned vector always ends with
    /// [`TokenKind::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Token<'src>>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Consume and return the next token.
    pub fn next_token(&mut self) -> Result<Token<'src>, ParseError> {
        self.skip_trivia()?;
        let mut token = self.scan_token()?;
        if !self.pending_doc.is_empty() {
            token.doc = Some(std::mem::take(&mut self.pending_doc).join("\n"));
        }
        Ok(token)
    }

    fn error(&self, kind: ParseErrorKind, span: Span, message: impl Into<String>) -> ParseError {
        ParseError::new(kind, SourceLocation::new(self.source_name, span), message)
    }

    // =========================================
    // Internal: Trivia
    // =========================================

    /// Skip whitespace and comments, collecting doc comments.
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            self.cursor.eat_while(|c| c.is_whitespace());
            if self.cursor.check_str("///") {
                let line = self.cursor.eat_while(|c| c != '\n');
                self.pending_doc.push(line[3..].trim().to_string());
            } else if self.cursor.check_str("//") {
                self.cursor.eat_while(|c| c != '\n');
            } else if self.cursor.check_str("/*") {
                self.skip_block_comment()?;
            } else {
                return Ok(());
            }
        }
    }

    /// Skip a block comment `/* ... */`. `/** ... */` is a doc comment.
    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        let start = self.cursor.offset();
        self.cursor.advance();
        self.cursor.advance();
        let is_doc = self.cursor.peek() == Some('*') && self.cursor.peek_nth(1) != Some('/');
        let body_start = self.cursor.offset();
        loop {
            if self.cursor.check_str("*/") {
                let body = self.cursor.slice_from(body_start);
                self.cursor.advance();
                self.cursor.advance();
                if is_doc {
                    for line in body.trim_start_matches('*').lines() {
                        let line = line.trim().trim_start_matches('*').trim();
                        if !line.is_empty() {
                            self.pending_doc.push(line.to_string());
                        }
                    }
                }
                return Ok(());
            }
            if self.cursor.advance().is_none() {
                let span = Span::new(start, self.cursor.offset());
                return Err(self.error(
                    ParseErrorKind::UnterminatedComment,
                    span,
                    "block comment is never closed",
                ));
            }
        }
    }

    // =========================================
    // Internal: Token scanning
    // =========================================

    fn scan_token(&mut self) -> Result<Token<'src>, ParseError> {
        let start = self.cursor.offset();
        let Some(c) = self.cursor.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", Span::point(start)));
        };

        if c == '"' {
            return self.scan_string(start);
        }
        if c.is_ascii_digit() {
            return self.scan_number(start);
        }
        if is_ident_start(c) {
            let ident = self.cursor.eat_while(is_ident_continue);
            let kind = lookup_keyword(ident).unwrap_or(TokenKind::Identifier);
            return Ok(self.make_token(kind, start));
        }
        self.scan_operator(start)
    }

    fn make_token(&self, kind: TokenKind, start: u32) -> Token<'src> {
        let span = Span::new(start, self.cursor.offset());
        Token::new(kind, self.cursor.slice_from(start), span)
    }

    /// Scan a string literal. The lexeme keeps its quotes and escapes.
    fn scan_string(&mut self, start: u32) -> Result<Token<'src>, ParseError> {
        self.cursor.advance();
        loop {
            match self.cursor.advance() {
                Some('"') => return Ok(self.make_token(TokenKind::StringLiteral, start)),
                Some('\\') => {
                    self.cursor.advance();
                }
                Some('\n') | None => {
                    let span = Span::new(start, self.cursor.offset());
                    return Err(self.error(
                        ParseErrorKind::UnterminatedString,
                        span,
                        "string literal is never closed",
                    ));
                }
                Some(_) => {}
            }
        }
    }

    fn scan_number(&mut self, start: u32) -> Result<Token<'src>, ParseError> {
        let kind = if self.cursor.check_str("0x") || self.cursor.check_str("0X") {
            self.cursor.advance();
            self.cursor.advance();
            if self.cursor.eat_while(|c| c.is_ascii_hexdigit()).is_empty() {
                let span = Span::new(start, self.cursor.offset());
                let message = "hex literal has no digits";
                return Err(self.error(ParseErrorKind::InvalidNumber, span, message));
            }
            TokenKind::HexNumber
        } else {
            self.cursor.eat_while(|c| c.is_ascii_digit());
            TokenKind::Number
        };
        if self.cursor.check(is_ident_continue) {
            self.cursor.eat_while(is_ident_continue);
            let span = Span::new(start, self.cursor.offset());
            return Err(self.error(
                ParseErrorKind::InvalidNumber,
                span,
                format!("invalid number '{}'", self.cursor.slice_from(start)),
            ));
        }
        Ok(self.make_token(kind, start))
    }

    fn scan_operator(&mut self, start: u32) -> Result<Token<'src>, ParseError> {
        use TokenKind::*;
        let Some(c) = self.cursor.advance() else {
            return Ok(Token::new(Eof, "", Span::point(start)));
        };
        let kind = match c {
            '(' => LeftParen,
            ')' => RightParen,
            '{' => LeftBrace,
            '}' => RightBrace,
            ';' => Semicolon,
            ',' => Comma,
            '.' => Dot,
            '*' => Star,
            '/' => Slash,
            '%' => Percent,
            '^' => Caret,
            '+' => {
                if self.cursor.eat('=') {
                    PlusEqual
                } else {
                    Plus
                }
            }
            '-' => {
                if self.cursor.eat('=') {
                    MinusEqual
                } else {
                    Minus
                }
            }
            '=' => {
                if self.cursor.eat('=') {
                    EqualEqual
                } else {
                    Equal
                }
            }
            '!' => {
                if self.cursor.eat('=') {
                    BangEqual
                } else {
                    Bang
                }
            }
            '<' => {
                if self.cursor.eat('=') {
                    LessEqual
                } else {
                    Less
                }
            }
            '>' => {
                if self.cursor.eat('=') {
                    GreaterEqual
                } else {
                    Greater
                }
            }
            '&' => {
                if self.cursor.eat('&') {
                    AmpAmp
                } else {
                    Amp
                }
            }
            '|' => {
                if self.cursor.eat('|') {
                    PipePipe
                } else {
                    Pipe
                }
            }
            other => {
                let span = Span::new(start, self.cursor.offset());
                return Err(self.error(
                    ParseErrorKind::UnexpectedChar,
                    span,
                    format!("unexpected character '{other}'"),
                ));
            }
        };
        Ok(self.make_token(kind, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new("test", source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn contract_header() {
        use TokenKind::*;
        assert_eq!(
            kinds("abstract contract A is B { }"),
            vec![Abstract, Contract, Identifier, Is, Identifier, LeftBrace, RightBrace, Eof]
        );
    }

    #[test]
    fn operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("a += b != c && !d <= e"),
            vec![
                Identifier, PlusEqual, Identifier, BangEqual, Identifier, AmpAmp, Bang, Identifier,
                LessEqual, Identifier, Eof
            ]
        );
    }

    #[test]
    fn numbers_and_strings() {
        let tokens = Lexer::new("test", r#"42 0xFF "a\"b""#).tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[1].kind, TokenKind::HexNumber);
        assert_eq!(tokens[1].lexeme, "0xFF");
        assert_eq!(tokens[2].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[2].lexeme, r#""a\"b""#);
        assert_eq!(tokens[2].span, Span::new(8, 14));
    }

    #[test]
    fn comments_are_skipped() {
        use TokenKind::*;
        assert_eq!(kinds("// line\n/* block */ x"), vec![Identifier, Eof]);
    }

    #[test]
    fn doc_comments_attach_to_next_token() {
        let tokens = Lexer::new("test", "/// @notice Hi\n/// there\ncontract A {}")
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].doc.as_deref(), Some("@notice Hi\nthere"));
        assert_eq!(tokens[1].doc, None);

        let tokens = Lexer::new("test", "/**\n * @dev Block\n */ function")
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].doc.as_deref(), Some("@dev Block"));
    }

    #[test]
    fn errors_are_located() {
        let err = Lexer::new("unit", "a # b").tokenize().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedChar);
        assert_eq!(err.location, SourceLocation::new("unit", Span::new(2, 3)));

        let err = Lexer::new("unit", "\"open").tokenize().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedString);

        let err = Lexer::new("unit", "/* open").tokenize().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedComment);

        let err = Lexer::new("unit", "12ab").tokenize().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidNumber);
    }
}
