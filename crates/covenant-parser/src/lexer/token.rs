//! Token types and definitions for the Covenant lexer.

use covenant_core::Span;
use std::fmt;

/// A token from the source code.
///
/// Lexemes borrow from the source text. A doc comment directly preceding
/// the token is carried along with it, already stripped of its comment
/// markers.
#[derive(Clone, PartialEq)]
pub struct Token<'src> {
    /// The type of token.
    pub kind: TokenKind,
    /// The source text of this token.
    pub lexeme: &'src str,
    /// Location in source.
    pub span: Span,
    /// Text of the `///` or `/** */` comment immediately before this token.
    pub doc: Option<String>,
}

impl<'src> Token<'src> {
    /// Create a new token.
    #[inline]
    pub fn new(kind: TokenKind, lexeme: &'src str, span: Span) -> Self {
        Self {
            kind,
            lexeme,
            span,
            doc: None,
        }
    }
}

impl fmt::Debug for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?} @ {:?})", self.kind, self.lexeme, self.span)
    }
}

/// All possible token types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // =========================================
    // Literals
    // =========================================
    /// Decimal literal: `42`
    Number,
    /// Hex literal: `0xff`
    HexNumber,
    /// String literal: `"hello"`
    StringLiteral,

    // =========================================
    // Identifiers
    // =========================================
    /// User-defined identifier
    Identifier,
    /// Built-in value type name: `uint256`, `bool`, `address`, `bytes4`
    ElementaryType,

    // =========================================
    // Keywords
    // =========================================
    Import,
    Contract,
    Abstract,
    Is,
    Function,
    Modifier,
    Constructor,
    Fallback,
    Returns,
    Return,
    If,
    Else,
    Public,
    Private,
    Internal,
    External,
    View,
    Payable,
    Constant,
    Immutable,
    New,
    True,
    False,
    /// `_` in a modifier body
    Placeholder,

    // =========================================
    // Operators
    // =========================================
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    PlusEqual,
    MinusEqual,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AmpAmp,
    PipePipe,
    Bang,
    Amp,
    Pipe,
    Caret,

    // =========================================
    // Delimiters
    // =========================================
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Semicolon,
    Comma,
    Dot,

    // =========================================
    // Special
    // =========================================
    Eof,
}

impl TokenKind {
    /// Check if this token is a keyword.
    pub fn is_keyword(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Import
                | Contract
                | Abstract
                | Is
                | Function
                | Modifier
                | Constructor
                | Fallback
                | Returns
                | Return
                | If
                | Else
                | Public
                | Private
                | Internal
                | External
                | View
                | Payable
                | Constant
                | Immutable
                | New
                | True
                | False
                | Placeholder
        )
    }

    /// Human-readable description used in diagnostics.
    pub fn description(self) -> &'static str {
        use TokenKind::*;
        match self {
            Number => "number",
            HexNumber => "hex number",
            StringLiteral => "string literal",
            Identifier => "identifier",
            ElementaryType => "type name",
            Import => "'import'",
            Contract => "'contract'",
            Abstract => "'abstract'",
            Is => "'is'",
            Function => "'function'",
            Modifier => "'modifier'",
            Constructor => "'constructor'",
            Fallback => "'fallback'",
            Returns => "'returns'",
            Return => "'return'",
            If => "'if'",
            Else => "'else'",
            Public => "'public'",
            Private => "'private'",
            Internal => "'internal'",
            External => "'external'",
            View => "'view'",
            Payable => "'payable'",
            Constant => "'constant'",
            Immutable => "'immutable'",
            New => "'new'",
            True => "'true'",
            False => "'false'",
            Placeholder => "'_'",
            Plus => "'+'",
            Minus => "'-'",
            Star => "'*'",
            Slash => "'/'",
            Percent => "'%'",
            Equal => "'='",
            PlusEqual => "'+='",
            MinusEqual => "'-='",
            EqualEqual => "'=='",
            BangEqual => "'!='",
            Less => "'<'",
            LessEqual => "'<='",
            Greater => "'>'",
            GreaterEqual => "'>='",
            AmpAmp => "'&&'",
            PipePipe => "'||'",
            Bang => "'!'",
            Amp => "'&'",
            Pipe => "'|'",
            Caret => "'^'",
            LeftParen => "'('",
            RightParen => "')'",
            LeftBrace => "'{'",
            RightBrace => "'}'",
            Semicolon => "';'",
            Comma => "','",
            Dot => "'.'",
            Eof => "end of file",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Map a keyword string to its [`TokenKind`], or `None` if not a keyword.
///
/// Sized value type names (`uint8` .. `uint256`, `bytes1` .. `bytes32`)
/// map to [`TokenKind::ElementaryType`].
pub fn lookup_keyword(ident: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match ident {
        "import" => Import,
        "contract" => Contract,
        "abstract" => Abstract,
        "is" => Is,
        "function" => Function,
        "modifier" => Modifier,
        "constructor" => Constructor,
        "fallback" => Fallback,
        "returns" => Returns,
        "return" => Return,
        "if" => If,
        "else" => Else,
        "public" => Public,
        "private" => Private,
        "internal" => Internal,
        "external" => External,
        "view" => View,
        "payable" => Payable,
        "constant" => Constant,
        "immutable" => Immutable,
        "new" => New,
        "true" => True,
        "false" => False,
        "_" => Placeholder,
        _ if is_elementary_type_name(ident) => ElementaryType,
        _ => return None,
    })
}

fn is_elementary_type_name(ident: &str) -> bool {
    fn sized(rest: &str, valid: impl Fn(u32) -> bool) -> bool {
        // Leading zeros would alias another spelling.
        !rest.starts_with('0') && rest.parse::<u32>().is_ok_and(valid)
    }
    match ident {
        "bool" | "address" | "uint" | "int" => true,
        _ => {
            if let Some(rest) = ident.strip_prefix("uint") {
                sized(rest, |n| n % 8 == 0 && (8..=256).contains(&n))
            } else if let Some(rest) = ident.strip_prefix("int") {
                sized(rest, |n| n % 8 == 0 && (8..=256).contains(&n))
            } else if let Some(rest) = ident.strip_prefix("bytes") {
                sized(rest, |n| (1..=32).contains(&n))
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords() {
        assert_eq!(lookup_keyword("contract"), Some(TokenKind::Contract));
        assert_eq!(lookup_keyword("_"), Some(TokenKind::Placeholder));
        assert_eq!(lookup_keyword("owner"), None);
        assert!(TokenKind::Returns.is_keyword());
        assert!(!TokenKind::Identifier.is_keyword());
    }

    #[test]
    fn elementary_types() {
        for name in ["uint", "uint8", "uint256", "int128", "bool", "address", "bytes1", "bytes32"] {
            assert_eq!(
                lookup_keyword(name),
                Some(TokenKind::ElementaryType),
                "{name}"
            );
        }
        for name in ["uint7", "uint264", "uint08", "bytes0", "bytes33", "bytes"] {
            assert_eq!(lookup_keyword(name), None, "{name}");
        }
    }
}
