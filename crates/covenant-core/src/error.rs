//! Unified error types for the Covenant compiler.
//!
//! Each phase has its own error type so callers can match on exactly the
//! failure they care about. [`CompilerError`] wraps all of them for the
//! driver API.
//!
//! ## Error Hierarchy
//!
//! ```text
//! CompilerError (top-level wrapper)
//! ├── ParseError        - Lexer/parser errors (with ParseErrorKind)
//! ├── UnresolvedImport  - Import target missing from the registry
//! ├── ResolutionError   - Name, type and semantic rule violations
//! ├── StateError        - Driver API misuse
//! ├── CodegenError      - Lowering limits (stack depth, unsupported constructs)
//! └── Internal          - Compiler invariant violations
//! ```

use thiserror::Error;

use crate::SourceLocation;

// ============================================================================
// Parse Errors
// ============================================================================

/// Categories of parse errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    // Lexical errors
    UnexpectedChar,
    UnterminatedString,
    UnterminatedComment,
    InvalidNumber,

    // Token-level errors
    ExpectedToken,
    UnexpectedToken,
    UnexpectedEof,

    // Structure errors
    ExpectedExpression,
    ExpectedType,
    ExpectedStatement,
    ExpectedDeclaration,
    ExpectedIdentifier,
    ConflictingModifiers,
    InvalidLiteral,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorKind::UnexpectedChar => "unexpected character",
            ParseErrorKind::UnterminatedString => "unterminated string",
            ParseErrorKind::UnterminatedComment => "unterminated comment",
            ParseErrorKind::InvalidNumber => "invalid number",
            ParseErrorKind::ExpectedToken => "expected token",
            ParseErrorKind::UnexpectedToken => "unexpected token",
            ParseErrorKind::UnexpectedEof => "unexpected end of file",
            ParseErrorKind::ExpectedExpression => "expected expression",
            ParseErrorKind::ExpectedType => "expected type",
            ParseErrorKind::ExpectedStatement => "expected statement",
            ParseErrorKind::ExpectedDeclaration => "expected declaration",
            ParseErrorKind::ExpectedIdentifier => "expected identifier",
            ParseErrorKind::ConflictingModifiers => "conflicting modifiers",
            ParseErrorKind::InvalidLiteral => "invalid literal",
        }
    }
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A syntax error with its location.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at {location}: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub location: SourceLocation,
    pub message: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            kind,
            location,
            message: message.into(),
        }
    }

    pub fn expected_token(location: SourceLocation, expected: &str, found: &str) -> Self {
        Self::new(
            ParseErrorKind::ExpectedToken,
            location,
            format!("expected {expected}, found {found}"),
        )
    }

    pub fn unexpected_eof(location: SourceLocation) -> Self {
        Self::new(
            ParseErrorKind::UnexpectedEof,
            location,
            "unexpected end of file",
        )
    }
}

// ============================================================================
// Resolution Errors
// ============================================================================

/// Name, type and semantic rule violations found by the resolution and
/// requirement-checking passes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionError {
    #[error("at {location}: undeclared identifier '{name}'")]
    UndeclaredIdentifier {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: unknown type '{name}'")]
    UnknownType {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: member '{member}' not found in {ty}")]
    UnknownMember {
        member: String,
        ty: String,
        location: SourceLocation,
    },

    #[error("at {location}: identifier '{name}' already declared")]
    DuplicateDeclaration {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: contract '{name}' inherits from itself")]
    CyclicInheritance {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: linearization of inheritance graph impossible for '{name}'")]
    LinearizationImpossible {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        location: SourceLocation,
    },

    #[error("at {location}: wrong argument count: expected {expected}, found {found}")]
    ArgumentCount {
        expected: usize,
        found: usize,
        location: SourceLocation,
    },

    #[error("at {location}: {message}")]
    InvalidOperation {
        message: String,
        location: SourceLocation,
    },

    #[error("at {location}: override of '{name}' changes its signature")]
    OverrideMismatch {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: {message}")]
    Visibility {
        message: String,
        location: SourceLocation,
    },

    #[error("at {location}: {message}")]
    NotPayable {
        message: String,
        location: SourceLocation,
    },

    #[error("at {location}: initial value of constant '{name}' is not a compile-time constant")]
    ConstantInitializer {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: cannot instantiate abstract contract '{name}'")]
    AbstractInstantiation {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: circular reference for contract creation of '{name}'")]
    CreationCycle {
        name: String,
        location: SourceLocation,
    },

    #[error("at {location}: missing constructor arguments for base '{base}'")]
    MissingBaseArguments {
        base: String,
        location: SourceLocation,
    },

    #[error("at {location}: type of '{name}' is not allowed in a public signature")]
    NotAbiEncodable {
        name: String,
        location: SourceLocation,
    },
}

impl ResolutionError {
    /// Get the location where this error occurred.
    pub fn location(&self) -> &SourceLocation {
        match self {
            ResolutionError::UndeclaredIdentifier { location, .. }
            | ResolutionError::UnknownType { location, .. }
            | ResolutionError::UnknownMember { location, .. }
            | ResolutionError::DuplicateDeclaration { location, .. }
            | ResolutionError::CyclicInheritance { location, .. }
            | ResolutionError::LinearizationImpossible { location, .. }
            | ResolutionError::TypeMismatch { location, .. }
            | ResolutionError::ArgumentCount { location, .. }
            | ResolutionError::InvalidOperation { location, .. }
            | ResolutionError::OverrideMismatch { location, .. }
            | ResolutionError::Visibility { location, .. }
            | ResolutionError::NotPayable { location, .. }
            | ResolutionError::ConstantInitializer { location, .. }
            | ResolutionError::AbstractInstantiation { location, .. }
            | ResolutionError::CreationCycle { location, .. }
            | ResolutionError::MissingBaseArguments { location, .. }
            | ResolutionError::NotAbiEncodable { location, .. } => location,
        }
    }
}

// ============================================================================
// Driver State Errors
// ============================================================================

/// Misuse of the driver API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("parsing not yet performed")]
    NotParsed,

    #[error("compilation not yet performed")]
    NotCompiled,

    #[error("a previous phase failed; reset before retrying")]
    Failed,

    #[error("no compiled contracts found")]
    NoContracts,

    #[error("contract '{0}' not found")]
    ContractNotFound(String),

    #[error("source '{0}' not found")]
    SourceNotFound(String),
}

// ============================================================================
// Codegen Errors
// ============================================================================

/// Limits hit while lowering a resolved contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodegenError {
    #[error("at {location}: stack too deep, try using fewer variables")]
    StackTooDeep { location: SourceLocation },

    #[error("at {location}: {message}")]
    Unsupported {
        message: String,
        location: SourceLocation,
    },
}

// ============================================================================
// Top-level Error
// ============================================================================

/// Top-level error type for the Covenant compiler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompilerError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("at {location}: source \"{path}\" not found")]
    UnresolvedImport {
        path: String,
        location: SourceLocation,
    },

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("{0}")]
    State(#[from] StateError),

    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),

    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompilerError {
    /// Build an internal error from anything printable.
    pub fn internal(message: impl Into<String>) -> Self {
        CompilerError::Internal(message.into())
    }

    /// Get the source location if this error has one.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            CompilerError::Parse(e) => Some(&e.location),
            CompilerError::UnresolvedImport { location, .. } => Some(location),
            CompilerError::Resolution(e) => Some(e.location()),
            CompilerError::Codegen(CodegenError::StackTooDeep { location })
            | CompilerError::Codegen(CodegenError::Unsupported { location, .. }) => Some(location),
            CompilerError::State(_) | CompilerError::Internal(_) => None,
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, CompilerError::Parse(_))
    }

    pub fn is_unresolved_import(&self) -> bool {
        matches!(self, CompilerError::UnresolvedImport { .. })
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self, CompilerError::Resolution(_))
    }

    pub fn is_state(&self) -> bool {
        matches!(self, CompilerError::State(_))
    }

    pub fn is_codegen(&self) -> bool {
        matches!(self, CompilerError::Codegen(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CompilerError::Internal(_))
    }
}

/// Result alias used across the compiler crates.
pub type Result<T> = std::result::Result<T, CompilerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Span;

    fn loc() -> SourceLocation {
        SourceLocation::new("a", Span::new(0, 6))
    }

    #[test]
    fn parse_error_display() {
        let err = ParseError::expected_token(loc(), "';'", "'}'");
        assert_eq!(
            err.to_string(),
            "expected token at a:0..6: expected ';', found '}'"
        );
    }

    #[test]
    fn wrapper_predicates() {
        let err: CompilerError = StateError::NotParsed.into();
        assert!(err.is_state());
        assert!(!err.is_parse());
        assert!(err.location().is_none());

        let err = CompilerError::UnresolvedImport {
            path: "b".into(),
            location: loc(),
        };
        assert!(err.is_unresolved_import());
        assert_eq!(err.location(), Some(&loc()));
    }

    #[test]
    fn resolution_location() {
        let err = ResolutionError::UndeclaredIdentifier {
            name: "x".into(),
            location: loc(),
        };
        assert_eq!(err.location(), &loc());
        let wrapped: CompilerError = err.into();
        assert!(wrapped.is_resolution());
        assert_eq!(
            wrapped.to_string(),
            "resolution error: at a:0..6: undeclared identifier 'x'"
        );
    }
}
