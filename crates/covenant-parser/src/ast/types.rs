//! Type name AST nodes.

use std::fmt;

use covenant_core::Span;

use crate::ast::decl::Ident;

/// A built-in value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementaryType {
    /// Unsigned integer of the given bit width.
    Uint(u16),
    /// Signed integer of the given bit width.
    Int(u16),
    Bool,
    Address,
    /// Fixed-size byte array of the given length.
    FixedBytes(u8),
}

impl ElementaryType {
    /// Parse a type keyword such as `uint`, `int64` or `bytes4`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => ElementaryType::Bool,
            "address" => ElementaryType::Address,
            "uint" => ElementaryType::Uint(256),
            "int" => ElementaryType::Int(256),
            _ => {
                if let Some(bits) = name.strip_prefix("uint") {
                    ElementaryType::Uint(bits.parse().ok()?)
                } else if let Some(bits) = name.strip_prefix("int") {
                    ElementaryType::Int(bits.parse().ok()?)
                } else if let Some(len) = name.strip_prefix("bytes") {
                    ElementaryType::FixedBytes(len.parse().ok()?)
                } else {
                    return None;
                }
            }
        })
    }
}

impl fmt::Display for ElementaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementaryType::Uint(bits) => write!(f, "uint{bits}"),
            ElementaryType::Int(bits) => write!(f, "int{bits}"),
            ElementaryType::Bool => write!(f, "bool"),
            ElementaryType::Address => write!(f, "address"),
            ElementaryType::FixedBytes(len) => write!(f, "bytes{len}"),
        }
    }
}

/// A written type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeName {
    Elementary { ty: ElementaryType, span: Span },
    /// A contract name.
    UserDefined(Ident),
    /// `function (uint) returns (bool)`
    Function(FunctionTypeName),
}

impl TypeName {
    pub fn span(&self) -> Span {
        match self {
            TypeName::Elementary { span, .. } => *span,
            TypeName::UserDefined(ident) => ident.span,
            TypeName::Function(f) => f.span,
        }
    }
}

/// An internal function type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTypeName {
    pub parameters: Vec<TypeName>,
    pub returns: Vec<TypeName>,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_widen_to_256() {
        assert_eq!(
            ElementaryType::from_name("uint"),
            Some(ElementaryType::Uint(256))
        );
        assert_eq!(
            ElementaryType::from_name("int"),
            Some(ElementaryType::Int(256))
        );
        assert_eq!(
            ElementaryType::from_name("bytes4"),
            Some(ElementaryType::FixedBytes(4))
        );
        assert_eq!(ElementaryType::from_name("string"), None);
    }

    #[test]
    fn display_round_trips_canonical_names() {
        assert_eq!(ElementaryType::Uint(8).to_string(), "uint8");
        assert_eq!(ElementaryType::FixedBytes(32).to_string(), "bytes32");
    }
}
