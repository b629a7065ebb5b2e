//! Semantic types.
//!
//! [`Type`] is what the resolver assigns to declarations and expressions.
//! Types refer to contracts by [`NodeId`]; use
//! [`DeclarationRegistry::describe`](crate::DeclarationRegistry::describe)
//! for a human-readable rendering.

use covenant_core::NodeId;
use covenant_parser::ast::ElementaryType;

use crate::assembly::Word;

/// The type of a declaration or expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Uint(u16),
    Int(u16),
    Bool,
    Address,
    FixedBytes(u8),
    /// A number literal that has not been given a concrete type yet.
    IntegerLiteral(Word),
    /// Only valid as a revert reason.
    StringLiteral(String),
    Contract(NodeId),
    Function(FunctionType),
    /// The result of a call with zero or several return values.
    Tuple(Vec<Type>),
    /// A type used as an expression: `address(x)`, `Token(x)`, `new C`.
    TypeType(Box<Type>),
    /// `msg` or `block`.
    Magic(MagicKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MagicKind {
    Msg,
    Block,
}

/// How a function-typed value is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionTypeKind {
    /// A jump within the current contract.
    Internal,
    /// A message call to another contract.
    External,
    /// `new C(...)`
    Creation,
    Require,
    Revert,
    SelfDestruct,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub kind: FunctionTypeKind,
    pub parameters: Vec<Type>,
    pub returns: Vec<Type>,
}

impl FunctionType {
    pub fn internal(parameters: Vec<Type>, returns: Vec<Type>) -> Self {
        Self {
            kind: FunctionTypeKind::Internal,
            parameters,
            returns,
        }
    }

    pub fn arity(&self) -> Arity {
        Arity {
            inputs: self.parameters.iter().map(Type::stack_size).sum(),
            outputs: self.returns.iter().map(Type::stack_size).sum(),
        }
    }

    /// The type of a call expression with this callee.
    pub fn call_result(&self) -> Type {
        match self.returns.as_slice() {
            [single] => single.clone(),
            many => Type::Tuple(many.to_vec()),
        }
    }

    /// Same parameter and return types, ignoring how the function is
    /// invoked.
    pub fn same_signature(&self, other: &FunctionType) -> bool {
        self.parameters == other.parameters && self.returns == other.returns
    }
}

/// Stack shape of an internal function: number of argument and return slots.
///
/// Internal dispatch functions are generated once per distinct arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Arity {
    pub inputs: usize,
    pub outputs: usize,
}

impl Arity {
    pub const fn new(inputs: usize, outputs: usize) -> Self {
        Self { inputs, outputs }
    }
}

impl Type {
    pub fn from_elementary(ty: ElementaryType) -> Self {
        match ty {
            ElementaryType::Uint(bits) => Type::Uint(bits),
            ElementaryType::Int(bits) => Type::Int(bits),
            ElementaryType::Bool => Type::Bool,
            ElementaryType::Address => Type::Address,
            ElementaryType::FixedBytes(len) => Type::FixedBytes(len),
        }
    }

    /// Number of stack slots a value of this type occupies.
    pub fn stack_size(&self) -> usize {
        match self {
            Type::Tuple(items) => items.iter().map(Type::stack_size).sum(),
            Type::StringLiteral(_) | Type::TypeType(_) | Type::Magic(_) => 0,
            Type::Function(f) if f.kind != FunctionTypeKind::Internal => 0,
            _ => 1,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Uint(_) | Type::Int(_) | Type::IntegerLiteral(_))
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    /// Whether the type has a storage and stack representation.
    pub fn is_value_type(&self) -> bool {
        match self {
            Type::Uint(_)
            | Type::Int(_)
            | Type::Bool
            | Type::Address
            | Type::FixedBytes(_)
            | Type::Contract(_) => true,
            Type::Function(f) => f.kind == FunctionTypeKind::Internal,
            _ => false,
        }
    }

    /// Canonical ABI name, or `None` for types that cannot cross a message
    /// call.
    pub fn abi_name(&self) -> Option<String> {
        Some(match self {
            Type::Uint(bits) => format!("uint{bits}"),
            Type::Int(bits) => format!("int{bits}"),
            Type::Bool => "bool".to_string(),
            Type::Address | Type::Contract(_) => "address".to_string(),
            Type::FixedBytes(len) => format!("bytes{len}"),
            _ => return None,
        })
    }

    /// Implicit conversions that need no contract hierarchy knowledge.
    ///
    /// Contract-to-base conversions are handled by the registry.
    pub fn is_implicitly_convertible_to(&self, target: &Type) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (Type::Uint(from), Type::Uint(to)) | (Type::Int(from), Type::Int(to)) => to >= from,
            (Type::Uint(from), Type::Int(to)) => to > from,
            (Type::IntegerLiteral(value), Type::Uint(bits)) => value.bits() <= *bits,
            (Type::IntegerLiteral(value), Type::Int(bits)) => value.bits() < *bits,
            (Type::Contract(_), Type::Address) => true,
            (Type::Function(from), Type::Function(to)) => {
                from.kind == FunctionTypeKind::Internal
                    && to.kind == FunctionTypeKind::Internal
                    && from.same_signature(to)
            }
            _ => false,
        }
    }

    /// Conversions allowed with an explicit `T(x)`.
    pub fn is_explicitly_convertible_to(&self, target: &Type) -> bool {
        if self.is_implicitly_convertible_to(target) {
            return true;
        }
        match (self, target) {
            (from, to) if from.is_integer() && to.is_integer() => true,
            (Type::Uint(_) | Type::IntegerLiteral(_), Type::Address) => true,
            (Type::Address | Type::Contract(_), Type::Uint(160) | Type::Address) => true,
            (Type::Address | Type::Contract(_), Type::Contract(_)) => true,
            (Type::FixedBytes(len), Type::Uint(bits))
            | (Type::Uint(bits), Type::FixedBytes(len)) => {
                *len as u16 * 8 == *bits
            }
            (Type::FixedBytes(_), Type::FixedBytes(_)) => true,
            _ => false,
        }
    }

    /// The type a literal takes when nothing else constrains it.
    pub fn mobile(&self) -> Type {
        match self {
            Type::IntegerLiteral(value) => {
                let bits = value.bits().max(1).div_ceil(8) * 8;
                Type::Uint(bits)
            }
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widening() {
        assert!(Type::Uint(8).is_implicitly_convertible_to(&Type::Uint(256)));
        assert!(!Type::Uint(256).is_implicitly_convertible_to(&Type::Uint(8)));
        assert!(Type::Uint(8).is_implicitly_convertible_to(&Type::Int(16)));
        assert!(!Type::Uint(8).is_implicitly_convertible_to(&Type::Int(8)));
        assert!(!Type::Int(8).is_implicitly_convertible_to(&Type::Uint(256)));
    }

    #[test]
    fn literal_fits() {
        let lit = Type::IntegerLiteral(Word::from_u64(255));
        assert!(lit.is_implicitly_convertible_to(&Type::Uint(8)));
        assert!(!lit.is_implicitly_convertible_to(&Type::Int(8)));
        assert!(lit.is_implicitly_convertible_to(&Type::Int(16)));
        assert_eq!(lit.mobile(), Type::Uint(8));
        assert_eq!(Type::IntegerLiteral(Word::ZERO).mobile(), Type::Uint(8));
    }

    #[test]
    fn explicit_conversions() {
        assert!(Type::Uint(256).is_explicitly_convertible_to(&Type::Uint(8)));
        assert!(Type::Address.is_explicitly_convertible_to(&Type::Contract(NodeId(1))));
        assert!(Type::FixedBytes(4).is_explicitly_convertible_to(&Type::Uint(32)));
        assert!(!Type::FixedBytes(4).is_explicitly_convertible_to(&Type::Uint(64)));
        assert!(!Type::Bool.is_explicitly_convertible_to(&Type::Uint(8)));
    }

    #[test]
    fn arity_and_stack_sizes() {
        let f = FunctionType::internal(vec![Type::Uint(256), Type::Bool], vec![Type::Address]);
        assert_eq!(f.arity(), Arity::new(2, 1));
        assert_eq!(f.call_result(), Type::Address);
        assert_eq!(Type::Tuple(vec![]).stack_size(), 0);
        assert_eq!(Type::Magic(MagicKind::Msg).stack_size(), 0);
        assert_eq!(Type::Function(f).stack_size(), 1);
    }

    #[test]
    fn arities_order_by_inputs_then_outputs() {
        let a = Arity::new(1, 2);
        let b = Arity::new(2, 0);
        assert!(a < b);
    }

    #[test]
    fn abi_names() {
        assert_eq!(
            Type::Contract(NodeId(3)).abi_name().as_deref(),
            Some("address")
        );
        assert_eq!(Type::Uint(64).abi_name().as_deref(), Some("uint64"));
        assert_eq!(Type::Tuple(vec![]).abi_name(), None);
    }
}
