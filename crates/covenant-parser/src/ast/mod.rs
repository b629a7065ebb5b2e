//! Abstract Syntax Tree (AST) for Covenant.
//!
//! This module provides the node definitions and the parser that builds
//! them from tokens.
//!
//! # Example
//!
//! ```
//! use covenant_core::NodeIdGen;
//! use covenant_parser::Parser;
//!
//! let mut ids = NodeIdGen::new();
//! let unit = Parser::parse("owned", "contract Owned { address owner; }", &mut ids).unwrap();
//! assert_eq!(unit.contracts().count(), 1);
//! ```

pub mod decl;
mod decl_parser;
pub mod expr;
mod expr_parser;
mod parser;
pub mod stmt;
mod stmt_parser;
mod type_parser;
pub mod types;

pub use covenant_core::{ParseError, ParseErrorKind};

pub use decl::*;
pub use expr::*;
pub use parser::Parser;
pub use stmt::*;
pub use types::*;
