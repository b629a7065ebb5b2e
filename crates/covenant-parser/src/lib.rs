//! Covenant source parser.
//!
//! Turns the text of one source unit into an owned syntax tree. Every node
//! that later passes refer to carries a [`NodeId`](covenant_core::NodeId).
//!
//! ## Modules
//!
//! - [`lexer`]: tokens, keywords and doc-comment capture
//! - [`ast`]: node definitions and the recursive descent [`Parser`]

pub mod ast;
pub mod lexer;

pub use ast::Parser;
pub use covenant_core::{ParseError, ParseErrorKind};
