//! Core types shared by every Covenant compiler crate.
//!
//! - [`span`]: byte-range spans, located spans and line/column lookup
//! - [`ids`]: stable syntax node identities
//! - [`error`]: the error hierarchy

pub mod error;
pub mod ids;
pub mod span;

pub use error::{
    CodegenError, CompilerError, ParseError, ParseErrorKind, ResolutionError, Result, StateError,
};
pub use ids::{NodeId, NodeIdGen};
pub use span::{LineColumn, SourceLocation, Span, line_column};
