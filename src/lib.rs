//! Covenant
//!
//! Driver for the Covenant contract language. Register named source units,
//! then parse and compile them to bytecode for the stack machine.
//!
//! ```
//! use covenant::{Compiler, CompilerOptions};
//!
//! let mut compiler = Compiler::with_options(CompilerOptions::new().with_standard_sources(false));
//! compiler.add_source("token", "contract Token { uint256 supply; }", false);
//! compiler.compile()?;
//! assert!(!compiler.runtime_object("Token")?.is_empty());
//! # Ok::<(), covenant::CompilerError>(())
//! ```
//!
//! ## Modules
//!
//! - [`compiler`]: the phase driver and its queries
//! - [`contract`]: per-contract results
//! - [`source`]: the source registry
//! - [`imports`]: compile order from import directives
//! - [`options`]: driver configuration
//! - [`standard_sources`]: the bundled library units

pub mod compiler;
pub mod contract;
pub mod imports;
pub mod options;
pub mod source;
pub mod standard_sources;

pub use compiler::{Compiler, Stage};
pub use contract::CompiledContract;
pub use imports::resolve_imports;
pub use options::CompilerOptions;
pub use source::{Source, SourceRegistry};
pub use standard_sources::{STANDARD_SOURCES, is_standard_source};

pub use covenant_compiler::{AssemblyItem, DocumentationType, LinkerObject, RevertStrings};
pub use covenant_core::{CompilerError, LineColumn, Result, SourceLocation, Span, StateError};

pub mod prelude {
    pub use crate::compiler::*;
    pub use crate::contract::*;
    pub use crate::options::*;
    pub use covenant_compiler::{AssemblyItem, DocumentationType, LinkerObject, RevertStrings};
    pub use covenant_core::{CompilerError, Result, StateError};
}
