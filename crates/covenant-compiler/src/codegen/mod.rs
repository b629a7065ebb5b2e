//! Stack-machine code generation.
//!
//! - [`context`]: per-object generation state: variables, the function
//!   queue, internal dispatch and sub-objects
//! - [`collector`]: utility routines shared by every object of a run
//! - [`utils`]: inline sequences and utility routine generators
//! - [`lower`]: functions, statements and expressions
//! - [`contract`]: creation, runtime and clone objects of a contract

pub mod collector;
pub mod context;
pub mod contract;
pub mod lower;
pub mod utils;

pub use collector::FunctionCollector;
pub use context::{
    CodegenContext, CodegenMode, InternalDispatchMap, IrVariable, RevertStrings, function_label,
};
pub use contract::{ContractArtifacts, ContractCompiler};
pub use lower::immutable_name;
pub use utils::PanicCode;
