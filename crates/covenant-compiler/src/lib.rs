//! Covenant Compiler
//!
//! Semantic analysis and code generation for Covenant contracts.
//!
//! ## Architecture
//!
//! - **Pass 1 (Registration)**: register every contract and its members
//! - **Pass 2 (Resolution)**: linearize inheritance, bind names, type
//!   every expression
//! - **Pass 3 (Requirements)**: program-wide checks and documentation
//! - **Code generation**: one [`ContractCompiler`] run per implemented
//!   contract, dependencies first
//!
//! ## Modules
//!
//! - [`assembly`]: symbolic assembly, instructions and the assembler
//! - [`codegen`]: lowering to assembly
//! - [`docs`]: NatSpec, ABI and interface rendering
//! - [`passes`]: the semantic passes
//! - [`registry`]: declarations and resolution results
//! - [`types`]: the type system

pub mod assembly;
pub mod codegen;
pub mod docs;
pub mod passes;
pub mod registry;
pub mod types;

pub use assembly::{Assembly, AssemblyItem, Instruction, LinkerObject, Word};
pub use codegen::{ContractArtifacts, ContractCompiler, FunctionCollector, RevertStrings};
pub use docs::{DocumentationType, InterfaceHandler, NatSpec};
pub use passes::{
    ContractDocumentation, RegistrationOutput, RegistrationPass, RequirementsOutput,
    RequirementsPass, ResolutionOutput, ResolutionPass,
};
pub use registry::{DeclarationRegistry, InterfaceFunction, InterfaceItem};
pub use types::{Arity, FunctionType, Type};

// Re-export the error types from core for convenience
pub use covenant_core::{CodegenError, CompilerError, Result};
