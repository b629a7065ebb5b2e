//! The compilation driver.
//!
//! A [`Compiler`] owns the registered sources and walks them through every
//! phase:
//!
//! 1. parse each unit
//! 2. order the units by their imports
//! 3. register declarations program-wide
//! 4. resolve names, inheritance and types
//! 5. check program-wide requirements and collect documentation
//! 6. generate code for every fully implemented contract
//!
//! Phases 1 to 5 run in [`Compiler::parse`], phase 6 in
//! [`Compiler::compile`]. Each phase covers the whole program before the
//! next one starts.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use covenant_compiler::{
    Assembly, AssemblyItem, ContractCompiler, DeclarationRegistry, DocumentationType,
    FunctionCollector, LinkerObject, RegistrationPass, RequirementsPass, ResolutionPass,
};
use covenant_core::{
    CompilerError, LineColumn, NodeId, NodeIdGen, Result, SourceLocation, StateError, line_column,
};
use covenant_parser::Parser;
use covenant_parser::ast::{ContractDefinition, FunctionDefinition, SourceUnit};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::contract::CompiledContract;
use crate::imports::resolve_imports;
use crate::options::CompilerOptions;
use crate::source::SourceRegistry;
use crate::standard_sources::{STANDARD_SOURCES, is_standard_source};

/// How far the driver got with the current sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Nothing derived from the sources yet.
    Empty,
    /// Every unit parsed and the compile order known.
    Parsed,
    /// Declarations registered, resolved and checked.
    Resolved,
    /// Code generated.
    Compiled,
    /// A phase failed. Only a reset or a source change leaves this stage.
    Failed,
}

/// Compiles a set of named source units.
#[derive(Debug)]
pub struct Compiler {
    options: CompilerOptions,
    sources: SourceRegistry,
    stage: Stage,
    source_order: Vec<String>,
    registry: DeclarationRegistry,
    contracts: BTreeMap<String, CompiledContract>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_options(CompilerOptions::default())
    }

    pub fn with_options(options: CompilerOptions) -> Self {
        let mut compiler = Self {
            options,
            sources: SourceRegistry::new(),
            stage: Stage::Empty,
            source_order: Vec::new(),
            registry: DeclarationRegistry::new(),
            contracts: BTreeMap::new(),
        };
        compiler.reset(false, options.standard_sources());
        compiler
    }

    /// Compile `text` as the only user unit and return its creation object.
    pub fn static_compile(text: &str) -> Result<LinkerObject> {
        Compiler::new().compile_source(text).cloned()
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Drop everything derived from the sources. Without `keep_sources` the
    /// sources go too, and the standard units are registered again if
    /// `add_standard_sources` is set.
    pub fn reset(&mut self, keep_sources: bool, add_standard_sources: bool) {
        self.stage = Stage::Empty;
        self.source_order.clear();
        self.contracts.clear();
        self.registry = DeclarationRegistry::new();
        if keep_sources {
            self.sources.clear_derived();
        } else {
            self.sources.clear();
            if add_standard_sources {
                for (name, text) in STANDARD_SOURCES {
                    self.sources.add(*name, *text, true);
                }
            }
        }
    }

    /// Register or replace a unit. Returns whether `name` was already
    /// registered. Everything derived from the sources is dropped.
    pub fn add_source(
        &mut self,
        name: impl Into<String>,
        text: impl Into<String>,
        is_library: bool,
    ) -> bool {
        self.reset(true, false);
        self.sources.add(name, text, is_library)
    }

    /// Start over with `text` as the only user unit, named `""`.
    pub fn set_source(&mut self, text: impl Into<String>) {
        self.reset(false, self.options.standard_sources());
        self.add_source("", text, false);
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// Names of the units in compile order.
    pub fn source_order(&self) -> Result<&[String]> {
        self.require_parsed()?;
        Ok(&self.source_order)
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// Parse, order, register, resolve and check every unit.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn parse(&mut self) -> Result<()> {
        if self.stage == Stage::Failed {
            return Err(CompilerError::State(StateError::Failed));
        }
        self.reset(true, false);
        self.run_front_end().inspect_err(|_| self.stage = Stage::Failed)
    }

    /// Generate code for every fully implemented contract, parsing first if
    /// needed.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn compile(&mut self) -> Result<()> {
        match self.stage {
            Stage::Failed => return Err(CompilerError::State(StateError::Failed)),
            Stage::Empty | Stage::Parsed => self.parse()?,
            Stage::Resolved | Stage::Compiled => {}
        }
        for contract in self.contracts.values_mut() {
            contract.clear_artifacts();
        }
        self.generate_code().inspect_err(|_| self.stage = Stage::Failed)
    }

    /// [`set_source`](Self::set_source) followed by [`parse`](Self::parse).
    pub fn parse_source(&mut self, text: impl Into<String>) -> Result<()> {
        self.set_source(text);
        self.parse()
    }

    /// Parse and compile `text` as the only user unit and return the
    /// creation object of the default contract.
    pub fn compile_source(&mut self, text: impl Into<String>) -> Result<&LinkerObject> {
        self.parse_source(text)?;
        self.compile()?;
        self.object("")
    }

    fn run_front_end(&mut self) -> Result<()> {
        let mut ids = NodeIdGen::new();
        for (name, source) in self.sources.iter_mut() {
            let unit = Parser::parse(name, source.text(), &mut ids)?;
            source.ast = Some(Rc::new(unit));
        }
        debug!(
            sources = self.sources.len(),
            nodes = ids.allocated(),
            "parsed sources"
        );

        self.source_order = resolve_imports(&self.sources)?;
        self.stage = Stage::Parsed;
        trace!(order = ?self.source_order, "compile order");

        let units = self
            .source_order
            .iter()
            .map(|name| self.sources.ast(name).cloned())
            .collect::<Result<Vec<Rc<SourceUnit>>>>()?;
        RegistrationPass::new(&mut self.registry).run(&units)?;
        ResolutionPass::new(&mut self.registry).run(&units)?;
        let mut requirements = RequirementsPass::new(&self.registry).run(&units)?;

        for unit in &units {
            for definition in unit.contracts() {
                let documentation = requirements.documentation.remove(&definition.id);
                let contract = CompiledContract::new(Rc::clone(definition), documentation);
                self.contracts.insert(definition.name.name.clone(), contract);
            }
        }
        self.stage = Stage::Resolved;
        debug!(contracts = self.contracts.len(), "resolved declarations");
        Ok(())
    }

    fn generate_code(&mut self) -> Result<()> {
        let order = self.codegen_order()?;
        let collector = Rc::new(RefCell::new(FunctionCollector::new()));
        let mut compiled: BTreeMap<NodeId, Rc<Assembly>> = BTreeMap::new();
        for id in order {
            let artifacts = ContractCompiler::new(
                &self.registry,
                &compiled,
                Rc::clone(&collector),
                self.options.revert_strings(),
            )
            .compile(id)?;
            compiled.insert(id, Rc::clone(&artifacts.assembly));

            let name = &self.registry.contract(id)?.definition.name.name;
            let contract = self
                .contracts
                .get_mut(name)
                .ok_or_else(|| {
                    CompilerError::internal(format!("no compiled unit for contract '{name}'"))
                })?;
            contract.set_artifacts(artifacts);
        }
        self.stage = Stage::Compiled;
        debug!(
            contracts = compiled.len(),
            routines = collector.borrow().len(),
            "code generation finished"
        );
        Ok(())
    }

    /// Fully implemented contracts, each after the contracts it creates.
    fn codegen_order(&self) -> Result<Vec<NodeId>> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::new();
        for name in &self.source_order {
            for contract in self.sources.ast(name)?.contracts() {
                self.visit_creation_dependencies(contract.id, &mut visited, &mut order)?;
            }
        }
        Ok(order)
    }

    fn visit_creation_dependencies(
        &self,
        contract: NodeId,
        visited: &mut FxHashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) -> Result<()> {
        if !visited.insert(contract) {
            return Ok(());
        }
        for dependency in self.registry.creation_dependencies(contract)? {
            self.visit_creation_dependencies(dependency, visited, order)?;
        }
        if self.registry.is_fully_implemented(contract)? {
            order.push(contract);
        } else {
            trace!(contract = %contract, "skipping contract that is not fully implemented");
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn require_parsed(&self) -> Result<()> {
        match self.stage {
            Stage::Resolved | Stage::Compiled => Ok(()),
            Stage::Failed => Err(CompilerError::State(StateError::Failed)),
            Stage::Empty | Stage::Parsed => Err(CompilerError::State(StateError::NotParsed)),
        }
    }

    fn require_compiled(&self) -> Result<()> {
        match self.stage {
            Stage::Compiled => Ok(()),
            Stage::Failed => Err(CompilerError::State(StateError::Failed)),
            Stage::Empty | Stage::Parsed | Stage::Resolved => {
                Err(CompilerError::State(StateError::NotCompiled))
            }
        }
    }

    /// Names of every contract in the compile order, sorted.
    pub fn contract_names(&self) -> Result<Vec<&str>> {
        self.require_parsed()?;
        Ok(self.contracts.keys().map(String::as_str).collect())
    }

    /// The last contract of the last user unit.
    pub fn default_contract_name(&self) -> Result<&str> {
        self.require_parsed()?;
        let mut name = None;
        for (source_name, source) in &self.sources {
            if is_standard_source(source_name) {
                continue;
            }
            let last = source
                .ast()
                .into_iter()
                .flat_map(|unit| unit.contracts())
                .filter(|contract| self.contracts.contains_key(&contract.name.name))
                .last();
            if let Some(contract) = last {
                name = Some(contract.name.name.as_str());
            }
        }
        name.ok_or_else(|| CompilerError::State(StateError::NoContracts))
    }

    /// Results for contract `name`; `""` selects the default contract.
    pub fn compiled_contract(&self, name: &str) -> Result<&CompiledContract> {
        self.require_parsed()?;
        if self.contracts.is_empty() {
            return Err(CompilerError::State(StateError::NoContracts));
        }
        let name = if name.is_empty() {
            self.default_contract_name()?
        } else {
            name
        };
        self.contracts
            .get(name)
            .ok_or_else(|| StateError::ContractNotFound(name.to_string()).into())
    }

    fn compiled(&self, name: &str) -> Result<&CompiledContract> {
        self.require_compiled()?;
        self.compiled_contract(name)
    }

    pub fn object(&self, name: &str) -> Result<&LinkerObject> {
        Ok(self.compiled(name)?.object())
    }

    pub fn runtime_object(&self, name: &str) -> Result<&LinkerObject> {
        Ok(self.compiled(name)?.runtime_object())
    }

    pub fn clone_object(&self, name: &str) -> Result<&LinkerObject> {
        Ok(self.compiled(name)?.clone_object())
    }

    /// Creation assembly items; `None` when the contract is not fully
    /// implemented.
    pub fn assembly_items(&self, name: &str) -> Result<Option<&[AssemblyItem]>> {
        Ok(self.compiled(name)?.assembly_items())
    }

    pub fn runtime_assembly_items(&self, name: &str) -> Result<Option<&[AssemblyItem]>> {
        Ok(self.compiled(name)?.runtime_assembly_items())
    }

    /// Write the assembly listing of contract `name` to `out`.
    pub fn stream_assembly(&self, out: &mut impl fmt::Write, name: &str) -> Result<()> {
        let written = match self.compiled(name)?.artifacts() {
            Some(artifacts) => write!(out, "{}", artifacts.assembly),
            None => writeln!(out, "Contract not fully implemented"),
        };
        written.map_err(|_| CompilerError::internal("failed to write assembly listing"))
    }

    /// Keccak-256 of the runtime object; all zeros when the contract has no
    /// runtime object or it still needs linking.
    pub fn contract_code_hash(&self, name: &str) -> Result<[u8; 32]> {
        Ok(self.compiled(name)?.code_hash())
    }

    /// Index of `function`'s label in the runtime assembly items of
    /// contract `name`, or `0`.
    pub fn function_entry_point(&self, name: &str, function: &FunctionDefinition) -> Result<usize> {
        Ok(self.compiled(name)?.function_entry_point(function))
    }

    pub fn metadata(&self, name: &str, ty: DocumentationType) -> Result<&str> {
        self.compiled_contract(name)?.metadata(&self.registry, ty)
    }

    /// ABI description as JSON.
    pub fn interface(&self, name: &str) -> Result<&str> {
        self.metadata(name, DocumentationType::AbiInterface)
    }

    /// Source-level interface other units can import.
    pub fn solidity_interface(&self, name: &str) -> Result<&str> {
        self.metadata(name, DocumentationType::SolidityInterface)
    }

    pub fn contract_definition(&self, name: &str) -> Result<&ContractDefinition> {
        Ok(self.compiled_contract(name)?.definition())
    }

    /// Raw text of unit `name`. Available in every stage.
    pub fn source_text(&self, name: &str) -> Result<&str> {
        Ok(self.sources.get(name)?.text())
    }

    pub fn ast(&self, name: &str) -> Result<&Rc<SourceUnit>> {
        self.require_parsed()?;
        self.sources.ast(name)
    }

    /// 1-based start and end of `location`. Available in every stage, so
    /// errors from a failed phase can be rendered.
    pub fn position_from_location(
        &self,
        location: &SourceLocation,
    ) -> Result<(LineColumn, LineColumn)> {
        let text = self.source_text(&location.source)?;
        Ok((
            line_column(text, location.span.start),
            line_column(text, location.span.end),
        ))
    }

    /// The registry of the last successful parse.
    pub fn declarations(&self) -> Result<&DeclarationRegistry> {
        self.require_parsed()?;
        Ok(&self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bare() -> Compiler {
        Compiler::with_options(CompilerOptions::new().with_standard_sources(false))
    }

    fn state(error: StateError) -> CompilerError {
        CompilerError::State(error)
    }

    #[test]
    fn new_registers_standard_sources() {
        let compiler = Compiler::new();
        assert_eq!(compiler.sources().len(), STANDARD_SOURCES.len());
        assert!(compiler.sources().iter().all(|(_, source)| source.is_library()));
        assert_eq!(bare().sources().len(), 0);
    }

    #[test]
    fn stages_move_forward() {
        let mut compiler = bare();
        compiler.add_source("a", "contract A {}", false);
        assert_eq!(compiler.stage(), Stage::Empty);
        compiler.parse().unwrap();
        assert_eq!(compiler.stage(), Stage::Resolved);
        compiler.compile().unwrap();
        assert_eq!(compiler.stage(), Stage::Compiled);
        compiler.add_source("b", "contract B {}", false);
        assert_eq!(compiler.stage(), Stage::Empty);
    }

    #[test]
    fn compile_parses_when_needed() {
        let mut compiler = bare();
        compiler.add_source("a", "contract A {}", false);
        compiler.compile().unwrap();
        assert!(!compiler.object("A").unwrap().is_empty());
    }

    #[test]
    fn failure_sticks_until_reset() {
        let mut compiler = bare();
        compiler.add_source("a", "contract A {", false);
        assert!(compiler.parse().unwrap_err().is_parse());
        assert_eq!(compiler.stage(), Stage::Failed);
        assert_eq!(compiler.compile().unwrap_err(), state(StateError::Failed));
        assert_eq!(
            compiler.contract_names().unwrap_err(),
            state(StateError::Failed)
        );
        assert_eq!(compiler.source_text("a").unwrap(), "contract A {");

        compiler.add_source("a", "contract A {}", false);
        compiler.parse().unwrap();
        assert_eq!(compiler.contract_names().unwrap(), vec!["A"]);
    }

    #[test]
    fn queries_check_the_stage() {
        let mut compiler = bare();
        compiler.add_source("a", "contract A {}", false);
        assert_eq!(
            compiler.contract_names().unwrap_err(),
            state(StateError::NotParsed)
        );
        compiler.parse().unwrap();
        assert_eq!(
            compiler.object("A").unwrap_err(),
            state(StateError::NotCompiled)
        );
        assert!(compiler.interface("A").is_ok());
    }

    #[test]
    fn default_contract_is_last_of_last_user_unit() {
        let mut compiler = Compiler::new();
        compiler.add_source("a", "contract A {} contract B {}", false);
        compiler.add_source("b", "contract C {} contract D {}", false);
        compiler.add_source("c", "", false);
        compiler.parse().unwrap();
        assert_eq!(compiler.default_contract_name().unwrap(), "D");
        assert_eq!(compiler.compiled_contract("").unwrap().name(), "D");
    }

    #[test]
    fn no_contracts() {
        let mut compiler = bare();
        compiler.parse_source("").unwrap();
        assert_eq!(
            compiler.compiled_contract("").unwrap_err(),
            state(StateError::NoContracts)
        );
    }
}
