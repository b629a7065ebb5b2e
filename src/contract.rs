//! Per-contract compilation results.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use covenant_compiler::codegen::function_label;
use covenant_compiler::{
    AssemblyItem, ContractArtifacts, ContractDocumentation, DeclarationRegistry, DocumentationType,
    InterfaceHandler, LinkerObject,
};
use covenant_core::{NodeId, Result};
use covenant_parser::ast::{ContractDefinition, FunctionDefinition};
use sha3::{Digest, Keccak256};

static EMPTY_OBJECT: LinkerObject = LinkerObject {
    bytecode: Vec::new(),
    link_references: BTreeMap::new(),
    immutable_references: BTreeMap::new(),
};

/// A resolved contract and whatever the driver produced for it.
///
/// Artifacts exist only for fully implemented contracts after a compile.
/// Documentation is rendered on first request and kept until the driver
/// resets.
#[derive(Debug)]
pub struct CompiledContract {
    definition: Rc<ContractDefinition>,
    artifacts: Option<ContractArtifacts>,
    user_documentation: OnceCell<String>,
    dev_documentation: OnceCell<String>,
    abi_interface: OnceCell<String>,
    solidity_interface: OnceCell<String>,
}

impl CompiledContract {
    pub(crate) fn new(
        definition: Rc<ContractDefinition>,
        documentation: Option<ContractDocumentation>,
    ) -> Self {
        let contract = Self {
            definition,
            artifacts: None,
            user_documentation: OnceCell::new(),
            dev_documentation: OnceCell::new(),
            abi_interface: OnceCell::new(),
            solidity_interface: OnceCell::new(),
        };
        if let Some(ContractDocumentation { user, dev }) = documentation {
            let _ = contract.user_documentation.set(user);
            let _ = contract.dev_documentation.set(dev);
        }
        contract
    }

    pub fn id(&self) -> NodeId {
        self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name.name
    }

    pub fn definition(&self) -> &Rc<ContractDefinition> {
        &self.definition
    }

    pub fn artifacts(&self) -> Option<&ContractArtifacts> {
        self.artifacts.as_ref()
    }

    pub(crate) fn set_artifacts(&mut self, artifacts: ContractArtifacts) {
        self.artifacts = Some(artifacts);
    }

    pub(crate) fn clear_artifacts(&mut self) {
        self.artifacts = None;
    }

    /// Creation bytecode; empty when not implemented.
    pub fn object(&self) -> &LinkerObject {
        self.artifacts.as_ref().map_or(&EMPTY_OBJECT, |a| &a.object)
    }

    pub fn runtime_object(&self) -> &LinkerObject {
        self.artifacts.as_ref().map_or(&EMPTY_OBJECT, |a| &a.runtime_object)
    }

    pub fn clone_object(&self) -> &LinkerObject {
        self.artifacts.as_ref().map_or(&EMPTY_OBJECT, |a| &a.clone_object)
    }

    pub fn assembly_items(&self) -> Option<&[AssemblyItem]> {
        self.artifacts.as_ref().map(|a| a.assembly.items())
    }

    pub fn runtime_assembly_items(&self) -> Option<&[AssemblyItem]> {
        self.artifacts.as_ref().map(|a| a.runtime_assembly.items())
    }

    /// Keccak-256 of the runtime object, or all zeros when there is no runtime
    /// object or it still needs linking.
    pub fn code_hash(&self) -> [u8; 32] {
        let runtime = self.runtime_object();
        if runtime.is_empty() || !runtime.link_references.is_empty() {
            return [0; 32];
        }
        Keccak256::digest(&runtime.bytecode).into()
    }

    /// Index of `function`'s label in the runtime assembly items, `0` when
    /// it has none.
    pub fn function_entry_point(&self, function: &FunctionDefinition) -> usize {
        let Some(artifacts) = &self.artifacts else {
            return 0;
        };
        artifacts
            .runtime_assembly
            .label_position(&function_label(function))
            .unwrap_or(0)
    }

    /// Documentation of kind `ty`, rendered on first use.
    pub fn metadata(&self, registry: &DeclarationRegistry, ty: DocumentationType) -> Result<&str> {
        let cell = match ty {
            DocumentationType::NatspecUser => &self.user_documentation,
            DocumentationType::NatspecDev => &self.dev_documentation,
            DocumentationType::AbiInterface => &self.abi_interface,
            DocumentationType::SolidityInterface => &self.solidity_interface,
        };
        if let Some(text) = cell.get() {
            return Ok(text);
        }
        let text = InterfaceHandler::new(registry).documentation(self.id(), ty)?;
        Ok(cell.get_or_init(|| text))
    }
}
