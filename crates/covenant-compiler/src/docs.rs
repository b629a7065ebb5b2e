//! Contract documentation and interface rendering.
//!
//! [`InterfaceHandler`] turns a resolved contract into one of the
//! [`DocumentationType`] outputs: NatSpec user and developer documentation
//! as JSON, the ABI description as JSON, or a source-level interface that
//! other units can import.
//!
//! NatSpec comes from `///` and `/** */` comments on contracts and
//! functions. Supported tags are `@title`, `@author`, `@notice`, `@dev`,
//! `@param` and `@return`; untagged text is a notice.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::rc::Rc;
use std::str::FromStr;

use covenant_core::{CompilerError, NodeId, Result};
use covenant_parser::ast::{FunctionDefinition, StateMutability, VariableDeclaration};
use serde::Serialize;

use crate::registry::{DeclarationRegistry, InterfaceItem};
use crate::types::Type;

/// Kind of documentation requested from a compiled contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentationType {
    NatspecUser,
    NatspecDev,
    AbiInterface,
    SolidityInterface,
}

impl DocumentationType {
    pub const ALL: [DocumentationType; 4] = [
        DocumentationType::NatspecUser,
        DocumentationType::NatspecDev,
        DocumentationType::AbiInterface,
        DocumentationType::SolidityInterface,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentationType::NatspecUser => "userdoc",
            DocumentationType::NatspecDev => "devdoc",
            DocumentationType::AbiInterface => "abi",
            DocumentationType::SolidityInterface => "interface",
        }
    }
}

impl FromStr for DocumentationType {
    type Err = CompilerError;

    fn from_str(s: &str) -> Result<Self> {
        DocumentationType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| CompilerError::internal(format!("unknown documentation type '{s}'")))
    }
}

// ============================================================================
// NatSpec
// ============================================================================

/// Parsed NatSpec tags of one comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NatSpec {
    pub title: Option<String>,
    pub author: Option<String>,
    pub notice: Option<String>,
    pub dev: Option<String>,
    pub params: Vec<(String, String)>,
    pub returns: Vec<String>,
}

#[derive(Clone, Copy)]
enum Tag {
    Title,
    Author,
    Notice,
    Dev,
    Param,
    Return,
}

impl NatSpec {
    pub fn parse(text: &str) -> Self {
        let mut spec = NatSpec::default();
        let mut current: Option<Tag> = None;
        for line in text.lines() {
            let line = line.trim().trim_start_matches('*').trim();
            if line.is_empty() {
                continue;
            }
            if let Some(tagged) = line.strip_prefix('@') {
                let (name, rest) = tagged.split_once(char::is_whitespace).unwrap_or((tagged, ""));
                let tag = match name {
                    "title" => Tag::Title,
                    "author" => Tag::Author,
                    "notice" => Tag::Notice,
                    "dev" => Tag::Dev,
                    "param" => Tag::Param,
                    "return" => Tag::Return,
                    _ => continue,
                };
                spec.start(tag, rest.trim());
                current = Some(tag);
                continue;
            }
            match current {
                Some(tag) => spec.append(tag, line),
                None => {
                    spec.start(Tag::Notice, line);
                    current = Some(Tag::Notice);
                }
            }
        }
        spec
    }

    fn start(&mut self, tag: Tag, text: &str) {
        match tag {
            Tag::Title => join(&mut self.title, text),
            Tag::Author => join(&mut self.author, text),
            Tag::Notice => join(&mut self.notice, text),
            Tag::Dev => join(&mut self.dev, text),
            Tag::Param => {
                let (name, description) =
                    text.split_once(char::is_whitespace).unwrap_or((text, ""));
                self.params.push((name.to_string(), description.trim().to_string()));
            }
            Tag::Return => self.returns.push(text.to_string()),
        }
    }

    fn append(&mut self, tag: Tag, text: &str) {
        match tag {
            Tag::Param => {
                if let Some((_, description)) = self.params.last_mut() {
                    push_words(description, text);
                }
            }
            Tag::Return => {
                if let Some(description) = self.returns.last_mut() {
                    push_words(description, text);
                }
            }
            _ => self.start(tag, text),
        }
    }
}

fn join(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => push_words(existing, text),
        None => *slot = Some(text.to_string()),
    }
}

fn push_words(existing: &mut String, text: &str) {
    if !existing.is_empty() && !text.is_empty() {
        existing.push(' ');
    }
    existing.push_str(text);
}

// ============================================================================
// JSON shapes
// ============================================================================

#[derive(Serialize, Default)]
struct UserDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    notice: Option<String>,
    methods: BTreeMap<String, UserMethod>,
}

#[derive(Serialize)]
struct UserMethod {
    notice: String,
}

#[derive(Serialize, Default)]
struct DevDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    methods: BTreeMap<String, DevMethod>,
}

#[derive(Serialize, Default)]
struct DevMethod {
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
    #[serde(rename = "return", skip_serializing_if = "Option::is_none")]
    returns: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AbiEntry {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    inputs: Vec<AbiParameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outputs: Option<Vec<AbiParameter>>,
    state_mutability: &'static str,
}

#[derive(Serialize)]
struct AbiParameter {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CompilerError::internal(format!("failed to serialize documentation: {e}")))
}

// ============================================================================
// Interface handler
// ============================================================================

/// Renders documentation for resolved contracts.
pub struct InterfaceHandler<'r> {
    registry: &'r DeclarationRegistry,
}

impl<'r> InterfaceHandler<'r> {
    pub fn new(registry: &'r DeclarationRegistry) -> Self {
        Self { registry }
    }

    pub fn documentation(&self, contract: NodeId, ty: DocumentationType) -> Result<String> {
        match ty {
            DocumentationType::NatspecUser => self.user_documentation(contract),
            DocumentationType::NatspecDev => self.dev_documentation(contract),
            DocumentationType::AbiInterface => self.abi_interface(contract),
            DocumentationType::SolidityInterface => self.solidity_interface(contract),
        }
    }

    pub fn user_documentation(&self, contract: NodeId) -> Result<String> {
        let definition = &self.registry.contract(contract)?.definition;
        let mut doc = UserDoc {
            notice: definition
                .documentation
                .as_deref()
                .and_then(|d| NatSpec::parse(d).notice),
            ..UserDoc::default()
        };
        for (signature, function) in self.documented_functions(contract)? {
            let spec = NatSpec::parse(function.documentation.as_deref().unwrap_or_default());
            if let Some(notice) = spec.notice {
                doc.methods.insert(signature, UserMethod { notice });
            }
        }
        to_json(&doc)
    }

    pub fn dev_documentation(&self, contract: NodeId) -> Result<String> {
        let definition = &self.registry.contract(contract)?.definition;
        let spec = NatSpec::parse(definition.documentation.as_deref().unwrap_or_default());
        let mut doc = DevDoc {
            title: spec.title,
            author: spec.author,
            details: spec.dev,
            ..DevDoc::default()
        };
        for (signature, function) in self.documented_functions(contract)? {
            let spec = NatSpec::parse(function.documentation.as_deref().unwrap_or_default());
            if spec.dev.is_none() && spec.params.is_empty() && spec.returns.is_empty() {
                continue;
            }
            doc.methods.insert(
                signature,
                DevMethod {
                    details: spec.dev,
                    params: spec.params.into_iter().collect(),
                    returns: (!spec.returns.is_empty()).then(|| spec.returns.join(" ")),
                },
            );
        }
        to_json(&doc)
    }

    /// Externally visible functions of `contract` with their signatures.
    fn documented_functions(
        &self,
        contract: NodeId,
    ) -> Result<Vec<(String, &'r FunctionDefinition)>> {
        let mut out = Vec::new();
        for entry in self.registry.interface_functions(contract)? {
            if let InterfaceItem::Function(id) = entry.item {
                let definition = self.registry.function(id)?.definition.as_ref();
                out.push((entry.signature, definition));
            }
        }
        if let Some(constructor) = self.registry.contract(contract)?.definition.constructor() {
            out.push(("constructor".to_string(), constructor.as_ref()));
        }
        Ok(out)
    }

    pub fn abi_interface(&self, contract: NodeId) -> Result<String> {
        let mut entries = Vec::new();
        let definition = &self.registry.contract(contract)?.definition;
        if let Some(constructor) = definition.constructor() {
            entries.push(AbiEntry {
                kind: "constructor",
                name: None,
                inputs: self.parameters(&constructor.parameters)?,
                outputs: None,
                state_mutability: constructor.mutability.as_str(),
            });
        }
        if let Some(fallback) = self.registry.fallback(contract)? {
            let fallback = &self.registry.function(fallback)?.definition;
            entries.push(AbiEntry {
                kind: "fallback",
                name: None,
                inputs: Vec::new(),
                outputs: None,
                state_mutability: fallback.mutability.as_str(),
            });
        }
        for entry in self.registry.interface_functions(contract)? {
            entries.push(match entry.item {
                InterfaceItem::Function(id) => {
                    let function = &self.registry.function(id)?.definition;
                    AbiEntry {
                        kind: "function",
                        name: Some(function.name.name.clone()),
                        inputs: self.parameters(&function.parameters)?,
                        outputs: Some(self.parameters(&function.returns)?),
                        state_mutability: function.mutability.as_str(),
                    }
                }
                InterfaceItem::Getter(id) => {
                    let variable = self.registry.variable(id)?;
                    AbiEntry {
                        kind: "function",
                        name: Some(variable.definition.name.name.clone()),
                        inputs: Vec::new(),
                        outputs: Some(vec![AbiParameter {
                            name: String::new(),
                            ty: abi_name(&variable.ty)?,
                        }]),
                        state_mutability: StateMutability::View.as_str(),
                    }
                }
            });
        }
        to_json(&entries)
    }

    fn parameters(&self, parameters: &[Rc<VariableDeclaration>]) -> Result<Vec<AbiParameter>> {
        parameters
            .iter()
            .map(|p| {
                Ok(AbiParameter {
                    name: p.name.name.clone(),
                    ty: abi_name(&self.registry.variable(p.id)?.ty)?,
                })
            })
            .collect()
    }

    /// Source text declaring the external interface of `contract`.
    pub fn solidity_interface(&self, contract: NodeId) -> Result<String> {
        let info = self.registry.contract(contract)?;
        let mut out = String::new();
        let _ = writeln!(out, "abstract contract {} {{", info.name());
        for entry in self.registry.interface_functions(contract)? {
            let (name, parameters, returns, mutability) = match entry.item {
                InterfaceItem::Function(id) => {
                    let function = self.registry.function(id)?;
                    let definition = &function.definition;
                    (
                        definition.name.name.clone(),
                        self.typed_names(&definition.parameters)?,
                        function
                            .ty
                            .returns
                            .iter()
                            .map(abi_name)
                            .collect::<Result<Vec<_>>>()?,
                        definition.mutability,
                    )
                }
                InterfaceItem::Getter(id) => {
                    let variable = self.registry.variable(id)?;
                    (
                        variable.definition.name.name.clone(),
                        Vec::new(),
                        vec![abi_name(&variable.ty)?],
                        StateMutability::View,
                    )
                }
            };
            let parameters = parameters.join(", ");
            let _ = write!(out, "    function {name}({parameters}) external");
            if mutability != StateMutability::NonPayable {
                let _ = write!(out, " {}", mutability.as_str());
            }
            if !returns.is_empty() {
                let _ = write!(out, " returns ({})", returns.join(", "));
            }
            out.push_str(";\n");
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn typed_names(&self, parameters: &[Rc<VariableDeclaration>]) -> Result<Vec<String>> {
        parameters
            .iter()
            .map(|p| {
                let ty = abi_name(&self.registry.variable(p.id)?.ty)?;
                Ok(if p.name.name.is_empty() {
                    ty
                } else {
                    format!("{ty} {}", p.name.name)
                })
            })
            .collect()
    }
}

fn abi_name(ty: &Type) -> Result<String> {
    ty.abi_name()
        .ok_or_else(|| CompilerError::internal("type without ABI encoding in external interface"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn natspec_tags() {
        let spec = NatSpec::parse(
            "@title Coin\nMints coins\n@author someone\n@dev uses storage\n\
             @param to receiver\n of the coins\n@return success",
        );
        assert_eq!(spec.title.as_deref(), Some("Coin Mints coins"));
        assert_eq!(spec.author.as_deref(), Some("someone"));
        assert_eq!(spec.dev.as_deref(), Some("uses storage"));
        assert_eq!(
            spec.params,
            vec![("to".to_string(), "receiver of the coins".to_string())]
        );
        assert_eq!(spec.returns, vec!["success".to_string()]);
    }

    #[test]
    fn untagged_text_is_a_notice() {
        let spec = NatSpec::parse("Sends coins\nto someone");
        assert_eq!(spec.notice.as_deref(), Some("Sends coins to someone"));
    }

    #[test]
    fn block_comment_stars_are_stripped() {
        let spec = NatSpec::parse("* @notice hello\n * world");
        assert_eq!(spec.notice.as_deref(), Some("hello world"));
    }

    #[test]
    fn documentation_type_names() {
        assert_eq!(
            "abi".parse::<DocumentationType>().unwrap(),
            DocumentationType::AbiInterface
        );
        assert!("bogus".parse::<DocumentationType>().unwrap_err().is_internal());
        for ty in DocumentationType::ALL {
            assert_eq!(ty.as_str().parse::<DocumentationType>().unwrap(), ty);
        }
    }
}
