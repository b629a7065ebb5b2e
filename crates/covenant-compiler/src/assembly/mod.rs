//! Symbolic assembly and the assembler.
//!
//! An [`Assembly`] is a list of [`AssemblyItem`]s with symbolic labels plus
//! nested sub-assemblies (the code of contracts it creates, or its runtime
//! code). [`Assembly::assemble`] resolves labels and sub-object offsets and
//! produces a [`LinkerObject`]: bytecode plus the positions of placeholders
//! that are filled in later, by the linker or during construction.

mod instruction;
mod item;
mod word;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use covenant_core::{CompilerError, Result};
use rustc_hash::FxHashMap;

pub use instruction::{Instruction, disassemble};
pub use item::{AssemblyItem, IMMUTABLE_BYTES, LABEL_BYTES, LINKER_BYTES};
pub use word::Word;

use item::{dup_opcode, push_opcode, swap_opcode};

/// A symbolic program with nested sub-assemblies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    name: String,
    items: Vec<AssemblyItem>,
    subs: Vec<Rc<Assembly>>,
}

impl Assembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            subs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> &[AssemblyItem] {
        &self.items
    }

    pub fn subs(&self) -> &[Rc<Assembly>] {
        &self.subs
    }

    pub fn append(&mut self, item: AssemblyItem) {
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = AssemblyItem>) {
        self.items.extend(items);
    }

    /// Register a sub-assembly and return its index.
    pub fn add_sub(&mut self, sub: Rc<Assembly>) -> usize {
        self.subs.push(sub);
        self.subs.len() - 1
    }

    /// Index of the item defining `label`, if any.
    pub fn label_position(&self, label: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| matches!(item, AssemblyItem::Label(l) if l == label))
    }

    /// Resolve labels and sub-objects into bytecode.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn assemble(&self) -> Result<LinkerObject> {
        let mut labels: FxHashMap<&str, usize> = FxHashMap::default();
        let mut code_size = 0;
        for item in &self.items {
            if let AssemblyItem::Label(label) = item {
                if labels.insert(label.as_str(), code_size).is_some() {
                    return Err(CompilerError::internal(format!(
                        "duplicate label '{label}' in assembly '{}'",
                        self.name
                    )));
                }
            }
            code_size += item.byte_size();
        }

        let subs = self
            .subs
            .iter()
            .map(|sub| sub.assemble())
            .collect::<Result<Vec<_>>>()?;
        let mut sub_offsets = Vec::with_capacity(subs.len());
        let mut program_size = code_size;
        for sub in &subs {
            sub_offsets.push(program_size);
            program_size += sub.bytecode.len();
        }

        let mut object = LinkerObject::default();
        let code = &mut object.bytecode;
        code.reserve(program_size);
        for item in &self.items {
            match item {
                AssemblyItem::Op(op) => code.push((*op).into()),
                AssemblyItem::Push(word) => {
                    let len = word.significant_bytes();
                    code.push(push_opcode(len));
                    code.extend_from_slice(&word.0[32 - len..]);
                }
                AssemblyItem::Dup(n) => code.push(dup_opcode(*n)),
                AssemblyItem::Swap(n) => code.push(swap_opcode(*n)),
                AssemblyItem::Label(_) => code.push(Instruction::JumpDest.into()),
                AssemblyItem::PushLabel(label) => {
                    let offset = labels.get(label.as_str()).copied().ok_or_else(|| {
                        CompilerError::internal(format!(
                            "reference to undefined label '{label}' in assembly '{}'",
                            self.name
                        ))
                    })?;
                    push_fixed(code, offset)?;
                }
                AssemblyItem::PushSubOffset(index) => {
                    let offset = sub_offsets
                        .get(*index)
                        .copied()
                        .ok_or_else(|| missing_sub(*index))?;
                    push_fixed(code, offset)?;
                }
                AssemblyItem::PushSubSize(index) => {
                    let size = subs
                        .get(*index)
                        .map(|s| s.bytecode.len())
                        .ok_or_else(|| missing_sub(*index))?;
                    push_fixed(code, size)?;
                }
                AssemblyItem::PushProgramSize => push_fixed(code, program_size)?,
                AssemblyItem::PushLinkerPlaceholder(name) => {
                    code.push(push_opcode(LINKER_BYTES));
                    object.link_references.insert(code.len(), name.clone());
                    code.extend_from_slice(&[0; LINKER_BYTES]);
                }
                AssemblyItem::PushImmutable(name) => {
                    code.push(push_opcode(IMMUTABLE_BYTES));
                    object
                        .immutable_references
                        .entry(name.clone())
                        .or_default()
                        .push(code.len());
                    code.extend_from_slice(&[0; IMMUTABLE_BYTES]);
                }
            }
        }

        // Link references inside sub-objects still need patching in the
        // embedded copy.
        for (sub, offset) in subs.iter().zip(&sub_offsets) {
            object.bytecode.extend_from_slice(&sub.bytecode);
            for (position, name) in &sub.link_references {
                object.link_references.insert(offset + position, name.clone());
            }
        }
        Ok(object)
    }
}

fn push_fixed(code: &mut Vec<u8>, value: usize) -> Result<()> {
    let value = u32::try_from(value)
        .map_err(|_| CompilerError::internal("offset does not fit into a 4-byte push"))?;
    code.push(push_opcode(LABEL_BYTES));
    code.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn missing_sub(index: usize) -> CompilerError {
    CompilerError::internal(format!("reference to undefined sub-assembly {index}"))
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

impl Assembly {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "    ".repeat(depth);
        for item in &self.items {
            match item {
                AssemblyItem::Label(_) => writeln!(f, "{indent}{item}")?,
                _ => writeln!(f, "{indent}    {item}")?,
            }
        }
        for (index, sub) in self.subs.iter().enumerate() {
            writeln!(f, "{indent}sub_{index}: assembly \"{}\" {{", sub.name)?;
            sub.write_indented(f, depth + 1)?;
            writeln!(f, "{indent}}}")?;
        }
        Ok(())
    }
}

/// Assembled bytecode with unresolved placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkerObject {
    pub bytecode: Vec<u8>,
    /// Byte position of each 20-byte link placeholder and the name it
    /// stands for.
    pub link_references: BTreeMap<usize, String>,
    /// Byte positions of each 32-byte immutable placeholder.
    pub immutable_references: BTreeMap<String, Vec<usize>>,
}

impl LinkerObject {
    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    /// Whether some link placeholder has not been filled in.
    pub fn has_unlinked_references(&self) -> bool {
        !self.link_references.is_empty()
    }

    /// Fill in the placeholders named in `addresses`.
    pub fn link(&mut self, addresses: &BTreeMap<String, [u8; 20]>) {
        let bytecode = &mut self.bytecode;
        self.link_references.retain(|&position, name| match addresses.get(name) {
            Some(address) => {
                bytecode[position..position + LINKER_BYTES].copy_from_slice(address);
                false
            }
            None => true,
        });
    }

    /// Lower-case hex rendering of the bytecode.
    pub fn to_hex(&self) -> String {
        self.bytecode.iter().map(|b| format!("{b:02x}")).collect()
    }
}
