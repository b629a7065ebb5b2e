//! Symbolic assembly items.

use std::fmt;

use super::instruction::{DUP_BASE, Instruction, PUSH_BASE, SWAP_BASE};
use super::word::Word;

/// Width of pushed jump targets and sub-object offsets and sizes.
pub const LABEL_BYTES: usize = 4;
/// Width of a linker placeholder (an address).
pub const LINKER_BYTES: usize = 20;
/// Width of an immutable placeholder (a full word).
pub const IMMUTABLE_BYTES: usize = 32;

/// One element of an [`Assembly`](super::Assembly) before it is turned
/// into bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssemblyItem {
    Op(Instruction),
    /// `PUSHn` with the smallest `n` that holds the value.
    Push(Word),
    /// `DUPn`, `1..=16`.
    Dup(u8),
    /// `SWAPn`, `1..=16`.
    Swap(u8),
    /// Push the byte offset of a label.
    PushLabel(String),
    /// A jump target (`JUMPDEST`).
    Label(String),
    /// Push the offset of a sub-assembly within this assembly's bytecode.
    PushSubOffset(usize),
    /// Push the byte size of a sub-assembly.
    PushSubSize(usize),
    /// Push the size of this assembly's bytecode including its subs.
    PushProgramSize,
    /// Push an address that is only known at link time.
    PushLinkerPlaceholder(String),
    /// Push the value of an immutable, filled in during construction.
    PushImmutable(String),
}

impl AssemblyItem {
    pub fn push(value: u64) -> Self {
        AssemblyItem::Push(Word::from_u64(value))
    }

    /// Encoded size in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            AssemblyItem::Op(_)
            | AssemblyItem::Dup(_)
            | AssemblyItem::Swap(_)
            | AssemblyItem::Label(_) => 1,
            AssemblyItem::Push(word) => 1 + word.significant_bytes(),
            AssemblyItem::PushLabel(_)
            | AssemblyItem::PushSubOffset(_)
            | AssemblyItem::PushSubSize(_)
            | AssemblyItem::PushProgramSize => 1 + LABEL_BYTES,
            AssemblyItem::PushLinkerPlaceholder(_) => 1 + LINKER_BYTES,
            AssemblyItem::PushImmutable(_) => 1 + IMMUTABLE_BYTES,
        }
    }

    /// Net change in stack height when the item executes.
    pub fn stack_delta(&self) -> i32 {
        match self {
            AssemblyItem::Op(op) => op_stack_delta(*op),
            AssemblyItem::Push(_)
            | AssemblyItem::Dup(_)
            | AssemblyItem::PushLabel(_)
            | AssemblyItem::PushSubOffset(_)
            | AssemblyItem::PushSubSize(_)
            | AssemblyItem::PushProgramSize
            | AssemblyItem::PushLinkerPlaceholder(_)
            | AssemblyItem::PushImmutable(_) => 1,
            AssemblyItem::Swap(_) | AssemblyItem::Label(_) => 0,
        }
    }
}

/// Opcode byte for `PUSHn`.
pub(crate) fn push_opcode(len: usize) -> u8 {
    PUSH_BASE + len as u8
}

pub(crate) fn dup_opcode(n: u8) -> u8 {
    DUP_BASE + n - 1
}

pub(crate) fn swap_opcode(n: u8) -> u8 {
    SWAP_BASE + n - 1
}

fn op_stack_delta(op: Instruction) -> i32 {
    use Instruction::*;
    match op {
        Stop | JumpDest | Invalid => 0,
        Add | Mul | Sub | Div | Sdiv | Mod | Smod | SignExtend | Lt | Gt | Slt | Sgt | Eq
        | And | Or | Xor | Shl | Shr | Sar => -1,
        IsZero | Not | Balance | CallDataLoad | Mload | Sload | ExtCodeSize => 0,
        Address | Caller | CallValue | CallDataSize | CodeSize | ReturnDataSize | Timestamp
        | Number | Gas => 1,
        Pop | Jump | SelfDestruct => -1,
        Mstore | Sstore | JumpI | Return | Revert => -2,
        CallDataCopy | CodeCopy | ReturnDataCopy => -3,
        Create => -2,
        Call => -6,
        DelegateCall => -5,
    }
}

impl fmt::Display for AssemblyItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyItem::Op(op) => f.write_str(op.name()),
            AssemblyItem::Push(word) => write!(f, "PUSH {word}"),
            AssemblyItem::Dup(n) => write!(f, "DUP{n}"),
            AssemblyItem::Swap(n) => write!(f, "SWAP{n}"),
            AssemblyItem::PushLabel(label) => write!(f, "PUSH [tag] {label}"),
            AssemblyItem::Label(label) => write!(f, "{label}:"),
            AssemblyItem::PushSubOffset(index) => write!(f, "PUSH [$] sub_{index}"),
            AssemblyItem::PushSubSize(index) => write!(f, "PUSH #[$] sub_{index}"),
            AssemblyItem::PushProgramSize => f.write_str("PUSHSIZE"),
            AssemblyItem::PushLinkerPlaceholder(name) => write!(f, "PUSHLIB \"{name}\""),
            AssemblyItem::PushImmutable(name) => write!(f, "PUSHIMMUTABLE \"{name}\""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(AssemblyItem::push(0).byte_size(), 2);
        assert_eq!(AssemblyItem::push(0x1_0000).byte_size(), 4);
        assert_eq!(AssemblyItem::PushLabel("a".into()).byte_size(), 5);
        assert_eq!(
            AssemblyItem::PushLinkerPlaceholder("A".into()).byte_size(),
            21
        );
        assert_eq!(AssemblyItem::PushImmutable("x".into()).byte_size(), 33);
    }

    #[test]
    fn deltas() {
        assert_eq!(AssemblyItem::Op(Instruction::Call).stack_delta(), -6);
        assert_eq!(AssemblyItem::Op(Instruction::Mstore).stack_delta(), -2);
        assert_eq!(AssemblyItem::Dup(3).stack_delta(), 1);
        assert_eq!(AssemblyItem::Swap(3).stack_delta(), 0);
    }

    #[test]
    fn opcodes() {
        assert_eq!(push_opcode(1), 0x60);
        assert_eq!(push_opcode(32), 0x7f);
        assert_eq!(dup_opcode(16), 0x8f);
        assert_eq!(swap_opcode(1), 0x90);
    }
}
