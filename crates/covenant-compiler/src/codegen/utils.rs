//! Shared utility routines and inline code sequences.
//!
//! Routines are registered with the run-wide [`FunctionCollector`] under a
//! name that determines their code, and are jumped to with the internal
//! calling convention: the return label sits below the arguments, results
//! replace both.

use std::cell::RefCell;
use std::rc::Rc;

use covenant_core::{CompilerError, Result};
use covenant_parser::ast::BinaryOp;
use xxhash_rust::xxh64::xxh64;

use super::collector::FunctionCollector;
use super::context::{FREE_MEMORY_POINTER, RevertStrings};
use crate::assembly::{AssemblyItem, Instruction, Word};
use crate::types::{Arity, Type};

use Instruction::*;

/// `Panic(uint256)` selector.
pub const PANIC_SELECTOR: u64 = 0x4e48_7b71;
/// `Error(string)` selector.
pub const ERROR_SELECTOR: u64 = 0x08c3_79a0;

/// Codes carried by `Panic(uint256)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PanicCode {
    Generic = 0x00,
    Assert = 0x01,
    UnderOverflow = 0x11,
    DivisionByZero = 0x12,
    InvalidInternalFunction = 0x51,
}

// ============================================================================
// Item writer
// ============================================================================

/// Small helper for writing straight-line item sequences.
#[derive(Debug, Default)]
pub(crate) struct Code(pub Vec<AssemblyItem>);

impl Code {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(&mut self, op: Instruction) -> &mut Self {
        self.0.push(AssemblyItem::Op(op));
        self
    }

    pub fn push(&mut self, value: u64) -> &mut Self {
        self.0.push(AssemblyItem::push(value));
        self
    }

    pub fn push_word(&mut self, value: Word) -> &mut Self {
        self.0.push(AssemblyItem::Push(value));
        self
    }

    pub fn dup(&mut self, n: u8) -> &mut Self {
        self.0.push(AssemblyItem::Dup(n));
        self
    }

    pub fn swap(&mut self, n: u8) -> &mut Self {
        self.0.push(AssemblyItem::Swap(n));
        self
    }

    pub fn label(&mut self, name: &str) -> &mut Self {
        self.0.push(AssemblyItem::Label(name.to_string()));
        self
    }

    pub fn push_label(&mut self, name: &str) -> &mut Self {
        self.0.push(AssemblyItem::PushLabel(name.to_string()));
        self
    }

    pub fn jump_to(&mut self, name: &str) -> &mut Self {
        self.push_label(name).op(Jump)
    }

    pub fn jumpi_to(&mut self, name: &str) -> &mut Self {
        self.push_label(name).op(JumpI)
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = AssemblyItem>) -> &mut Self {
        self.0.extend(items);
        self
    }

    /// `[value addr] -> []` with `addr = top_of_stack + offset`.
    fn store_at_offset(&mut self, offset: u64) -> &mut Self {
        if offset != 0 {
            self.push(offset).op(Add);
        }
        self.op(Mstore)
    }

    pub fn into_items(self) -> Vec<AssemblyItem> {
        self.0
    }
}

fn min_signed() -> Word {
    Word::from_left_slice(&[0x80])
}

// ============================================================================
// Inline sequences
// ============================================================================

/// Bring a value into the canonical representation of `ty`.
pub fn cleanup_items(ty: &Type) -> Vec<AssemblyItem> {
    let mut code = Code::new();
    match *ty {
        Type::Uint(bits) if bits < 256 => {
            code.push_word(Word::low_mask(bits)).op(And);
        }
        Type::Int(bits) if bits < 256 => {
            code.push(u64::from(bits / 8 - 1)).op(SignExtend);
        }
        Type::Bool => {
            code.op(IsZero).op(IsZero);
        }
        Type::Address | Type::Contract(_) => {
            code.push_word(Word::low_mask(160)).op(And);
        }
        Type::FixedBytes(len) if len < 32 => {
            code.push_word(Word::high_mask(len)).op(And);
        }
        _ => {}
    }
    code.into_items()
}

/// Convert a clean value of type `from` on the stack top into `to`.
pub fn conversion_items(from: &Type, to: &Type) -> Vec<AssemblyItem> {
    let mut code = Code::new();
    match (from, to) {
        _ if from == to => {}
        (Type::FixedBytes(len), Type::Uint(_)) => {
            if *len < 32 {
                code.push(256 - 8 * u64::from(*len)).op(Shr);
            }
        }
        (Type::Uint(_) | Type::IntegerLiteral(_), Type::FixedBytes(len)) => {
            if *len < 32 {
                code.push(256 - 8 * u64::from(*len)).op(Shl);
            }
        }
        (Type::FixedBytes(from_len), Type::FixedBytes(to_len)) => {
            if to_len < from_len {
                code.extend(cleanup_items(to));
            }
        }
        (Type::Contract(_) | Type::Address, Type::Contract(_) | Type::Address) => {}
        _ if from.is_implicitly_convertible_to(to) => {}
        _ => {
            code.extend(cleanup_items(to));
        }
    }
    code.into_items()
}

/// Reorder the stack according to `layout`.
///
/// `layout[i]` is the target position of the item at position `i` from the
/// bottom, or `-1` if it is dropped. Returns `None` if a needed swap is
/// deeper than the machine allows.
pub fn stack_layout_items(mut layout: Vec<i32>) -> Option<Vec<AssemblyItem>> {
    let mut items = Vec::new();
    while let Some(&back) = layout.last() {
        let top = layout.len() - 1;
        if back == top as i32 {
            break;
        }
        if back < 0 {
            items.push(AssemblyItem::Op(Pop));
            layout.pop();
        } else {
            let depth = top - back as usize;
            if depth > 16 {
                return None;
            }
            items.push(AssemblyItem::Swap(depth as u8));
            layout.swap(back as usize, top);
        }
    }
    layout
        .iter()
        .enumerate()
        .all(|(position, &target)| target == position as i32)
        .then_some(items)
}

/// Layout that turns `[ret, dropped.., results..]` into `[results.., ret]`.
pub fn return_layout(dropped: usize, results: usize) -> Vec<i32> {
    let mut layout = vec![results as i32];
    layout.extend(std::iter::repeat_n(-1, dropped));
    layout.extend(0..results as i32);
    layout
}

fn type_suffix(ty: &Type) -> Result<String> {
    match ty {
        Type::Uint(bits) => Ok(format!("uint{bits}")),
        Type::Int(bits) => Ok(format!("int{bits}")),
        Type::IntegerLiteral(_) => Ok("uint256".to_string()),
        other => Err(CompilerError::internal(format!("no arithmetic on {other:?}"))),
    }
}

fn arithmetic_type(ty: &Type) -> Type {
    match ty {
        Type::IntegerLiteral(_) => Type::Uint(256),
        other => other.clone(),
    }
}

// ============================================================================
// Utility routines
// ============================================================================

/// Routines shared by all code objects: checked arithmetic, panics and
/// reverts.
#[derive(Debug, Clone)]
pub struct UtilFunctions {
    collector: Rc<RefCell<FunctionCollector>>,
    revert_strings: RevertStrings,
}

impl UtilFunctions {
    pub fn new(collector: Rc<RefCell<FunctionCollector>>, revert_strings: RevertStrings) -> Self {
        Self {
            collector,
            revert_strings,
        }
    }

    fn create(&self, name: String, generate: impl FnOnce(&str) -> Vec<AssemblyItem>) -> String {
        self.collector.borrow_mut().create_function(name, generate)
    }

    /// Revert with `Panic(code)`.
    pub fn panic_function(&self, code: PanicCode) -> String {
        let code = code as u8;
        self.create(format!("panic_error_0x{code:02x}"), |name| {
            let mut c = Code::new();
            c.label(name)
                .push(PANIC_SELECTOR)
                .push(0xe0)
                .op(Shl)
                .push(0)
                .op(Mstore)
                .push(u64::from(code))
                .push(4)
                .op(Mstore)
                .push(0x24)
                .push(0)
                .op(Revert);
            c.into_items()
        })
    }

    /// Revert with `Error(reason)`, or with empty data if `reason` is empty
    /// or reasons are stripped.
    pub fn revert_function(&self, reason: &str) -> String {
        if reason.is_empty() || self.revert_strings == RevertStrings::Strip {
            return self.create("revert_error_empty".to_string(), |name| {
                let mut c = Code::new();
                c.label(name).push(0).dup(1).op(Revert);
                c.into_items()
            });
        }
        let reason = reason.to_string();
        let name = format!("revert_error_{:016x}", xxh64(reason.as_bytes(), 0));
        self.create(name, move |name| {
            let bytes = reason.as_bytes();
            let mut c = Code::new();
            c.label(name)
                .push(ERROR_SELECTOR)
                .push(0xe0)
                .op(Shl)
                .push(0)
                .op(Mstore)
                .push(0x20)
                .push(4)
                .op(Mstore)
                .push(bytes.len() as u64)
                .push(0x24)
                .op(Mstore);
            for (index, chunk) in bytes.chunks(32).enumerate() {
                c.push_word(Word::from_left_slice(chunk))
                    .push(0x44 + 32 * index as u64)
                    .op(Mstore);
            }
            let size = 0x44 + 32 * bytes.len().div_ceil(32) as u64;
            c.push(size).push(0).op(Revert);
            c.into_items()
        })
    }

    /// Revert with the return data of the last call.
    pub fn revert_forward_function(&self) -> String {
        self.create("revert_forward".to_string(), |name| {
            let mut c = Code::new();
            c.label(name)
                .op(ReturnDataSize)
                .push(0)
                .dup(1)
                .op(ReturnDataCopy)
                .op(ReturnDataSize)
                .push(0)
                .op(Revert);
            c.into_items()
        })
    }

    /// `[ret a b] -> [a op b]`, panicking on overflow or division by zero.
    pub fn checked_function(&self, op: BinaryOp, ty: &Type) -> Result<String> {
        let ty = arithmetic_type(ty);
        let (prefix, generate): (&str, fn(&Self, &Type, &mut Code)) = match op {
            BinaryOp::Add => ("checked_add", Self::checked_add),
            BinaryOp::Sub => ("checked_sub", Self::checked_sub),
            BinaryOp::Mul => ("checked_mul", Self::checked_mul),
            BinaryOp::Div => ("checked_div", Self::checked_div),
            BinaryOp::Mod => ("checked_mod", Self::checked_mod),
            other => {
                return Err(CompilerError::internal(format!("operator {other} is not arithmetic")));
            }
        };
        let name = format!("{prefix}_{}", type_suffix(&ty)?);
        if self.collector.borrow().contains(&name) {
            return Ok(name);
        }
        let mut code = Code::new();
        code.label(&name);
        generate(self, &ty, &mut code);
        code.swap(1).op(Jump);
        let items = code.into_items();
        Ok(self.create(name, |_| items))
    }

    /// `[ret x] -> [-x]`, panicking if the result does not fit.
    pub fn checked_negation_function(&self, ty: &Type) -> Result<String> {
        let name = format!("checked_neg_{}", type_suffix(ty)?);
        if self.collector.borrow().contains(&name) {
            return Ok(name);
        }
        let overflow = self.panic_function(PanicCode::UnderOverflow);
        let mut code = Code::new();
        code.label(&name);
        if *ty == Type::Int(256) {
            code.dup(1).push_word(min_signed()).op(Eq).jumpi_to(&overflow);
        }
        code.push(0).op(Sub);
        self.range_check(ty, &mut code, &overflow);
        code.swap(1).op(Jump);
        let items = code.into_items();
        Ok(self.create(name, |_| items))
    }

    /// `[r] -> [r]`, jumping to `panic` if `r` is out of range for `ty`.
    fn range_check(&self, ty: &Type, code: &mut Code, panic: &str) {
        match *ty {
            Type::Uint(bits) if bits < 256 => {
                code.push_word(Word::low_mask(bits)).dup(2).op(Gt).jumpi_to(panic);
            }
            Type::Int(bits) if bits < 256 => {
                code.dup(1)
                    .push(u64::from(bits / 8 - 1))
                    .op(SignExtend)
                    .dup(2)
                    .op(Eq)
                    .op(IsZero)
                    .jumpi_to(panic);
            }
            _ => {}
        }
    }

    fn checked_add(&self, ty: &Type, code: &mut Code) {
        let overflow = self.panic_function(PanicCode::UnderOverflow);
        match *ty {
            Type::Uint(256) => {
                // [a b] -> [r], r < a means wrap-around
                code.dup(2).op(Add).swap(1).dup(2).op(Lt).jumpi_to(&overflow);
            }
            Type::Int(256) => {
                code.dup(2).dup(2).op(Add);
                // overflow iff (r < a) != (b < 0)
                code.dup(3).dup(2).op(Slt);
                code.push(0).dup(4).op(Slt);
                code.op(Xor).jumpi_to(&overflow);
                code.swap(2).op(Pop).op(Pop);
            }
            _ => {
                code.op(Add);
                self.range_check(ty, code, &overflow);
            }
        }
    }

    fn checked_sub(&self, ty: &Type, code: &mut Code) {
        let overflow = self.panic_function(PanicCode::UnderOverflow);
        match *ty {
            Type::Uint(_) => {
                code.dup(1).dup(3).op(Lt).jumpi_to(&overflow);
                code.swap(1).op(Sub);
            }
            Type::Int(256) => {
                code.dup(2).dup(2).swap(1).op(Sub);
                // overflow iff (r < a) != (b > 0)
                code.dup(3).dup(2).op(Slt);
                code.push(0).dup(4).op(Sgt);
                code.op(Xor).jumpi_to(&overflow);
                code.swap(2).op(Pop).op(Pop);
            }
            _ => {
                code.swap(1).op(Sub);
                self.range_check(ty, code, &overflow);
            }
        }
    }

    fn checked_mul(&self, ty: &Type, code: &mut Code) {
        let overflow = self.panic_function(PanicCode::UnderOverflow);
        let divide = if ty.is_signed() { Sdiv } else { Div };
        code.dup(2).dup(2).op(Mul);
        // a == 0 || r / a == b
        code.dup(3).dup(2).op(divide);
        code.dup(3).op(Eq);
        code.dup(4).op(IsZero).op(Or);
        code.op(IsZero).jumpi_to(&overflow);
        if *ty == Type::Int(256) {
            // -1 * MIN passes the division test
            code.dup(3).op(Not).op(IsZero);
            code.dup(3).push_word(min_signed()).op(Eq);
            code.op(And).jumpi_to(&overflow);
        } else {
            self.range_check(ty, code, &overflow);
        }
        code.swap(2).op(Pop).op(Pop);
    }

    fn checked_div(&self, ty: &Type, code: &mut Code) {
        let by_zero = self.panic_function(PanicCode::DivisionByZero);
        code.dup(1).op(IsZero).jumpi_to(&by_zero);
        if *ty == Type::Int(256) {
            let overflow = self.panic_function(PanicCode::UnderOverflow);
            code.dup(1).op(Not).op(IsZero);
            code.dup(3).push_word(min_signed()).op(Eq);
            code.op(And).jumpi_to(&overflow);
        }
        code.swap(1).op(if ty.is_signed() { Sdiv } else { Div });
        if ty.is_signed() {
            let overflow = self.panic_function(PanicCode::UnderOverflow);
            self.range_check(ty, code, &overflow);
        }
    }

    fn checked_mod(&self, ty: &Type, code: &mut Code) {
        let by_zero = self.panic_function(PanicCode::DivisionByZero);
        code.dup(1).op(IsZero).jumpi_to(&by_zero);
        code.swap(1).op(if ty.is_signed() { Smod } else { Mod });
    }
}

// ============================================================================
// ABI routines
// ============================================================================

/// Encoding, decoding and message calls.
#[derive(Debug, Clone)]
pub struct AbiFunctions {
    utils: UtilFunctions,
}

impl AbiFunctions {
    pub fn new(collector: Rc<RefCell<FunctionCollector>>, revert_strings: RevertStrings) -> Self {
        Self {
            utils: UtilFunctions::new(collector, revert_strings),
        }
    }

    fn debug_reason(&self, message: &str) -> String {
        if self.utils.revert_strings == RevertStrings::Debug {
            self.utils.revert_function(message)
        } else {
            self.utils.revert_function("")
        }
    }

    /// Message call with the internal calling convention.
    ///
    /// `[ret addr args.. selector] -> [results..]`. Reverts with the
    /// callee's data if the call fails. `None` if the results cannot be
    /// moved into place within reach of the stack.
    pub fn external_call_function(&self, arity: Arity) -> Option<String> {
        let Arity { inputs, outputs } = arity;
        let name = format!("abi_call_in_{inputs}_out_{outputs}");
        if self.utils.collector.borrow().contains(&name) {
            return Some(name);
        }
        let shuffle = stack_layout_items(return_layout(2, outputs))?;
        let forward = self.utils.revert_forward_function();
        let no_code = self.debug_reason("Target contract does not contain code");
        let short_data = self.debug_reason("ABI decoding: return data too short");

        let mut c = Code::new();
        c.label(&name);
        c.push(FREE_MEMORY_POINTER).op(Mload);
        c.swap(1).push(0xe0).op(Shl).dup(2).op(Mstore);
        for index in (0..inputs).rev() {
            c.swap(1).dup(2).store_at_offset(4 + 32 * index as u64);
        }
        // [ret addr p]
        c.dup(2).op(ExtCodeSize).op(IsZero).jumpi_to(&no_code);
        c.push(32 * outputs as u64)
            .dup(2)
            .push(4 + 32 * inputs as u64)
            .dup(4)
            .push(0)
            .dup(7)
            .op(Gas)
            .op(Call);
        c.op(IsZero).jumpi_to(&forward);
        if outputs > 0 {
            c.push(32 * outputs as u64)
                .op(ReturnDataSize)
                .op(Lt)
                .jumpi_to(&short_data);
        }
        for index in 0..outputs {
            c.dup(index as u8 + 1);
            if index > 0 {
                c.push(32 * index as u64).op(Add);
            }
            c.op(Mload);
        }
        c.extend(shuffle).op(Jump);
        let items = c.into_items();
        Some(self.utils.create(name, |_| items))
    }

    /// Load and validate `parameters` from calldata: `[] -> [args..]`.
    pub fn decode_calldata_items(&self, parameters: &[Type]) -> Vec<AssemblyItem> {
        let invalid = self.debug_reason("ABI decoding: invalid calldata");
        let mut c = Code::new();
        c.push(4 + 32 * parameters.len() as u64)
            .op(CallDataSize)
            .op(Lt)
            .jumpi_to(&invalid);
        for (index, ty) in parameters.iter().enumerate() {
            c.push(4 + 32 * index as u64).op(CallDataLoad);
            c.extend(self.validate_items(ty, &invalid));
        }
        c.into_items()
    }

    /// `[value] -> [value]`, jumping to `invalid` if the value is not a
    /// clean encoding of `ty`.
    pub fn validate_items(&self, ty: &Type, invalid: &str) -> Vec<AssemblyItem> {
        let cleanup = cleanup_items(ty);
        let mut c = Code::new();
        if !cleanup.is_empty() {
            c.dup(1).extend(cleanup).dup(2).op(Eq).op(IsZero).jumpi_to(invalid);
        }
        c.into_items()
    }

    /// Revert routine for malformed ABI input.
    pub fn invalid_input_function(&self) -> String {
        self.debug_reason("ABI decoding: invalid input")
    }

    /// Encode `count` stack values into free memory and return them:
    /// `[values..] -> (end of execution)`.
    pub fn encode_and_return_items(&self, count: usize) -> Vec<AssemblyItem> {
        let mut c = Code::new();
        c.push(FREE_MEMORY_POINTER).op(Mload);
        for index in (0..count).rev() {
            c.swap(1).dup(2).store_at_offset(32 * index as u64);
        }
        c.push(32 * count as u64).swap(1).op(Return);
        c.into_items()
    }

    /// `[] -> []`, reverting if the call carries value.
    pub fn callvalue_check_items(&self, ok_label: &str) -> Vec<AssemblyItem> {
        let reject = self.debug_reason("Ether sent to non-payable function");
        let mut c = Code::new();
        c.op(CallValue).op(IsZero).jumpi_to(ok_label).jump_to(&reject).label(ok_label);
        c.into_items()
    }
}
