//! Instruction set of the target stack machine.
//!
//! Only the plain opcodes are listed here. `PUSHn`, `DUPn` and `SWAPn` carry
//! an operand and are modelled by [`AssemblyItem`](super::AssemblyItem).

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// First byte of the `PUSH1`..`PUSH32` range, minus one.
pub const PUSH_BASE: u8 = 0x5f;
/// `DUP1` opcode; `DUPn` is `DUP_BASE + n - 1`.
pub const DUP_BASE: u8 = 0x80;
/// `SWAP1` opcode; `SWAPn` is `SWAP_BASE + n - 1`.
pub const SWAP_BASE: u8 = 0x90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    Stop = 0x00,
    Add = 0x01,
    Mul = 0x02,
    Sub = 0x03,
    Div = 0x04,
    Sdiv = 0x05,
    Mod = 0x06,
    Smod = 0x07,
    SignExtend = 0x0b,
    Lt = 0x10,
    Gt = 0x11,
    Slt = 0x12,
    Sgt = 0x13,
    Eq = 0x14,
    IsZero = 0x15,
    And = 0x16,
    Or = 0x17,
    Xor = 0x18,
    Not = 0x19,
    Shl = 0x1b,
    Shr = 0x1c,
    Sar = 0x1d,
    Address = 0x30,
    Balance = 0x31,
    Caller = 0x33,
    CallValue = 0x34,
    CallDataLoad = 0x35,
    CallDataSize = 0x36,
    CallDataCopy = 0x37,
    CodeSize = 0x38,
    CodeCopy = 0x39,
    ExtCodeSize = 0x3b,
    ReturnDataSize = 0x3d,
    ReturnDataCopy = 0x3e,
    Timestamp = 0x42,
    Number = 0x43,
    Pop = 0x50,
    Mload = 0x51,
    Mstore = 0x52,
    Sload = 0x54,
    Sstore = 0x55,
    Jump = 0x56,
    JumpI = 0x57,
    Gas = 0x5a,
    JumpDest = 0x5b,
    Create = 0xf0,
    Call = 0xf1,
    Return = 0xf3,
    DelegateCall = 0xf4,
    Revert = 0xfd,
    Invalid = 0xfe,
    SelfDestruct = 0xff,
}

impl Instruction {
    /// Mnemonic used in assembly listings.
    pub fn name(self) -> &'static str {
        use Instruction::*;
        match self {
            Stop => "STOP",
            Add => "ADD",
            Mul => "MUL",
            Sub => "SUB",
            Div => "DIV",
            Sdiv => "SDIV",
            Mod => "MOD",
            Smod => "SMOD",
            SignExtend => "SIGNEXTEND",
            Lt => "LT",
            Gt => "GT",
            Slt => "SLT",
            Sgt => "SGT",
            Eq => "EQ",
            IsZero => "ISZERO",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Not => "NOT",
            Shl => "SHL",
            Shr => "SHR",
            Sar => "SAR",
            Address => "ADDRESS",
            Balance => "BALANCE",
            Caller => "CALLER",
            CallValue => "CALLVALUE",
            CallDataLoad => "CALLDATALOAD",
            CallDataSize => "CALLDATASIZE",
            CallDataCopy => "CALLDATACOPY",
            CodeSize => "CODESIZE",
            CodeCopy => "CODECOPY",
            ExtCodeSize => "EXTCODESIZE",
            ReturnDataSize => "RETURNDATASIZE",
            ReturnDataCopy => "RETURNDATACOPY",
            Timestamp => "TIMESTAMP",
            Number => "NUMBER",
            Pop => "POP",
            Mload => "MLOAD",
            Mstore => "MSTORE",
            Sload => "SLOAD",
            Sstore => "SSTORE",
            Jump => "JUMP",
            JumpI => "JUMPI",
            Gas => "GAS",
            JumpDest => "JUMPDEST",
            Create => "CREATE",
            Call => "CALL",
            Return => "RETURN",
            DelegateCall => "DELEGATECALL",
            Revert => "REVERT",
            Invalid => "INVALID",
            SelfDestruct => "SELFDESTRUCT",
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn terminates(self) -> bool {
        matches!(
            self,
            Instruction::Stop
                | Instruction::Jump
                | Instruction::Return
                | Instruction::Revert
                | Instruction::Invalid
                | Instruction::SelfDestruct
        )
    }
}

/// Render bytecode as one mnemonic per line, for tests and debugging.
pub fn disassemble(code: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let byte = code[pc];
        pc += 1;
        let line = match byte {
            0x60..=0x7f => {
                let len = (byte - PUSH_BASE) as usize;
                let end = (pc + len).min(code.len());
                let data: String = code[pc..end].iter().map(|b| format!("{b:02x}")).collect();
                pc = end;
                format!("PUSH{len} 0x{data}")
            }
            0x80..=0x8f => format!("DUP{}", byte - DUP_BASE + 1),
            0x90..=0x9f => format!("SWAP{}", byte - SWAP_BASE + 1),
            _ => match Instruction::try_from(byte) {
                Ok(instruction) => instruction.name().to_string(),
                Err(_) => format!("0x{byte:02x}"),
            },
        };
        out.push(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip_through_u8() {
        let byte: u8 = Instruction::JumpDest.into();
        assert_eq!(byte, 0x5b);
        assert_eq!(
            Instruction::try_from(0x5b).ok(),
            Some(Instruction::JumpDest)
        );
        assert!(Instruction::try_from(0x0c).is_err());
    }

    #[test]
    fn disassemble_mixed() {
        let code = [0x60, 0x80, 0x60, 0x40, 0x52, 0x81, 0x91, 0xef];
        assert_eq!(
            disassemble(&code),
            vec!["PUSH1 0x80", "PUSH1 0x40", "MSTORE", "DUP2", "SWAP2", "0xef"]
        );
    }

    #[test]
    fn terminators() {
        assert!(Instruction::Jump.terminates());
        assert!(!Instruction::JumpI.terminates());
    }
}
