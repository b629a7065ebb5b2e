//! 256-bit machine words.

use std::fmt;

/// A 256-bit big-endian word, the unit of the target stack machine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Word(pub [u8; 32]);

impl Word {
    pub const ZERO: Word = Word([0; 32]);

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Word(bytes)
    }

    /// Right-aligned: `bytes` become the low-order bytes of the word.
    pub fn from_be_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; 32];
        let len = bytes.len().min(32);
        out[32 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
        Word(out)
    }

    /// Left-aligned: `bytes` become the high-order bytes of the word, as
    /// for fixed-size byte arrays and selectors stored in memory.
    pub fn from_left_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; 32];
        let len = bytes.len().min(32);
        out[..len].copy_from_slice(&bytes[..len]);
        Word(out)
    }

    /// Parse decimal digits. Returns `None` on overflow or a non-digit.
    pub fn from_dec_str(digits: &str) -> Option<Self> {
        if digits.is_empty() {
            return None;
        }
        let mut acc = Word::ZERO;
        for c in digits.chars() {
            let digit = c.to_digit(10)?;
            acc = acc.checked_mul_small(10)?.checked_add_small(digit)?;
        }
        Some(acc)
    }

    /// Parse hex digits without a prefix.
    pub fn from_hex_str(digits: &str) -> Option<Self> {
        if digits.is_empty() {
            return None;
        }
        let mut acc = Word::ZERO;
        for c in digits.chars() {
            let digit = c.to_digit(16)?;
            acc = acc.checked_mul_small(16)?.checked_add_small(digit)?;
        }
        Some(acc)
    }

    /// A word with the low `bits` bits set.
    pub fn low_mask(bits: u16) -> Self {
        let mut out = [0u8; 32];
        let full = (bits / 8) as usize;
        for byte in out.iter_mut().rev().take(full.min(32)) {
            *byte = 0xff;
        }
        let rest = bits % 8;
        if rest != 0 && full < 32 {
            out[31 - full] = (1u8 << rest) - 1;
        }
        Word(out)
    }

    /// A word with the high `bytes` bytes set.
    pub fn high_mask(bytes: u8) -> Self {
        let mut out = [0u8; 32];
        for byte in out.iter_mut().take(bytes as usize) {
            *byte = 0xff;
        }
        Word(out)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Number of bytes needed to push this value, at least one.
    pub fn significant_bytes(&self) -> usize {
        let leading = self.0.iter().take_while(|&&b| b == 0).count();
        (32 - leading).max(1)
    }

    /// Number of significant bits.
    pub fn bits(&self) -> u16 {
        match self.0.iter().position(|&b| b != 0) {
            Some(pos) => ((31 - pos) * 8) as u16 + (8 - self.0[pos].leading_zeros() as u16),
            None => 0,
        }
    }

    /// The low 64 bits, if the value fits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..24].iter().any(|&b| b != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(low))
    }

    fn checked_mul_small(self, factor: u32) -> Option<Self> {
        let mut out = [0u8; 32];
        let mut carry: u64 = 0;
        for i in (0..32).rev() {
            let value = self.0[i] as u64 * factor as u64 + carry;
            out[i] = value as u8;
            carry = value >> 8;
        }
        (carry == 0).then_some(Word(out))
    }

    fn checked_add_small(self, addend: u32) -> Option<Self> {
        let mut out = self.0;
        let mut carry = addend as u64;
        for byte in out.iter_mut().rev() {
            if carry == 0 {
                break;
            }
            let value = *byte as u64 + (carry & 0xff);
            *byte = value as u8;
            carry = (carry >> 8) + (value >> 8);
        }
        (carry == 0).then_some(Word(out))
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Word::from_u64(value)
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = 32 - self.significant_bytes();
        write!(f, "0x")?;
        for byte in &self.0[start..] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_parsing() {
        assert_eq!(Word::from_dec_str("0"), Some(Word::ZERO));
        assert_eq!(Word::from_dec_str("258"), Some(Word::from_u64(258)));
        let max = "11579208923731619542357098500868790785\
                   3269984665640564039457584007913129639935";
        assert_eq!(Word::from_dec_str(max), Some(Word([0xff; 32])));
        let overflow = "11579208923731619542357098500868790785\
                        3269984665640564039457584007913129639936";
        assert_eq!(Word::from_dec_str(overflow), None);
        assert_eq!(Word::from_dec_str("12a"), None);
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(Word::from_hex_str("ff"), Some(Word::from_u64(255)));
        assert_eq!(
            Word::from_hex_str("DEADbeef"),
            Some(Word::from_u64(0xdead_beef))
        );
        assert_eq!(Word::from_hex_str(&"f".repeat(65)), None);
    }

    #[test]
    fn masks() {
        assert_eq!(Word::low_mask(8), Word::from_u64(0xff));
        assert_eq!(Word::low_mask(12), Word::from_u64(0xfff));
        assert_eq!(Word::low_mask(256), Word([0xff; 32]));
        assert_eq!(Word::low_mask(160).bits(), 160);
        assert_eq!(Word::high_mask(4).0[..5], [0xff, 0xff, 0xff, 0xff, 0x00]);
    }

    #[test]
    fn sizes() {
        assert_eq!(Word::ZERO.significant_bytes(), 1);
        assert_eq!(Word::from_u64(0x1234).significant_bytes(), 2);
        assert_eq!(Word::from_u64(0x100).bits(), 9);
        assert_eq!(Word::from_u64(7).to_u64(), Some(7));
        assert_eq!(Word([0xff; 32]).to_u64(), None);
    }

    #[test]
    fn alignment() {
        let left = Word::from_left_slice(&[0xab, 0xcd]);
        assert_eq!(left.0[0], 0xab);
        assert_eq!(left.0[31], 0);
        let right = Word::from_be_slice(&[0xab, 0xcd]);
        assert_eq!(right, Word::from_u64(0xabcd));
    }

    #[test]
    fn display_is_minimal_hex() {
        assert_eq!(Word::ZERO.to_string(), "0x00");
        assert_eq!(Word::from_u64(0x1ff).to_string(), "0x01ff");
    }
}
