//! # Packed Value Views
//!
//! Owned byte buffers holding the variable-length part of a PDU exactly as
//! it appears on the wire, with bounds-checked accessors.
//!
//! | View | Wire layout | Unit |
//! |------|-------------|------|
//! | [`BitValues`] | LSB-first bit packing, `ceil(n / 8)` bytes | 1 bit |
//! | [`WordValues`] | big-endian `u16` per register | 2 bytes |
//!
//! ## Bit alignment
//!
//! Bit storage is byte-granular: the buffer always holds `ceil(len / 8)`
//! bytes. Padding bits of the final byte are kept as received so a decoded
//! PDU re-encodes to the same bytes; they are ignored by comparisons and
//! cleared by any range edit. Inserting or removing `n` bits at the head
//! shifts every existing bit by exactly `n` positions across byte
//! boundaries, then re-masks the final byte.

use crate::constants::MAX_BYTE_COUNT;
use crate::error::{ModbusError, ModbusResult};

/// Largest number of bits a single `byteCount` can describe
pub const MAX_PACKED_BITS: usize = MAX_BYTE_COUNT * 8;

// ============================================================================
// Shift-and-mask primitives
// ============================================================================

/// Move every bit `i` of `src` to `i + shift`, producing `out_len` bytes.
fn shift_bits_up(src: &[u8], shift: usize, out_len: usize) -> Vec<u8> {
    let whole = shift / 8;
    let rem = shift % 8;
    let mut out = vec![0u8; out_len];
    for (k, slot) in out.iter_mut().enumerate().skip(whole) {
        let i = k - whole;
        let low = src.get(i).copied().unwrap_or(0) << rem;
        let carry = if rem > 0 && i > 0 {
            src.get(i - 1).copied().unwrap_or(0) >> (8 - rem)
        } else {
            0
        };
        *slot = low | carry;
    }
    out
}

/// Move every bit `i + shift` of `src` to `i`, producing `out_len` bytes.
fn shift_bits_down(src: &[u8], shift: usize, out_len: usize) -> Vec<u8> {
    let whole = shift / 8;
    let rem = shift % 8;
    let mut out = vec![0u8; out_len];
    for (k, slot) in out.iter_mut().enumerate() {
        let i = k + whole;
        let low = src.get(i).copied().unwrap_or(0) >> rem;
        let carry = if rem > 0 {
            src.get(i + 1).copied().unwrap_or(0) << (8 - rem)
        } else {
            0
        };
        *slot = low | carry;
    }
    out
}

/// Clear the bits of the final byte beyond `len`.
#[inline]
fn mask_tail(bytes: &mut [u8], len: usize) {
    let used = len % 8;
    if used != 0 {
        if let Some(last) = bytes.last_mut() {
            *last &= (1u8 << used) - 1;
        }
    }
}

// ============================================================================
// Bit-packed values
// ============================================================================

/// Bit-packed coil / discrete input values
#[derive(Debug, Clone, Default)]
pub struct BitValues {
    len: usize,
    bytes: Vec<u8>,
}

impl PartialEq for BitValues {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl Eq for BitValues {}

impl BitValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// `len` cleared bits
    pub fn zeroed(len: usize) -> Self {
        Self {
            len,
            bytes: vec![0; len.div_ceil(8)],
        }
    }

    pub fn from_bools(bits: &[bool]) -> Self {
        let mut values = Self::zeroed(bits.len());
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                values.bytes[i / 8] |= 1 << (i % 8);
            }
        }
        values
    }

    /// Wrap wire bytes holding `len` bits, padding included.
    pub fn from_packed(bytes: &[u8], len: usize) -> ModbusResult<Self> {
        if bytes.len() != len.div_ceil(8) {
            return Err(ModbusError::ByteCountMismatch {
                quantity: len.min(u16::MAX as usize) as u16,
                expected: len.div_ceil(8),
                actual: bytes.len(),
            });
        }
        Ok(Self {
            len,
            bytes: bytes.to_vec(),
        })
    }

    /// Number of bits
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of backing bytes, i.e. the wire `byteCount`
    #[inline]
    pub fn byte_count(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn get(&self, index: usize) -> ModbusResult<bool> {
        self.check_index(index)?;
        Ok(self.bytes[index / 8] & (1 << (index % 8)) != 0)
    }

    pub fn set(&mut self, index: usize, value: bool) -> ModbusResult<()> {
        self.check_index(index)?;
        if value {
            self.bytes[index / 8] |= 1 << (index % 8);
        } else {
            self.bytes[index / 8] &= !(1 << (index % 8));
        }
        Ok(())
    }

    /// Append one bit at the tail
    pub fn push(&mut self, value: bool) -> ModbusResult<()> {
        self.insert_range(true, &[value])
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bytes[i / 8] & (1 << (i % 8)) != 0)
    }

    pub fn to_vec(&self) -> Vec<bool> {
        self.iter().collect()
    }

    /// Insert `bits` at the head (`at_tail == false`) or tail.
    ///
    /// Head insertion shifts all existing bits up by `bits.len()`.
    pub fn insert_range(&mut self, at_tail: bool, bits: &[bool]) -> ModbusResult<()> {
        let count = bits.len();
        let new_len = self.len + count;
        if new_len > MAX_PACKED_BITS {
            return Err(ModbusError::Overflow {
                needed: new_len.div_ceil(8),
                capacity: MAX_BYTE_COUNT,
            });
        }
        mask_tail(&mut self.bytes, self.len);
        let new_bytes = new_len.div_ceil(8);
        let offset = if at_tail {
            self.bytes.resize(new_bytes, 0);
            self.len
        } else {
            self.bytes = shift_bits_up(&self.bytes, count, new_bytes);
            0
        };
        self.len = new_len;
        for (i, &bit) in bits.iter().enumerate() {
            self.set(offset + i, bit)?;
        }
        Ok(())
    }

    /// Remove `count` bits from the head or tail, returning them in order.
    pub fn remove_range(&mut self, from_tail: bool, count: usize) -> ModbusResult<Vec<bool>> {
        if count > self.len {
            return Err(ModbusError::OutOfRange {
                index: count,
                len: self.len,
            });
        }
        let new_len = self.len - count;
        let new_bytes = new_len.div_ceil(8);
        let removed: Vec<bool> = if from_tail {
            self.iter().skip(new_len).collect()
        } else {
            self.iter().take(count).collect()
        };
        if from_tail {
            self.bytes.truncate(new_bytes);
        } else {
            self.bytes = shift_bits_down(&self.bytes, count, new_bytes);
        }
        self.len = new_len;
        mask_tail(&mut self.bytes, new_len);
        Ok(removed)
    }

    #[inline]
    fn check_index(&self, index: usize) -> ModbusResult<()> {
        if index >= self.len {
            return Err(ModbusError::OutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Word values
// ============================================================================

/// Big-endian 16-bit register values
///
/// Holds the raw wire bytes; a malformed odd byte count is kept as-is so
/// that validation can report it rather than the decoder guessing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WordValues {
    bytes: Vec<u8>,
}

impl WordValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` zero registers
    pub fn zeroed(count: usize) -> Self {
        Self {
            bytes: vec![0; count * 2],
        }
    }

    pub fn from_words(words: &[u16]) -> Self {
        Self {
            bytes: words.iter().flat_map(|w| w.to_be_bytes()).collect(),
        }
    }

    /// Wrap raw wire bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Number of complete registers
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / 2
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.len() < 2
    }

    #[inline]
    pub fn byte_count(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn get(&self, index: usize) -> ModbusResult<u16> {
        self.check_index(index)?;
        let at = index * 2;
        Ok(u16::from_be_bytes([self.bytes[at], self.bytes[at + 1]]))
    }

    pub fn set(&mut self, index: usize, value: u16) -> ModbusResult<()> {
        self.check_index(index)?;
        let at = index * 2;
        self.bytes[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn push(&mut self, value: u16) -> ModbusResult<()> {
        self.insert_range(true, &[value])
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }

    pub fn to_vec(&self) -> Vec<u16> {
        self.iter().collect()
    }

    /// Insert registers at the head or tail.
    pub fn insert_range(&mut self, at_tail: bool, words: &[u16]) -> ModbusResult<()> {
        let needed = self.bytes.len() + words.len() * 2;
        if needed > MAX_BYTE_COUNT {
            return Err(ModbusError::Overflow {
                needed,
                capacity: MAX_BYTE_COUNT,
            });
        }
        let encoded = words.iter().flat_map(|w| w.to_be_bytes());
        if at_tail {
            self.bytes.extend(encoded);
        } else {
            self.bytes.splice(0..0, encoded);
        }
        Ok(())
    }

    /// Remove `count` registers from the head or tail, returning them in order.
    pub fn remove_range(&mut self, from_tail: bool, count: usize) -> ModbusResult<Vec<u16>> {
        let len = self.len();
        if count > len {
            return Err(ModbusError::OutOfRange { index: count, len });
        }
        let span = if from_tail {
            (len - count) * 2..len * 2
        } else {
            0..count * 2
        };
        let removed = self
            .bytes
            .drain(span)
            .collect::<Vec<u8>>()
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(removed)
    }

    #[inline]
    fn check_index(&self, index: usize) -> ModbusResult<()> {
        if index >= self.len() {
            return Err(ModbusError::OutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(())
    }
}
