//! Modbus PDU codec
//!
//! A PDU is decoded into a closed [`Payload`] enum selected by function code
//! and direction (read requests and read responses share a function code but
//! not a layout). Variable-length parts are held in the owned views from
//! [`crate::value`].
//!
//! Decoding is structural: it fails on unknown function codes, truncation and
//! trailing bytes. A `byteCount` that disagrees with `quantity` in a write
//! request still decodes so that the dispatcher can answer it with an
//! `InvalidDataValue` diagnose; [`Payload::validate`] reports it.

use bytes::{Buf, BufMut};
use tracing::{debug, trace};

use crate::constants::*;
use crate::error::{DiagnoseCode, ModbusError, ModbusResult};
use crate::value::{BitValues, WordValues};

// ============================================================================
// Function codes
// ============================================================================

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = FC_READ_COILS,
    ReadDiscreteInputs = FC_READ_DISCRETE_INPUTS,
    ReadHoldingRegisters = FC_READ_HOLDING_REGISTERS,
    ReadInputRegisters = FC_READ_INPUT_REGISTERS,
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
    WriteMultipleCoils = FC_WRITE_MULTIPLE_COILS,
    WriteMultipleRegisters = FC_WRITE_MULTIPLE_REGISTERS,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            FC_READ_COILS => Some(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Some(Self::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Some(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Some(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Some(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Some(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Some(Self::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    /// Operates on single-bit banks
    #[inline]
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::WriteSingleCoil
                | Self::WriteMultipleCoils
        )
    }

    pub fn description(self) -> &'static str {
        function_code_description(self.as_u8())
    }
}

/// Human readable name of a raw function code (diagnose flag ignored)
pub fn function_code_description(fc: u8) -> &'static str {
    match fc & !DIAGNOSE_FLAG {
        FC_READ_COILS => "Read Coils",
        FC_READ_DISCRETE_INPUTS => "Read Discrete Inputs",
        FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
        FC_READ_INPUT_REGISTERS => "Read Input Registers",
        FC_WRITE_SINGLE_COIL => "Write Single Coil",
        FC_WRITE_SINGLE_REGISTER => "Write Single Register",
        FC_WRITE_MULTIPLE_COILS => "Write Multiple Coils",
        FC_WRITE_MULTIPLE_REGISTERS => "Write Multiple Registers",
        _ => "Unknown Function",
    }
}

// ============================================================================
// Payload fields
// ============================================================================

/// `{startAddress, quantity}` used by read requests and write-multiple responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressRange {
    pub start_address: u16,
    pub quantity: u16,
}

impl AddressRange {
    pub fn new(start_address: u16, quantity: u16) -> Self {
        Self {
            start_address,
            quantity,
        }
    }

    /// One past the last address, computed without wrapping
    #[inline]
    pub fn end(&self) -> u32 {
        self.start_address as u32 + self.quantity as u32
    }

    /// Whether the whole range fits in the 16-bit address space
    #[inline]
    pub fn fits_address_space(&self) -> bool {
        self.end() <= u16::MAX as u32 + 1
    }

    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        let start = self.start_address as u32;
        (start..self.end().min(u16::MAX as u32 + 1)).map(|a| a as u16)
    }

    /// Grow by `count` registers at the head (start moves down) or tail.
    pub fn extend(&mut self, at_tail: bool, count: u16) -> ModbusResult<()> {
        let quantity = self
            .quantity
            .checked_add(count)
            .ok_or_else(|| ModbusError::protocol("quantity overflow"))?;
        if !at_tail {
            self.start_address = self.start_address.checked_sub(count).ok_or_else(|| {
                ModbusError::protocol(format!(
                    "cannot extend range below address 0 (start {}, count {})",
                    self.start_address, count
                ))
            })?;
        }
        self.quantity = quantity;
        Ok(())
    }

    /// Shrink by `count` registers from the head (start moves up) or tail.
    pub fn shrink(&mut self, from_tail: bool, count: u16) -> ModbusResult<()> {
        if count > self.quantity {
            return Err(ModbusError::OutOfRange {
                index: count as usize,
                len: self.quantity as usize,
            });
        }
        if !from_tail {
            self.start_address = self.start_address.wrapping_add(count);
        }
        self.quantity -= count;
        Ok(())
    }

    fn decode(buf: &mut impl Buf) -> ModbusResult<Self> {
        Ok(Self {
            start_address: take_u16(buf, "start address")?,
            quantity: take_u16(buf, "quantity")?,
        })
    }

    fn encode(&self, out: &mut impl BufMut) {
        out.put_u16(self.start_address);
        out.put_u16(self.quantity);
    }
}

/// `{address, value}` for FC05/FC06, identical in request and response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteSingle {
    pub address: u16,
    pub value: u16,
}

impl WriteSingle {
    pub fn new(address: u16, value: u16) -> Self {
        Self { address, value }
    }

    /// FC05 payload switching a coil on or off
    pub fn coil(address: u16, on: bool) -> Self {
        Self {
            address,
            value: if on { COIL_ON } else { COIL_OFF },
        }
    }

    /// Coil state, `None` unless the value is exactly `0xFF00` or `0x0000`
    pub fn coil_state(&self) -> Option<bool> {
        match self.value {
            COIL_ON => Some(true),
            COIL_OFF => Some(false),
            _ => None,
        }
    }
}

/// FC0F request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteMultipleCoils {
    pub start_address: u16,
    pub quantity: u16,
    pub values: BitValues,
}

impl WriteMultipleCoils {
    pub fn new(start_address: u16, bits: &[bool]) -> ModbusResult<Self> {
        let request = Self {
            start_address,
            quantity: quantity_of(bits.len())?,
            values: BitValues::from_bools(bits),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.start_address, self.quantity)
    }

    /// `byteCount` must be `ceil(quantity / 8)`
    pub fn validate(&self) -> ModbusResult<()> {
        let expected = (self.quantity as usize).div_ceil(8);
        let actual = self.values.byte_count();
        if expected != actual || self.values.len() < self.quantity as usize {
            return Err(ModbusError::ByteCountMismatch {
                quantity: self.quantity,
                expected,
                actual,
            });
        }
        if actual > MAX_BYTE_COUNT {
            return Err(ModbusError::Overflow {
                needed: actual,
                capacity: MAX_BYTE_COUNT,
            });
        }
        Ok(())
    }

    fn decode(buf: &mut impl Buf) -> ModbusResult<Self> {
        let range = AddressRange::decode(buf)?;
        let bytes = take_counted(buf)?;
        let quantity = range.quantity as usize;
        // Keep the wire bytes intact on mismatch so validation can see them
        let len = if bytes.len() == quantity.div_ceil(8) {
            quantity
        } else {
            bytes.len() * 8
        };
        Ok(Self {
            start_address: range.start_address,
            quantity: range.quantity,
            values: BitValues::from_packed(&bytes, len)?,
        })
    }

    /// Insert coils at the head (start address moves down) or tail
    pub fn insert_range(&mut self, at_tail: bool, bits: &[bool]) -> ModbusResult<()> {
        let mut range = self.range();
        range.extend(at_tail, quantity_of(bits.len())?)?;
        self.values.insert_range(at_tail, bits)?;
        self.start_address = range.start_address;
        self.quantity = range.quantity;
        Ok(())
    }

    pub fn remove_range(&mut self, from_tail: bool, count: usize) -> ModbusResult<Vec<bool>> {
        let mut range = self.range();
        range.shrink(from_tail, quantity_of(count)?)?;
        let removed = self.values.remove_range(from_tail, count)?;
        self.start_address = range.start_address;
        self.quantity = range.quantity;
        Ok(removed)
    }
}

/// FC10 request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteMultipleRegisters {
    pub start_address: u16,
    pub quantity: u16,
    pub values: WordValues,
}

impl WriteMultipleRegisters {
    pub fn new(start_address: u16, words: &[u16]) -> ModbusResult<Self> {
        let request = Self {
            start_address,
            quantity: quantity_of(words.len())?,
            values: WordValues::from_words(words),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.start_address, self.quantity)
    }

    /// `byteCount` must be `quantity * 2`
    pub fn validate(&self) -> ModbusResult<()> {
        let expected = self.quantity as usize * 2;
        let actual = self.values.byte_count();
        if expected != actual {
            return Err(ModbusError::ByteCountMismatch {
                quantity: self.quantity,
                expected,
                actual,
            });
        }
        if actual > MAX_BYTE_COUNT {
            return Err(ModbusError::Overflow {
                needed: actual,
                capacity: MAX_BYTE_COUNT,
            });
        }
        Ok(())
    }

    fn decode(buf: &mut impl Buf) -> ModbusResult<Self> {
        let range = AddressRange::decode(buf)?;
        let bytes = take_counted(buf)?;
        Ok(Self {
            start_address: range.start_address,
            quantity: range.quantity,
            values: WordValues::from_bytes(bytes),
        })
    }

    pub fn insert_range(&mut self, at_tail: bool, words: &[u16]) -> ModbusResult<()> {
        let mut range = self.range();
        range.extend(at_tail, quantity_of(words.len())?)?;
        self.values.insert_range(at_tail, words)?;
        self.start_address = range.start_address;
        self.quantity = range.quantity;
        Ok(())
    }

    pub fn remove_range(&mut self, from_tail: bool, count: usize) -> ModbusResult<Vec<u16>> {
        let mut range = self.range();
        range.shrink(from_tail, quantity_of(count)?)?;
        let removed = self.values.remove_range(from_tail, count)?;
        self.start_address = range.start_address;
        self.quantity = range.quantity;
        Ok(removed)
    }
}

/// Exception response: `fc | 0x80` followed by the exception code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnose {
    /// Function code of the failed request, without the diagnose flag
    pub function: u8,
    pub code: DiagnoseCode,
}

// ============================================================================
// Payload
// ============================================================================

/// Decoded PDU, tagged by function code and direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    ReadCoils(AddressRange),
    ReadDiscreteInputs(AddressRange),
    ReadHoldingRegisters(AddressRange),
    ReadInputRegisters(AddressRange),
    ReadCoilsResponse(BitValues),
    ReadDiscreteInputsResponse(BitValues),
    ReadHoldingRegistersResponse(WordValues),
    ReadInputRegistersResponse(WordValues),
    /// Request and echoed response
    WriteSingleCoil(WriteSingle),
    /// Request and echoed response
    WriteSingleRegister(WriteSingle),
    WriteMultipleCoils(WriteMultipleCoils),
    WriteMultipleRegisters(WriteMultipleRegisters),
    WriteMultipleCoilsResponse(AddressRange),
    WriteMultipleRegistersResponse(AddressRange),
    Diagnose(Diagnose),
}

impl Payload {
    /// Decode the bytes following the function code.
    ///
    /// `buf` must hold exactly one payload; leftover bytes are an error.
    pub fn decode(fc: u8, is_response: bool, buf: &mut impl Buf) -> ModbusResult<Self> {
        let payload = if fc & DIAGNOSE_FLAG != 0 {
            if !is_response {
                return Err(ModbusError::unsupported_function(fc, is_response));
            }
            let raw = take_u8(buf, "exception code")?;
            Self::Diagnose(Diagnose {
                function: fc & !DIAGNOSE_FLAG,
                code: DiagnoseCode::from_u8(raw).unwrap_or(DiagnoseCode::Other(raw)),
            })
        } else {
            let function = FunctionCode::from_u8(fc)
                .ok_or_else(|| ModbusError::unsupported_function(fc, is_response))?;
            Self::decode_function(function, is_response, buf)?
        };

        if buf.has_remaining() {
            return Err(ModbusError::frame(format!(
                "{} trailing bytes after {} payload",
                buf.remaining(),
                function_code_description(fc)
            )));
        }
        trace!(
            "PDU decoded: FC={:02X} ({}), response={}",
            fc,
            function_code_description(fc),
            is_response
        );
        Ok(payload)
    }

    fn decode_function(
        function: FunctionCode,
        is_response: bool,
        buf: &mut impl Buf,
    ) -> ModbusResult<Self> {
        use FunctionCode as F;
        let payload = match (function, is_response) {
            (F::ReadCoils, false) => Self::ReadCoils(AddressRange::decode(buf)?),
            (F::ReadDiscreteInputs, false) => Self::ReadDiscreteInputs(AddressRange::decode(buf)?),
            (F::ReadHoldingRegisters, false) => {
                Self::ReadHoldingRegisters(AddressRange::decode(buf)?)
            }
            (F::ReadInputRegisters, false) => Self::ReadInputRegisters(AddressRange::decode(buf)?),
            (F::ReadCoils, true) => Self::ReadCoilsResponse(decode_bits(buf)?),
            (F::ReadDiscreteInputs, true) => Self::ReadDiscreteInputsResponse(decode_bits(buf)?),
            (F::ReadHoldingRegisters, true) => {
                Self::ReadHoldingRegistersResponse(decode_words(buf)?)
            }
            (F::ReadInputRegisters, true) => Self::ReadInputRegistersResponse(decode_words(buf)?),
            (F::WriteSingleCoil, _) => Self::WriteSingleCoil(WriteSingle {
                address: take_u16(buf, "address")?,
                value: take_u16(buf, "value")?,
            }),
            (F::WriteSingleRegister, _) => Self::WriteSingleRegister(WriteSingle {
                address: take_u16(buf, "address")?,
                value: take_u16(buf, "value")?,
            }),
            (F::WriteMultipleCoils, false) => {
                Self::WriteMultipleCoils(WriteMultipleCoils::decode(buf)?)
            }
            (F::WriteMultipleRegisters, false) => {
                Self::WriteMultipleRegisters(WriteMultipleRegisters::decode(buf)?)
            }
            (F::WriteMultipleCoils, true) => {
                Self::WriteMultipleCoilsResponse(AddressRange::decode(buf)?)
            }
            (F::WriteMultipleRegisters, true) => {
                Self::WriteMultipleRegistersResponse(AddressRange::decode(buf)?)
            }
        };
        Ok(payload)
    }

    /// Decode a complete PDU (function code first)
    pub fn decode_pdu(pdu: &[u8], is_response: bool) -> ModbusResult<Self> {
        let mut buf = pdu;
        let fc = take_u8(&mut buf, "function code")?;
        Self::decode(fc, is_response, &mut buf)
    }

    /// Zero-initialised request for `function`
    pub fn new_request(function: FunctionCode) -> Self {
        use FunctionCode as F;
        match function {
            F::ReadCoils => Self::ReadCoils(AddressRange::default()),
            F::ReadDiscreteInputs => Self::ReadDiscreteInputs(AddressRange::default()),
            F::ReadHoldingRegisters => Self::ReadHoldingRegisters(AddressRange::default()),
            F::ReadInputRegisters => Self::ReadInputRegisters(AddressRange::default()),
            F::WriteSingleCoil => Self::WriteSingleCoil(WriteSingle::default()),
            F::WriteSingleRegister => Self::WriteSingleRegister(WriteSingle::default()),
            F::WriteMultipleCoils => Self::WriteMultipleCoils(WriteMultipleCoils::default()),
            F::WriteMultipleRegisters => {
                Self::WriteMultipleRegisters(WriteMultipleRegisters::default())
            }
        }
    }

    /// Zero-initialised response for `function`
    pub fn new_response(function: FunctionCode) -> Self {
        use FunctionCode as F;
        match function {
            F::ReadCoils => Self::ReadCoilsResponse(BitValues::new()),
            F::ReadDiscreteInputs => Self::ReadDiscreteInputsResponse(BitValues::new()),
            F::ReadHoldingRegisters => Self::ReadHoldingRegistersResponse(WordValues::new()),
            F::ReadInputRegisters => Self::ReadInputRegistersResponse(WordValues::new()),
            F::WriteSingleCoil => Self::WriteSingleCoil(WriteSingle::default()),
            F::WriteSingleRegister => Self::WriteSingleRegister(WriteSingle::default()),
            F::WriteMultipleCoils => Self::WriteMultipleCoilsResponse(AddressRange::default()),
            F::WriteMultipleRegisters => {
                Self::WriteMultipleRegistersResponse(AddressRange::default())
            }
        }
    }

    /// Diagnose payload answering a request with function code `function`
    pub fn diagnose(function: u8, code: DiagnoseCode) -> Self {
        Self::Diagnose(Diagnose {
            function: function & !DIAGNOSE_FLAG,
            code,
        })
    }

    /// Function code as written on the wire
    pub fn function_code(&self) -> u8 {
        match self {
            Self::ReadCoils(_) | Self::ReadCoilsResponse(_) => FC_READ_COILS,
            Self::ReadDiscreteInputs(_) | Self::ReadDiscreteInputsResponse(_) => {
                FC_READ_DISCRETE_INPUTS
            }
            Self::ReadHoldingRegisters(_) | Self::ReadHoldingRegistersResponse(_) => {
                FC_READ_HOLDING_REGISTERS
            }
            Self::ReadInputRegisters(_) | Self::ReadInputRegistersResponse(_) => {
                FC_READ_INPUT_REGISTERS
            }
            Self::WriteSingleCoil(_) => FC_WRITE_SINGLE_COIL,
            Self::WriteSingleRegister(_) => FC_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils(_) | Self::WriteMultipleCoilsResponse(_) => {
                FC_WRITE_MULTIPLE_COILS
            }
            Self::WriteMultipleRegisters(_) | Self::WriteMultipleRegistersResponse(_) => {
                FC_WRITE_MULTIPLE_REGISTERS
            }
            Self::Diagnose(d) => d.function | DIAGNOSE_FLAG,
        }
    }

    #[inline]
    pub fn is_diagnose(&self) -> bool {
        matches!(self, Self::Diagnose(_))
    }

    /// Write function code then fields in wire order.
    pub fn encode(&self, out: &mut impl BufMut) -> ModbusResult<()> {
        let fc = self.function_code();
        if let Some(count) = self.byte_count() {
            if count > MAX_BYTE_COUNT {
                return Err(ModbusError::Overflow {
                    needed: count,
                    capacity: MAX_BYTE_COUNT,
                });
            }
        }
        out.put_u8(fc);
        match self {
            Self::ReadCoils(range)
            | Self::ReadDiscreteInputs(range)
            | Self::ReadHoldingRegisters(range)
            | Self::ReadInputRegisters(range)
            | Self::WriteMultipleCoilsResponse(range)
            | Self::WriteMultipleRegistersResponse(range) => range.encode(out),
            Self::ReadCoilsResponse(bits) | Self::ReadDiscreteInputsResponse(bits) => {
                put_counted(out, bits.as_bytes())
            }
            Self::ReadHoldingRegistersResponse(words)
            | Self::ReadInputRegistersResponse(words) => put_counted(out, words.as_bytes()),
            Self::WriteSingleCoil(single) | Self::WriteSingleRegister(single) => {
                out.put_u16(single.address);
                out.put_u16(single.value);
            }
            Self::WriteMultipleCoils(request) => {
                request.range().encode(out);
                put_counted(out, request.values.as_bytes());
            }
            Self::WriteMultipleRegisters(request) => {
                request.range().encode(out);
                put_counted(out, request.values.as_bytes());
            }
            Self::Diagnose(d) => out.put_u8(d.code.as_u8()),
        }
        trace!("PDU encoded: FC={:02X} ({})", fc, function_code_description(fc));
        Ok(())
    }

    /// Encoded PDU as a byte vector
    pub fn to_bytes(&self) -> ModbusResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out)?;
        Ok(out)
    }

    /// PDU length including the function code
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::ReadCoils(_)
            | Self::ReadDiscreteInputs(_)
            | Self::ReadHoldingRegisters(_)
            | Self::ReadInputRegisters(_)
            | Self::WriteMultipleCoilsResponse(_)
            | Self::WriteMultipleRegistersResponse(_)
            | Self::WriteSingleCoil(_)
            | Self::WriteSingleRegister(_) => 4,
            Self::ReadCoilsResponse(bits) | Self::ReadDiscreteInputsResponse(bits) => {
                1 + bits.byte_count()
            }
            Self::ReadHoldingRegistersResponse(words)
            | Self::ReadInputRegistersResponse(words) => 1 + words.byte_count(),
            Self::WriteMultipleCoils(request) => 5 + request.values.byte_count(),
            Self::WriteMultipleRegisters(request) => 5 + request.values.byte_count(),
            Self::Diagnose(_) => 1,
        }
    }

    /// `byteCount` field value for variable-length variants
    pub fn byte_count(&self) -> Option<usize> {
        match self {
            Self::ReadCoilsResponse(bits) | Self::ReadDiscreteInputsResponse(bits) => {
                Some(bits.byte_count())
            }
            Self::ReadHoldingRegistersResponse(words)
            | Self::ReadInputRegistersResponse(words) => Some(words.byte_count()),
            Self::WriteMultipleCoils(request) => Some(request.values.byte_count()),
            Self::WriteMultipleRegisters(request) => Some(request.values.byte_count()),
            _ => None,
        }
    }

    /// Check `byteCount` against `quantity` and capacity limits
    pub fn validate(&self) -> ModbusResult<()> {
        let result = match self {
            Self::WriteMultipleCoils(request) => request.validate(),
            Self::WriteMultipleRegisters(request) => request.validate(),
            Self::ReadHoldingRegistersResponse(words)
            | Self::ReadInputRegistersResponse(words)
                if words.byte_count() % 2 != 0 =>
            {
                Err(ModbusError::frame(format!(
                    "odd register byte count {}",
                    words.byte_count()
                )))
            }
            _ => match self.byte_count() {
                Some(count) if count > MAX_BYTE_COUNT => Err(ModbusError::Overflow {
                    needed: count,
                    capacity: MAX_BYTE_COUNT,
                }),
                _ => Ok(()),
            },
        };
        if let Err(e) = &result {
            debug!(
                "PDU validation failed: FC={:02X} ({}): {}",
                self.function_code(),
                function_code_description(self.function_code()),
                e
            );
        }
        result
    }

    /// Address range addressed by requests and write-multiple responses
    pub fn address_range(&self) -> Option<AddressRange> {
        match self {
            Self::ReadCoils(range)
            | Self::ReadDiscreteInputs(range)
            | Self::ReadHoldingRegisters(range)
            | Self::ReadInputRegisters(range)
            | Self::WriteMultipleCoilsResponse(range)
            | Self::WriteMultipleRegistersResponse(range) => Some(*range),
            Self::WriteMultipleCoils(request) => Some(request.range()),
            Self::WriteMultipleRegisters(request) => Some(request.range()),
            Self::WriteSingleCoil(single) | Self::WriteSingleRegister(single) => {
                Some(AddressRange::new(single.address, 1))
            }
            _ => None,
        }
    }

    fn address_range_mut(&mut self) -> Option<&mut AddressRange> {
        match self {
            Self::ReadCoils(range)
            | Self::ReadDiscreteInputs(range)
            | Self::ReadHoldingRegisters(range)
            | Self::ReadInputRegisters(range)
            | Self::WriteMultipleCoilsResponse(range)
            | Self::WriteMultipleRegistersResponse(range) => Some(range),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Field access
    // ------------------------------------------------------------------------

    fn bits(&self) -> ModbusResult<&BitValues> {
        match self {
            Self::ReadCoilsResponse(bits) | Self::ReadDiscreteInputsResponse(bits) => Ok(bits),
            Self::WriteMultipleCoils(request) => Ok(&request.values),
            _ => Err(ModbusError::invalid_operation("bit access", self.function_code())),
        }
    }

    fn bits_mut(&mut self) -> ModbusResult<&mut BitValues> {
        let fc = self.function_code();
        match self {
            Self::ReadCoilsResponse(bits) | Self::ReadDiscreteInputsResponse(bits) => Ok(bits),
            Self::WriteMultipleCoils(request) => Ok(&mut request.values),
            _ => Err(ModbusError::invalid_operation("bit access", fc)),
        }
    }

    fn words(&self) -> ModbusResult<&WordValues> {
        match self {
            Self::ReadHoldingRegistersResponse(words)
            | Self::ReadInputRegistersResponse(words) => Ok(words),
            Self::WriteMultipleRegisters(request) => Ok(&request.values),
            _ => Err(ModbusError::invalid_operation("register access", self.function_code())),
        }
    }

    fn words_mut(&mut self) -> ModbusResult<&mut WordValues> {
        let fc = self.function_code();
        match self {
            Self::ReadHoldingRegistersResponse(words)
            | Self::ReadInputRegistersResponse(words) => Ok(words),
            Self::WriteMultipleRegisters(request) => Ok(&mut request.values),
            _ => Err(ModbusError::invalid_operation("register access", fc)),
        }
    }

    /// Single coil bit of a bit-packed payload
    pub fn bit(&self, index: usize) -> ModbusResult<bool> {
        match self {
            Self::WriteSingleCoil(single) if index == 0 => Ok(single.value == COIL_ON),
            _ => self.bits()?.get(index),
        }
    }

    pub fn set_bit(&mut self, index: usize, value: bool) -> ModbusResult<()> {
        match self {
            Self::WriteSingleCoil(single) if index == 0 => {
                single.value = if value { COIL_ON } else { COIL_OFF };
                Ok(())
            }
            _ => self.bits_mut()?.set(index, value),
        }
    }

    /// Single register of a word payload
    pub fn register(&self, index: usize) -> ModbusResult<u16> {
        match self {
            Self::WriteSingleRegister(single) if index == 0 => Ok(single.value),
            _ => self.words()?.get(index),
        }
    }

    pub fn set_register(&mut self, index: usize, value: u16) -> ModbusResult<()> {
        match self {
            Self::WriteSingleRegister(single) if index == 0 => {
                single.value = value;
                Ok(())
            }
            _ => self.words_mut()?.set(index, value),
        }
    }

    /// Number of values carried (bits or registers)
    pub fn value_count(&self) -> usize {
        match self {
            Self::ReadCoilsResponse(bits) | Self::ReadDiscreteInputsResponse(bits) => bits.len(),
            Self::ReadHoldingRegistersResponse(words)
            | Self::ReadInputRegistersResponse(words) => words.len(),
            Self::WriteMultipleCoils(request) => request.values.len(),
            Self::WriteMultipleRegisters(request) => request.values.len(),
            Self::WriteSingleCoil(_) | Self::WriteSingleRegister(_) => 1,
            _ => 0,
        }
    }

    // ------------------------------------------------------------------------
    // Range editing
    // ------------------------------------------------------------------------

    /// Insert coil bits at the head or tail of a bit-packed payload
    pub fn insert_bits(&mut self, at_tail: bool, bits: &[bool]) -> ModbusResult<()> {
        match self {
            Self::WriteMultipleCoils(request) => request.insert_range(at_tail, bits),
            _ => self.bits_mut()?.insert_range(at_tail, bits),
        }
    }

    /// Insert registers at the head or tail of a word payload
    pub fn insert_words(&mut self, at_tail: bool, words: &[u16]) -> ModbusResult<()> {
        match self {
            Self::WriteMultipleRegisters(request) => request.insert_range(at_tail, words),
            _ => self.words_mut()?.insert_range(at_tail, words),
        }
    }

    /// Grow the addressed range of a read request or write-multiple response
    pub fn extend_range(&mut self, at_tail: bool, count: u16) -> ModbusResult<()> {
        let fc = self.function_code();
        self.address_range_mut()
            .ok_or_else(|| ModbusError::invalid_operation("extend range", fc))?
            .extend(at_tail, count)
    }

    /// Remove `count` values (or addresses) from the head or tail.
    ///
    /// Works on every variable-length variant and on address ranges.
    pub fn remove_range(&mut self, from_tail: bool, count: usize) -> ModbusResult<()> {
        let fc = self.function_code();
        match self {
            Self::ReadCoilsResponse(bits) | Self::ReadDiscreteInputsResponse(bits) => {
                bits.remove_range(from_tail, count).map(drop)
            }
            Self::ReadHoldingRegistersResponse(words)
            | Self::ReadInputRegistersResponse(words) => {
                words.remove_range(from_tail, count).map(drop)
            }
            Self::WriteMultipleCoils(request) => request.remove_range(from_tail, count).map(drop),
            Self::WriteMultipleRegisters(request) => {
                request.remove_range(from_tail, count).map(drop)
            }
            _ => match self.address_range_mut() {
                Some(range) => range.shrink(from_tail, quantity_of(count)?),
                None => Err(ModbusError::invalid_operation("remove range", fc)),
            },
        }
    }
}

// ============================================================================
// Cursor helpers
// ============================================================================

#[inline]
fn take_u8(buf: &mut impl Buf, field: &str) -> ModbusResult<u8> {
    if buf.remaining() < 1 {
        return Err(ModbusError::frame(format!("truncated PDU: missing {}", field)));
    }
    Ok(buf.get_u8())
}

#[inline]
fn take_u16(buf: &mut impl Buf, field: &str) -> ModbusResult<u16> {
    if buf.remaining() < 2 {
        return Err(ModbusError::frame(format!("truncated PDU: missing {}", field)));
    }
    Ok(buf.get_u16())
}

/// Read `byteCount` and that many bytes
fn take_counted(buf: &mut impl Buf) -> ModbusResult<Vec<u8>> {
    let count = take_u8(buf, "byte count")? as usize;
    if count > buf.remaining() {
        return Err(ModbusError::frame(format!(
            "byte count {} exceeds remaining {} bytes",
            count,
            buf.remaining()
        )));
    }
    let mut bytes = vec![0u8; count];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn decode_bits(buf: &mut impl Buf) -> ModbusResult<BitValues> {
    let bytes = take_counted(buf)?;
    BitValues::from_packed(&bytes, bytes.len() * 8)
}

fn decode_words(buf: &mut impl Buf) -> ModbusResult<WordValues> {
    let bytes = take_counted(buf)?;
    if bytes.len() % 2 != 0 {
        return Err(ModbusError::frame(format!(
            "odd register byte count {}",
            bytes.len()
        )));
    }
    Ok(WordValues::from_bytes(bytes))
}

#[inline]
fn put_counted(out: &mut impl BufMut, bytes: &[u8]) {
    out.put_u8(bytes.len() as u8);
    out.put_slice(bytes);
}

#[inline]
fn quantity_of(count: usize) -> ModbusResult<u16> {
    u16::try_from(count).map_err(|_| ModbusError::protocol(format!("quantity {} exceeds u16", count)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: &Payload, is_response: bool) -> Payload {
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(bytes.len(), payload.encoded_len());
        Payload::decode_pdu(&bytes, is_response).unwrap()
    }

    #[test]
    fn test_function_code_lookup() {
        for fc in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10] {
            assert_eq!(FunctionCode::from_u8(fc).unwrap().as_u8(), fc);
        }
        assert_eq!(FunctionCode::from_u8(0x07), None);
        assert_eq!(FunctionCode::from_u8(0x17), None);
        assert!(FunctionCode::ReadInputRegisters.is_read());
        assert!(FunctionCode::WriteMultipleCoils.is_bit_access());
        assert_eq!(function_code_description(0x83), "Read Holding Registers");
    }

    #[test]
    fn test_read_request_wire_order() {
        let payload = Payload::ReadHoldingRegisters(AddressRange::new(0x006B, 3));
        assert_eq!(payload.to_bytes().unwrap(), vec![0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(roundtrip(&payload, false), payload);
    }

    #[test]
    fn test_read_response_layouts() {
        let words = Payload::ReadHoldingRegistersResponse(WordValues::from_words(&[10, 20]));
        assert_eq!(
            words.to_bytes().unwrap(),
            vec![0x03, 0x04, 0x00, 0x0A, 0x00, 0x14]
        );
        assert_eq!(roundtrip(&words, true), words);

        let bits = Payload::ReadCoilsResponse(BitValues::from_packed(&[0xCD, 0x01], 16).unwrap());
        assert_eq!(bits.to_bytes().unwrap(), vec![0x01, 0x02, 0xCD, 0x01]);
        assert_eq!(roundtrip(&bits, true), bits);
    }

    #[test]
    fn test_same_code_differs_by_direction() {
        let pdu = [0x01, 0x02, 0x00, 0x0A];
        // As a response: byte count 2 then two data bytes
        let response = Payload::decode_pdu(&pdu, true).unwrap();
        assert!(matches!(response, Payload::ReadCoilsResponse(ref b) if b.byte_count() == 2));
        // As a request: start 0x0200, quantity 10
        let request = Payload::decode_pdu(&pdu, false).unwrap();
        assert_eq!(request, Payload::ReadCoils(AddressRange::new(0x0200, 10)));
    }

    #[test]
    fn test_write_single_coil_mirror() {
        let payload = Payload::WriteSingleCoil(WriteSingle::coil(3, true));
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(bytes, vec![0x05, 0x00, 0x03, 0xFF, 0x00]);
        assert_eq!(Payload::decode_pdu(&bytes, true).unwrap(), payload);
        assert_eq!(Payload::decode_pdu(&bytes, false).unwrap(), payload);
        assert_eq!(WriteSingle::new(3, 0x1234).coil_state(), None);
    }

    #[test]
    fn test_write_multiple_coils() {
        let bits = [true, false, true, true, false, false, true, true, true, false];
        let request = WriteMultipleCoils::new(0x0013, &bits).unwrap();
        let payload = Payload::WriteMultipleCoils(request);
        assert_eq!(
            payload.to_bytes().unwrap(),
            vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
        assert_eq!(roundtrip(&payload, false), payload);

        let response = Payload::WriteMultipleCoilsResponse(AddressRange::new(0x13, 10));
        assert_eq!(roundtrip(&response, true), response);
    }

    #[test]
    fn test_write_multiple_registers() {
        let request = WriteMultipleRegisters::new(1, &[0x000A, 0x0102]).unwrap();
        let payload = Payload::WriteMultipleRegisters(request);
        assert_eq!(
            payload.to_bytes().unwrap(),
            vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
        assert_eq!(roundtrip(&payload, false), payload);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_byte_count_mismatch_decodes_but_fails_validation() {
        // quantity = 10 requires 2 bytes, byteCount says 1
        let pdu = [0x0F, 0x00, 0x00, 0x00, 0x0A, 0x01, 0xFF];
        let payload = Payload::decode_pdu(&pdu, false).unwrap();
        assert!(matches!(
            payload.validate(),
            Err(ModbusError::ByteCountMismatch {
                quantity: 10,
                expected: 2,
                actual: 1
            })
        ));
        // Wire bytes survive untouched
        assert_eq!(payload.to_bytes().unwrap(), pdu.to_vec());

        let pdu = [0x10, 0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x01, 0x02];
        let payload = Payload::decode_pdu(&pdu, false).unwrap();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_decode_rejects_structural_errors() {
        // byte count larger than the buffer
        assert!(Payload::decode_pdu(&[0x03, 0x04, 0x00, 0x0A], true).is_err());
        // trailing bytes
        assert!(Payload::decode_pdu(&[0x03, 0x00, 0x00, 0x00, 0x01, 0xAA], false).is_err());
        // truncated fixed payload
        assert!(Payload::decode_pdu(&[0x06, 0x00], false).is_err());
        // odd register count
        assert!(Payload::decode_pdu(&[0x04, 0x01, 0x00], true).is_err());
        // empty
        assert!(Payload::decode_pdu(&[], false).is_err());
    }

    #[test]
    fn test_unsupported_function_code() {
        let err = Payload::decode_pdu(&[0x2B, 0x0E, 0x01], false).unwrap_err();
        assert_eq!(err, ModbusError::unsupported_function(0x2B, false));
        // Diagnose payloads are only valid as responses
        let err = Payload::decode_pdu(&[0x83, 0x02], false).unwrap_err();
        assert!(matches!(err, ModbusError::UnsupportedFunction { .. }));
    }

    #[test]
    fn test_diagnose() {
        let payload = Payload::diagnose(0x0F, DiagnoseCode::InvalidDataValue);
        assert_eq!(payload.function_code(), 0x8F);
        assert_eq!(payload.to_bytes().unwrap(), vec![0x8F, 0x03]);
        assert_eq!(roundtrip(&payload, true), payload);

        let passthrough = Payload::decode_pdu(&[0x90, 0x07], true).unwrap();
        assert_eq!(
            passthrough,
            Payload::Diagnose(Diagnose {
                function: 0x10,
                code: DiagnoseCode::Other(0x07)
            })
        );
    }

    #[test]
    fn test_field_access() {
        let mut payload = Payload::new_response(FunctionCode::ReadHoldingRegisters);
        payload.insert_words(true, &[0, 0]).unwrap();
        payload.set_register(1, 0xABCD).unwrap();
        assert_eq!(payload.register(1).unwrap(), 0xABCD);
        assert!(payload.bit(0).is_err());
        assert_eq!(payload.value_count(), 2);

        let mut coil = Payload::new_request(FunctionCode::WriteSingleCoil);
        coil.set_bit(0, true).unwrap();
        assert_eq!(coil.to_bytes().unwrap(), vec![0x05, 0x00, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn test_range_editing_keeps_address_consistent() {
        let mut payload =
            Payload::WriteMultipleRegisters(WriteMultipleRegisters::new(10, &[1, 2]).unwrap());
        payload.insert_words(false, &[7, 8, 9]).unwrap();
        let range = payload.address_range().unwrap();
        assert_eq!(range, AddressRange::new(7, 5));
        assert!(payload.validate().is_ok());

        payload.remove_range(false, 3).unwrap();
        assert_eq!(payload.address_range().unwrap(), AddressRange::new(10, 2));
        assert_eq!(payload.register(0).unwrap(), 1);

        // Cannot extend below address 0
        let mut coils =
            Payload::WriteMultipleCoils(WriteMultipleCoils::new(1, &[true]).unwrap());
        assert!(coils.insert_bits(false, &[false, false]).is_err());
        assert_eq!(coils.address_range().unwrap(), AddressRange::new(1, 1));
    }

    #[test]
    fn test_read_request_extend_shrink() {
        let mut payload = Payload::ReadInputRegisters(AddressRange::new(5, 2));
        payload.extend_range(false, 5).unwrap();
        assert_eq!(payload.address_range().unwrap(), AddressRange::new(0, 7));
        payload.remove_range(true, 3).unwrap();
        assert_eq!(payload.address_range().unwrap(), AddressRange::new(0, 4));
        assert!(payload.remove_range(false, 5).is_err());
        assert!(Payload::diagnose(3, DiagnoseCode::SlaveBusy)
            .extend_range(true, 1)
            .is_err());
    }

    #[test]
    fn test_address_range_bounds() {
        let range = AddressRange::new(0xFFFF, 1);
        assert!(range.fits_address_space());
        assert_eq!(range.addresses().collect::<Vec<_>>(), vec![0xFFFF]);
        assert!(!AddressRange::new(0xFFFF, 2).fits_address_space());
    }

    #[test]
    fn test_encode_rejects_oversized_byte_count() {
        let payload = Payload::ReadHoldingRegistersResponse(WordValues::zeroed(128));
        assert!(matches!(
            payload.encode(&mut Vec::<u8>::new()),
            Err(ModbusError::Overflow { .. })
        ));
    }
}
