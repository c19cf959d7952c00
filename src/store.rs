//! # Register Store
//!
//! Four banks (coils, discrete inputs, input registers, holding registers),
//! each laid out as a pointer region followed by a direct region:
//!
//! | Addresses | Region | Storage |
//! |-----------|--------|---------|
//! | `0..P` | pointer | caller-owned `Rc<Cell<T>>`, held weakly |
//! | `P..P+D` | direct | owned by the bank, zero-initialised |
//! | `P+D..` | - | `InvalidDataAddress` |
//!
//! [`RegisterStore::process`] executes a decoded request against the banks
//! and builds the response frame, or a diagnose frame on the first failing
//! access. [`RegisterStore::process_response`] is the master-side mirror.
//!
//! ## Example
//!
//! ```rust
//! use rs485_modbus::{Frame, Payload, RegisterStore, StoreLayout};
//! use rs485_modbus::pdu::AddressRange;
//!
//! let mut store = RegisterStore::new(StoreLayout::new().with_holding_registers(0, 2));
//! store.set_holding_register(0, 10).unwrap();
//! store.set_holding_register(1, 20).unwrap();
//!
//! let request = Frame::new(5, Payload::ReadHoldingRegisters(AddressRange::new(0, 2)));
//! let response = store.process(&request);
//! assert_eq!(response.payload.to_bytes().unwrap(), vec![0x03, 0x04, 0x00, 0x0A, 0x00, 0x14]);
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use crate::error::{DiagnoseCode, ModbusError, ModbusResult};
use crate::frame::Frame;
use crate::pdu::{function_code_description, AddressRange, Payload};
use crate::value::{BitValues, WordValues};

/// Read hook: may replace the value served for an address
pub type ReadHook<T> = Box<dyn Fn(u16, T) -> T>;

/// Write hook: `(address, old, new)` after a successful write
pub type WriteHook<T> = Box<dyn FnMut(u16, T, T)>;

// ============================================================================
// Cells
// ============================================================================

/// Storage behind one address
#[derive(Debug, Clone)]
pub enum RegisterCell<T> {
    /// Owned by the bank
    Direct(T),
    /// Owned by the caller; unbound or dropped cells read as missing
    External(Weak<Cell<T>>),
}

impl<T: Copy> RegisterCell<T> {
    #[inline]
    pub fn get(&self) -> Option<T> {
        match self {
            Self::Direct(value) => Some(*value),
            Self::External(cell) => cell.upgrade().map(|c| c.get()),
        }
    }

    /// Store `value`, returning the previous one
    #[inline]
    pub fn set(&mut self, value: T) -> Option<T> {
        match self {
            Self::Direct(slot) => Some(std::mem::replace(slot, value)),
            Self::External(cell) => cell.upgrade().map(|c| c.replace(value)),
        }
    }
}

/// Region an address resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Pointer,
    Direct,
}

// ============================================================================
// Bank
// ============================================================================

/// One addressable bank
pub struct RegisterBank<T> {
    cells: Vec<RegisterCell<T>>,
    pointer_len: usize,
    read_hook: Option<ReadHook<T>>,
    write_hook: Option<WriteHook<T>>,
}

impl<T: Copy + Default> RegisterBank<T> {
    pub fn new(pointer_len: usize, direct_len: usize) -> Self {
        let mut cells = Vec::with_capacity(pointer_len + direct_len);
        cells.extend((0..pointer_len).map(|_| RegisterCell::External(Weak::new())));
        cells.extend((0..direct_len).map(|_| RegisterCell::Direct(T::default())));
        Self {
            cells,
            pointer_len,
            read_hook: None,
            write_hook: None,
        }
    }

    pub fn from_layout(layout: BankLayout) -> Self {
        Self::new(layout.pointer, layout.direct)
    }
}

impl<T: Copy> RegisterBank<T> {
    /// Total number of addresses
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn pointer_len(&self) -> usize {
        self.pointer_len
    }

    #[inline]
    pub fn direct_len(&self) -> usize {
        self.cells.len() - self.pointer_len
    }

    pub fn region(&self, address: u16) -> Option<Region> {
        let index = address as usize;
        if index < self.pointer_len {
            Some(Region::Pointer)
        } else if index < self.cells.len() {
            Some(Region::Direct)
        } else {
            None
        }
    }

    /// Bind a pointer-region address to a caller-owned cell (rebinding allowed)
    pub fn bind(&mut self, address: u16, cell: &Rc<Cell<T>>) -> ModbusResult<()> {
        if self.region(address) != Some(Region::Pointer) {
            return Err(ModbusError::Store {
                address,
                code: DiagnoseCode::InvalidDataAddress,
            });
        }
        self.cells[address as usize] = RegisterCell::External(Rc::downgrade(cell));
        Ok(())
    }

    /// Detach a pointer-region address
    pub fn unbind(&mut self, address: u16) -> ModbusResult<()> {
        if self.region(address) != Some(Region::Pointer) {
            return Err(ModbusError::Store {
                address,
                code: DiagnoseCode::InvalidDataAddress,
            });
        }
        self.cells[address as usize] = RegisterCell::External(Weak::new());
        Ok(())
    }

    /// Address resolves to live storage
    pub fn is_accessible(&self, address: u16) -> bool {
        self.cells
            .get(address as usize)
            .is_some_and(|cell| cell.get().is_some())
    }

    pub fn cell(&self, address: u16) -> Option<&RegisterCell<T>> {
        self.cells.get(address as usize)
    }

    pub fn on_read(&mut self, hook: impl Fn(u16, T) -> T + 'static) {
        self.read_hook = Some(Box::new(hook));
    }

    pub fn on_write(&mut self, hook: impl FnMut(u16, T, T) + 'static) {
        self.write_hook = Some(Box::new(hook));
    }

    pub fn clear_hooks(&mut self) {
        self.read_hook = None;
        self.write_hook = None;
    }

    /// Value at `address`, passed through the read hook
    pub fn get(&self, address: u16) -> Result<T, DiagnoseCode> {
        let value = self
            .cells
            .get(address as usize)
            .and_then(RegisterCell::get)
            .ok_or(DiagnoseCode::InvalidDataAddress)?;
        Ok(match &self.read_hook {
            Some(hook) => hook(address, value),
            None => value,
        })
    }

    /// Store `value`, returning the previous value; fires the write hook
    pub fn set(&mut self, address: u16, value: T) -> Result<T, DiagnoseCode> {
        let old = self
            .cells
            .get_mut(address as usize)
            .and_then(|cell| cell.set(value))
            .ok_or(DiagnoseCode::InvalidDataAddress)?;
        if let Some(hook) = self.write_hook.as_mut() {
            hook(address, old, value);
        }
        Ok(old)
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for RegisterBank<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterBank")
            .field("pointer_len", &self.pointer_len)
            .field("direct_len", &self.direct_len())
            .field("read_hook", &self.read_hook.is_some())
            .field("write_hook", &self.write_hook.is_some())
            .finish()
    }
}

// ============================================================================
// Layout
// ============================================================================

/// Region sizes of one bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BankLayout {
    pub pointer: usize,
    pub direct: usize,
}

impl BankLayout {
    pub fn new(pointer: usize, direct: usize) -> Self {
        Self { pointer, direct }
    }
}

/// Bank sizes of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreLayout {
    pub coils: BankLayout,
    pub discrete_inputs: BankLayout,
    pub input_registers: BankLayout,
    pub holding_registers: BankLayout,
}

impl StoreLayout {
    /// Empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Same direct size for every bank, no pointer regions
    pub fn uniform(direct: usize) -> Self {
        let bank = BankLayout::new(0, direct);
        Self {
            coils: bank,
            discrete_inputs: bank,
            input_registers: bank,
            holding_registers: bank,
        }
    }

    pub fn with_coils(mut self, pointer: usize, direct: usize) -> Self {
        self.coils = BankLayout::new(pointer, direct);
        self
    }

    pub fn with_discrete_inputs(mut self, pointer: usize, direct: usize) -> Self {
        self.discrete_inputs = BankLayout::new(pointer, direct);
        self
    }

    pub fn with_input_registers(mut self, pointer: usize, direct: usize) -> Self {
        self.input_registers = BankLayout::new(pointer, direct);
        self
    }

    pub fn with_holding_registers(mut self, pointer: usize, direct: usize) -> Self {
        self.holding_registers = BankLayout::new(pointer, direct);
        self
    }
}

/// What happens to earlier addresses when a multi-write fails part way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Addresses written before the failing one keep their new values
    #[default]
    Partial,
    /// Every address is checked before anything is written
    AllOrNothing,
}

// ============================================================================
// Store
// ============================================================================

/// Register banks plus the request dispatcher
#[derive(Debug)]
pub struct RegisterStore {
    coils: RegisterBank<bool>,
    discrete_inputs: RegisterBank<bool>,
    input_registers: RegisterBank<u16>,
    holding_registers: RegisterBank<u16>,
    write_policy: WritePolicy,
}

impl RegisterStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            coils: RegisterBank::from_layout(layout.coils),
            discrete_inputs: RegisterBank::from_layout(layout.discrete_inputs),
            input_registers: RegisterBank::from_layout(layout.input_registers),
            holding_registers: RegisterBank::from_layout(layout.holding_registers),
            write_policy: WritePolicy::default(),
        }
    }

    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    pub fn set_write_policy(&mut self, policy: WritePolicy) {
        self.write_policy = policy;
    }

    // ------------------------------------------------------------------------
    // Banks
    // ------------------------------------------------------------------------

    pub fn coils(&self) -> &RegisterBank<bool> {
        &self.coils
    }

    pub fn coils_mut(&mut self) -> &mut RegisterBank<bool> {
        &mut self.coils
    }

    pub fn discrete_inputs(&self) -> &RegisterBank<bool> {
        &self.discrete_inputs
    }

    pub fn discrete_inputs_mut(&mut self) -> &mut RegisterBank<bool> {
        &mut self.discrete_inputs
    }

    pub fn input_registers(&self) -> &RegisterBank<u16> {
        &self.input_registers
    }

    pub fn input_registers_mut(&mut self) -> &mut RegisterBank<u16> {
        &mut self.input_registers
    }

    pub fn holding_registers(&self) -> &RegisterBank<u16> {
        &self.holding_registers
    }

    pub fn holding_registers_mut(&mut self) -> &mut RegisterBank<u16> {
        &mut self.holding_registers
    }

    // ------------------------------------------------------------------------
    // Per-address access
    // ------------------------------------------------------------------------

    pub fn coil(&self, address: u16) -> Result<bool, DiagnoseCode> {
        self.coils.get(address)
    }

    pub fn set_coil(&mut self, address: u16, value: bool) -> Result<bool, DiagnoseCode> {
        self.coils.set(address, value)
    }

    pub fn discrete_input(&self, address: u16) -> Result<bool, DiagnoseCode> {
        self.discrete_inputs.get(address)
    }

    /// Local update of a read-only input (not reachable from the wire)
    pub fn set_discrete_input(&mut self, address: u16, value: bool) -> Result<bool, DiagnoseCode> {
        self.discrete_inputs.set(address, value)
    }

    pub fn input_register(&self, address: u16) -> Result<u16, DiagnoseCode> {
        self.input_registers.get(address)
    }

    /// Local update of a read-only register (not reachable from the wire)
    pub fn set_input_register(&mut self, address: u16, value: u16) -> Result<u16, DiagnoseCode> {
        self.input_registers.set(address, value)
    }

    pub fn holding_register(&self, address: u16) -> Result<u16, DiagnoseCode> {
        self.holding_registers.get(address)
    }

    pub fn set_holding_register(&mut self, address: u16, value: u16) -> Result<u16, DiagnoseCode> {
        self.holding_registers.set(address, value)
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Execute `request` and build the reply frame for the same station.
    ///
    /// Any failing access turns the reply into a diagnose frame.
    pub fn process(&mut self, request: &Frame) -> Frame {
        let fc = request.function_code();
        let payload = match self.process_payload(&request.payload) {
            Ok(payload) => payload,
            Err(code) => {
                debug!(
                    "Request FC={:02X} ({}) rejected: {}",
                    fc,
                    function_code_description(fc),
                    code
                );
                Payload::diagnose(fc, code)
            }
        };
        Frame::new(request.station, payload)
    }

    /// Execute a request payload, returning the response payload or the
    /// diagnose code of the first failure
    pub fn process_payload(&mut self, request: &Payload) -> Result<Payload, DiagnoseCode> {
        match request {
            Payload::ReadCoils(range) => {
                Ok(Payload::ReadCoilsResponse(read_bits(&self.coils, range)?))
            }
            Payload::ReadDiscreteInputs(range) => Ok(Payload::ReadDiscreteInputsResponse(
                read_bits(&self.discrete_inputs, range)?,
            )),
            Payload::ReadHoldingRegisters(range) => Ok(Payload::ReadHoldingRegistersResponse(
                read_words(&self.holding_registers, range)?,
            )),
            Payload::ReadInputRegisters(range) => Ok(Payload::ReadInputRegistersResponse(
                read_words(&self.input_registers, range)?,
            )),
            Payload::WriteSingleCoil(single) => {
                let on = single
                    .coil_state()
                    .ok_or(DiagnoseCode::InvalidDataValue)?;
                self.coils.set(single.address, on)?;
                Ok(Payload::WriteSingleCoil(*single))
            }
            Payload::WriteSingleRegister(single) => {
                self.holding_registers.set(single.address, single.value)?;
                Ok(Payload::WriteSingleRegister(*single))
            }
            Payload::WriteMultipleCoils(request) => {
                request
                    .validate()
                    .map_err(|_| DiagnoseCode::InvalidDataValue)?;
                let range = request.range();
                check_range(&range, MAX_WRITE_COILS)?;
                let values: Vec<bool> = request.values.iter().take(range.quantity as usize).collect();
                write_all(&mut self.coils, &range, &values, self.write_policy)?;
                Ok(Payload::WriteMultipleCoilsResponse(range))
            }
            Payload::WriteMultipleRegisters(request) => {
                request
                    .validate()
                    .map_err(|_| DiagnoseCode::InvalidDataValue)?;
                let range = request.range();
                check_range(&range, MAX_WRITE_REGISTERS)?;
                let values = request.values.to_vec();
                write_all(&mut self.holding_registers, &range, &values, self.write_policy)?;
                Ok(Payload::WriteMultipleRegistersResponse(range))
            }
            Payload::ReadCoilsResponse(_)
            | Payload::ReadDiscreteInputsResponse(_)
            | Payload::ReadHoldingRegistersResponse(_)
            | Payload::ReadInputRegistersResponse(_)
            | Payload::WriteMultipleCoilsResponse(_)
            | Payload::WriteMultipleRegistersResponse(_)
            | Payload::Diagnose(_) => Err(DiagnoseCode::InvalidFunctionCode),
        }
    }

    /// Apply a slave's reply to the local banks at the addresses of the
    /// original request.
    ///
    /// Read responses update the matching bank; write echoes apply the
    /// written values locally. A diagnose reply is returned as
    /// [`ModbusError::Exception`].
    pub fn process_response(&mut self, response: &Frame, request: &Frame) -> ModbusResult<()> {
        if let Payload::Diagnose(diagnose) = &response.payload {
            return Err(ModbusError::Exception {
                function: diagnose.function,
                code: diagnose.code,
            });
        }
        if response.function_code() != request.function_code() {
            return Err(ModbusError::protocol(format!(
                "response FC={:02X} does not match request FC={:02X}",
                response.function_code(),
                request.function_code()
            )));
        }
        if response.station != request.station {
            return Err(ModbusError::protocol(format!(
                "response from station {} to request for station {}",
                response.station, request.station
            )));
        }

        match (&request.payload, &response.payload) {
            (Payload::ReadCoils(range), Payload::ReadCoilsResponse(bits)) => {
                mirror_bits(&mut self.coils, range, bits)
            }
            (Payload::ReadDiscreteInputs(range), Payload::ReadDiscreteInputsResponse(bits)) => {
                mirror_bits(&mut self.discrete_inputs, range, bits)
            }
            (Payload::ReadHoldingRegisters(range), Payload::ReadHoldingRegistersResponse(words)) => {
                mirror_words(&mut self.holding_registers, range, words)
            }
            (Payload::ReadInputRegisters(range), Payload::ReadInputRegistersResponse(words)) => {
                mirror_words(&mut self.input_registers, range, words)
            }
            (Payload::WriteSingleCoil(sent), Payload::WriteSingleCoil(echo)) => {
                check_echo(sent, echo)?;
                let on = echo
                    .coil_state()
                    .ok_or_else(|| ModbusError::protocol("invalid coil value in echo"))?;
                store_set(&mut self.coils, echo.address, on)
            }
            (Payload::WriteSingleRegister(sent), Payload::WriteSingleRegister(echo)) => {
                check_echo(sent, echo)?;
                store_set(&mut self.holding_registers, echo.address, echo.value)
            }
            (Payload::WriteMultipleCoils(sent), Payload::WriteMultipleCoilsResponse(range)) => {
                check_echo(&sent.range(), range)?;
                for (address, value) in range.addresses().zip(sent.values.iter()) {
                    store_set(&mut self.coils, address, value)?;
                }
                Ok(())
            }
            (Payload::WriteMultipleRegisters(sent), Payload::WriteMultipleRegistersResponse(range)) => {
                check_echo(&sent.range(), range)?;
                for (address, value) in range.addresses().zip(sent.values.iter()) {
                    store_set(&mut self.holding_registers, address, value)?;
                }
                Ok(())
            }
            _ => Err(ModbusError::protocol(format!(
                "cannot mirror FC={:02X}: request is not a request payload",
                request.function_code()
            ))),
        }
    }
}

// ============================================================================
// Dispatch helpers
// ============================================================================

/// Quantity in 1..=limit and span inside the address space
fn check_range(range: &AddressRange, limit: usize) -> Result<(), DiagnoseCode> {
    if range.quantity == 0 || range.quantity as usize > limit {
        return Err(DiagnoseCode::InvalidDataValue);
    }
    if !range.fits_address_space() {
        return Err(DiagnoseCode::InvalidDataAddress);
    }
    Ok(())
}

fn read_bits(bank: &RegisterBank<bool>, range: &AddressRange) -> Result<BitValues, DiagnoseCode> {
    check_range(range, MAX_READ_COILS)?;
    let mut bits = BitValues::zeroed(range.quantity as usize);
    for (i, address) in range.addresses().enumerate() {
        let value = bank.get(address)?;
        bits.set(i, value)
            .map_err(|_| DiagnoseCode::SlaveDeviceFault)?;
    }
    Ok(bits)
}

fn read_words(bank: &RegisterBank<u16>, range: &AddressRange) -> Result<WordValues, DiagnoseCode> {
    check_range(range, MAX_READ_REGISTERS)?;
    let mut words = WordValues::zeroed(range.quantity as usize);
    for (i, address) in range.addresses().enumerate() {
        let value = bank.get(address)?;
        words
            .set(i, value)
            .map_err(|_| DiagnoseCode::SlaveDeviceFault)?;
    }
    Ok(words)
}

fn write_all<T: Copy>(
    bank: &mut RegisterBank<T>,
    range: &AddressRange,
    values: &[T],
    policy: WritePolicy,
) -> Result<(), DiagnoseCode> {
    if policy == WritePolicy::AllOrNothing && !range.addresses().all(|a| bank.is_accessible(a)) {
        return Err(DiagnoseCode::InvalidDataAddress);
    }
    for (address, &value) in range.addresses().zip(values) {
        bank.set(address, value)?;
    }
    Ok(())
}

fn store_set<T: Copy>(bank: &mut RegisterBank<T>, address: u16, value: T) -> ModbusResult<()> {
    bank.set(address, value)
        .map(drop)
        .map_err(|code| ModbusError::Store { address, code })
}

fn check_echo<E: PartialEq + fmt::Debug>(sent: &E, echoed: &E) -> ModbusResult<()> {
    if sent != echoed {
        return Err(ModbusError::protocol(format!(
            "write echo {:?} does not match request {:?}",
            echoed, sent
        )));
    }
    Ok(())
}

fn mirror_bits(
    bank: &mut RegisterBank<bool>,
    range: &AddressRange,
    bits: &BitValues,
) -> ModbusResult<()> {
    if bits.len() < range.quantity as usize {
        return Err(ModbusError::frame(format!(
            "response carries {} bits, request asked for {}",
            bits.len(),
            range.quantity
        )));
    }
    for (address, value) in range.addresses().zip(bits.iter()) {
        store_set(bank, address, value)?;
    }
    Ok(())
}

fn mirror_words(
    bank: &mut RegisterBank<u16>,
    range: &AddressRange,
    words: &WordValues,
) -> ModbusResult<()> {
    if words.len() != range.quantity as usize {
        return Err(ModbusError::frame(format!(
            "response carries {} registers, request asked for {}",
            words.len(),
            range.quantity
        )));
    }
    for (address, value) in range.addresses().zip(words.iter()) {
        store_set(bank, address, value)?;
    }
    Ok(())
}
