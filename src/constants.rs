//! Modbus RTU wire and timing constants
//!
//! Frame limits follow the serial line ADU layout
//! `[station:1][function:1][payload:N][crc:2]`; timing values are expressed
//! in character times so they scale with the configured baud rate.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Station byte + CRC
pub const ADU_OVERHEAD: usize = 1 + CRC_SIZE;

/// Trailing CRC-16 length
pub const CRC_SIZE: usize = 2;

/// Smallest frame the receiver accepts: station + function code + CRC
pub const MIN_ADU_SIZE: usize = 1 + 1 + CRC_SIZE;

/// Largest PDU a legal RTU ADU can carry
///
/// RS485 ADU (256 bytes) - Station (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Receive window capacity
///
/// Deliberately larger than the largest legal ADU (256 bytes) so that a
/// frame slightly over size is still delimited by silence and reported as a
/// verify/decode failure instead of being split in two.
pub const MAX_ADU_SIZE: usize = 384;

/// `byteCount` is a single byte on the wire
pub const MAX_BYTE_COUNT: usize = u8::MAX as usize;

// ============================================================================
// Station Addresses
// ============================================================================

/// Station id used by a master, which owns no address on the bus
pub const MASTER_STATION: u8 = 0;

/// Requests addressed to station 0 are processed by every slave, none reply
pub const BROADCAST_STATION: u8 = 0;

/// Lowest assignable slave address
pub const MIN_SLAVE_STATION: u8 = 1;

/// Highest assignable slave address (248..=255 are reserved)
pub const MAX_SLAVE_STATION: u8 = 247;

// ============================================================================
// Timing Constants
// ============================================================================

/// Bits on the wire per character: start + 8 data + parity/stop + stop
pub const BITS_PER_CHARACTER: u64 = 11;

/// Inter-frame silence, in character times
pub const SILENCE_CHARACTERS: f64 = 3.5;

/// Turnaround guard after a frame, as a multiple of the silence interval
pub const SEND_BACK_DELAY_FACTOR: u64 = 80;

/// Baud rate used when none is configured
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Master response timeout used when none is configured
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Response PDU: function (1) + byte count (1) + N × 2 ≤ 253,
/// so N ≤ 125.
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Request PDU: function (1) + start (2) + quantity (2) + byte count (1)
/// + N × 2 ≤ 253, so N ≤ 123.
pub const MAX_WRITE_REGISTERS: usize = 123;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum number of coils for FC01/FC02 (Read Coils/Discrete Inputs)
///
/// Response PDU: function (1) + byte count (1) + ceil(N / 8) ≤ 253 gives
/// N ≤ 2008; the protocol caps it at 2000.
pub const MAX_READ_COILS: usize = 2000;

/// Maximum number of coils for FC15 (Write Multiple Coils)
///
/// Request PDU: 6 header bytes + ceil(N / 8) ≤ 253 gives N ≤ 1976; the
/// protocol caps it at 1968 (0x7B0).
pub const MAX_WRITE_COILS: usize = 1968;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Set on the function code of a diagnose (exception) response
pub const DIAGNOSE_FLAG: u8 = 0x80;

// ============================================================================
// Coil Values
// ============================================================================

/// FC05 value for ON
pub const COIL_ON: u16 = 0xFF00;

/// FC05 value for OFF
pub const COIL_OFF: u16 = 0x0000;
