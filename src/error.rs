//! Error types for the RTU engine
//!
//! Three layers of failure are modelled here:
//!
//! - [`ModbusError`]: local API misuse or malformed data, returned through
//!   [`ModbusResult`] by every fallible operation.
//! - [`FailType`]: framing failures observed on the bus. These are reported
//!   as events and never abort the poll loop.
//! - [`DiagnoseCode`]: per-request exception codes carried back to the peer
//!   in a diagnose (`fc | 0x80`) payload.

use std::fmt;
use thiserror::Error;

/// Result type for all fallible engine operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Engine error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Transport I/O failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Protocol level violation
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Structurally invalid frame or payload
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Function code / role combination the codec does not know
    #[error("Unsupported function code: 0x{code:02X} ({})", direction_name(.response))]
    UnsupportedFunction { code: u8, response: bool },

    /// Trailing CRC does not match the computed one
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// `byteCount` disagrees with `quantity`
    #[error("Byte count mismatch: quantity={quantity} requires {expected} bytes, got {actual}")]
    ByteCountMismatch {
        quantity: u16,
        expected: usize,
        actual: usize,
    },

    /// A buffer or payload would exceed its capacity
    #[error("Capacity exceeded: need {needed} bytes, capacity {capacity}")]
    Overflow { needed: usize, capacity: usize },

    /// Index outside of a value view
    #[error("Index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    /// Station id outside of 1..=247
    #[error("Invalid station id: {station}")]
    InvalidStation { station: u8 },

    /// Transmission refused by the half-duplex gate
    #[error("Transmit blocked: {reason}")]
    TransmitBlocked { reason: String },

    /// The peer answered with a diagnose payload
    #[error("Modbus exception: function=0x{function:02X}, code={code}")]
    Exception { function: u8, code: DiagnoseCode },

    /// A request ended in a reception failure (including response timeout)
    #[error("Reception failed: {kind}")]
    Failed { kind: FailType },

    /// A register bank access failed
    #[error("Register access at address {address} failed: {code}")]
    Store { address: u16, code: DiagnoseCode },

    /// Operation not applicable to the payload variant
    #[error("Operation '{operation}' not supported for function 0x{function:02X}")]
    InvalidOperation {
        operation: &'static str,
        function: u8,
    },

    /// Invalid link configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create an I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transmit-blocked error
    pub fn transmit_blocked<S: Into<String>>(reason: S) -> Self {
        Self::TransmitBlocked {
            reason: reason.into(),
        }
    }

    pub fn unsupported_function(code: u8, response: bool) -> Self {
        Self::UnsupportedFunction { code, response }
    }

    pub fn invalid_operation(operation: &'static str, function: u8) -> Self {
        Self::InvalidOperation {
            operation,
            function,
        }
    }

    /// Errors produced by the transport rather than by frame contents
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::TransmitBlocked { .. } | Self::Failed { .. }
        )
    }

    /// Errors caused by bytes received from (or destined for) the wire
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::Frame { .. }
                | Self::UnsupportedFunction { .. }
                | Self::CrcMismatch { .. }
                | Self::ByteCountMismatch { .. }
                | Self::Exception { .. }
        )
    }

    /// Map a decode error onto the framing failure it represents
    pub fn fail_type(&self) -> FailType {
        match self {
            Self::UnsupportedFunction { .. } => FailType::UnsupportedFunctionCode,
            Self::CrcMismatch { .. } => FailType::VerifyFailed,
            Self::Overflow { .. } => FailType::Overflow,
            Self::Failed { kind } => *kind,
            _ => FailType::Malformed,
        }
    }
}

fn direction_name(response: &bool) -> &'static str {
    if *response {
        "response"
    } else {
        "request"
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

// ============================================================================
// Framing failures
// ============================================================================

/// Receive-side failure kinds reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailType {
    /// Silence observed before the minimum ADU size was reached, or the
    /// master's response timeout elapsed
    Timedout,
    /// CRC mismatch on a completed frame
    VerifyFailed,
    /// Window buffer exhausted before silence
    Overflow,
    /// PDU decode rejected the function code
    UnsupportedFunctionCode,
    /// CRC passed but the PDU is truncated or carries trailing bytes
    Malformed,
}

impl FailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timedout => "Timedout",
            Self::VerifyFailed => "Verify Failed",
            Self::Overflow => "Overflow",
            Self::UnsupportedFunctionCode => "Invalid Function Code",
            Self::Malformed => "Malformed",
        }
    }
}

impl fmt::Display for FailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Exception codes
// ============================================================================

/// Exception code carried in a diagnose payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnoseCode {
    InvalidFunctionCode,
    InvalidDataAddress,
    InvalidDataValue,
    SlaveDeviceFault,
    SlaveExecuting,
    SlaveBusy,
    CrcFailed,
    BadGateway,
    SlaveNoResponse,
    /// Any other non-zero code received from a peer
    Other(u8),
}

impl DiagnoseCode {
    /// Convert a raw code. `0` means success and has no variant.
    pub fn from_u8(code: u8) -> Option<Self> {
        let code = match code {
            0x00 => return None,
            0x01 => Self::InvalidFunctionCode,
            0x02 => Self::InvalidDataAddress,
            0x03 => Self::InvalidDataValue,
            0x04 => Self::SlaveDeviceFault,
            0x05 => Self::SlaveExecuting,
            0x06 => Self::SlaveBusy,
            0x08 => Self::CrcFailed,
            0x0A => Self::BadGateway,
            0x0B => Self::SlaveNoResponse,
            other => Self::Other(other),
        };
        Some(code)
    }

    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::InvalidFunctionCode => 0x01,
            Self::InvalidDataAddress => 0x02,
            Self::InvalidDataValue => 0x03,
            Self::SlaveDeviceFault => 0x04,
            Self::SlaveExecuting => 0x05,
            Self::SlaveBusy => 0x06,
            Self::CrcFailed => 0x08,
            Self::BadGateway => 0x0A,
            Self::SlaveNoResponse => 0x0B,
            Self::Other(code) => *code,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidFunctionCode => "Illegal Function",
            Self::InvalidDataAddress => "Illegal Data Address",
            Self::InvalidDataValue => "Illegal Data Value",
            Self::SlaveDeviceFault => "Slave Device Failure",
            Self::SlaveExecuting => "Acknowledge",
            Self::SlaveBusy => "Slave Device Busy",
            Self::CrcFailed => "Memory Parity Error",
            Self::BadGateway => "Gateway Path Unavailable",
            Self::SlaveNoResponse => "Gateway Target Device Failed to Respond",
            Self::Other(_) => "Unknown Exception",
        }
    }
}

impl fmt::Display for DiagnoseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.as_u8())
    }
}
