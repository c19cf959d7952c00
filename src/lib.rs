//! # RS-485 Modbus - Non-blocking Modbus RTU master/slave
//!
//! A Modbus RTU implementation for a single RS-485 half-duplex bus, built for
//! cooperative poll loops: nothing blocks, every role controller advances one
//! step per `update()` call.
//!
//! ## Features
//!
//! - **Silence-based framing**: 3.5 character times at the configured baud
//! - **Transmit gating**: the master waits for a reply or timeout, a slave
//!   replies once per request addressed to it
//! - **Register store**: four banks with externally bound cells, per-bank
//!   read/write hooks and a request dispatcher producing replies or
//!   exception (diagnose) responses
//! - **Pluggable seams**: [`Transport`], [`Clock`] and [`Checksum`] traits,
//!   with an in-memory port for tests and a serial port behind `rtu`
//! - **Async driver**: tokio poll loops behind the default `std` feature
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust
//! use rs485_modbus::pdu::AddressRange;
//! use rs485_modbus::{
//!     Event, LinkConfig, ManualClock, Master, MemoryPort, ModbusCrc, ModbusResult, Payload,
//!     RegisterStore, Slave, StoreLayout,
//! };
//!
//! fn main() -> ModbusResult<()> {
//!     let (master_port, slave_port) = MemoryPort::pair();
//!     let clock = ManualClock::new();
//!     let config = LinkConfig::new(9600);
//!
//!     let mut master = Master::with_parts(master_port, clock.clone(), ModbusCrc::new(), config)?;
//!     let mut slave = Slave::with_parts(slave_port, clock.clone(), ModbusCrc::new(), 5, config)?;
//!     let mut store = RegisterStore::new(StoreLayout::uniform(16));
//!     store.set_holding_register(0, 10).ok();
//!
//!     master.set_request(Payload::ReadHoldingRegisters(AddressRange::new(0, 1)));
//!     master.transmit(5)?;
//!
//!     let mut reply = None;
//!     while reply.is_none() {
//!         clock.advance(1_000);
//!         slave.serve(&mut store)?;
//!         if let Some(Event::Received(frame)) = master.update()? {
//!             reply = Some(frame);
//!         }
//!     }
//!     assert_eq!(reply.map(|f| f.payload.register(0)), Some(Ok(10)));
//!     Ok(())
//! }
//! ```

// ============================================================================
// Wire level
// ============================================================================

/// Error types, reception failure kinds and exception codes
pub mod error;

/// Modbus RTU protocol constants
pub mod constants;

/// CRC-16/MODBUS checksum engine
pub mod checksum;

/// Packed bit and register value sequences
pub mod value;

/// Function codes and payload codec
pub mod pdu;

/// RTU frame envelope (station, payload, CRC)
pub mod frame;

// ============================================================================
// Link level
// ============================================================================

/// Time source abstraction
pub mod clock;

/// Baud-derived link timing
pub mod config;

/// Byte transport over the half-duplex bus
pub mod transport;

/// Silence-based frame receiver
pub mod receiver;

/// Shared receive/send plumbing and statistics
pub mod link;

// ============================================================================
// Roles and data
// ============================================================================

/// Master role controller
pub mod master;

/// Slave role controller
pub mod slave;

/// Register banks and request dispatcher
pub mod store;

/// Async poll loops
#[cfg(feature = "std")]
pub mod driver;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Error handling ===
pub use error::{DiagnoseCode, FailType, ModbusError, ModbusResult};

// === Core types ===
pub use frame::{Frame, FrameKind};
pub use pdu::{FunctionCode, Payload};
pub use value::{BitValues, WordValues};

// === Link ===
pub use checksum::{Checksum, ModbusCrc};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::LinkConfig;
pub use link::{Event, Failure, LinkStats};
pub use transport::{MemoryPort, Transport};

// === Roles ===
pub use master::Master;
pub use slave::Slave;
pub use store::{RegisterStore, StoreLayout, WritePolicy};

#[cfg(feature = "rtu")]
pub use transport::{DirectionControl, SerialTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
