//! Byte transport seen by the RTU engine
//!
//! The engine never owns the UART. It reads single bytes while polling and
//! writes whole frames between `begin_transmission()` and
//! `end_transmission()`, which toggle the RS-485 driver enable.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

use crate::error::{ModbusError, ModbusResult};

/// Non-blocking half-duplex byte stream
pub trait Transport {
    /// Number of bytes that can be read without blocking
    fn available(&mut self) -> usize;

    /// Read one byte, `None` when nothing is pending
    fn read(&mut self) -> Option<u8>;

    /// Write bytes; only valid between begin and end of a transmission
    fn write(&mut self, bytes: &[u8]) -> ModbusResult<()>;

    /// Switch the line driver to transmit
    fn begin_transmission(&mut self) -> ModbusResult<()>;

    /// Flush and switch back to receive
    fn end_transmission(&mut self) -> ModbusResult<()>;
}

/// Line direction of a half-duplex port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Receive,
    Transmit,
}

type Queue = Rc<RefCell<VecDeque<u8>>>;

// ============================================================================
// In-memory port
// ============================================================================

/// In-memory endpoint for simulation and tests
///
/// Endpoints created with [`MemoryPort::pair`] are cross-connected: bytes
/// written by one become readable by the other.
#[derive(Debug, Default)]
pub struct MemoryPort {
    incoming: Queue,
    outgoing: Queue,
    direction: Direction,
    transmissions: usize,
}

impl MemoryPort {
    /// Standalone endpoint; feed it with [`push_incoming`](Self::push_incoming)
    pub fn new() -> Self {
        Self::default()
    }

    /// Two endpoints wired back to back
    pub fn pair() -> (Self, Self) {
        let a_to_b: Queue = Rc::default();
        let b_to_a: Queue = Rc::default();
        let a = Self {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
            ..Self::default()
        };
        let b = Self {
            incoming: a_to_b,
            outgoing: b_to_a,
            ..Self::default()
        };
        (a, b)
    }

    /// Make bytes available for reading
    pub fn push_incoming(&self, bytes: &[u8]) {
        self.incoming.borrow_mut().extend(bytes.iter().copied());
    }

    /// Take everything written so far
    pub fn drain_outgoing(&self) -> Vec<u8> {
        self.outgoing.borrow_mut().drain(..).collect()
    }

    /// Bytes written but not yet consumed by the peer
    pub fn pending_outgoing(&self) -> usize {
        self.outgoing.borrow().len()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Completed begin/end transmission cycles
    pub fn transmissions(&self) -> usize {
        self.transmissions
    }
}

impl Transport for MemoryPort {
    fn available(&mut self) -> usize {
        self.incoming.borrow().len()
    }

    fn read(&mut self) -> Option<u8> {
        self.incoming.borrow_mut().pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        if self.direction != Direction::Transmit {
            return Err(ModbusError::transmit_blocked(
                "write while line driver is disabled",
            ));
        }
        self.outgoing.borrow_mut().extend(bytes.iter().copied());
        Ok(())
    }

    fn begin_transmission(&mut self) -> ModbusResult<()> {
        trace!("memory port: driver enable");
        self.direction = Direction::Transmit;
        Ok(())
    }

    fn end_transmission(&mut self) -> ModbusResult<()> {
        trace!("memory port: receiver enable");
        if self.direction == Direction::Transmit {
            self.transmissions += 1;
        }
        self.direction = Direction::Receive;
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn available(&mut self) -> usize {
        (**self).available()
    }

    fn read(&mut self) -> Option<u8> {
        (**self).read()
    }

    fn write(&mut self, bytes: &[u8]) -> ModbusResult<()> {
        (**self).write(bytes)
    }

    fn begin_transmission(&mut self) -> ModbusResult<()> {
        (**self).begin_transmission()
    }

    fn end_transmission(&mut self) -> ModbusResult<()> {
        (**self).end_transmission()
    }
}

// ============================================================================
// Serial port (RTU)
// ============================================================================

#[cfg(feature = "rtu")]
pub use serial::{DirectionControl, SerialTransport};

#[cfg(feature = "rtu")]
mod serial {
    use std::io::{Read, Write};
    use std::time::Duration;

    use tokio_serial::{DataBits, Parity, SerialPort, StopBits};
    use tracing::{debug, warn};

    use super::Transport;
    use crate::error::{ModbusError, ModbusResult};

    /// How the RS-485 driver enable line is switched
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum DirectionControl {
        /// Transceiver switches on its own (auto-direction adapters)
        #[default]
        Automatic,
        /// Driver enable wired to RTS
        Rts { active_high: bool },
    }

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
        direction: DirectionControl,
    }

    impl SerialTransport {
        /// Open `path` at `baud_rate`, 8N1
        pub fn open(
            path: &str,
            baud_rate: u32,
            direction: DirectionControl,
        ) -> ModbusResult<Self> {
            Self::open_with(path, baud_rate, Parity::None, direction)
        }

        pub fn open_with(
            path: &str,
            baud_rate: u32,
            parity: Parity,
            direction: DirectionControl,
        ) -> ModbusResult<Self> {
            let stop_bits = if parity == Parity::None {
                StopBits::Two
            } else {
                StopBits::One
            };
            let port = tokio_serial::new(path, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(parity)
                .stop_bits(stop_bits)
                .timeout(Duration::from_millis(1))
                .open()
                .map_err(|e| ModbusError::io(format!("Failed to open {}: {}", path, e)))?;
            debug!("Opened serial port {} at {} baud", path, baud_rate);

            let mut transport = Self { port, direction };
            transport.set_driver(false)?;
            Ok(transport)
        }

        fn set_driver(&mut self, enabled: bool) -> ModbusResult<()> {
            if let DirectionControl::Rts { active_high } = self.direction {
                self.port
                    .write_request_to_send(enabled == active_high)
                    .map_err(|e| ModbusError::io(format!("RTS toggle failed: {}", e)))?;
            }
            Ok(())
        }
    }

    impl Transport for SerialTransport {
        fn available(&mut self) -> usize {
            match self.port.bytes_to_read() {
                Ok(n) => n as usize,
                Err(e) => {
                    warn!("serial bytes_to_read failed: {}", e);
                    0
                }
            }
        }

        fn read(&mut self) -> Option<u8> {
            if self.available() == 0 {
                return None;
            }
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(1) => Some(byte[0]),
                Ok(_) => None,
                Err(e) => {
                    warn!("serial read failed: {}", e);
                    None
                }
            }
        }

        fn write(&mut self, bytes: &[u8]) -> ModbusResult<()> {
            self.port.write_all(bytes)?;
            Ok(())
        }

        fn begin_transmission(&mut self) -> ModbusResult<()> {
            self.set_driver(true)
        }

        fn end_transmission(&mut self) -> ModbusResult<()> {
            self.port.flush()?;
            self.set_driver(false)
        }
    }
}
