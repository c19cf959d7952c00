//! Plumbing shared by both roles
//!
//! [`RtuLink`] owns the transport, clock, checksum engine and receiver, and
//! turns raw receptions into [`Event`]s: CRC check on the raw ADU first, then
//! PDU decode. It also frames outbound envelopes and keeps statistics.

use tracing::{debug, warn};

use crate::checksum::{Checksum, ModbusCrc};
use crate::clock::{Clock, MonotonicClock};
use crate::config::LinkConfig;
use crate::error::{FailType, ModbusResult};
use crate::frame::{format_hex_packet, Frame, FrameKind};
use crate::receiver::{FrameReceiver, ReceiveState, Reception};
use crate::transport::Transport;

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Completed receptions, good or bad (includes response timeouts)
    pub total_frames: u64,
    /// Receptions that produced a [`Failure`]
    pub failed_frames: u64,
    pub transmitted_frames: u64,
}

impl LinkStats {
    /// Share of failed receptions, 0.0 when nothing was received
    pub fn failure_rate(&self) -> f64 {
        if self.total_frames == 0 {
            0.0
        } else {
            self.failed_frames as f64 / self.total_frames as f64
        }
    }
}

/// A failed reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailType,
    /// Station byte of the offending frame, when one was received
    pub station: Option<u8>,
    /// Function code byte of the offending frame, when one was received
    pub function: Option<u8>,
}

impl Failure {
    pub fn new(kind: FailType) -> Self {
        Self {
            kind,
            station: None,
            function: None,
        }
    }

    fn from_adu(kind: FailType, adu: &[u8]) -> Self {
        Self {
            kind,
            station: adu.first().copied(),
            function: adu.get(1).copied(),
        }
    }
}

/// Something the host should know about after an `update()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Received(Frame),
    Failed(Failure),
}

/// Transport, timing and framing for one RS-485 port
pub struct RtuLink<T, K = MonotonicClock, C = ModbusCrc> {
    transport: T,
    clock: K,
    checksum: C,
    config: LinkConfig,
    receiver: FrameReceiver,
    stats: LinkStats,
}

impl<T: Transport, K: Clock, C: Checksum> RtuLink<T, K, C> {
    pub fn new(transport: T, clock: K, checksum: C, config: LinkConfig) -> ModbusResult<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            clock,
            checksum,
            receiver: FrameReceiver::from_config(&config),
            config,
            stats: LinkStats::default(),
        })
    }

    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now_micros()
    }

    /// Microseconds since `since`, zero if the clock is behind
    #[inline]
    pub fn elapsed_since(&self, since: u64) -> u64 {
        self.now().saturating_sub(since)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: LinkConfig) -> ModbusResult<()> {
        config.validate()?;
        self.receiver = FrameReceiver::from_config(&config);
        self.config = config;
        Ok(())
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats = LinkStats::default();
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn receive_state(&self) -> ReceiveState {
        self.receiver.state()
    }

    pub fn reset_receiver(&mut self) {
        self.receiver.reset();
    }

    pub(crate) fn record_failure(&mut self, failure: Failure) -> Event {
        self.stats.total_frames += 1;
        self.stats.failed_frames += 1;
        warn!(
            "Receive failed: {} (station={:?}, fc={:?})",
            failure.kind, failure.station, failure.function
        );
        Event::Failed(failure)
    }

    /// Poll the receiver and decode a completed frame.
    pub fn receive(&mut self, kind: FrameKind) -> Option<Event> {
        let now = self.clock.now_micros();
        match self.receiver.poll(&mut self.transport, now)? {
            Reception::Frame(adu) => Some(self.decode_adu(&adu, kind)),
            Reception::Failed(fail) => Some(self.record_failure(Failure::new(fail))),
        }
    }

    fn decode_adu(&mut self, adu: &[u8], kind: FrameKind) -> Event {
        debug!("RX {}", format_hex_packet(adu));
        if let Err(e) = Frame::check_raw_crc(adu, &mut self.checksum) {
            debug!("Discarding frame: {}", e);
            return self.record_failure(Failure::from_adu(FailType::VerifyFailed, adu));
        }
        match Frame::decode(adu, kind) {
            Ok(frame) => {
                self.stats.total_frames += 1;
                Event::Received(frame)
            }
            Err(e) => {
                debug!("Frame decode failed: {}", e);
                self.record_failure(Failure::from_adu(e.fail_type(), adu))
            }
        }
    }

    /// Seal `frame` with a fresh CRC and write it between driver enable/disable.
    pub fn send(&mut self, frame: &mut Frame) -> ModbusResult<()> {
        let bytes = frame.seal(&mut self.checksum)?;
        self.transport.begin_transmission()?;
        let written = self.transport.write(&bytes);
        let ended = self.transport.end_transmission();
        written?;
        ended?;
        self.stats.transmitted_frames += 1;
        debug!("TX {}", format_hex_packet(&bytes));
        Ok(())
    }
}
