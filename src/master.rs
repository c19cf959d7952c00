//! Master role controller
//!
//! The master owns no station id. After a unicast transmit it waits for a
//! reply and refuses further transmits until a frame arrives or the response
//! timeout elapses. Retrying is left to the caller.

use tracing::{debug, warn};

use crate::checksum::{Checksum, ModbusCrc};
use crate::clock::{Clock, MonotonicClock};
use crate::config::LinkConfig;
use crate::constants::{BROADCAST_STATION, MASTER_STATION};
use crate::error::{FailType, ModbusError, ModbusResult};
use crate::frame::{Frame, FrameKind};
use crate::link::{Event, Failure, LinkStats, RtuLink};
use crate::pdu::{FunctionCode, Payload};
use crate::transport::Transport;

/// Deferred transmission scheduled by [`Master::transmit_on_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTransmit {
    station: u8,
    scheduled_at: u64,
}

pub struct Master<T, K = MonotonicClock, C = ModbusCrc> {
    link: RtuLink<T, K, C>,
    request: Frame,
    awaiting_response: bool,
    wait_started_at: u64,
    last_target: Option<u8>,
    pending: Option<PendingTransmit>,
}

impl<T: Transport> Master<T> {
    /// Master on `transport` using the system clock
    pub fn new(transport: T, config: LinkConfig) -> ModbusResult<Self> {
        Self::with_parts(transport, MonotonicClock::new(), ModbusCrc::new(), config)
    }
}

impl<T: Transport, K: Clock, C: Checksum> Master<T, K, C> {
    pub fn with_parts(transport: T, clock: K, checksum: C, config: LinkConfig) -> ModbusResult<Self> {
        Ok(Self {
            link: RtuLink::new(transport, clock, checksum, config)?,
            request: Frame::new(MASTER_STATION, Payload::new_request(FunctionCode::ReadHoldingRegisters)),
            awaiting_response: false,
            wait_started_at: 0,
            last_target: None,
            pending: None,
        })
    }

    // ------------------------------------------------------------------------
    // Request envelope
    // ------------------------------------------------------------------------

    /// Reset the outgoing envelope to a zeroed request and return its payload
    pub fn create_request(&mut self, function: FunctionCode) -> &mut Payload {
        self.request.create_request(function);
        &mut self.request.payload
    }

    /// Replace the outgoing payload
    pub fn set_request(&mut self, payload: Payload) {
        self.request.payload = payload;
    }

    /// Last request prepared or sent
    pub fn request(&self) -> &Frame {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Payload {
        &mut self.request.payload
    }

    // ------------------------------------------------------------------------
    // Transmit gating
    // ------------------------------------------------------------------------

    #[inline]
    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    fn response_timed_out(&self) -> bool {
        self.link.elapsed_since(self.wait_started_at) > self.link.config().response_timeout_us
    }

    /// False while a reply is outstanding and the timeout has not elapsed
    pub fn available_to_transmit(&self) -> bool {
        !self.awaiting_response || self.response_timed_out()
    }

    /// Send the prepared request to `station` now.
    ///
    /// Unicast requests arm the response wait; broadcasts (station 0) do not.
    pub fn transmit(&mut self, station: u8) -> ModbusResult<()> {
        if !self.available_to_transmit() {
            return Err(ModbusError::transmit_blocked(format!(
                "awaiting response from station {}",
                self.last_target.unwrap_or(BROADCAST_STATION)
            )));
        }
        self.request.station = station;
        self.link.send(&mut self.request)?;
        self.last_target = Some(station);
        self.awaiting_response = station != BROADCAST_STATION;
        self.wait_started_at = self.link.now();
        debug!(
            "Request sent to station {}: FC={:02X}",
            station,
            self.request.function_code()
        );
        Ok(())
    }

    /// Send the prepared request to `station` from a later `update()`, once
    /// the send-back delay has passed and no reply is outstanding.
    pub fn transmit_on_update(&mut self, station: u8) {
        self.pending = Some(PendingTransmit {
            station,
            scheduled_at: self.link.now(),
        });
    }

    #[inline]
    pub fn has_pending_transmit(&self) -> bool {
        self.pending.is_some()
    }

    /// Station the last request was sent to
    pub fn last_target(&self) -> Option<u8> {
        self.last_target
    }

    /// Drop the response wait, any deferred transmit and any partial frame
    pub fn reset(&mut self) {
        self.awaiting_response = false;
        self.pending = None;
        self.link.reset_receiver();
    }

    // ------------------------------------------------------------------------
    // Poll loop
    // ------------------------------------------------------------------------

    /// One non-blocking cycle: deferred send, receive, response timeout.
    pub fn update(&mut self) -> ModbusResult<Option<Event>> {
        if let Some(pending) = self.pending {
            let delay_done = self.link.elapsed_since(pending.scheduled_at)
                > self.link.config().send_back_delay_us;
            if delay_done && self.available_to_transmit() {
                self.pending = None;
                self.transmit(pending.station)?;
            }
        }

        if let Some(event) = self.link.receive(FrameKind::Response) {
            if let Event::Received(frame) = &event {
                // only the addressed station can end the wait
                if self.awaiting_response && Some(frame.station) != self.last_target {
                    warn!(
                        "Response from station {} while waiting for {:?}",
                        frame.station, self.last_target
                    );
                } else {
                    self.awaiting_response = false;
                }
            }
            return Ok(Some(event));
        }

        if self.awaiting_response && self.response_timed_out() {
            self.awaiting_response = false;
            let failure = Failure {
                kind: FailType::Timedout,
                station: self.last_target,
                function: Some(self.request.function_code()),
            };
            return Ok(Some(self.link.record_failure(failure)));
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> LinkStats {
        self.link.stats()
    }

    pub fn clear_stats(&mut self) {
        self.link.clear_stats();
    }

    pub fn config(&self) -> &LinkConfig {
        self.link.config()
    }

    pub fn set_config(&mut self, config: LinkConfig) -> ModbusResult<()> {
        self.link.set_config(config)
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }
}
