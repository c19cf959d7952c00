//! Slave role controller
//!
//! A slave may transmit exactly once per request addressed to it. The
//! permission is granted when such a request completes reception (including
//! requests the dispatcher later rejects) and withdrawn by the transmit.

use tracing::{debug, warn};

use crate::checksum::{Checksum, ModbusCrc};
use crate::clock::{Clock, MonotonicClock};
use crate::config::LinkConfig;
use crate::constants::{BROADCAST_STATION, MAX_SLAVE_STATION, MIN_SLAVE_STATION};
use crate::error::{DiagnoseCode, FailType, ModbusError, ModbusResult};
use crate::frame::{Frame, FrameKind};
use crate::link::{Event, LinkStats, RtuLink};
use crate::pdu::{FunctionCode, Payload};
use crate::store::RegisterStore;
use crate::transport::Transport;

/// Check a slave station id is in 1..=247
pub fn validate_station(station: u8) -> ModbusResult<()> {
    if !(MIN_SLAVE_STATION..=MAX_SLAVE_STATION).contains(&station) {
        return Err(ModbusError::InvalidStation { station });
    }
    Ok(())
}

pub struct Slave<T, K = MonotonicClock, C = ModbusCrc> {
    link: RtuLink<T, K, C>,
    station: u8,
    response: Frame,
    allowed_to_transmit: bool,
    /// Timestamp a deferred reply was scheduled at
    pending_since: Option<u64>,
}

impl<T: Transport> Slave<T> {
    /// Slave answering as `station` on `transport`, using the system clock
    pub fn new(transport: T, station: u8, config: LinkConfig) -> ModbusResult<Self> {
        Self::with_parts(transport, MonotonicClock::new(), ModbusCrc::new(), station, config)
    }
}

impl<T: Transport, K: Clock, C: Checksum> Slave<T, K, C> {
    pub fn with_parts(
        transport: T,
        clock: K,
        checksum: C,
        station: u8,
        config: LinkConfig,
    ) -> ModbusResult<Self> {
        validate_station(station)?;
        Ok(Self {
            link: RtuLink::new(transport, clock, checksum, config)?,
            station,
            response: Frame::new(station, Payload::new_response(FunctionCode::ReadHoldingRegisters)),
            allowed_to_transmit: false,
            pending_since: None,
        })
    }

    #[inline]
    pub fn station(&self) -> u8 {
        self.station
    }

    /// Change the station id; 0 and values above 247 are rejected
    pub fn set_station(&mut self, station: u8) -> ModbusResult<()> {
        validate_station(station)?;
        self.station = station;
        self.response.station = station;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Response envelope
    // ------------------------------------------------------------------------

    /// Reset the outgoing envelope to a zeroed response and return its payload
    pub fn create_response(&mut self, function: FunctionCode) -> &mut Payload {
        self.response.create_response(function);
        &mut self.response.payload
    }

    /// Reset the outgoing envelope to a diagnose for `function`
    pub fn create_diagnose(&mut self, function: u8, code: DiagnoseCode) {
        self.response.create_diagnose(function, code);
    }

    pub fn set_response(&mut self, payload: Payload) {
        self.response.payload = payload;
    }

    pub fn response(&self) -> &Frame {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Payload {
        &mut self.response.payload
    }

    // ------------------------------------------------------------------------
    // Transmit gating
    // ------------------------------------------------------------------------

    #[inline]
    pub fn is_allowed_to_transmit(&self) -> bool {
        self.allowed_to_transmit
    }

    /// Send the prepared response now, consuming the reply permission
    pub fn transmit(&mut self) -> ModbusResult<()> {
        if !self.allowed_to_transmit {
            return Err(ModbusError::transmit_blocked(
                "no request awaiting a reply",
            ));
        }
        self.allowed_to_transmit = false;
        self.pending_since = None;
        self.response.station = self.station;
        self.link.send(&mut self.response)?;
        debug!(
            "Reply sent from station {}: FC={:02X}",
            self.station,
            self.response.function_code()
        );
        Ok(())
    }

    /// Send the prepared response from a later `update()` once the
    /// send-back delay has passed
    pub fn transmit_on_update(&mut self) -> ModbusResult<()> {
        if !self.allowed_to_transmit {
            return Err(ModbusError::transmit_blocked(
                "no request awaiting a reply",
            ));
        }
        self.pending_since = Some(self.link.now());
        Ok(())
    }

    #[inline]
    pub fn has_pending_transmit(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Withdraw the reply permission, any deferred reply and any partial frame
    pub fn reset(&mut self) {
        self.allowed_to_transmit = false;
        self.pending_since = None;
        self.link.reset_receiver();
    }

    // ------------------------------------------------------------------------
    // Poll loop
    // ------------------------------------------------------------------------

    /// One non-blocking cycle: deferred reply, then receive.
    ///
    /// Requests for other stations are dropped. Broadcast requests are
    /// delivered without reply permission.
    pub fn update(&mut self) -> ModbusResult<Option<Event>> {
        if let Some(since) = self.pending_since {
            if self.link.elapsed_since(since) > self.link.config().send_back_delay_us {
                self.transmit()?;
            }
        }

        let event = match self.link.receive(FrameKind::Request) {
            Some(event) => event,
            None => return Ok(None),
        };

        match &event {
            Event::Received(frame) if frame.station == self.station => {
                self.grant_reply();
            }
            Event::Received(frame) if frame.station == BROADCAST_STATION => {
                debug!("Broadcast request FC={:02X}", frame.function_code());
            }
            Event::Received(frame) => {
                debug!("Ignoring frame for station {}", frame.station);
                return Ok(None);
            }
            Event::Failed(failure) if failure.station == Some(self.station) => {
                if matches!(
                    failure.kind,
                    FailType::UnsupportedFunctionCode | FailType::Malformed
                ) {
                    self.grant_reply();
                }
            }
            Event::Failed(failure)
                if failure.station.is_some()
                    && matches!(
                        failure.kind,
                        FailType::UnsupportedFunctionCode | FailType::Malformed
                    ) =>
            {
                debug!("Ignoring malformed frame for station {:?}", failure.station);
                return Ok(None);
            }
            Event::Failed(_) => {}
        }
        Ok(Some(event))
    }

    fn grant_reply(&mut self) {
        if self.pending_since.take().is_some() {
            warn!("New request arrived before the deferred reply was sent; reply dropped");
        }
        self.allowed_to_transmit = true;
    }

    /// Run one `update()` and answer a request addressed to this station
    /// from `store`, replying after the send-back delay.
    ///
    /// Broadcast requests are applied to the store without a reply. Requests
    /// with an unknown function code get an `InvalidFunctionCode` diagnose,
    /// structurally malformed ones an `InvalidDataValue` diagnose.
    pub fn serve(&mut self, store: &mut RegisterStore) -> ModbusResult<Option<Event>> {
        let event = self.update()?;
        match &event {
            Some(Event::Received(frame)) if frame.station == BROADCAST_STATION => {
                let reply = store.process(frame);
                if let Payload::Diagnose(diagnose) = &reply.payload {
                    debug!(
                        "Broadcast FC={:02X} rejected: {}",
                        diagnose.function,
                        diagnose.code
                    );
                }
            }
            Some(Event::Received(frame)) if self.allowed_to_transmit => {
                self.response = store.process(frame);
                self.transmit_on_update()?;
            }
            Some(Event::Failed(failure)) if self.allowed_to_transmit => {
                let code = match failure.kind {
                    FailType::UnsupportedFunctionCode => DiagnoseCode::InvalidFunctionCode,
                    _ => DiagnoseCode::InvalidDataValue,
                };
                self.create_diagnose(failure.function.unwrap_or(0), code);
                self.transmit_on_update()?;
            }
            _ => {}
        }
        Ok(event)
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
