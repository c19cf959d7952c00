//! Async poll loops on top of the non-blocking role controllers
//!
//! The controllers never block; these helpers call `update()` on a tokio
//! interval. Controllers built on [`MemoryPort`](crate::MemoryPort) or
//! [`ManualClock`](crate::ManualClock) are not `Send`, so run the futures on
//! the current task (or a `LocalSet`) rather than spawning them.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::checksum::Checksum;
use crate::clock::Clock;
use crate::constants::BROADCAST_STATION;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::Frame;
use crate::link::{Event, LinkStats};
use crate::master::Master;
use crate::pdu::Payload;
use crate::slave::Slave;
use crate::store::RegisterStore;
use crate::transport::Transport;

/// Serve requests from `store` until `shutdown` turns true or its sender is
/// dropped. Returns the slave's statistics.
pub async fn run_slave<T, K, C>(
    slave: &mut Slave<T, K, C>,
    store: &mut RegisterStore,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> ModbusResult<LinkStats>
where
    T: Transport,
    K: Clock,
    C: Checksum,
{
    info!(
        "Slave {} serving, poll interval {:?}",
        slave.station(),
        poll_interval
    );
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if *shutdown.borrow() {
        return Ok(slave.stats());
    }
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(event) = slave.serve(store)? {
                    debug!("Slave {} event: {:?}", slave.station(), event);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let stats = slave.stats();
    info!(
        "Slave {} stopped: {} frames, {} failed, {} sent",
        slave.station(),
        stats.total_frames,
        stats.failed_frames,
        stats.transmitted_frames
    );
    Ok(stats)
}

/// Send `payload` to `station` and poll until the reply or the response
/// timeout.
///
/// A diagnose reply is returned as [`ModbusError::Exception`] and the
/// response timeout as [`ModbusError::Failed`]. Line noise and frames from
/// other stations are skipped while the master still waits. A broadcast
/// returns the sent frame without waiting.
pub async fn request<T, K, C>(
    master: &mut Master<T, K, C>,
    station: u8,
    payload: Payload,
    poll_interval: Duration,
) -> ModbusResult<Frame>
where
    T: Transport,
    K: Clock,
    C: Checksum,
{
    master.set_request(payload);
    master.transmit(station)?;
    if station == BROADCAST_STATION {
        return Ok(master.request().clone());
    }

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match master.update()? {
            Some(Event::Received(frame)) if frame.station != station => {
                debug!(
                    "Skipping frame from station {} while waiting for {}",
                    frame.station, station
                );
            }
            Some(Event::Received(frame)) => {
                return match frame.payload {
                    Payload::Diagnose(diagnose) => Err(ModbusError::Exception {
                        function: diagnose.function,
                        code: diagnose.code,
                    }),
                    _ => Ok(frame),
                };
            }
            Some(Event::Failed(failure)) if master.is_awaiting_response() => {
                debug!("Reception failed while waiting for {}: {}", station, failure.kind);
            }
            Some(Event::Failed(failure)) => {
                return Err(ModbusError::Failed { kind: failure.kind });
            }
            None => {}
        }
    }
}
