//! Silence-delimited frame receiver
//!
//! RTU frames carry no length field. A frame starts with the first byte seen
//! in [`ReceiveState::WaitStation`] and ends once the line has been quiet for
//! longer than the silence interval. [`FrameReceiver::poll`] never blocks: it
//! drains whatever the transport holds, then checks the silence condition
//! once against the supplied timestamp.

use tracing::{debug, trace, warn};

use crate::config::LinkConfig;
use crate::error::FailType;
use crate::transport::Transport;

/// Receiver position within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    /// Idle; the next byte starts a new frame
    #[default]
    WaitStation,
    WaitFunctionCode,
    WaitData,
}

/// Outcome of a completed reception
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    /// Raw ADU, CRC not yet checked
    Frame(Vec<u8>),
    Failed(FailType),
}

/// Framing state machine with a fixed-capacity window buffer
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    state: ReceiveState,
    buffer: Vec<u8>,
    capacity: usize,
    silence_us: u64,
    last_byte_at: u64,
    /// Set after an overflow: bytes are dropped until the line goes quiet
    discarding: bool,
}

impl FrameReceiver {
    pub fn new(capacity: usize, silence_us: u64) -> Self {
        Self {
            state: ReceiveState::WaitStation,
            buffer: Vec::with_capacity(capacity),
            capacity,
            silence_us,
            last_byte_at: 0,
            discarding: false,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.max_adu_size, config.silence_us)
    }

    #[inline]
    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Bytes accumulated for the frame in progress
    #[inline]
    pub fn received(&self) -> &[u8] {
        &self.buffer
    }

    /// Timestamp of the most recent byte
    #[inline]
    pub fn last_byte_at(&self) -> u64 {
        self.last_byte_at
    }

    /// A frame is in progress or trailing bytes are being discarded
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.state != ReceiveState::WaitStation || self.discarding
    }

    pub fn set_silence_interval(&mut self, silence_us: u64) {
        self.silence_us = silence_us;
    }

    /// Drop any partial frame and return to idle
    pub fn reset(&mut self) {
        self.state = ReceiveState::WaitStation;
        self.buffer.clear();
        self.discarding = false;
    }

    /// Drain available bytes, then check for end of frame.
    ///
    /// Returns at most one event per call. An overflow is reported as soon as
    /// the buffer fills; the rest of that burst is discarded.
    pub fn poll<T: Transport + ?Sized>(&mut self, transport: &mut T, now: u64) -> Option<Reception> {
        let mut event = None;

        while let Some(byte) = transport.read() {
            self.last_byte_at = now;
            if self.discarding {
                continue;
            }
            if self.push(byte) {
                warn!(
                    "Receive overflow: {} bytes without silence (capacity {})",
                    self.buffer.len(),
                    self.capacity
                );
                self.reset();
                self.discarding = true;
                event = Some(Reception::Failed(FailType::Overflow));
            }
        }

        if event.is_some() {
            return event;
        }
        self.check_silence(now)
    }

    /// Append one byte; returns true when the window is full.
    fn push(&mut self, byte: u8) -> bool {
        self.state = match self.state {
            ReceiveState::WaitStation => {
                self.buffer.clear();
                ReceiveState::WaitFunctionCode
            }
            ReceiveState::WaitFunctionCode | ReceiveState::WaitData => ReceiveState::WaitData,
        };
        self.buffer.push(byte);
        self.buffer.len() >= self.capacity
    }

    fn check_silence(&mut self, now: u64) -> Option<Reception> {
        if !self.is_busy() || now.saturating_sub(self.last_byte_at) <= self.silence_us {
            return None;
        }
        if self.discarding {
            trace!("Line quiet after overflow, receiver idle");
            self.discarding = false;
            return None;
        }

        self.state = ReceiveState::WaitStation;
        if self.buffer.len() < crate::constants::MIN_ADU_SIZE {
            debug!(
                "Frame ended after {} bytes, below minimum ADU size",
                self.buffer.len()
            );
            self.buffer.clear();
            return Some(Reception::Failed(FailType::Timedout));
        }
        trace!("Frame complete: {} bytes", self.buffer.len());
        Some(Reception::Frame(std::mem::take(&mut self.buffer)))
    }
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::from_config(&LinkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryPort;

    const SILENCE: u64 = 100;

    fn receiver() -> (FrameReceiver, MemoryPort) {
        (FrameReceiver::new(16, SILENCE), MemoryPort::new())
    }

    #[test]
    fn test_state_progression() {
        let (mut rx, mut port) = receiver();
        assert_eq!(rx.state(), ReceiveState::WaitStation);
        port.push_incoming(&[0x05]);
        assert_eq!(rx.poll(&mut port, 0), None);
        assert_eq!(rx.state(), ReceiveState::WaitFunctionCode);
        port.push_incoming(&[0x03, 0x00]);
        assert_eq!(rx.poll(&mut port, 10), None);
        assert_eq!(rx.state(), ReceiveState::WaitData);
        assert_eq!(rx.received(), &[0x05, 0x03, 0x00]);
    }

    #[test]
    fn test_frame_completes_after_silence() {
        let (mut rx, mut port) = receiver();
        port.push_incoming(&[1, 3, 0, 0, 0, 1, 0x84, 0x0A]);
        assert_eq!(rx.poll(&mut port, 1_000), None);
        // exactly the silence interval is not enough
        assert_eq!(rx.poll(&mut port, 1_000 + SILENCE), None);
        assert_eq!(
            rx.poll(&mut port, 1_000 + SILENCE + 1),
            Some(Reception::Frame(vec![1, 3, 0, 0, 0, 1, 0x84, 0x0A]))
        );
        assert_eq!(rx.state(), ReceiveState::WaitStation);
        assert_eq!(rx.poll(&mut port, 10_000), None);
    }

    #[test]
    fn test_short_gaps_keep_frame_open() {
        let (mut rx, mut port) = receiver();
        let mut now = 0;
        for byte in [1u8, 3, 0, 0, 0, 1, 0x84, 0x0A] {
            port.push_incoming(&[byte]);
            assert_eq!(rx.poll(&mut port, now), None);
            now += SILENCE;
        }
        assert_eq!(rx.received().len(), 8);
        assert!(matches!(rx.poll(&mut port, now + 1), Some(Reception::Frame(_))));
    }

    #[test]
    fn test_three_bytes_then_stall_times_out() {
        let (mut rx, mut port) = receiver();
        port.push_incoming(&[1, 3, 0]);
        assert_eq!(rx.poll(&mut port, 0), None);
        assert_eq!(
            rx.poll(&mut port, SILENCE + 1),
            Some(Reception::Failed(FailType::Timedout))
        );
        assert!(rx.received().is_empty());
    }

    #[test]
    fn test_overflow_then_discard_until_silence() {
        let (mut rx, mut port) = receiver();
        port.push_incoming(&[0xAA; 40]);
        assert_eq!(
            rx.poll(&mut port, 0),
            Some(Reception::Failed(FailType::Overflow))
        );
        // trailing bytes of the same burst are dropped
        port.push_incoming(&[0xBB; 4]);
        assert_eq!(rx.poll(&mut port, 50), None);
        assert!(rx.is_busy());
        assert_eq!(rx.poll(&mut port, 50 + SILENCE + 1), None);
        assert!(!rx.is_busy());

        // next frame is received normally
        port.push_incoming(&[1, 2, 3, 4]);
        rx.poll(&mut port, 1_000);
        assert_eq!(
            rx.poll(&mut port, 1_000 + SILENCE + 1),
            Some(Reception::Frame(vec![1, 2, 3, 4]))
        );
    }

    #[test]
    fn test_new_frame_resets_buffer() {
        let (mut rx, mut port) = receiver();
        port.push_incoming(&[9, 9]);
        rx.poll(&mut port, 0);
        assert_eq!(
            rx.poll(&mut port, SILENCE + 1),
            Some(Reception::Failed(FailType::Timedout))
        );
        port.push_incoming(&[1, 2, 3, 4, 5]);
        rx.poll(&mut port, 500);
        assert_eq!(rx.received(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_reset() {
        let (mut rx, mut port) = receiver();
        port.push_incoming(&[1, 2]);
        rx.poll(&mut port, 0);
        rx.reset();
        assert_eq!(rx.state(), ReceiveState::WaitStation);
        assert_eq!(rx.poll(&mut port, 1_000), None);
    }
}
