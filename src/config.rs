//! # Link Configuration
//!
//! Timing and sizing of one RS-485 link.
//!
//! ## Derived timing
//!
//! - **Silence interval**: 3.5 character times, one character being 11 bits
//!   on the wire. At 9600 baud this is `ceil(3.5 × 11 × 1e6 / 9600) = 4011 µs`.
//! - **Send-back delay**: turnaround guard of 80 silence intervals applied
//!   before deferred transmissions.
//! - **Response timeout**: how long a master waits for a reply. Never
//!   shorter than the silence interval.

use crate::constants::{
    BITS_PER_CHARACTER, DEFAULT_BAUD_RATE, DEFAULT_RESPONSE_TIMEOUT_MS, MAX_ADU_SIZE,
    MIN_ADU_SIZE, SEND_BACK_DELAY_FACTOR, SILENCE_CHARACTERS,
};
use crate::error::{ModbusError, ModbusResult};

/// Silence interval in microseconds for a given baud rate
///
/// Returns 0 for a baud rate of 0, which [`LinkConfig::validate`] rejects.
pub fn silence_interval_micros(baud_rate: u32) -> u64 {
    if baud_rate == 0 {
        return 0;
    }
    let bits = SILENCE_CHARACTERS * BITS_PER_CHARACTER as f64;
    (bits * 1_000_000.0 / baud_rate as f64).ceil() as u64
}

/// Link timing and sizing.
///
/// # Example
///
/// ```rust
/// use rs485_modbus::LinkConfig;
///
/// let config = LinkConfig::new(19_200).with_response_timeout(200_000);
///
/// assert_eq!(config.silence_us, 2006);
/// assert_eq!(config.send_back_delay_us, 2006 * 80);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Configured baud rate.
    pub baud_rate: u32,
    /// Inter-frame silence that terminates a frame (µs).
    pub silence_us: u64,
    /// Turnaround guard before a deferred transmit (µs).
    pub send_back_delay_us: u64,
    /// Master response timeout (µs).
    pub response_timeout_us: u64,
    /// Receive window capacity (bytes).
    pub max_adu_size: usize,
}

impl LinkConfig {
    /// Configuration derived from a baud rate.
    pub fn new(baud_rate: u32) -> Self {
        let silence_us = silence_interval_micros(baud_rate);
        Self {
            baud_rate,
            silence_us,
            send_back_delay_us: silence_us.saturating_mul(SEND_BACK_DELAY_FACTOR),
            response_timeout_us: (DEFAULT_RESPONSE_TIMEOUT_MS * 1_000).max(silence_us),
            max_adu_size: MAX_ADU_SIZE,
        }
    }

    /// Change the baud rate, re-deriving the silence interval and send-back delay.
    pub fn with_baud_rate(self, baud_rate: u32) -> Self {
        let response_timeout_us = self.response_timeout_us;
        let max_adu_size = self.max_adu_size;
        Self {
            max_adu_size,
            ..Self::new(baud_rate)
        }
        .with_response_timeout(response_timeout_us)
    }

    /// Override the silence interval.
    ///
    /// The send-back delay follows the new interval, and the response timeout
    /// is raised to at least the interval.
    pub fn with_silence_interval(mut self, micros: u64) -> Self {
        self.silence_us = micros;
        self.send_back_delay_us = micros.saturating_mul(SEND_BACK_DELAY_FACTOR);
        self.response_timeout_us = self.response_timeout_us.max(micros);
        self
    }

    /// Override the turnaround guard.
    pub fn with_send_back_delay(mut self, micros: u64) -> Self {
        self.send_back_delay_us = micros;
        self
    }

    /// Set the master response timeout, clamped to the silence interval.
    pub fn with_response_timeout(mut self, micros: u64) -> Self {
        self.response_timeout_us = micros.max(self.silence_us);
        self
    }

    /// Set the receive window capacity.
    pub fn with_max_adu_size(mut self, bytes: usize) -> Self {
        self.max_adu_size = bytes;
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("baud rate must be non-zero"));
        }
        if self.silence_us == 0 {
            return Err(ModbusError::configuration(
                "silence interval must be non-zero",
            ));
        }
        if self.max_adu_size < MIN_ADU_SIZE {
            return Err(ModbusError::configuration(format!(
                "max ADU size {} below minimum frame size {}",
                self.max_adu_size, MIN_ADU_SIZE
            )));
        }
        if self.response_timeout_us < self.silence_us {
            return Err(ModbusError::configuration(format!(
                "response timeout {}us shorter than silence interval {}us",
                self.response_timeout_us, self.silence_us
            )));
        }
        Ok(())
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.silence_us, 4011);
        assert_eq!(config.send_back_delay_us, 4011 * 80);
        assert_eq!(config.response_timeout_us, 1_000_000);
        assert_eq!(config.max_adu_size, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_silence_interval_scales_with_baud() {
        assert_eq!(silence_interval_micros(9600), 4011);
        assert_eq!(silence_interval_micros(19_200), 2006);
        assert_eq!(silence_interval_micros(115_200), 335);
        assert_eq!(silence_interval_micros(0), 0);
    }

    #[test]
    fn test_with_silence_interval_raises_timeout() {
        let config = LinkConfig::new(9600)
            .with_response_timeout(0)
            .with_silence_interval(10_000);
        assert_eq!(config.silence_us, 10_000);
        assert_eq!(config.send_back_delay_us, 800_000);
        assert_eq!(config.response_timeout_us, 10_000);
    }

    #[test]
    fn test_huge_silence_interval_saturates() {
        let config = LinkConfig::new(9600).with_silence_interval(u64::MAX / 2);
        assert_eq!(config.send_back_delay_us, u64::MAX);
        assert_eq!(config.response_timeout_us, u64::MAX / 2);
    }

    #[test]
    fn test_response_timeout_clamped() {
        let config = LinkConfig::new(9600).with_response_timeout(10);
        assert_eq!(config.response_timeout_us, config.silence_us);
    }

    #[test]
    fn test_with_baud_rate_keeps_overrides() {
        let config = LinkConfig::new(9600)
            .with_response_timeout(500_000)
            .with_max_adu_size(300)
            .with_baud_rate(38_400);
        assert_eq!(config.silence_us, silence_interval_micros(38_400));
        assert_eq!(config.response_timeout_us, 500_000);
        assert_eq!(config.max_adu_size, 300);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(LinkConfig::new(0).validate().is_err());
        assert!(LinkConfig::default().with_max_adu_size(3).validate().is_err());
        let mut config = LinkConfig::default();
        config.response_timeout_us = 1;
        assert!(config.validate().is_err());
    }
}
