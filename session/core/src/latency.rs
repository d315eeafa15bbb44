//! Heartbeat and Latency Tracking
//!
//! When enabled, the client pings over the socket every `ping_interval` and
//! a server that supports it echoes the ping's send time inside its next
//! `heartbeat` frame. Each echo yields one round-trip sample.
//!
//! Pings are off by default: a server without a `ping` handler reads every
//! socket frame as a chat message, so an unsolicited ping would become an
//! empty user turn.
//!
//! The reported latency is the arithmetic mean of the last `window` samples,
//! rounded to the nearest millisecond.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Heartbeat configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between client pings, in milliseconds (default: 30 seconds)
    pub ping_interval_ms: u64,
    /// Number of round-trip samples averaged (default: 10)
    pub latency_window: usize,
    /// Whether the client sends pings at all (default: false)
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30_000,
            latency_window: 10,
            enabled: false,
        }
    }
}

impl HeartbeatConfig {
    /// Create a config with pings disabled
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Create a config that pings every `interval`
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
        .with_interval(interval)
    }

    /// Set the ping interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Ping interval as a `Duration`
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Rolling window of round-trip samples
#[derive(Clone, Debug)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(10)
    }
}

impl LatencyWindow {
    /// Create a window holding at most `capacity` samples (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest when full; returns the new mean
    pub fn record(&mut self, rtt: Duration) -> u64 {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);
        self.mean_millis().unwrap_or(0)
    }

    /// Mean of the window in whole milliseconds, rounded half away from zero
    #[must_use]
    pub fn mean_millis(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let total: f64 = self.samples.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
        let mean = total / self.samples.len() as f64;
        Some(mean.round() as u64)
    }

    /// Number of samples held
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples have been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop all samples
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Round-trip time from an echoed send timestamp, both in ms since the epoch
///
/// `None` when the echo lies in the future (clock skew or a bogus echo).
#[must_use]
pub fn rtt_from_echo(echo_ms: i64, now_ms: i64) -> Option<Duration> {
    let elapsed = now_ms.checked_sub(echo_ms)?;
    u64::try_from(elapsed).ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_mean_rounds_to_nearest() {
        let mut window = LatencyWindow::new(10);
        window.record(ms(10));
        assert_eq!(window.record(ms(11)), 11); // 10.5 rounds up
        assert_eq!(window.record(ms(10)), 10); // 10.33 rounds down
    }

    #[test]
    fn test_window_keeps_last_samples() {
        let mut window = LatencyWindow::new(10);
        for _ in 0..10 {
            window.record(ms(100));
        }
        assert_eq!(window.mean_millis(), Some(100));

        // Ten fresh samples push every old one out.
        for _ in 0..10 {
            window.record(ms(20));
        }
        assert_eq!(window.len(), 10);
        assert_eq!(window.mean_millis(), Some(20));

        window.record(ms(120));
        assert_eq!(window.mean_millis(), Some(30));
    }

    #[test]
    fn test_sub_millisecond_samples() {
        let mut window = LatencyWindow::new(2);
        window.record(Duration::from_micros(400));
        assert_eq!(window.record(Duration::from_micros(700)), 1);
    }

    #[test]
    fn test_empty_window() {
        let mut window = LatencyWindow::default();
        assert!(window.is_empty());
        assert_eq!(window.mean_millis(), None);
        window.record(ms(5));
        window.clear();
        assert_eq!(window.mean_millis(), None);
    }

    #[test]
    fn test_rtt_from_echo() {
        assert_eq!(rtt_from_echo(1_000, 1_042), Some(ms(42)));
        assert_eq!(rtt_from_echo(1_000, 1_000), Some(ms(0)));
        assert_eq!(rtt_from_echo(2_000, 1_000), None);
    }

    #[test]
    fn test_heartbeat_config() {
        let config = HeartbeatConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.latency_window, 10);

        let config = HeartbeatConfig::every(Duration::from_secs(5));
        assert!(config.enabled);
        assert_eq!(config.ping_interval_ms, 5_000);

        let config = HeartbeatConfig::disabled().with_interval(ms(250));
        assert!(!config.enabled);
        assert_eq!(config.ping_interval_ms, 250);
    }
}
