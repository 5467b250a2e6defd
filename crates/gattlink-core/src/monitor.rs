//! Periodic RSSI sampling of the connected link.
//!
//! The monitor only decides *when* to sample and how to classify a
//! sample. It never touches the link; the controller issues the actual
//! RSSI read and forwards results to observers.

use std::time::Duration;

use crate::timer::{TimerKind, Timers};
use crate::types::PeripheralHandle;

/// One RSSI sample, classified against the weak-signal threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkQualityEvent {
    /// Sampled RSSI in dBm.
    pub rssi: i16,
    /// Whether the sample is strictly below the threshold.
    pub weak: bool,
}

/// Link-quality monitor for the active peripheral.
#[derive(Debug)]
pub struct RssiMonitor {
    period: Duration,
    weak_threshold_dbm: i16,
    target: Option<PeripheralHandle>,
}

impl RssiMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub const fn new(period: Duration, weak_threshold_dbm: i16) -> Self {
        Self {
            period,
            weak_threshold_dbm,
            target: None,
        }
    }

    /// Begin sampling `peripheral` every period. Restarts if already running.
    pub fn start(&mut self, timers: &mut Timers, peripheral: PeripheralHandle) {
        timers.schedule_repeating(TimerKind::RssiPoll, self.period);
        tracing::debug!(%peripheral, period_secs = self.period.as_secs(), "rssi monitor started");
        self.target = Some(peripheral);
    }

    /// Stop sampling. No-op when stopped.
    pub fn stop(&mut self, timers: &mut Timers) {
        timers.cancel(TimerKind::RssiPoll);
        if let Some(peripheral) = self.target.take() {
            tracing::debug!(%peripheral, "rssi monitor stopped");
        }
    }

    /// Peripheral being sampled, if running.
    #[must_use]
    pub const fn target(&self) -> Option<&PeripheralHandle> {
        self.target.as_ref()
    }

    /// Whether the monitor is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.target.is_some()
    }

    /// Classify a sample. `-85` against a `-85` threshold is not weak.
    #[must_use]
    pub const fn sample(&self, rssi: i16) -> LinkQualityEvent {
        LinkQualityEvent {
            rssi,
            weak: rssi < self.weak_threshold_dbm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_threshold_is_strict() {
        let monitor = RssiMonitor::new(Duration::from_secs(2), -85);
        assert!(!monitor.sample(-85).weak);
        assert!(monitor.sample(-86).weak);
        assert!(!monitor.sample(-40).weak);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_toggle_poll_timer() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        let mut monitor = RssiMonitor::new(Duration::from_secs(2), -85);

        monitor.start(&mut timers, PeripheralHandle::new("p"));
        assert!(monitor.is_running());
        assert!(timers.is_armed(TimerKind::RssiPoll));

        monitor.stop(&mut timers);
        assert!(!monitor.is_running());
        assert!(!timers.is_armed(TimerKind::RssiPoll));
    }
}
