use log::{debug, info, trace};
use std::time::Duration;

use crate::command::Channel;
use crate::pdi::PdiState;
use crate::transfer::TransferReport;

/// Hook for diagnostics during a transfer. Every method defaults to a no-op.
pub trait TransferObserver {
    fn channel_sent(&mut self, _channel: Channel, _bytes: usize, _elapsed: Duration) {}

    fn byte_received(&mut self, _byte: u8) {}

    fn state_changed(&mut self, _from: PdiState, _to: PdiState) {}

    fn channel_received(&mut self, _channel: Channel, _pixels: &[u8]) {}

    fn transfer_complete(&mut self, _report: &TransferReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// Writes transfer progress to the log.
#[derive(Debug, Default)]
pub struct LogObserver {
    log_bytes: bool,
    received: u64,
}

impl LogObserver {
    pub fn new(log_bytes: bool) -> Self {
        LogObserver {
            log_bytes,
            received: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

impl TransferObserver for LogObserver {
    fn channel_sent(&mut self, channel: Channel, bytes: usize, elapsed: Duration) {
        info!(
            "Sent {:?} channel: {} bytes in {:.3} ms",
            channel,
            bytes,
            elapsed.as_secs_f64() * 1000.0
        );
    }

    fn byte_received(&mut self, byte: u8) {
        self.received += 1;
        if self.log_bytes {
            trace!("rx[{}] 0x{:02x}", self.received, byte);
        }
    }

    fn state_changed(&mut self, from: PdiState, to: PdiState) {
        debug!("PDI state {:?} -> {:?}", from, to);
    }

    fn channel_received(&mut self, channel: Channel, pixels: &[u8]) {
        debug!("Received {} pixels of {:?} channel", pixels.len(), channel);
    }

    fn transfer_complete(&mut self, report: &TransferReport) {
        info!("Classification: {}", report.results.gesture());
        info!("Hand area: {}", report.results.hand_area);
        info!("Hand perimeter: {}", report.results.hand_perimeter);
        info!("Hand peak: {}", report.results.hand_peak);
        info!(
            "Total time {} us, PDI time {} us",
            report.total_time.as_micros(),
            report.pdi_time.as_micros()
        );
    }
}
