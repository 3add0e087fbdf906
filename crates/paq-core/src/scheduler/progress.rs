//! Progress/status collaborator interface and pulse statistics.
//!
//! The scheduler reports item lifecycle events and a periodic pulse to an
//! [`AcquireProgress`] implementation; consumers can compute rate and ETA
//! from the pulse stats.

use crate::item::FetchItem;

/// Receiver for scheduler events. All callbacks run synchronously inside the
/// event loop, so implementations must return promptly; `media_change` is the
/// one deliberate exception and blocks the whole run until answered.
pub trait AcquireProgress {
    /// The run is starting.
    fn start(&mut self) {}

    /// The run is over (success or not).
    fn stop(&mut self) {}

    /// A method reported the transfer as started.
    fn fetch(&mut self, _item: &FetchItem) {}

    /// An item completed with data transferred.
    fn done(&mut self, _item: &FetchItem) {}

    /// An item completed as a conditional-fetch hit; nothing was transferred.
    fn ims_hit(&mut self, _item: &FetchItem) {}

    /// An item failed terminally.
    fn fail(&mut self, _item: &FetchItem, _reason: &str) {}

    /// A removable-media method needs different media in a drive. Return
    /// true once the user swapped it, false to fail the affected requests.
    fn media_change(&mut self, _media: &str, _drive: &str) -> bool {
        false
    }

    /// Periodic heartbeat at the configured pulse interval, fired even when
    /// no I/O happened. Return false to cancel the whole run.
    fn pulse(&mut self, _stats: &ProgressStats) -> bool {
        true
    }
}

/// Progress sink that ignores everything (and declines media changes).
#[derive(Debug, Default)]
pub struct NullProgress;

impl AcquireProgress for NullProgress {}

/// Snapshot of overall acquisition progress, handed to `pulse`.
#[derive(Debug, Clone)]
pub struct ProgressStats {
    /// Bytes accounted for by completed items.
    pub bytes_done: u64,
    /// Total bytes expected across all items (0 when nothing advertised a size).
    pub total_bytes: u64,
    /// Elapsed time since the run started (seconds).
    pub elapsed_secs: f64,
    /// Items in a terminal state.
    pub items_done: usize,
    /// All items in this run.
    pub item_count: usize,
}

impl ProgressStats {
    /// Overall rate in bytes per second (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if rate is 0 or size unknown).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_bytes.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0], by item count when sizes are unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes > 0 {
            return (self.bytes_done as f64 / self.total_bytes as f64).min(1.0);
        }
        if self.item_count == 0 {
            return 1.0;
        }
        self.items_done as f64 / self.item_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_and_eta() {
        let s = ProgressStats {
            bytes_done: 500,
            total_bytes: 1000,
            elapsed_secs: 5.0,
            items_done: 1,
            item_count: 2,
        };
        assert!((s.bytes_per_sec() - 100.0).abs() < 1e-9);
        assert!((s.eta_secs().unwrap() - 5.0).abs() < 1e-9);
        assert!((s.fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn fraction_falls_back_to_item_count() {
        let s = ProgressStats {
            bytes_done: 0,
            total_bytes: 0,
            elapsed_secs: 1.0,
            items_done: 3,
            item_count: 4,
        };
        assert!((s.fraction() - 0.75).abs() < 1e-9);
        assert_eq!(s.bytes_per_sec(), 0.0);
    }
}
