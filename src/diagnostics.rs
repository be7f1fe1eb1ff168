//! MAC-loop diagnostics: lightweight per-tile counters for missed
//! timesyncs, CRC/auth failures, and SME queue depth.
//!
//! Not named by the wire protocol — every production module this crate
//! is adapted from ships an observability surface alongside the domain
//! logic it measures, so one lives here too, in the counters-plus-
//! on-demand-snapshot shape this codebase's own `RuntimeMetrics` uses
//! (`collect()` assembling a point-in-time view from running state
//! rather than persisting history).

use serde::{Deserialize, Serialize};

/// Rolling counters updated by `MacContext` as it runs.
#[derive(Debug, Default)]
pub struct Diagnostics {
    tiles_run: u64,
    missed_timesyncs: u64,
    crc_or_auth_failures: u64,
    schedule_resends: u64,
    max_sme_queue_depth: u16,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tile(&mut self) {
        self.tiles_run += 1;
    }

    pub fn record_missed_timesync(&mut self) {
        self.missed_timesyncs += 1;
    }

    pub fn record_crc_or_auth_failure(&mut self) {
        self.crc_or_auth_failures += 1;
    }

    pub fn record_schedule_resend(&mut self) {
        self.schedule_resends += 1;
    }

    pub fn observe_sme_queue_depth(&mut self, depth: u16) {
        if depth > self.max_sme_queue_depth {
            self.max_sme_queue_depth = depth;
        }
    }

    /// Assemble a point-in-time snapshot for an external diagnostics
    /// query (e.g. an RPC response on a deployment that exposes one).
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            tiles_run: self.tiles_run,
            missed_timesyncs: self.missed_timesyncs,
            crc_or_auth_failures: self.crc_or_auth_failures,
            schedule_resends: self.schedule_resends,
            max_sme_queue_depth: self.max_sme_queue_depth,
        }
    }
}

/// Serializable snapshot of [`Diagnostics`]'s counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub tiles_run: u64,
    pub missed_timesyncs: u64,
    pub crc_or_auth_failures: u64,
    pub schedule_resends: u64,
    pub max_sme_queue_depth: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let d = Diagnostics::new();
        let s = d.snapshot();
        assert_eq!(s.tiles_run, 0);
        assert_eq!(s.missed_timesyncs, 0);
    }

    #[test]
    fn sme_queue_depth_tracks_the_high_water_mark() {
        let mut d = Diagnostics::new();
        d.observe_sme_queue_depth(3);
        d.observe_sme_queue_depth(1);
        d.observe_sme_queue_depth(5);
        assert_eq!(d.snapshot().max_sme_queue_depth, 5);
    }

    #[test]
    fn tile_and_failure_counters_accumulate() {
        let mut d = Diagnostics::new();
        d.record_tile();
        d.record_tile();
        d.record_missed_timesync();
        d.record_crc_or_auth_failure();
        d.record_schedule_resend();
        let s = d.snapshot();
        assert_eq!(s.tiles_run, 2);
        assert_eq!(s.missed_timesyncs, 1);
        assert_eq!(s.crc_or_auth_failures, 1);
        assert_eq!(s.schedule_resends, 1);
    }
}
