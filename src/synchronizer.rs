//! FLOPSYNC-style clock-skew and receive-window synchronizer.
//!
//! Bounded internal state, no heap — same shape as this codebase's other
//! small numeric controllers: a `new()` constructor taking gains/limits
//! and a per-period `update`-style step that folds one new measurement
//! into internal state and returns the correction to apply next period.
//!
//! Each synchronization period the timesync phase measures the signed
//! error `e = measured - computed` between the predicted and actual
//! beacon arrival, feeds it to [`Synchronizer::on_beacon`], and applies
//! the returned `(correction, receiver_window)` pair when scheduling the
//! next period's receive deadline.

/// Result of folding one period's observation into the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutput {
    /// Nanosecond correction to fold into the virtual clock next period.
    pub correction_ns: i64,
    /// Symmetric receive-window half-width, in nanoseconds, to apply
    /// around the next predicted arrival.
    pub receiver_window_ns: i64,
}

/// FLOPSYNC-2-style controller: proportional-integral tracking of clock
/// skew, with a widening receive window on missed beacons and a hard
/// desync threshold.
pub struct Synchronizer {
    /// Proportional gain.
    kp: f64,
    /// Integral gain.
    ki: f64,
    /// Accumulated integral of past errors.
    integral_ns: f64,
    /// Previous period's error, for the receiver-window floor.
    prev_error_ns: i64,
    /// Window half-width floor (never shrinks below this).
    min_window_ns: i64,
    /// Window half-width ceiling.
    max_window_ns: i64,
    /// Consecutive missed beacons.
    missed_count: u8,
    /// Threshold after which the node is DESYNCHRONIZED.
    max_missed: u8,
}

impl Synchronizer {
    pub fn new(min_window_ns: i64, max_window_ns: i64, max_missed: u8) -> Self {
        Self {
            kp: 0.5,
            ki: 0.1,
            integral_ns: 0.0,
            prev_error_ns: 0,
            min_window_ns,
            max_window_ns,
            missed_count: 0,
            max_missed,
        }
    }

    /// Tune the proportional/integral gains. Defaults are conservative;
    /// a deployment may retune from field data.
    pub fn set_gains(&mut self, kp: f64, ki: f64) {
        self.kp = kp;
        self.ki = ki;
    }

    /// Fold a successful beacon reception into the controller.
    ///
    /// `error_ns = measured_frame_start - computed_frame_start`, i.e. how
    /// far the actual beacon arrival was from the prediction.
    pub fn on_beacon(&mut self, error_ns: i64) -> SyncOutput {
        self.missed_count = 0;

        let p = self.kp * error_ns as f64;
        self.integral_ns += error_ns as f64;
        let i = self.ki * self.integral_ns;
        let correction_ns = (p + i) as i64;

        // Receiver window tracks how much the error moved period-to-period,
        // clamped to the configured bounds.
        let jitter = (error_ns - self.prev_error_ns).unsigned_abs() as i64;
        self.prev_error_ns = error_ns;
        let window = (self.min_window_ns + jitter).clamp(self.min_window_ns, self.max_window_ns);

        SyncOutput {
            correction_ns,
            receiver_window_ns: window,
        }
    }

    /// Fold a missed beacon into the controller: widen the window, don't
    /// apply a correction (nothing was measured), and bump the miss
    /// counter. Caller checks [`Synchronizer::is_desynchronized`]
    /// afterward.
    pub fn lost_packet(&mut self) -> SyncOutput {
        self.missed_count = self.missed_count.saturating_add(1);
        // Widen proportional to consecutive misses, capped at max_window.
        let widened = self
            .min_window_ns
            .saturating_mul(1 + self.missed_count as i64)
            .min(self.max_window_ns);
        SyncOutput {
            correction_ns: 0,
            receiver_window_ns: widened,
        }
    }

    /// Non-mutating read of the window `lost_packet` would widen to next,
    /// for sizing a receive deadline before attempting it. Does not touch
    /// `missed_count` — callers register the actual miss, if any, via
    /// `lost_packet` once the receive outcome is known.
    pub fn peek_window_ns(&self) -> i64 {
        self.min_window_ns
            .saturating_mul(1 + self.missed_count as i64)
            .min(self.max_window_ns)
    }

    /// True once `max_missed` consecutive beacons have been lost.
    pub fn is_desynchronized(&self) -> bool {
        self.missed_count >= self.max_missed
    }

    /// Reset all accumulated state (e.g. after resynchronizing from
    /// scratch via the hooking phase).
    pub fn reset(&mut self) {
        self.integral_ns = 0.0;
        self.prev_error_ns = 0;
        self.missed_count = 0;
    }
}
