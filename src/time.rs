//! Network time and the virtual clock.
//!
//! `NetworkTime` is a signed 64-bit nanosecond count from the network
//! epoch (the master's first beacon). `VirtualClock` maps uncorrected
//! hardware ticks to corrected network time and back using the linear
//! correction the synchronizer produces every clock-sync period.

use core::ops::{Add, Sub};

/// Signed nanoseconds from network epoch. Total order across the network
/// modulo synchronization error (I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkTime(i64);

impl NetworkTime {
    pub const ZERO: Self = Self(0);

    pub const fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn checked_add_nanos(self, ns: i64) -> Option<Self> {
        self.0.checked_add(ns).map(Self)
    }
}

impl Add<i64> for NetworkTime {
    type Output = Self;
    fn add(self, rhs: i64) -> Self {
        Self(self.0 + rhs)
    }
}

impl Sub for NetworkTime {
    type Output = i64;
    fn sub(self, rhs: Self) -> i64 {
        self.0 - rhs.0
    }
}

/// Uncorrected hardware tick count — monotonic, platform clock, no
/// notion of network time applied yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HardwareTicks(pub u64);

/// Linear map between uncorrected hardware ticks and corrected network
/// time. Re-derived once per `clockSyncPeriod` from the synchronizer's
/// reported `(correction, receiverWindow)` pair (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    /// Ticks per nanosecond scale factor, fixed-point Q32.32 to avoid
    /// float drift across long uptimes.
    ticks_per_ns_q32: i64,
    /// Theoretical (uncorrected) start of the current sync period, in
    /// hardware ticks.
    theoretical_frame_start: HardwareTicks,
    /// Measured (corrected) start of the current sync period, in
    /// network-time nanoseconds.
    measured_frame_start: NetworkTime,
    /// Per-period correction applied by the synchronizer, in nanoseconds.
    clock_correction: i64,
}

const Q32: i64 = 1 << 32;

impl VirtualClock {
    /// Construct a clock with a 1:1 nominal tick/ns ratio (ticks == ns).
    /// Real deployments derive `ticks_per_ns` from the radio's crystal.
    pub fn new(ticks_per_ns: f64) -> Self {
        Self {
            ticks_per_ns_q32: (ticks_per_ns * Q32 as f64) as i64,
            theoretical_frame_start: HardwareTicks(0),
            measured_frame_start: NetworkTime::ZERO,
            clock_correction: 0,
        }
    }

    /// Apply a new `(theoretical, measured, correction)` triple, as
    /// produced once per synchronization period.
    pub fn recalibrate(
        &mut self,
        theoretical_frame_start: HardwareTicks,
        measured_frame_start: NetworkTime,
        clock_correction: i64,
    ) {
        self.theoretical_frame_start = theoretical_frame_start;
        self.measured_frame_start = measured_frame_start;
        self.clock_correction = clock_correction;
    }

    /// Map uncorrected hardware ticks to corrected network time.
    pub fn uncorrected_to_corrected(&self, ticks: HardwareTicks) -> NetworkTime {
        let delta_ticks = ticks.0 as i64 - self.theoretical_frame_start.0 as i64;
        let delta_ns = (delta_ticks as i128 * self.ticks_per_ns_q32 as i128 / Q32 as i128) as i64;
        self.measured_frame_start + (delta_ns + self.clock_correction)
    }

    /// Map corrected network time back to uncorrected hardware ticks —
    /// the inverse used to schedule `sendAt`/`recv` deadlines.
    pub fn corrected_to_uncorrected(&self, time: NetworkTime) -> HardwareTicks {
        let delta_ns = (time - self.measured_frame_start) - self.clock_correction;
        let delta_ticks = (delta_ns as i128 * Q32 as i128 / self.ticks_per_ns_q32 as i128) as i64;
        HardwareTicks((self.theoretical_frame_start.0 as i64 + delta_ticks) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_identity_clock() {
        let vc = VirtualClock::new(1.0);
        let t = NetworkTime::from_nanos(123_456);
        let ticks = vc.corrected_to_uncorrected(t);
        let back = vc.uncorrected_to_corrected(ticks);
        assert_eq!(back, t);
    }

    #[test]
    fn recalibration_shifts_mapping() {
        let mut vc = VirtualClock::new(1.0);
        vc.recalibrate(HardwareTicks(1_000), NetworkTime::from_nanos(5_000), 250);
        // At the recalibration anchor point, corrected time == measured + correction.
        let t = vc.uncorrected_to_corrected(HardwareTicks(1_000));
        assert_eq!(t, NetworkTime::from_nanos(5_250));
    }

    #[test]
    fn network_time_ordering_is_total() {
        let a = NetworkTime::from_nanos(10);
        let b = NetworkTime::from_nanos(20);
        assert!(a < b);
        assert_eq!(b - a, 10);
    }
}
