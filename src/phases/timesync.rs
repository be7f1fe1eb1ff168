//! Timesync phase (§4.4): root-anchored glossy-style flood of a beacon
//! carrying only the fixed 7-byte envelope, one role variant per node
//! state.
//!
//! The three roles share a single frame format and differ only in when
//! they transmit/listen, so they are modeled as one struct parameterized
//! by [`TimesyncRole`] rather than three separate phase types — the same
//! "one struct, role enum" shape this codebase uses for its FSM states.

use crate::config::NetworkConfiguration;
use crate::error::TransceiverError;
use crate::packet::codec::{FrameHeader, HEADER_SIZE, validate_frame};
use crate::synchronizer::Synchronizer;
use crate::time::{NetworkTime, VirtualClock};
use crate::transceiver::{RecvStatus, Transceiver};

/// Fixed per-byte + per-hop constants for the rebroadcast interval
/// (§4.4): `32us * packetBytes + 600us`.
fn rebroadcast_interval_ns(packet_bytes: usize) -> i64 {
    32_000 * packet_bytes as i64 + 600_000
}

/// Conservative bound on radio propagation + preamble detection time,
/// folded into the periodic role's receive deadline (§4.4).
const PREAMBLE_AND_PROPAGATION_NS: i64 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimesyncRole {
    /// Root of the tree: originates the beacon every tile, never listens.
    Master,
    /// Desynchronized: listens indefinitely for any hop, then joins.
    Hooking,
    /// In sync: predicts the beacon's arrival and listens in a window.
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimesyncOutcome {
    /// Master always "succeeds" by originating.
    Originated,
    /// Hooking role joined the network at the given hop.
    Joined { hop: u8 },
    /// Periodic role received and (if not at maxHops) retransmitted.
    Resynced { error_ns: i64 },
    /// Periodic role missed the beacon this tile.
    Missed,
}

pub struct TimesyncPhase {
    pub role: TimesyncRole,
    pub local_hop: u8,
}

impl TimesyncPhase {
    pub fn new(role: TimesyncRole) -> Self {
        Self { role, local_hop: u8::MAX }
    }

    /// Execute one tile's worth of timesync activity. `tile_origin` is
    /// this node's current prediction of the tile boundary in network
    /// time (ignored by the master, which defines it).
    pub fn execute<T: Transceiver>(
        &mut self,
        transceiver: &mut T,
        clock: &mut VirtualClock,
        synchronizer: &mut Synchronizer,
        tile_origin: NetworkTime,
        config: &NetworkConfiguration,
    ) -> Result<TimesyncOutcome, TransceiverError> {
        match self.role {
            TimesyncRole::Master => self.run_master(transceiver, tile_origin, config),
            TimesyncRole::Hooking => self.run_hooking(transceiver, clock, tile_origin, config),
            TimesyncRole::Periodic => {
                self.run_periodic(transceiver, clock, synchronizer, tile_origin, config)
            }
        }
    }

    fn frame(&self, hop: u8, config: &NetworkConfiguration) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        FrameHeader { hop, pan_id: config.pan_id }.encode(&mut buf);
        buf
    }

    fn run_master<T: Transceiver>(
        &mut self,
        transceiver: &mut T,
        tile_origin: NetworkTime,
        config: &NetworkConfiguration,
    ) -> Result<TimesyncOutcome, TransceiverError> {
        let buf = self.frame(0, config);
        transceiver.send_at(&buf, HEADER_SIZE, tile_origin)?;
        Ok(TimesyncOutcome::Originated)
    }

    fn run_hooking<T: Transceiver>(
        &mut self,
        transceiver: &mut T,
        clock: &mut VirtualClock,
        tile_origin: NetworkTime,
        config: &NetworkConfiguration,
    ) -> Result<TimesyncOutcome, TransceiverError> {
        let mut buf = [0u8; HEADER_SIZE];
        // The hooking role listens with no deadline bound; callers still
        // pass an absolute deadline far in the future since the
        // transceiver contract requires one.
        let far_future = tile_origin + i64::from(config.max_hops as i32) * 3_600_000_000_000;
        let result = transceiver.recv(&mut buf, HEADER_SIZE, far_future);
        if result.status != RecvStatus::Ok {
            return Ok(TimesyncOutcome::Missed);
        }
        let Ok(header) = validate_frame(&buf[..result.size], config.pan_id, HEADER_SIZE, None) else {
            return Ok(TimesyncOutcome::Missed);
        };

        self.local_hop = header.hop.saturating_add(1);
        clock.recalibrate(
            crate::time::HardwareTicks(0),
            result.rx_timestamp,
            0,
        );
        if self.local_hop < config.max_hops {
            let retransmit_at = result.rx_timestamp + rebroadcast_interval_ns(HEADER_SIZE);
            let out = self.frame(self.local_hop, config);
            transceiver.send_at(&out, HEADER_SIZE, retransmit_at)?;
        }
        self.role = TimesyncRole::Periodic;
        Ok(TimesyncOutcome::Joined { hop: self.local_hop })
    }

    fn run_periodic<T: Transceiver>(
        &mut self,
        transceiver: &mut T,
        clock: &mut VirtualClock,
        synchronizer: &mut Synchronizer,
        predicted_origin: NetworkTime,
        config: &NetworkConfiguration,
    ) -> Result<TimesyncOutcome, TransceiverError> {
        let window_ns = synchronizer.peek_window_ns();
        let deadline = predicted_origin
            + window_ns
            + PREAMBLE_AND_PROPAGATION_NS;

        let mut buf = [0u8; HEADER_SIZE];
        let result = transceiver.recv(&mut buf, HEADER_SIZE, deadline);
        if result.status != RecvStatus::Ok {
            return Ok(TimesyncOutcome::Missed);
        }
        let Ok(header) = validate_frame(&buf[..result.size], config.pan_id, HEADER_SIZE, None) else {
            return Ok(TimesyncOutcome::Missed);
        };

        let error_ns = result.rx_timestamp - predicted_origin;
        let out = synchronizer.on_beacon(error_ns);
        clock.recalibrate(crate::time::HardwareTicks(0), result.rx_timestamp, out.correction_ns);

        self.local_hop = header.hop;
        if self.local_hop < config.max_hops {
            let retransmit_at = result.rx_timestamp + rebroadcast_interval_ns(HEADER_SIZE);
            let frame = self.frame(self.local_hop.saturating_add(1), config);
            transceiver.send_at(&frame, HEADER_SIZE, retransmit_at)?;
        }
        Ok(TimesyncOutcome::Resynced { error_ns })
    }
}
