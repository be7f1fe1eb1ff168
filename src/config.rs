//! Network configuration parameters.
//!
//! All tunable parameters for a mesh node. Persisted at build/init time —
//! there is no dynamic reconfiguration once the MAC thread starts, only
//! a validated `NetworkConfiguration` handed to `MacContext::new`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Flood variant used by the schedule-distribution phase (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleFloodVariant {
    /// Each node receives once at `tileOrigin + (hop-1)*rebroadcastInterval`
    /// and retransmits immediately unless at `maxHops`.
    HopIndexed,
    /// Alternating send/receive micro-slots across `maxHops`, first-receive-
    /// then-forward. Chosen for denser topologies.
    Alternating,
}

/// Core network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    // --- Topology bounds ---
    /// Flood depth bound; sets retransmit counts and tile budgets.
    pub max_hops: u8,
    /// NodeId range (exclusive upper bound); sets bitmask widths and
    /// schedule capacity. NodeId 0 is reserved for the master.
    pub max_nodes: u16,

    // --- Radio / PAN ---
    /// 16-bit PAN id carried in every control header; mismatched packets
    /// are dropped.
    pub pan_id: u16,
    /// Radio TX power, implementation-defined units.
    pub tx_power: i8,
    /// Radio base frequency in Hz.
    pub base_frequency_hz: u32,

    // --- Time grid ---
    /// Duration of one tile, in nanoseconds.
    pub tile_duration_ns: u64,
    /// Number of tiles between synchronizer recalibrations.
    pub clock_sync_period_tiles: u16,

    // --- Control superframe ---
    /// Bitmask over tile indices within one control superframe: bit set =
    /// uplink tile, bit clear = downlink tile. Bit 0 must be 0 (downlink);
    /// at least one bit must be 1 (uplink).
    pub control_superframe_mask: u32,
    /// Number of tiles in one control superframe (<= 32, bits above this
    /// width in `control_superframe_mask` are ignored).
    pub control_superframe_size: u8,

    // --- Uplink capacity ---
    /// Guaranteed number of topology elements forwarded per uplink tile
    /// before SMEs are allowed to consume the remaining budget.
    pub guaranteed_topologies: u8,
    /// Number of uplink packet slots per uplink tile.
    pub num_uplink_packets: u8,
    /// Ratio of topology elements to SME elements packed per uplink
    /// packet before SMEs take priority (see `phases::uplink`).
    pub topology_sme_ratio: u8,

    // --- Neighbor GC ---
    /// Rounds without a beacon before a neighbor is declared dead.
    pub max_rounds_unavailable_becomes_dead: u8,
    /// Rounds without a weak-link beacon before a weak neighbor is
    /// declared dead (only when `use_weak_topologies` is set).
    pub max_rounds_weak_link_becomes_dead: u8,

    // --- RSSI admission ---
    /// Minimum RSSI (dBm) to admit a strong neighbor edge.
    pub min_neighbor_rssi: i16,
    /// Minimum RSSI (dBm) to admit a weak neighbor edge.
    pub min_weak_neighbor_rssi: i16,

    // --- Desync threshold ---
    /// Consecutive missed timesync beacons before DESYNCHRONIZED.
    pub max_missed_timesyncs: u8,

    // --- Redundancy classes ---
    /// Enables TRIPLE_SPATIAL/DOUBLE_SPATIAL redundancy classes.
    pub channel_spatial_reuse: bool,
    /// Enables the weak-neighbor bitmask (doubles bitmask width).
    pub use_weak_topologies: bool,

    // --- Schedule distribution ---
    /// Flood model used to deliver schedule packets.
    pub schedule_flood_variant: ScheduleFloodVariant,
    /// Number of times the master repeats each schedule packet.
    pub schedule_repetitions: u8,

    // --- Crypto (requires the `crypto` feature to take effect) ---
    pub authenticate_control: bool,
    pub authenticate_data: bool,
    pub encrypt_control: bool,
    pub encrypt_data: bool,
    /// Tiles between master-key rotations.
    pub rekeying_period_tiles: u32,
    /// Tiles allowed for the master-challenge authentication round trip.
    pub master_challenge_authentication_timeout_tiles: u16,

    // --- SME / stream timers ---
    /// Tiles an opening stream/server waits before re-enqueuing its SME.
    pub sme_timeout_tiles: u16,
    /// Tiles an opening stream/server waits before giving up entirely.
    pub fail_timeout_max_tiles: u16,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        Self {
            max_hops: 4,
            max_nodes: 32,

            pan_id: 0xBEEF,
            tx_power: 0,
            base_frequency_hz: 2_450_000_000,

            tile_duration_ns: 10_000_000, // 10 ms
            clock_sync_period_tiles: 1,

            // bit0=0 (downlink), bit1=1 (uplink) minimum viable mask.
            control_superframe_mask: 0b0000_0010,
            control_superframe_size: 8,

            guaranteed_topologies: 1,
            num_uplink_packets: 1,
            topology_sme_ratio: 2,

            max_rounds_unavailable_becomes_dead: 3,
            max_rounds_weak_link_becomes_dead: 3,

            min_neighbor_rssi: -90,
            min_weak_neighbor_rssi: -100,

            max_missed_timesyncs: 3,

            channel_spatial_reuse: false,
            use_weak_topologies: false,

            schedule_flood_variant: ScheduleFloodVariant::HopIndexed,
            schedule_repetitions: 3,

            authenticate_control: false,
            authenticate_data: false,
            encrypt_control: false,
            encrypt_data: false,
            rekeying_period_tiles: 10_000,
            master_challenge_authentication_timeout_tiles: 50,

            sme_timeout_tiles: 20,
            fail_timeout_max_tiles: 200,
        }
    }
}

impl NetworkConfiguration {
    /// Width in bytes of one neighbor bitmask (doubled when weak
    /// topologies are enabled, per §6 uplink payload layout).
    pub fn neighbor_bitmask_bytes(&self) -> usize {
        let base = self.max_nodes.div_ceil(8) as usize;
        if self.use_weak_topologies {
            base * 2
        } else {
            base
        }
    }

    /// Validate and reject impossible configurations. Called once at
    /// `MacContext` construction; never at runtime. Mirrors the
    /// validate-before-persist contract the rest of this codebase applies
    /// to configuration ports.
    pub fn validate(&self) -> Result<()> {
        if self.control_superframe_size == 0 || self.control_superframe_size > 32 {
            return Err(Error::Config("control_superframe_size must be in 1..=32"));
        }
        let size = self.control_superframe_size;
        let mask = self.control_superframe_mask & (u32::MAX >> (32 - size as u32));
        if mask & 1 != 0 {
            return Err(Error::Config("control superframe bit 0 must be downlink"));
        }
        if mask == 0 {
            return Err(Error::Config(
                "control superframe must contain at least one uplink tile",
            ));
        }
        if self.max_nodes < 2 {
            return Err(Error::Config("max_nodes must be >= 2 (master + one node)"));
        }
        if self.max_nodes > 255 {
            return Err(Error::Config("max_nodes must fit in a NodeId byte"));
        }
        if self.max_hops == 0 {
            return Err(Error::Config("max_hops must be >= 1"));
        }
        if self.num_uplink_packets == 0 {
            return Err(Error::Config("num_uplink_packets must be >= 1"));
        }
        if self.schedule_repetitions == 0 {
            return Err(Error::Config("schedule_repetitions must be >= 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        NetworkConfiguration::default().validate().unwrap();
    }

    #[test]
    fn rejects_uplink_free_superframe() {
        let mut cfg = NetworkConfiguration::default();
        cfg.control_superframe_mask = 0; // no uplink tile at all
        assert_eq!(
            cfg.validate(),
            Err(Error::Config(
                "control superframe must contain at least one uplink tile"
            ))
        );
    }

    #[test]
    fn rejects_bit0_uplink() {
        let mut cfg = NetworkConfiguration::default();
        cfg.control_superframe_mask = 0b11; // bit 0 set = uplink at position 0
        assert_eq!(
            cfg.validate(),
            Err(Error::Config("control superframe bit 0 must be downlink"))
        );
    }

    #[test]
    fn neighbor_bitmask_width_doubles_with_weak_topologies() {
        let mut cfg = NetworkConfiguration::default();
        cfg.max_nodes = 32;
        assert_eq!(cfg.neighbor_bitmask_bytes(), 4);
        cfg.use_weak_topologies = true;
        assert_eq!(cfg.neighbor_bitmask_bytes(), 8);
    }
}
