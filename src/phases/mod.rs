//! The four control-superframe phases (§2, §4.4-§4.7) and the tile-kind
//! selection the MAC loop uses to pick one per tile (§9 design notes).

pub mod data;
pub mod schedule_distribution;
pub mod timesync;
pub mod uplink;

pub use data::{DataPhase, SlotOutcome};
pub use schedule_distribution::{MasterScheduleSource, ScheduleOutcome, ScheduleReceiver, ScheduleState};
pub use timesync::{TimesyncOutcome, TimesyncPhase, TimesyncRole};
pub use uplink::{UplinkOutcome, UplinkPhase};

use crate::config::NetworkConfiguration;

/// Which control-tile kind a given index within the control superframe
/// names, per the `control_superframe_mask` bit (§2): bit set = uplink,
/// bit clear = downlink. `control_superframe_mask` only encodes this
/// one-bit split; `mac::MacContext` further divides downlink tile 0
/// (always downlink — `NetworkConfiguration::validate` requires bit 0
/// clear) into the fixed timesync slot and treats every other downlink
/// tile as a schedule-distribution opportunity, the same way the
/// flooding phase always runs ahead of the reservation/assignment
/// phases in one round here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Downlink,
    Uplink,
}

/// Resolve which kind of control tile `tile_index_in_superframe` is,
/// from the configured bitmask (§2, §6).
pub fn tile_kind(tile_index_in_superframe: u8, config: &NetworkConfiguration) -> TileKind {
    let bit = tile_index_in_superframe.min(31);
    if config.control_superframe_mask & (1 << bit) != 0 {
        TileKind::Uplink
    } else {
        TileKind::Downlink
    }
}
