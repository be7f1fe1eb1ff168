//! Schedule expander (§4.8): turn compact schedule elements into a
//! per-slot action vector for this node.
//!
//! Deterministic and side-effect-free — it never consults network state
//! beyond this node's id, the same "pure function over a fixed-size
//! table" shape as this codebase's `fsm::states::build_state_table`.
//! Rules: for each element, for `k = 0..(scheduleTiles/period - 1)`,
//! place `Send` at the slot where this node is the transmitter, `Recv`
//! where it is the receiver, `Sleep` elsewhere. Slots named by more than
//! one element are a master-scheduling bug (last write wins here — see
//! DESIGN.md Open Questions for how spatial-reuse redundancy additions
//! are treated).

use heapless::Vec;

use super::element::{ScheduleAction, ScheduleElement};
use crate::stream::types::NodeId;

/// Maximum slots this expander will size a vector for (bounds
/// `scheduleTiles * slotsPerTile`).
pub const MAX_SLOTS: usize = 4096;

/// Expand `elements` into a per-slot action vector of length
/// `schedule_tiles * slots_per_tile` for `local_node`. Elements whose
/// period does not evenly divide `schedule_tiles`, or whose offset lands
/// outside one period, are skipped (malformed schedule from the master;
/// the receiver treats the schedule as incomplete rather than panicking
/// — see `phases::schedule_distribution`).
pub fn expand_schedule(
    elements: &[ScheduleElement],
    local_node: NodeId,
    schedule_tiles: u16,
    slots_per_tile: usize,
) -> Vec<ScheduleAction, MAX_SLOTS> {
    let total_slots = schedule_tiles as usize * slots_per_tile;
    let mut actions = Vec::new();
    for _ in 0..total_slots.min(MAX_SLOTS) {
        let _ = actions.push(ScheduleAction::Sleep);
    }

    for element in elements {
        if element.period_tiles == 0 || schedule_tiles % element.period_tiles != 0 {
            continue;
        }
        let offset_slot = element.offset as usize;
        if offset_slot >= schedule_tiles as usize * slots_per_tile {
            continue;
        }

        let action = if element.stream_id.src_node == local_node {
            Some(ScheduleAction::Send(element.stream_id))
        } else if element.stream_id.dst_node == local_node {
            Some(ScheduleAction::Recv(element.stream_id))
        } else {
            None
        };
        let Some(action) = action else { continue };

        let repeats = schedule_tiles / element.period_tiles;
        let period_slots = element.period_tiles as usize * slots_per_tile;
        for k in 0..repeats as usize {
            let slot = k * period_slots + offset_slot;
            if let Some(a) = actions.get_mut(slot) {
                *a = action;
            }
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::{Redundancy, StreamId};

    fn elem(src: u8, dst: u8, offset: u16, period: u16) -> ScheduleElement {
        ScheduleElement {
            stream_id: StreamId {
                src_node: src,
                dst_node: dst,
                src_port: 1,
                dst_port: 1,
            },
            offset,
            period_tiles: period,
            redundancy: Redundancy::None,
        }
    }

    #[test]
    fn places_send_and_recv_at_offset_then_repeats() {
        let elements = [elem(1, 2, 0, 4)];
        let sender = expand_schedule(&elements, 1, 8, 1);
        assert_eq!(sender[0], ScheduleAction::Send(elements[0].stream_id));
        assert_eq!(sender[4], ScheduleAction::Send(elements[0].stream_id));
        assert_eq!(sender[1], ScheduleAction::Sleep);

        let receiver = expand_schedule(&elements, 2, 8, 1);
        assert_eq!(receiver[0], ScheduleAction::Recv(elements[0].stream_id));
        assert_eq!(receiver[4], ScheduleAction::Recv(elements[0].stream_id));
    }

    #[test]
    fn unrelated_node_sleeps_every_slot() {
        let elements = [elem(1, 2, 0, 4)];
        let bystander = expand_schedule(&elements, 9, 8, 1);
        assert!(bystander.iter().all(|a| *a == ScheduleAction::Sleep));
    }

    #[test]
    fn malformed_period_is_skipped_not_panicking() {
        let elements = [elem(1, 2, 0, 3)]; // 3 does not divide 8
        let v = expand_schedule(&elements, 1, 8, 1);
        assert!(v.iter().all(|a| *a == ScheduleAction::Sleep));
    }
}
