//! Property test for §4.6's activation atomicity: a schedule activates
//! exactly when every one of its packets has been received by the
//! activation tile, never on a partial set.

use proptest::prelude::*;

use tdma_mac::config::NetworkConfiguration;
use tdma_mac::phases::schedule_distribution::{ScheduleOutcome, ScheduleReceiver};
use tdma_mac::schedule::element::ScheduleElement;
use tdma_mac::schedule::header::ScheduleHeader;
use tdma_mac::stream::manager::StreamManager;
use tdma_mac::stream::types::{Redundancy, StreamId};

fn elem_for(index: u8) -> ScheduleElement {
    ScheduleElement {
        stream_id: StreamId { src_node: 1, dst_node: 2, src_port: index, dst_port: 1 },
        offset: 0,
        period_tiles: 8,
        redundancy: Redundancy::None,
    }
}

proptest! {
    #[test]
    fn activates_iff_every_packet_arrived(
        total in 1u8..6,
        present in prop::collection::vec(any::<bool>(), 1..6),
    ) {
        let total = total.min(present.len() as u8).max(1);
        let activation_tile = 20u32;
        let mut rx = ScheduleReceiver::new(10);
        let streams = StreamManager::new(1, &NetworkConfiguration::default());

        let mut all_present = true;
        for idx in 0..total {
            let delivered = present[idx as usize % present.len()];
            all_present &= delivered;
            if delivered {
                let header = ScheduleHeader {
                    schedule_id: 1,
                    activation_tile,
                    schedule_tiles: 8,
                    total_packet: total,
                    current_packet: idx,
                    repetition: 0,
                };
                rx.on_packet(header, &[elem_for(idx)], &[], &[], None, &streams);
            }
        }

        // A packet must arrive at least once to prime the header at all;
        // skip the degenerate case where nothing was ever delivered.
        prop_assume!((0..total).any(|idx| present[idx as usize % present.len()]));

        let outcome = rx.advance(activation_tile, 1, 1);
        if all_present {
            prop_assert_eq!(outcome, ScheduleOutcome::Activated);
            prop_assert!(!rx.applied_actions().is_empty());
        } else {
            prop_assert_eq!(outcome, ScheduleOutcome::IncompleteAtActivation);
            prop_assert!(rx.applied_actions().is_empty());
        }
    }
}
