//! A resync challenge/response travels to the key manager through the
//! same downlink packet that carries a schedule, and the schedule still
//! activates even though the key rotation is a separate concern (§4.10).

use tdma_mac::config::NetworkConfiguration;
use tdma_mac::keymanager::{KeyManager, KeyState};
use tdma_mac::phases::schedule_distribution::{ScheduleOutcome, ScheduleReceiver};
use tdma_mac::schedule::element::ScheduleElement;
use tdma_mac::schedule::header::ScheduleHeader;
use tdma_mac::stream::manager::StreamManager;
use tdma_mac::stream::types::{Redundancy, StreamId};

fn header(activation: u32) -> ScheduleHeader {
    ScheduleHeader {
        schedule_id: 1,
        activation_tile: activation,
        schedule_tiles: 8,
        total_packet: 1,
        current_packet: 0,
        repetition: 0,
    }
}

fn elem() -> ScheduleElement {
    ScheduleElement {
        stream_id: StreamId { src_node: 1, dst_node: 2, src_port: 1, dst_port: 1 },
        offset: 0,
        period_tiles: 8,
        redundancy: Redundancy::None,
    }
}

#[test]
fn resync_commits_through_a_schedule_packet_and_the_schedule_still_activates() {
    let mut key_manager = KeyManager::new([0u8; 32]);
    key_manager.bootstrap([1u8; 32], 5);
    key_manager.observe_resync(6).unwrap();
    assert_eq!(key_manager.state(), KeyState::Tentative);

    let challenge = 42u32.to_le_bytes();
    let tag32 = key_manager.respond_to_challenge(&challenge);

    let mut rx = ScheduleReceiver::new(10);
    let streams = StreamManager::new(1, &NetworkConfiguration::default());
    let response = tdma_mac::schedule::element::ResponseElement { session_id: 42, hmac_tag: tag32 };

    rx.on_packet(header(5), &[elem()], &[response], &[], Some(&mut key_manager), &streams);
    assert_eq!(key_manager.state(), KeyState::Connected);
    assert_eq!(key_manager.active_key().1, 6);

    assert_eq!(rx.advance(5, 1, 1), ScheduleOutcome::Activated);
    assert!(!rx.applied_actions().is_empty());
}

#[test]
fn a_forged_response_rolls_back_the_key_but_does_not_block_activation() {
    let mut key_manager = KeyManager::new([0u8; 32]);
    key_manager.bootstrap([1u8; 32], 5);
    key_manager.observe_resync(6).unwrap();

    let forged = tdma_mac::schedule::element::ResponseElement { session_id: 42, hmac_tag: [0xAAu8; 32] };

    let mut rx = ScheduleReceiver::new(10);
    let streams = StreamManager::new(1, &NetworkConfiguration::default());
    rx.on_packet(header(5), &[elem()], &[forged], &[], Some(&mut key_manager), &streams);

    assert_eq!(key_manager.state(), KeyState::Connected);
    assert_eq!(key_manager.active_key().1, 5); // rolled back, not advanced

    assert_eq!(rx.advance(5, 1, 1), ScheduleOutcome::Activated);
}
