//! Schedule-distribution phase (§4.6): the receiver-side state machine
//! that assembles a multi-packet schedule, activates it atomically at
//! `activationTile`, and falls back to a RESEND SME when activation
//! arrives with the schedule still incomplete.
//!
//! The master's packet *assembly* (which schedule to send, in what
//! order) is the schedule-search algorithm's output and out of scope
//! here (§1) — [`MasterScheduleSource`] only replays pre-built packets
//! the caller hands it, byte for byte, at the configured repetition
//! cadence.

use heapless::Vec;

use crate::config::NetworkConfiguration;
use crate::error::TransceiverError;
use crate::keymanager::KeyManager;
use crate::schedule::element::{InfoElement, ResponseElement, ScheduleAction, ScheduleElement};
use crate::schedule::expander::{MAX_SLOTS, expand_schedule};
use crate::schedule::header::ScheduleHeader;
use crate::stream::manager::StreamManager;
use crate::stream::types::NodeId;
use crate::time::NetworkTime;
use crate::transceiver::{RecvStatus, Transceiver};

pub const MAX_SCHEDULE_PACKETS: usize = 32;
pub const MAX_SCHEDULE_ELEMENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    AppliedSchedule,
    SendingSchedule,
    Processing,
    AwaitingActivation,
    IncompleteSchedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    NoChange,
    Activated,
    IncompleteAtActivation,
    ResendQueued,
}

pub struct ScheduleReceiver {
    pub state: ScheduleState,
    header: Option<ScheduleHeader>,
    received: Vec<bool, MAX_SCHEDULE_PACKETS>,
    elements: Vec<ScheduleElement, MAX_SCHEDULE_ELEMENTS>,
    applied: Vec<ScheduleAction, MAX_SLOTS>,
    resend_wait: u16,
    resend_timeout_tiles: u16,
}

impl ScheduleReceiver {
    pub fn new(resend_timeout_tiles: u16) -> Self {
        Self {
            state: ScheduleState::AppliedSchedule,
            header: None,
            received: Vec::new(),
            elements: Vec::new(),
            applied: Vec::new(),
            resend_wait: resend_timeout_tiles,
            resend_timeout_tiles,
        }
    }

    pub fn applied_actions(&self) -> &[ScheduleAction] {
        &self.applied
    }

    fn complete(&self) -> bool {
        !self.received.is_empty() && self.received.iter().all(|r| *r)
    }

    /// Feed one received schedule-downlink packet's parsed contents.
    /// Order is fixed by the wire format: schedule elements, response
    /// elements, info elements (§4.6) — info elements apply immediately
    /// regardless of `self.state`.
    pub fn on_packet(
        &mut self,
        header: ScheduleHeader,
        schedule_elems: &[ScheduleElement],
        response_elems: &[ResponseElement],
        info_elems: &[InfoElement],
        key_manager: Option<&mut KeyManager>,
        streams: &StreamManager,
    ) {
        for info in info_elems {
            streams.apply_info_element(*info);
        }

        if let Some(km) = key_manager {
            for resp in response_elems {
                let challenge = resp.session_id.to_le_bytes();
                km.verify_challenge(&challenge, &resp.hmac_tag);
            }
        }

        let is_new_header = self.header.is_none_or(|h| h.schedule_id != header.schedule_id);
        if is_new_header {
            self.header = Some(header);
            self.received.clear();
            self.elements.clear();
            for _ in 0..(header.total_packet as usize).min(MAX_SCHEDULE_PACKETS) {
                let _ = self.received.push(false);
            }
            self.state = ScheduleState::SendingSchedule;
        }

        let idx = header.current_packet as usize;
        let already_seen = self.received.get(idx).copied().unwrap_or(true);
        if let Some(slot) = self.received.get_mut(idx) {
            *slot = true;
        }
        if !already_seen {
            for elem in schedule_elems {
                let _ = self.elements.push(*elem);
            }
        }
    }

    /// Advance the state machine against the current tile number. Must
    /// be called once per tile even when no packet arrived, so that
    /// activation and resend timeouts fire on schedule.
    pub fn advance(&mut self, current_tile: u32, local_node: NodeId, slots_per_tile: usize) -> ScheduleOutcome {
        let Some(header) = self.header else { return ScheduleOutcome::NoChange };

        if self.state == ScheduleState::SendingSchedule && self.complete() {
            self.state = ScheduleState::Processing;
        }

        match self.state {
            ScheduleState::Processing => {
                if current_tile < header.activation_tile {
                    self.state = ScheduleState::AwaitingActivation;
                    ScheduleOutcome::NoChange
                } else {
                    self.finalize(header, local_node, slots_per_tile)
                }
            }
            ScheduleState::AwaitingActivation if current_tile >= header.activation_tile => {
                self.finalize(header, local_node, slots_per_tile)
            }
            // Never reached `Processing` because the schedule is still
            // incomplete, but activation arrived anyway — that is itself
            // the incomplete-at-activation case, not a no-op.
            ScheduleState::SendingSchedule if current_tile >= header.activation_tile => {
                self.finalize(header, local_node, slots_per_tile)
            }
            ScheduleState::IncompleteSchedule => {
                self.resend_wait = self.resend_wait.saturating_sub(1);
                if self.resend_wait == 0 {
                    self.resend_wait = self.resend_timeout_tiles;
                    ScheduleOutcome::ResendQueued
                } else {
                    ScheduleOutcome::NoChange
                }
            }
            _ => ScheduleOutcome::NoChange,
        }
    }

    fn finalize(&mut self, header: ScheduleHeader, local_node: NodeId, slots_per_tile: usize) -> ScheduleOutcome {
        if self.complete() {
            self.applied = expand_schedule(&self.elements, local_node, header.schedule_tiles, slots_per_tile);
            self.state = ScheduleState::AppliedSchedule;
            ScheduleOutcome::Activated
        } else {
            self.applied.clear();
            self.state = ScheduleState::IncompleteSchedule;
            self.resend_wait = self.resend_timeout_tiles;
            ScheduleOutcome::IncompleteAtActivation
        }
    }
}

/// Master-side replay of a pre-assembled schedule (§4.6, §9): sends
/// `packets[current_packet]` once per call, cycling through
/// `scheduleRepetitions` rounds, and reports when the whole schedule has
/// been sent `scheduleRepetitions` times.
pub struct MasterScheduleSource<'a> {
    packets: &'a [&'a [u8]],
    repetitions: u8,
    packet_index: usize,
    round: u8,
}

impl<'a> MasterScheduleSource<'a> {
    pub fn new(packets: &'a [&'a [u8]], repetitions: u8) -> Self {
        Self { packets, repetitions: repetitions.max(1), packet_index: 0, round: 0 }
    }

    pub fn is_done(&self) -> bool {
        self.round >= self.repetitions
    }

    pub fn send_next<T: Transceiver>(
        &mut self,
        transceiver: &mut T,
        send_at: NetworkTime,
    ) -> Result<(), TransceiverError> {
        if self.is_done() {
            return Ok(());
        }
        let packet = self.packets[self.packet_index];
        transceiver.send_at(packet, packet.len(), send_at)?;
        self.packet_index += 1;
        if self.packet_index >= self.packets.len() {
            self.packet_index = 0;
            self.round += 1;
        }
        Ok(())
    }
}

/// Receive one schedule-downlink frame off the radio; returns `None` on
/// timeout/CRC/PAN mismatch so the caller can simply skip this tile.
pub fn recv_schedule_frame<T: Transceiver>(
    transceiver: &mut T,
    buf: &mut [u8],
    deadline: NetworkTime,
    config: &NetworkConfiguration,
) -> Option<usize> {
    let result = transceiver.recv(buf, buf.len(), deadline);
    if result.status != RecvStatus::Ok {
        return None;
    }
    crate::packet::codec::validate_frame(
        &buf[..crate::packet::codec::HEADER_SIZE],
        config.pan_id,
        crate::packet::codec::HEADER_SIZE,
        None,
    )
    .ok()?;
    Some(result.size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::{Redundancy, StreamId};

    fn header(id: u32, activation: u32, total: u8, current: u8) -> ScheduleHeader {
        ScheduleHeader {
            schedule_id: id,
            activation_tile: activation,
            schedule_tiles: 8,
            total_packet: total,
            current_packet: current,
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

    fn streams() -> StreamManager {
        StreamManager::new(1, &NetworkConfiguration::default())
    }

    #[test]
    fn completes_and_activates_at_activation_tile() {
        let mut rx = ScheduleReceiver::new(10);
        let sm = streams();
        rx.on_packet(header(1, 5, 1, 0), &[elem()], &[], &[], None, &sm);
        assert_eq!(rx.advance(0, 1, 1), ScheduleOutcome::NoChange);
        assert_eq!(rx.state, ScheduleState::AwaitingActivation);
        assert_eq!(rx.advance(5, 1, 1), ScheduleOutcome::Activated);
        assert_eq!(rx.state, ScheduleState::AppliedSchedule);
        assert!(!rx.applied_actions().is_empty());
    }

    #[test]
    fn incomplete_at_activation_queues_resend_after_timeout() {
        let mut rx = ScheduleReceiver::new(2);
        let sm = streams();
        rx.on_packet(header(1, 3, 2, 0), &[elem()], &[], &[], None, &sm);
        // packet 1/2 never arrives.
        assert_eq!(rx.advance(3, 1, 1), ScheduleOutcome::IncompleteAtActivation);
        assert_eq!(rx.state, ScheduleState::IncompleteSchedule);
        assert_eq!(rx.advance(4, 1, 1), ScheduleOutcome::NoChange);
        assert_eq!(rx.advance(5, 1, 1), ScheduleOutcome::ResendQueued);
    }

    #[test]
    fn duplicate_packet_does_not_duplicate_elements() {
        let mut rx = ScheduleReceiver::new(10);
        let sm = streams();
        rx.on_packet(header(1, 5, 1, 0), &[elem()], &[], &[], None, &sm);
        rx.on_packet(header(1, 5, 1, 0), &[elem()], &[], &[], None, &sm);
        assert_eq!(rx.elements.len(), 1);
    }

    #[test]
    fn new_schedule_id_resets_state() {
        let mut rx = ScheduleReceiver::new(10);
        let sm = streams();
        rx.on_packet(header(1, 3, 2, 0), &[elem()], &[], &[], None, &sm);
        rx.on_packet(header(2, 9, 1, 0), &[elem()], &[], &[], None, &sm);
        assert_eq!(rx.state, ScheduleState::SendingSchedule);
        assert_eq!(rx.elements.len(), 1);
    }

    #[test]
    fn info_elements_apply_regardless_of_state() {
        let mut rx = ScheduleReceiver::new(10);
        let sm = streams();
        let info = InfoElement {
            stream_id: StreamId { src_node: 9, dst_node: 1, src_port: 1, dst_port: 5 },
            kind: crate::schedule::element::InfoKind::Removed,
        };
        rx.on_packet(header(1, 5, 1, 0), &[], &[], &[info], None, &sm);
        // No panic / state transition required beyond accepting the packet.
        assert_eq!(rx.state, ScheduleState::SendingSchedule);
    }

    #[test]
    fn master_source_cycles_through_repetitions() {
        struct Sink(std::vec::Vec<std::vec::Vec<u8>>);
        impl Transceiver for Sink {
            fn configure(&mut self, _: crate::transceiver::RadioConfig) -> Result<(), TransceiverError> {
                Ok(())
            }
            fn turn_on(&mut self) -> Result<(), TransceiverError> {
                Ok(())
            }
            fn turn_off(&mut self) -> Result<(), TransceiverError> {
                Ok(())
            }
            fn idle(&mut self) -> Result<(), TransceiverError> {
                Ok(())
            }
            fn send_at(&mut self, buf: &[u8], len: usize, _when: NetworkTime) -> Result<(), TransceiverError> {
                self.0.push(buf[..len].to_vec());
                Ok(())
            }
            fn recv(&mut self, _buf: &mut [u8], _max_len: usize, _deadline: NetworkTime) -> crate::transceiver::RecvResult {
                crate::transceiver::RecvResult::timeout()
            }
        }
        let p0: &[u8] = &[1, 2, 3];
        let p1: &[u8] = &[4, 5, 6];
        let packets = [p0, p1];
        let mut source = MasterScheduleSource::new(&packets, 2);
        let mut sink = Sink(std::vec::Vec::new());
        for _ in 0..4 {
            source.send_next(&mut sink, NetworkTime::ZERO).unwrap();
        }
        assert!(source.is_done());
        assert_eq!(sink.0.len(), 4);
    }
}
