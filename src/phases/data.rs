//! Data phase (§4.7): executes per-slot send/receive/sleep from the
//! expanded schedule, handing payloads to/from the matching `Stream`
//! through the stream manager.

use crate::error::TransceiverError;
use crate::schedule::element::ScheduleAction;
use crate::stream::endpoint::MAX_PAYLOAD;
use crate::stream::manager::StreamManager;
use crate::stream::types::StreamId;
use crate::time::NetworkTime;
use crate::transceiver::{RecvStatus, Transceiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Slept,
    Sent { stream_id: StreamId, bytes: usize },
    NothingPending { stream_id: StreamId },
    Received { stream_id: StreamId },
    Missed { stream_id: StreamId },
}

pub struct DataPhase;

impl DataPhase {
    /// Execute one slot's action. `slot_origin`/`slot_duration_ns` bound
    /// the SEND/RECV deadline; late processing must not push into the
    /// next slot, so callers are expected to size `slot_duration_ns`
    /// tightly and simply accept whatever outcome this returns once the
    /// deadline passes.
    pub fn execute_slot<T: Transceiver>(
        transceiver: &mut T,
        streams: &StreamManager,
        action: ScheduleAction,
        slot_origin: NetworkTime,
        slot_duration_ns: i64,
    ) -> Result<SlotOutcome, TransceiverError> {
        match action {
            ScheduleAction::Sleep => {
                transceiver.idle()?;
                Ok(SlotOutcome::Slept)
            }
            ScheduleAction::Send(stream_id) => Self::do_send(transceiver, streams, stream_id, slot_origin),
            ScheduleAction::Recv(stream_id) => {
                Self::do_recv(transceiver, streams, stream_id, slot_origin, slot_duration_ns)
            }
        }
    }

    fn do_send<T: Transceiver>(
        transceiver: &mut T,
        streams: &StreamManager,
        stream_id: StreamId,
        slot_origin: NetworkTime,
    ) -> Result<SlotOutcome, TransceiverError> {
        let Some(handle) = streams.find_handle(stream_id) else {
            return Ok(SlotOutcome::NothingPending { stream_id });
        };
        let Some((payload, payload_size)) = streams.take_tx_packet(handle) else {
            return Ok(SlotOutcome::NothingPending { stream_id });
        };
        transceiver.send_at(&payload[..payload_size.min(MAX_PAYLOAD)], payload_size, slot_origin)?;
        Ok(SlotOutcome::Sent { stream_id, bytes: payload_size })
    }

    fn do_recv<T: Transceiver>(
        transceiver: &mut T,
        streams: &StreamManager,
        stream_id: StreamId,
        slot_origin: NetworkTime,
        slot_duration_ns: i64,
    ) -> Result<SlotOutcome, TransceiverError> {
        let Some(handle) = streams.find_handle(stream_id) else {
            return Ok(SlotOutcome::Missed { stream_id });
        };
        let mut buf = [0u8; MAX_PAYLOAD];
        let deadline = slot_origin + slot_duration_ns;
        let result = transceiver.recv(&mut buf, MAX_PAYLOAD, deadline);
        if result.status != RecvStatus::Ok {
            streams.miss_packet(handle);
            return Ok(SlotOutcome::Missed { stream_id });
        }
        streams.deliver_rx_packet(handle, &buf[..result.size]);
        Ok(SlotOutcome::Received { stream_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfiguration;
    use crate::stream::types::{Direction, Redundancy, StreamParameters};
    use crate::transceiver::{RadioConfig, RecvResult};

    struct FakeRadio {
        inbox: Option<std::vec::Vec<u8>>,
        sent: std::vec::Vec<std::vec::Vec<u8>>,
        idled: u32,
    }

    impl Transceiver for FakeRadio {
        fn configure(&mut self, _: RadioConfig) -> Result<(), TransceiverError> {
            Ok(())
        }
        fn turn_on(&mut self) -> Result<(), TransceiverError> {
            Ok(())
        }
        fn turn_off(&mut self) -> Result<(), TransceiverError> {
            Ok(())
        }
        fn idle(&mut self) -> Result<(), TransceiverError> {
            self.idled += 1;
            Ok(())
        }
        fn send_at(&mut self, buf: &[u8], len: usize, _when: NetworkTime) -> Result<(), TransceiverError> {
            self.sent.push(buf[..len].to_vec());
            Ok(())
        }
        fn recv(&mut self, buf: &mut [u8], max_len: usize, _deadline: NetworkTime) -> RecvResult {
            match self.inbox.take() {
                Some(data) => {
                    let n = data.len().min(max_len);
                    buf[..n].copy_from_slice(&data[..n]);
                    RecvResult {
                        status: RecvStatus::Ok,
                        size: n,
                        rx_timestamp: NetworkTime::ZERO,
                        rssi: -40,
                        timestamp_valid: true,
                    }
                }
                None => RecvResult::timeout(),
            }
        }
    }

    fn sid() -> StreamId {
        StreamId { src_node: 1, dst_node: 2, src_port: 1, dst_port: 1 }
    }

    #[test]
    fn sleep_idles_the_radio() {
        let mgr = StreamManager::new(1, &NetworkConfiguration::default());
        let mut radio = FakeRadio { inbox: None, sent: std::vec::Vec::new(), idled: 0 };
        let outcome = DataPhase::execute_slot(&mut radio, &mgr, ScheduleAction::Sleep, NetworkTime::ZERO, 1000).unwrap();
        assert_eq!(outcome, SlotOutcome::Slept);
        assert_eq!(radio.idled, 1);
    }

    #[test]
    fn send_with_no_pending_stream_is_noop() {
        let mgr = StreamManager::new(1, &NetworkConfiguration::default());
        let mut radio = FakeRadio { inbox: None, sent: std::vec::Vec::new(), idled: 0 };
        let outcome = DataPhase::execute_slot(&mut radio, &mgr, ScheduleAction::Send(sid()), NetworkTime::ZERO, 1000).unwrap();
        assert_eq!(outcome, SlotOutcome::NothingPending { stream_id: sid() });
    }

    #[test]
    fn triple_redundancy_stream_sends_payload_three_times_then_rests() {
        let mgr = std::sync::Arc::new(StreamManager::new(1, &NetworkConfiguration::default()));
        let params = StreamParameters {
            redundancy: Redundancy::Triple,
            period_tiles: 1,
            payload_size: 4,
            direction: Direction::Tx,
        };
        let stream_id = StreamId { src_node: 1, dst_node: 2, src_port: 16, dst_port: 1 };

        // connect() blocks on the condvar until the master's Accepted info
        // element lands, so drive it from another thread, mirroring the
        // manager's own listen/connect fixture.
        let mgr2 = mgr.clone();
        let connector = std::thread::spawn(move || mgr2.connect(2, 1, params));
        std::thread::sleep(std::time::Duration::from_millis(20));
        mgr.apply_info_element(crate::schedule::element::InfoElement {
            stream_id,
            kind: crate::schedule::element::InfoKind::Accepted,
        });
        let handle = connector.join().unwrap().unwrap();
        mgr.write(handle, b"abcd").unwrap();

        let mut radio = FakeRadio { inbox: None, sent: std::vec::Vec::new(), idled: 0 };
        for _ in 0..2 {
            let outcome =
                DataPhase::execute_slot(&mut radio, &mgr, ScheduleAction::Send(stream_id), NetworkTime::ZERO, 1000).unwrap();
            assert_eq!(outcome, SlotOutcome::Sent { stream_id, bytes: 4 });
        }
        let seq_before = mgr.seq_no(handle).unwrap();
        let outcome = DataPhase::execute_slot(&mut radio, &mgr, ScheduleAction::Send(stream_id), NetworkTime::ZERO, 1000).unwrap();
        assert_eq!(outcome, SlotOutcome::Sent { stream_id, bytes: 4 });
        // Third copy within the period exhausts the TRIPLE budget: the
        // period rolls over (seqNo advances by exactly 1) and the pending
        // packet is consumed.
        assert_eq!(mgr.seq_no(handle).unwrap(), seq_before + 1);
        assert_eq!(radio.sent.len(), 3);
        assert!(radio.sent.iter().all(|p| p.as_slice() == b"abcd"));

        let outcome = DataPhase::execute_slot(&mut radio, &mgr, ScheduleAction::Send(stream_id), NetworkTime::ZERO, 1000).unwrap();
        assert_eq!(outcome, SlotOutcome::NothingPending { stream_id });
    }

    #[test]
    fn recv_timeout_on_established_stream_calls_miss_packet() {
        let mgr = std::sync::Arc::new(StreamManager::new(2, &NetworkConfiguration::default()));
        let params = StreamParameters {
            redundancy: Redundancy::Double,
            period_tiles: 1,
            payload_size: 4,
            direction: Direction::Rx,
        };
        let stream_id = StreamId { src_node: 2, dst_node: 1, src_port: 16, dst_port: 1 };
        let mgr2 = mgr.clone();
        let connector = std::thread::spawn(move || mgr2.connect(1, 1, params));
        std::thread::sleep(std::time::Duration::from_millis(20));
        mgr.apply_info_element(crate::schedule::element::InfoElement {
            stream_id,
            kind: crate::schedule::element::InfoKind::Accepted,
        });
        let handle = connector.join().unwrap().unwrap();

        let mut radio = FakeRadio { inbox: None, sent: std::vec::Vec::new(), idled: 0 };
        let outcome = DataPhase::execute_slot(&mut radio, &mgr, ScheduleAction::Recv(stream_id), NetworkTime::ZERO, 1000).unwrap();
        assert_eq!(outcome, SlotOutcome::Missed { stream_id });
        let seq_before = mgr.seq_no(handle).unwrap();
        let outcome = DataPhase::execute_slot(&mut radio, &mgr, ScheduleAction::Recv(stream_id), NetworkTime::ZERO, 1000).unwrap();
        assert_eq!(outcome, SlotOutcome::Missed { stream_id });
        // Double redundancy: two misses exhaust the period's receive
        // budget, so seqNo rolls over exactly as it would for two hits.
        assert_eq!(mgr.seq_no(handle).unwrap(), seq_before + 1);
    }

    #[test]
    fn recv_timeout_reports_missed() {
        let mgr = StreamManager::new(1, &NetworkConfiguration::default());
        let mut radio = FakeRadio { inbox: None, sent: std::vec::Vec::new(), idled: 0 };
        let outcome = DataPhase::execute_slot(&mut radio, &mgr, ScheduleAction::Recv(sid()), NetworkTime::ZERO, 1000).unwrap();
        assert_eq!(outcome, SlotOutcome::Missed { stream_id: sid() });
    }
}
