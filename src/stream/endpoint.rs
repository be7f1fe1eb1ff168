//! `Stream` and `Server` — application-facing endpoint state (§3, §4.9).
//!
//! Fixed-capacity packet slots, no heap. Redundancy bookkeeping enforces
//! I4: `txCount`/`rxCount` stay below `redundancyCount` between period
//! boundaries and reset (bumping `seqNo`) exactly when the period's
//! budget is exhausted.

use heapless::Deque;

use super::sme::MAX_QUEUED_SMES;
use super::types::{NodeId, StreamId, StreamParameters, StreamStatus};

/// Largest payload a data slot carries (§5 resource policy: packet
/// buffers are fixed-size, <= 125 bytes).
pub const MAX_PAYLOAD: usize = 125;

/// Per-stream send/receive callback, invoked once per period by the data
/// phase. Plain function pointers — no heap, no `dyn` — matching this
/// codebase's embedded FSM convention of fn-pointer handlers over boxed
/// closures.
pub type SendCallback = fn(StreamId, &[u8]);
pub type ReceiveCallback = fn(StreamId, &[u8]);

#[derive(Debug, Clone, Copy)]
pub struct PacketSlot {
    data: [u8; MAX_PAYLOAD],
    len: u8,
    /// Set once the slot has been dispatched/delivered to the
    /// application this period; cleared at the period boundary.
    pub consumed: bool,
}

impl Default for PacketSlot {
    fn default() -> Self {
        Self {
            data: [0; MAX_PAYLOAD],
            len: 0,
            consumed: true,
        }
    }
}

impl PacketSlot {
    pub fn set(&mut self, payload: &[u8]) -> bool {
        if payload.len() > MAX_PAYLOAD {
            return false;
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.len = payload.len() as u8;
        self.consumed = false;
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn is_pending(&self) -> bool {
        !self.consumed
    }
}

/// Application-facing stream endpoint.
pub struct Stream {
    pub stream_id: StreamId,
    pub status: StreamStatus,
    pub params: StreamParameters,

    pub pending_tx: PacketSlot,
    pub last_rx: PacketSlot,

    tx_count: u8,
    rx_count: u8,
    pub seq_no: u32,

    /// Tiles remaining before the pending SME is re-enqueued.
    pub sme_timeout: u16,
    /// Tiles remaining before a CONNECTING/LISTEN_WAIT open gives up.
    pub fail_timeout: u16,

    pub send_callback: Option<SendCallback>,
    pub receive_callback: Option<ReceiveCallback>,
}

impl Stream {
    pub fn new(stream_id: StreamId, params: StreamParameters, status: StreamStatus) -> Self {
        Self {
            stream_id,
            status,
            params,
            pending_tx: PacketSlot::default(),
            last_rx: PacketSlot::default(),
            tx_count: 0,
            rx_count: 0,
            seq_no: 0,
            sme_timeout: 0,
            fail_timeout: 0,
            send_callback: None,
            receive_callback: None,
        }
    }

    fn redundancy_count(&self) -> u8 {
        self.params.redundancy.count()
    }

    /// §4.7 `sendPacket`: pull the pending packet for dispatch if the
    /// per-period transmit budget (I4) has not been exhausted.
    pub fn send_packet(&mut self) -> Option<[u8; MAX_PAYLOAD]> {
        if !self.pending_tx.is_pending() {
            return None;
        }
        if self.tx_count >= self.redundancy_count() {
            return None;
        }
        let mut out = [0u8; MAX_PAYLOAD];
        let slice = self.pending_tx.as_slice();
        out[..slice.len()].copy_from_slice(slice);
        self.tx_count += 1;
        if self.tx_count >= self.redundancy_count() {
            self.tx_count = 0;
            self.pending_tx.consumed = true;
            self.seq_no = self.seq_no.wrapping_add(1);
        }
        Some(out)
    }

    /// §4.7 `receivePacket`: deliver `payload` into the last-rx slot,
    /// enforcing the per-period receive budget (I4). Returns `true` if
    /// this is the first delivery in the period (the one the
    /// application/callback should observe).
    pub fn receive_packet(&mut self, payload: &[u8]) -> bool {
        if self.rx_count >= self.redundancy_count() {
            return false;
        }
        let first = self.rx_count == 0;
        if first {
            self.last_rx.set(payload);
        }
        self.rx_count += 1;
        if self.rx_count >= self.redundancy_count() {
            self.rx_count = 0;
            self.seq_no = self.seq_no.wrapping_add(1);
        }
        first
    }

    /// §4.7 `missPacket`: called on a RECV timeout/CRC failure for this
    /// stream's slot. Counts against the same per-period receive budget
    /// as `receive_packet` (I4), so a redundancy period that ends in a
    /// mix of hits and misses still rolls `rxCount`/`seqNo` over instead
    /// of leaving the budget stuck mid-period for the next one.
    pub fn miss_packet(&mut self) {
        if self.rx_count >= self.redundancy_count() {
            return;
        }
        self.rx_count += 1;
        if self.rx_count >= self.redundancy_count() {
            self.rx_count = 0;
            self.seq_no = self.seq_no.wrapping_add(1);
        }
    }

    /// Reset per-period counters at a period boundary without waiting
    /// for the redundancy budget to be exhausted (used when a period
    /// elapses with some, but not all, opportunities consumed).
    pub fn reset_period(&mut self) {
        if self.tx_count != 0 || self.rx_count != 0 {
            self.seq_no = self.seq_no.wrapping_add(1);
        }
        self.tx_count = 0;
        self.rx_count = 0;
        self.pending_tx.consumed = true;
        self.last_rx.consumed = true;
    }
}

/// Application-facing server endpoint — owns a FIFO of accepted-but-
/// not-yet-returned stream ids (§3).
pub struct Server {
    pub port: u8,
    pub status: StreamStatus,
    pub params: StreamParameters,
    pub sme_timeout: u16,
    pub fail_timeout: u16,
    pending_accept: Deque<StreamId, MAX_QUEUED_SMES>,
}

impl Server {
    pub fn new(port: u8, params: StreamParameters, owner: NodeId) -> Self {
        let _ = owner;
        Self {
            port,
            status: StreamStatus::ListenWait,
            params,
            sme_timeout: 0,
            fail_timeout: 0,
            pending_accept: Deque::new(),
        }
    }

    pub fn push_incoming(&mut self, stream_id: StreamId) -> bool {
        self.pending_accept.push_back(stream_id).is_ok()
    }

    pub fn pop_incoming(&mut self) -> Option<StreamId> {
        self.pending_accept.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_accept.is_empty()
    }
}
