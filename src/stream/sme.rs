//! Stream-Management Element and its queue (§3, §4.5, I5).
//!
//! Bounded, fixed-capacity table — the same shape as this codebase's
//! `rpc::auth::MAX_CLIENTS`-bounded session array — deduplicated by
//! `StreamId`: a later SME for the same key replaces (coalesces onto)
//! an earlier one rather than growing the queue (I5, §5).

use heapless::Vec;

use super::types::{StreamId, StreamParameters};

/// Maximum outstanding SMEs queued for the next uplink opportunity.
pub const MAX_QUEUED_SMES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmeKind {
    Connect,
    Listen,
    Closed,
    Resend,
}

/// Small record produced by the stream layer, queued for the next
/// uplink (§3).
#[derive(Debug, Clone, Copy)]
pub struct Sme {
    pub stream_id: StreamId,
    pub params: Option<StreamParameters>,
    pub kind: SmeKind,
}

/// FIFO queue with dedup-by-`(StreamId, kind-class)` semantics: enqueuing
/// the same key twice replaces the existing entry in place, preserving
/// its original FIFO position (P5).
#[derive(Default)]
pub struct SmeQueue {
    entries: Vec<Sme, MAX_QUEUED_SMES>,
}

impl SmeQueue {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Enqueue `sme`, coalescing onto any existing entry for the same
    /// `stream_id`. Returns `false` if the queue is full and the entry
    /// could not be added (a pre-existing entry for the same id is
    /// always updated even when full).
    pub fn enqueue(&mut self, sme: Sme) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.stream_id == sme.stream_id) {
            *existing = sme;
            return true;
        }
        self.entries.push(sme).is_ok()
    }

    /// Drain up to `max` SMEs for inclusion in the next outbound uplink
    /// packet, FIFO order.
    pub fn drain(&mut self, max: usize) -> Vec<Sme, MAX_QUEUED_SMES> {
        let n = max.min(self.entries.len());
        let mut out = Vec::new();
        for _ in 0..n {
            let sme = self.entries.remove(0);
            let _ = out.push(sme);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::{Direction, Redundancy};

    fn sid(p: u8) -> StreamId {
        StreamId {
            src_node: 1,
            dst_node: 2,
            src_port: p,
            dst_port: 1,
        }
    }

    fn params() -> StreamParameters {
        StreamParameters {
            redundancy: Redundancy::None,
            period_tiles: 1,
            payload_size: 16,
            direction: Direction::Tx,
        }
    }

    #[test]
    fn duplicate_enqueue_coalesces_to_one_entry() {
        let mut q = SmeQueue::new();
        q.enqueue(Sme {
            stream_id: sid(1),
            params: Some(params()),
            kind: SmeKind::Connect,
        });
        q.enqueue(Sme {
            stream_id: sid(1),
            params: Some(params()),
            kind: SmeKind::Resend,
        });
        assert_eq!(q.len(), 1);
        let drained = q.drain(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].kind, SmeKind::Resend);
    }

    #[test]
    fn distinct_stream_ids_both_queue() {
        let mut q = SmeQueue::new();
        q.enqueue(Sme {
            stream_id: sid(1),
            params: None,
            kind: SmeKind::Closed,
        });
        q.enqueue(Sme {
            stream_id: sid(2),
            params: None,
            kind: SmeKind::Closed,
        });
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_respects_fifo_order() {
        let mut q = SmeQueue::new();
        for p in 1..=3u8 {
            q.enqueue(Sme {
                stream_id: sid(p),
                params: None,
                kind: SmeKind::Closed,
            });
        }
        let drained = q.drain(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].stream_id, sid(1));
        assert_eq!(drained[1].stream_id, sid(2));
        assert_eq!(q.len(), 1);
    }
}
