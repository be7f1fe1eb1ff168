//! `ScheduleElement`, `ResponseElement`, `InfoElement` (compact,
//! downlink-carried) and `ExplicitScheduleElement` (per-slot, expanded;
//! §3, §4.6, §4.8).

use crate::stream::types::{Redundancy, StreamId};

/// A single compact schedule entry for an installed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleElement {
    pub stream_id: StreamId,
    /// Offset in tiles, within one period, of this node's hop slot.
    pub offset: u16,
    pub period_tiles: u16,
    pub redundancy: Redundancy,
}

impl ScheduleElement {
    pub const TYPE_TAG: u8 = 0x01;
    pub const WIRE_SIZE: usize = 1 + StreamId::WIRE_SIZE + 2 + 2 + 1;

    pub fn encode(&self, out: &mut [u8]) {
        out[0] = Self::TYPE_TAG;
        out[1..5].copy_from_slice(&self.stream_id.encode());
        out[5..7].copy_from_slice(&self.offset.to_le_bytes());
        out[7..9].copy_from_slice(&self.period_tiles.to_le_bytes());
        out[9] = self.redundancy.to_wire();
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE || buf[0] != Self::TYPE_TAG {
            return None;
        }
        Some(Self {
            stream_id: StreamId::decode(buf[1..5].try_into().ok()?),
            offset: u16::from_le_bytes(buf[5..7].try_into().ok()?),
            period_tiles: u16::from_le_bytes(buf[7..9].try_into().ok()?),
            redundancy: Redundancy::from_wire(buf[9])?,
        })
    }
}

/// Response element carrying master-challenge authentication material
/// (§3, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseElement {
    pub session_id: u32,
    pub hmac_tag: [u8; 32],
}

impl ResponseElement {
    pub const TYPE_TAG: u8 = 0x02;
    pub const WIRE_SIZE: usize = 1 + 4 + 32;

    pub fn encode(&self, out: &mut [u8]) {
        out[0] = Self::TYPE_TAG;
        out[1..5].copy_from_slice(&self.session_id.to_le_bytes());
        out[5..37].copy_from_slice(&self.hmac_tag);
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE || buf[0] != Self::TYPE_TAG {
            return None;
        }
        let mut tag = [0u8; 32];
        tag.copy_from_slice(&buf[5..37]);
        Some(Self {
            session_id: u32::from_le_bytes(buf[1..5].try_into().ok()?),
            hmac_tag: tag,
        })
    }
}

/// Info element kinds (§3): schedule/stream/server lifecycle events that
/// apply immediately through the stream manager regardless of schedule
/// distribution state (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Accepted,
    Rejected,
    Reopened,
    Removed,
}

impl InfoKind {
    fn to_wire(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::Rejected => 1,
            Self::Reopened => 2,
            Self::Removed => 3,
        }
    }

    fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Accepted),
            1 => Some(Self::Rejected),
            2 => Some(Self::Reopened),
            3 => Some(Self::Removed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoElement {
    pub stream_id: StreamId,
    pub kind: InfoKind,
}

impl InfoElement {
    pub const TYPE_TAG: u8 = 0x03;
    pub const WIRE_SIZE: usize = 1 + StreamId::WIRE_SIZE + 1;

    pub fn encode(&self, out: &mut [u8]) {
        out[0] = Self::TYPE_TAG;
        out[1..5].copy_from_slice(&self.stream_id.encode());
        out[5] = self.kind.to_wire();
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE || buf[0] != Self::TYPE_TAG {
            return None;
        }
        Some(Self {
            stream_id: StreamId::decode(buf[1..5].try_into().ok()?),
            kind: InfoKind::from_wire(buf[5])?,
        })
    }
}

/// Per-slot action this node performs, as produced by the schedule
/// expander (§4.7, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    Sleep,
    Send(StreamId),
    Recv(StreamId),
}

/// One entry of the expanded, per-node, per-slot action vector.
pub type ExplicitScheduleElement = ScheduleAction;

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> StreamId {
        StreamId {
            src_node: 1,
            dst_node: 2,
            src_port: 3,
            dst_port: 4,
        }
    }

    #[test]
    fn schedule_element_round_trips() {
        let e = ScheduleElement {
            stream_id: sid(),
            offset: 7,
            period_tiles: 16,
            redundancy: Redundancy::Triple,
        };
        let mut buf = [0u8; ScheduleElement::WIRE_SIZE];
        e.encode(&mut buf);
        assert_eq!(ScheduleElement::decode(&buf), Some(e));
    }

    #[test]
    fn response_element_round_trips() {
        let e = ResponseElement {
            session_id: 99,
            hmac_tag: [7u8; 32],
        };
        let mut buf = [0u8; ResponseElement::WIRE_SIZE];
        e.encode(&mut buf);
        assert_eq!(ResponseElement::decode(&buf), Some(e));
    }

    #[test]
    fn info_element_round_trips() {
        let e = InfoElement {
            stream_id: sid(),
            kind: InfoKind::Removed,
        };
        let mut buf = [0u8; InfoElement::WIRE_SIZE];
        e.encode(&mut buf);
        assert_eq!(InfoElement::decode(&buf), Some(e));
    }

    #[test]
    fn decode_rejects_wrong_tag() {
        let mut buf = [0u8; ScheduleElement::WIRE_SIZE];
        buf[0] = ResponseElement::TYPE_TAG;
        assert_eq!(ScheduleElement::decode(&buf), None);
    }
}
