//! Core stream data types (§3): `StreamId`, `StreamParameters`,
//! `StreamStatus`, `Redundancy`.

/// NodeId — small unsigned integer (<= maxNodes). Zero is reserved for
/// the master.
pub type NodeId = u8;

/// Four-tuple identifying a flow end-to-end. Ports are per-node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub src_node: NodeId,
    pub dst_node: NodeId,
    pub src_port: u8,
    pub dst_port: u8,
}

impl StreamId {
    pub const WIRE_SIZE: usize = 4;

    pub fn encode(self) -> [u8; Self::WIRE_SIZE] {
        [self.src_node, self.dst_node, self.src_port, self.dst_port]
    }

    pub fn decode(buf: [u8; Self::WIRE_SIZE]) -> Self {
        Self {
            src_node: buf[0],
            dst_node: buf[1],
            src_port: buf[2],
            dst_port: buf[3],
        }
    }
}

/// Redundancy classes (§3). Spatial variants place additional SEND/RECV
/// pairs on alternate-hop paths chosen by the master's schedule search —
/// this crate treats the extra slot placements as opaque input from the
/// schedule element (§4.8, §9 Open Question c).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redundancy {
    None,
    Double,
    Triple,
    DoubleSpatial,
    TripleSpatial,
}

impl Redundancy {
    /// Number of transmit/receive opportunities per period (I4).
    pub fn count(self) -> u8 {
        match self {
            Self::None => 1,
            Self::Double | Self::DoubleSpatial => 2,
            Self::Triple | Self::TripleSpatial => 3,
        }
    }

    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Double),
            2 => Some(Self::Triple),
            3 => Some(Self::DoubleSpatial),
            4 => Some(Self::TripleSpatial),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Double => 1,
            Self::Triple => 2,
            Self::DoubleSpatial => 3,
            Self::TripleSpatial => 4,
        }
    }
}

/// Direction of a stream relative to the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}

/// Cached stream parameters — may be revised downward by the master
/// during negotiation (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParameters {
    pub redundancy: Redundancy,
    /// Period, in tiles — an enumerated power-of-two multiple of the tile.
    pub period_tiles: u16,
    pub payload_size: u8,
    pub direction: Direction,
}

/// Finite stream/server lifecycle states (§3, P6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Uninitialized,
    Connecting,
    ConnectFailed,
    AcceptWait,
    Established,
    ListenWait,
    ListenFailed,
    Listen,
    RemotelyClosed,
    Reopened,
    CloseWait,
}

impl StreamStatus {
    /// True if the status is one of the transient opening/closing states
    /// named by invariant I3.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::AcceptWait
                | Self::ListenWait
                | Self::RemotelyClosed
                | Self::Reopened
                | Self::CloseWait
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_round_trips() {
        let id = StreamId {
            src_node: 1,
            dst_node: 2,
            src_port: 3,
            dst_port: 4,
        };
        assert_eq!(StreamId::decode(id.encode()), id);
    }

    #[test]
    fn redundancy_counts_match_spec() {
        assert_eq!(Redundancy::None.count(), 1);
        assert_eq!(Redundancy::Double.count(), 2);
        assert_eq!(Redundancy::Triple.count(), 3);
        assert_eq!(Redundancy::DoubleSpatial.count(), 2);
        assert_eq!(Redundancy::TripleSpatial.count(), 3);
    }

    #[test]
    fn redundancy_wire_round_trips() {
        for r in [
            Redundancy::None,
            Redundancy::Double,
            Redundancy::Triple,
            Redundancy::DoubleSpatial,
            Redundancy::TripleSpatial,
        ] {
            assert_eq!(Redundancy::from_wire(r.to_wire()), Some(r));
        }
    }
}
