//! Uplink phase (§4.5, §6): assigned per-tile uplink of this node's
//! neighbor bitmask, forwarded topology elements, and drained SMEs.
//!
//! Wire layout: `hop(1) | assignee(1) | numTopology(1) | numSME(1) |
//! neighborBitmask(B) | forwarded[(nodeId(1), bitmask(B))]* |
//! SMEs[(kind(1), streamId(4), hasParams(1), params(5))]*`. `B` is
//! `NetworkConfiguration::neighbor_bitmask_bytes()`. The in-packet counts
//! gate parsing exactly as prescribed: a malformed trailing TLV just
//! truncates the list rather than panicking.

use heapless::Vec;

use crate::config::NetworkConfiguration;
use crate::error::TransceiverError;
use crate::packet::codec::{FrameHeader, HEADER_SIZE, MAX_FRAME_SIZE, validate_frame};
use crate::stream::sme::{Sme, SmeKind};
use crate::stream::types::{Redundancy, StreamId, StreamParameters};
use crate::time::NetworkTime;
use crate::topology::NeighborTable;
use crate::transceiver::{RecvStatus, Transceiver};

pub const MAX_BITMASK_BYTES: usize = 64;
pub const MAX_FORWARDED_TOPOLOGY: usize = 8;
pub const MAX_FORWARDED_SME: usize = 8;

/// One forwarded topology element: a neighbor's own bitmask, relayed
/// one hop closer to the master.
#[derive(Debug, Clone, Copy)]
pub struct TopologyElement {
    pub node_id: u8,
    pub bitmask: [u8; MAX_BITMASK_BYTES],
    pub bitmask_len: usize,
}

fn sme_kind_to_wire(kind: SmeKind) -> u8 {
    match kind {
        SmeKind::Connect => 0,
        SmeKind::Listen => 1,
        SmeKind::Closed => 2,
        SmeKind::Resend => 3,
    }
}

fn sme_kind_from_wire(b: u8) -> Option<SmeKind> {
    match b {
        0 => Some(SmeKind::Connect),
        1 => Some(SmeKind::Listen),
        2 => Some(SmeKind::Closed),
        3 => Some(SmeKind::Resend),
        _ => None,
    }
}

const SME_WIRE_SIZE: usize = 1 + StreamId::WIRE_SIZE + 1 + 5;

fn encode_sme(sme: &Sme, out: &mut [u8]) {
    out[0] = sme_kind_to_wire(sme.kind);
    out[1..5].copy_from_slice(&sme.stream_id.encode());
    match sme.params {
        Some(p) => {
            out[5] = 1;
            out[6] = p.redundancy.to_wire();
            out[7..9].copy_from_slice(&p.period_tiles.to_le_bytes());
            out[9] = p.payload_size;
            out[10] = if p.direction == crate::stream::types::Direction::Tx { 0 } else { 1 };
        }
        None => out[5..11].fill(0),
    }
}

fn decode_sme(buf: &[u8]) -> Option<Sme> {
    if buf.len() < SME_WIRE_SIZE {
        return None;
    }
    let kind = sme_kind_from_wire(buf[0])?;
    let stream_id = StreamId::decode(buf[1..5].try_into().ok()?);
    let params = if buf[5] == 1 {
        Some(StreamParameters {
            redundancy: Redundancy::from_wire(buf[6])?,
            period_tiles: u16::from_le_bytes(buf[7..9].try_into().ok()?),
            payload_size: buf[9],
            direction: if buf[10] == 0 {
                crate::stream::types::Direction::Tx
            } else {
                crate::stream::types::Direction::Rx
            },
        })
    } else {
        None
    };
    Some(Sme { stream_id, params, kind })
}

/// Decoded uplink payload, parsed up to the first TLV that overruns the
/// buffer or exhausts its count prefix.
pub struct UplinkPacket {
    pub hop: u8,
    pub assignee: u8,
    pub neighbor_bitmask: [u8; MAX_BITMASK_BYTES],
    pub neighbor_bitmask_len: usize,
    pub forwarded: Vec<TopologyElement, MAX_FORWARDED_TOPOLOGY>,
    pub smes: Vec<Sme, MAX_FORWARDED_SME>,
}

impl UplinkPacket {
    pub fn decode(buf: &[u8], bitmask_bytes: usize) -> Option<Self> {
        if buf.len() < 4 + bitmask_bytes {
            return None;
        }
        let hop = buf[0];
        let assignee = buf[1];
        let num_topology = buf[2] as usize;
        let num_sme = buf[3] as usize;
        let mut cursor = 4;

        let mut neighbor_bitmask = [0u8; MAX_BITMASK_BYTES];
        let b = bitmask_bytes.min(MAX_BITMASK_BYTES);
        neighbor_bitmask[..b].copy_from_slice(&buf[cursor..cursor + b]);
        cursor += bitmask_bytes;

        let mut forwarded = Vec::new();
        for _ in 0..num_topology.min(MAX_FORWARDED_TOPOLOGY) {
            if cursor + 1 + bitmask_bytes > buf.len() {
                break;
            }
            let node_id = buf[cursor];
            let mut bm = [0u8; MAX_BITMASK_BYTES];
            bm[..b].copy_from_slice(&buf[cursor + 1..cursor + 1 + b]);
            let _ = forwarded.push(TopologyElement { node_id, bitmask: bm, bitmask_len: b });
            cursor += 1 + bitmask_bytes;
        }

        let mut smes = Vec::new();
        for _ in 0..num_sme.min(MAX_FORWARDED_SME) {
            if cursor + SME_WIRE_SIZE > buf.len() {
                break;
            }
            if let Some(sme) = decode_sme(&buf[cursor..cursor + SME_WIRE_SIZE]) {
                let _ = smes.push(sme);
            }
            cursor += SME_WIRE_SIZE;
        }

        Some(Self {
            hop,
            assignee,
            neighbor_bitmask,
            neighbor_bitmask_len: b,
            forwarded,
            smes,
        })
    }
}

/// Assembles and dispatches this node's uplink packet, or listens for
/// one addressed through it for onward forwarding (§4.5).
pub struct UplinkPhase {
    pub local_node: u8,
    /// Next hop toward the master — a configured static hop, or the
    /// result of a routing decision made outside this phase (§4.5 allows
    /// either).
    pub next_hop: u8,
    outbound_topology: Vec<TopologyElement, MAX_FORWARDED_TOPOLOGY>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    Sent { bytes: usize },
    Relayed,
    Idle,
}

impl UplinkPhase {
    pub fn new(local_node: u8, next_hop: u8) -> Self {
        Self { local_node, next_hop, outbound_topology: Vec::new() }
    }

    /// Round-robin turn check: `numUplinkPackets` per uplink tile,
    /// traversing NodeIds 1..maxNodes-1 (§4.5). `slot_counter` advances
    /// once per uplink tile processed network-wide.
    pub fn is_my_turn(&self, slot_counter: u32, config: &NetworkConfiguration) -> bool {
        if config.max_nodes <= 1 {
            return false;
        }
        let span = (config.max_nodes - 1) as u32;
        let turn = slot_counter % span + 1;
        turn == self.local_node as u32
    }

    /// Queue a neighbor's forwarded topology element for inclusion in
    /// this node's own next outbound uplink packet.
    pub fn queue_forward(&mut self, element: TopologyElement) {
        if self.outbound_topology.iter().any(|e| e.node_id == element.node_id) {
            return;
        }
        let _ = self.outbound_topology.push(element);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn execute<T: Transceiver>(
        &mut self,
        transceiver: &mut T,
        slot_counter: u32,
        neighbors: &mut NeighborTable,
        smes: &mut Vec<Sme, MAX_FORWARDED_SME>,
        deadline: NetworkTime,
        send_at: NetworkTime,
        config: &NetworkConfiguration,
    ) -> Result<UplinkOutcome, TransceiverError> {
        if self.is_my_turn(slot_counter, config) {
            self.send_uplink(transceiver, neighbors, smes, send_at, config)
        } else {
            self.listen_for_forward(transceiver, deadline, config)
        }
    }

    fn send_uplink<T: Transceiver>(
        &mut self,
        transceiver: &mut T,
        neighbors: &mut NeighborTable,
        smes: &mut Vec<Sme, MAX_FORWARDED_SME>,
        send_at: NetworkTime,
        config: &NetworkConfiguration,
    ) -> Result<UplinkOutcome, TransceiverError> {
        let bitmask_bytes = config.neighbor_bitmask_bytes();
        let mut buf = [0u8; MAX_FRAME_SIZE];
        FrameHeader { hop: 0, pan_id: config.pan_id }.encode(&mut buf);
        let mut cursor = HEADER_SIZE;

        buf[cursor] = 0; // hop within payload reserved for future multi-hop uplink relays
        buf[cursor + 1] = self.next_hop;
        let num_topology_idx = cursor + 2;
        let num_sme_idx = cursor + 3;
        cursor += 4;

        let mut neighbor_buf = [0u8; MAX_BITMASK_BYTES];
        neighbors.pack_bitmask(config.max_nodes, &mut neighbor_buf[..bitmask_bytes.min(MAX_BITMASK_BYTES)]);
        buf[cursor..cursor + bitmask_bytes].copy_from_slice(&neighbor_buf[..bitmask_bytes]);
        cursor += bitmask_bytes;

        let budget: usize = config.topology_sme_ratio.max(1) as usize;
        let mut topology_count = 0u8;
        for elem in self.outbound_topology.iter().take(budget.min(MAX_FORWARDED_TOPOLOGY)) {
            if cursor + 1 + bitmask_bytes > buf.len() {
                break;
            }
            buf[cursor] = elem.node_id;
            buf[cursor + 1..cursor + 1 + bitmask_bytes].copy_from_slice(&elem.bitmask[..bitmask_bytes]);
            cursor += 1 + bitmask_bytes;
            topology_count += 1;
        }
        buf[num_topology_idx] = topology_count;
        self.outbound_topology.clear();

        let mut sme_count = 0u8;
        for sme in smes.iter() {
            if cursor + SME_WIRE_SIZE > buf.len() {
                break;
            }
            encode_sme(sme, &mut buf[cursor..cursor + SME_WIRE_SIZE]);
            cursor += SME_WIRE_SIZE;
            sme_count += 1;
        }
        buf[num_sme_idx] = sme_count;
        smes.clear();

        transceiver.send_at(&buf, cursor, send_at)?;
        Ok(UplinkOutcome::Sent { bytes: cursor })
    }

    fn listen_for_forward<T: Transceiver>(
        &mut self,
        transceiver: &mut T,
        deadline: NetworkTime,
        config: &NetworkConfiguration,
    ) -> Result<UplinkOutcome, TransceiverError> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let result = transceiver.recv(&mut buf, MAX_FRAME_SIZE, deadline);
        if result.status != RecvStatus::Ok {
            return Ok(UplinkOutcome::Idle);
        }
        if validate_frame(&buf[..HEADER_SIZE], config.pan_id, HEADER_SIZE, None).is_err() {
            return Ok(UplinkOutcome::Idle);
        }
        let bitmask_bytes = config.neighbor_bitmask_bytes();
        let Some(packet) = UplinkPacket::decode(&buf[HEADER_SIZE..result.size], bitmask_bytes) else {
            return Ok(UplinkOutcome::Idle);
        };
        if packet.assignee != self.local_node {
            return Ok(UplinkOutcome::Idle);
        }
        for elem in packet.forwarded {
            self.queue_forward(elem);
        }
        Ok(UplinkOutcome::Relayed)
    }
}
