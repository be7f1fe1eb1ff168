//! `ScheduleHeader` — the per-packet header of a schedule-downlink frame
//! (§3, §6).

/// Header carried by every schedule-distribution packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleHeader {
    /// Monotonically increasing schedule identifier.
    pub schedule_id: u32,
    /// Absolute tile number at which this schedule becomes active.
    pub activation_tile: u32,
    /// Period length of the schedule, in tiles.
    pub schedule_tiles: u16,
    /// Total number of packets making up this schedule.
    pub total_packet: u8,
    /// Index of this packet within the schedule (0-based).
    pub current_packet: u8,
    /// Which repetition (of `scheduleRepetitions`) this transmission is.
    pub repetition: u8,
}

impl ScheduleHeader {
    pub const WIRE_SIZE: usize = 1 + 1 + 4 + 1 + 2 + 4;

    pub fn encode(&self, out: &mut [u8]) {
        out[0] = self.total_packet;
        out[1] = self.current_packet;
        out[2..6].copy_from_slice(&self.schedule_id.to_le_bytes());
        out[6] = self.repetition;
        out[7..9].copy_from_slice(&self.schedule_tiles.to_le_bytes());
        out[9..13].copy_from_slice(&self.activation_tile.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        Some(Self {
            total_packet: buf[0],
            current_packet: buf[1],
            schedule_id: u32::from_le_bytes(buf[2..6].try_into().ok()?),
            repetition: buf[6],
            schedule_tiles: u16::from_le_bytes(buf[7..9].try_into().ok()?),
            activation_tile: u32::from_le_bytes(buf[9..13].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = ScheduleHeader {
            schedule_id: 0xDEAD_BEEF,
            activation_tile: 1234,
            schedule_tiles: 16,
            total_packet: 5,
            current_packet: 2,
            repetition: 1,
        };
        let mut buf = [0u8; ScheduleHeader::WIRE_SIZE];
        h.encode(&mut buf);
        assert_eq!(ScheduleHeader::decode(&buf), Some(h));
    }

    #[test]
    fn rejects_short_buffer() {
        assert_eq!(ScheduleHeader::decode(&[0u8; 3]), None);
    }
}
