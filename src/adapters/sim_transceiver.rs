//! A simulated shared-medium radio for multi-node host test harnesses.
//!
//! Same `epoch: Instant` anchoring [`crate::power::HostPowerManager`] uses
//! to turn network time into real wall-clock deadlines, applied here to a
//! broadcast medium instead of a sleep timer: every [`SimTransceiver`]
//! cloned from the same [`SimChannel`] sees every other node's `send_at`,
//! delayed by a fixed propagation time and dropped with a configurable
//! probability, so `recv` exercises the same deadline/timeout contract a
//! real radio does.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::TransceiverError;
use crate::packet::codec::MAX_FRAME_SIZE;
use crate::stream::types::NodeId;
use crate::time::NetworkTime;
use crate::transceiver::{RadioConfig, RecvResult, RecvStatus, Transceiver};

struct Broadcast {
    id: u64,
    sender: NodeId,
    data: heapless::Vec<u8, MAX_FRAME_SIZE>,
    arrival: NetworkTime,
}

struct ChannelInner {
    epoch: Instant,
    next_id: u64,
    log: Vec<Broadcast>,
    rng: StdRng,
}

/// Shared medium state. Clone [`SimTransceiver`]s from the same channel
/// (via [`SimChannel::transceiver_for`]) to put them on one network.
#[derive(Clone)]
pub struct SimChannel {
    inner: Arc<Mutex<ChannelInner>>,
    condvar: Arc<Condvar>,
    propagation_delay_ns: i64,
    loss_probability: f64,
}

impl SimChannel {
    /// `propagation_delay_ns` is added to every sender's `when_abs` to
    /// produce the arrival time seen by receivers. `loss_probability` is
    /// applied independently per broadcast (not per receiver — a lost
    /// packet is lost for everyone, matching a single shared antenna).
    pub fn new(seed: u64, propagation_delay_ns: i64, loss_probability: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                epoch: Instant::now(),
                next_id: 0,
                log: Vec::new(),
                rng: StdRng::seed_from_u64(seed),
            })),
            condvar: Arc::new(Condvar::new()),
            propagation_delay_ns,
            loss_probability,
        }
    }

    /// A channel with no loss and negligible propagation delay, for tests
    /// that only care about TDMA timing, not link quality.
    pub fn ideal() -> Self {
        Self::new(0, 0, 0.0)
    }

    pub fn transceiver_for(&self, node_id: NodeId) -> SimTransceiver {
        SimTransceiver {
            channel: self.clone(),
            node_id,
            last_seen: 0,
            on: false,
        }
    }

    fn real_instant(&self, epoch: Instant, t: NetworkTime) -> Instant {
        let ns = t.as_nanos();
        if ns <= 0 {
            epoch
        } else {
            epoch + Duration::from_nanos(ns as u64)
        }
    }
}

/// One node's view of a [`SimChannel`].
pub struct SimTransceiver {
    channel: SimChannel,
    node_id: NodeId,
    /// Highest broadcast id this node has already consumed or skipped
    /// (a node never reads its own transmissions back).
    last_seen: u64,
    on: bool,
}

impl Transceiver for SimTransceiver {
    fn configure(&mut self, _config: RadioConfig) -> Result<(), TransceiverError> {
        Ok(())
    }

    fn turn_on(&mut self) -> Result<(), TransceiverError> {
        self.on = true;
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), TransceiverError> {
        self.on = false;
        Ok(())
    }

    fn idle(&mut self) -> Result<(), TransceiverError> {
        Ok(())
    }

    fn send_at(&mut self, buf: &[u8], len: usize, when_abs: NetworkTime) -> Result<(), TransceiverError> {
        if !self.on {
            return Err(TransceiverError::Uninitialized);
        }
        if len > MAX_FRAME_SIZE {
            return Err(TransceiverError::TooLong);
        }
        let mut inner = self.channel.inner.lock().unwrap();
        let epoch = inner.epoch;
        let send_instant = self.channel.real_instant(epoch, when_abs);
        let now = Instant::now();
        if send_instant > now {
            drop(inner);
            std::thread::sleep(send_instant - now);
            inner = self.channel.inner.lock().unwrap();
        }
        let lost = self.channel.loss_probability > 0.0 && inner.rng.gen_bool(self.channel.loss_probability);
        if !lost {
            let mut data = heapless::Vec::new();
            let _ = data.extend_from_slice(&buf[..len]);
            let id = inner.next_id;
            inner.next_id += 1;
            let arrival = when_abs + self.channel.propagation_delay_ns;
            inner.log.push(Broadcast { id, sender: self.node_id, data, arrival });
        }
        drop(inner);
        self.channel.condvar.notify_all();
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], max_len: usize, deadline_abs: NetworkTime) -> RecvResult {
        if !self.on {
            return RecvResult { status: RecvStatus::Uninitialized, ..RecvResult::timeout() };
        }
        let mut inner = self.channel.inner.lock().unwrap();
        let epoch = inner.epoch;
        let deadline_instant = self.channel.real_instant(epoch, deadline_abs);
        loop {
            if let Some(found) = inner
                .log
                .iter()
                .filter(|b| b.id > self.last_seen && b.sender != self.node_id && b.arrival <= deadline_abs)
                .min_by_key(|b| b.arrival)
            {
                let id = found.id;
                let arrival_instant = self.channel.real_instant(epoch, found.arrival);
                let now = Instant::now();
                if arrival_instant > now {
                    let wait_for = arrival_instant - now;
                    let (guard, _timeout) = self.channel.condvar.wait_timeout(inner, wait_for).unwrap();
                    inner = guard;
                    continue;
                }
                let copy_len = found.data.len().min(max_len);
                buf[..copy_len].copy_from_slice(&found.data[..copy_len]);
                let too_long = found.data.len() > max_len;
                self.last_seen = id;
                return RecvResult {
                    status: if too_long { RecvStatus::TooLong } else { RecvStatus::Ok },
                    size: copy_len,
                    rx_timestamp: found.arrival,
                    rssi: -40,
                    timestamp_valid: true,
                };
            }
            let now = Instant::now();
            if now >= deadline_instant {
                return RecvResult::timeout();
            }
            let (guard, timeout) = self
                .channel
                .condvar
                .wait_timeout(inner, deadline_instant - now)
                .unwrap();
            inner = guard;
            if timeout.timed_out() && Instant::now() >= deadline_instant {
                return RecvResult::timeout();
            }
        }
    }
}
