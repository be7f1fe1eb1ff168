//! Stream/server manager — the public stream API and its backing table
//! (§4.9).
//!
//! Shares the "hexagonal core behind a manager struct, fixed-size table,
//! no heap for the domain state" shape used elsewhere in this codebase
//! (`app::service::AppService` + `rpc::auth`'s `MAX_CLIENTS`-bounded
//! session table): a fixed-capacity table of `Stream`/`Server` slots
//! guarded by one mutex, with a condition variable application threads
//! block on for connect/listen/accept/read/write (§5).

use core::time::Duration;

use std::sync::{Condvar, Mutex};

use burster::Limiter;

use crate::config::NetworkConfiguration;
use crate::error::{Error, Result};
use crate::schedule::element::{InfoElement, InfoKind};

use super::endpoint::{MAX_PAYLOAD, ReceiveCallback, SendCallback, Server, Stream};
use super::sme::{Sme, SmeKind, SmeQueue};
use super::types::{Direction, NodeId, StreamId, StreamParameters, StreamStatus};

const MAX_STREAMS: usize = 16;
const MAX_SERVERS: usize = 8;

fn monotonic_now() -> Duration {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

/// Opaque handle to a `Stream` slot — what `connect`/`accept` return to
/// the application as a file-descriptor-like value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHandle(usize);

struct Inner {
    local_node: NodeId,
    streams: Vec<Option<Stream>>,
    servers: Vec<Option<Server>>,
    sme_queue: SmeQueue,
    sme_timeout_default: u16,
    fail_timeout_max: u16,
    desynced: bool,
    /// Throttles `connect()`: an application hammering `connect` would
    /// otherwise flood the uplink SME budget with CONNECT requests.
    /// 10 attempts/second, burst of 10.
    connect_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl Inner {
    fn find_stream_by_id(&self, id: StreamId) -> Option<usize> {
        self.streams
            .iter()
            .position(|s| matches!(s, Some(s) if s.stream_id == id))
    }

    fn find_server_by_port(&self, port: u8) -> Option<usize> {
        self.servers
            .iter()
            .position(|s| matches!(s, Some(s) if s.port == port))
    }
}

/// Stream and server manager. Wraps its table in a mutex + condvar so
/// blocking application calls and the MAC thread's per-tile mutations
/// can interleave safely (§4.9, §5); the MAC thread never blocks on this
/// lock for longer than the brief critical sections needed to swap
/// packets into slots.
pub struct StreamManager {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl StreamManager {
    pub fn new(local_node: NodeId, config: &NetworkConfiguration) -> Self {
        let mut streams = Vec::with_capacity(MAX_STREAMS);
        streams.resize_with(MAX_STREAMS, || None);
        let mut servers = Vec::with_capacity(MAX_SERVERS);
        servers.resize_with(MAX_SERVERS, || None);
        Self {
            inner: Mutex::new(Inner {
                local_node,
                streams,
                servers,
                sme_queue: SmeQueue::new(),
                sme_timeout_default: config.sme_timeout_tiles,
                fail_timeout_max: config.fail_timeout_max_tiles,
                desynced: false,
                connect_limiter: burster::TokenBucket::new_with_time_provider(10, 10, monotonic_now as fn() -> Duration),
            }),
            cv: Condvar::new(),
        }
    }

    // ── Public application API (§4.9) ──────────────────────────────

    /// `connect(dst, dstPort, params)` — blocks until the server
    /// accepts/rejects or the open times out.
    pub fn connect(&self, dst: NodeId, dst_port: u8, params: StreamParameters) -> Result<StreamHandle> {
        let stream_id;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.connect_limiter.try_consume(1).is_err() {
                return Err(Error::BufferOverflow);
            }
            let local = inner.local_node;
            let src_port = Self::alloc_ephemeral_port(&inner);
            stream_id = StreamId {
                src_node: local,
                dst_node: dst,
                src_port,
                dst_port,
            };
            let slot = Self::alloc_slot(&mut inner.streams)
                .ok_or(Error::BufferOverflow)?;
            let mut stream = Stream::new(stream_id, params, StreamStatus::Connecting);
            stream.fail_timeout = inner.fail_timeout_max;
            inner.streams[slot] = Some(stream);
            inner.sme_queue.enqueue(Sme {
                stream_id,
                params: Some(params),
                kind: SmeKind::Connect,
            });
        }

        let inner = self.inner.lock().unwrap();
        let (mut inner, timed_out) = self
            .cv
            .wait_timeout_while(inner, std::time::Duration::from_secs(5), |inner| {
                let idx = inner.find_stream_by_id(stream_id);
                matches!(idx.and_then(|i| inner.streams[i].as_ref()).map(|s| s.status), Some(StreamStatus::Connecting))
                    && !inner.desynced
            })
            .unwrap();

        let idx = inner.find_stream_by_id(stream_id).ok_or(Error::InvalidFd)?;
        let status = inner.streams[idx].as_ref().unwrap().status;
        match status {
            StreamStatus::Established => Ok(StreamHandle(idx)),
            StreamStatus::Connecting if timed_out.timed_out() => {
                inner.streams[idx].as_mut().unwrap().status = StreamStatus::ConnectFailed;
                Err(Error::Timeout)
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// `listen(port, params)` — enqueues a LISTEN SME; blocks until
    /// acknowledged by the master.
    pub fn listen(&self, port: u8, params: StreamParameters) -> Result<ServerHandle> {
        let stream_id;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.find_server_by_port(port).is_some() {
                return Err(Error::BufferOverflow);
            }
            let local = inner.local_node;
            stream_id = StreamId {
                src_node: local,
                dst_node: 0,
                src_port: port,
                dst_port: 0,
            };
            let slot = Self::alloc_server_slot(&mut inner.servers).ok_or(Error::BufferOverflow)?;
            let mut server = Server::new(port, params, local);
            server.fail_timeout = inner.fail_timeout_max;
            inner.servers[slot] = Some(server);
            inner.sme_queue.enqueue(Sme {
                stream_id,
                params: Some(params),
                kind: SmeKind::Listen,
            });
        }

        let inner = self.inner.lock().unwrap();
        let (mut inner, timed_out) = self
            .cv
            .wait_timeout_while(inner, std::time::Duration::from_secs(5), |inner| {
                let idx = inner.find_server_by_port(port);
                matches!(idx.and_then(|i| inner.servers[i].as_ref()).map(|s| s.status), Some(StreamStatus::ListenWait))
                    && !inner.desynced
            })
            .unwrap();

        let idx = inner.find_server_by_port(port).ok_or(Error::InvalidFd)?;
        let status = inner.servers[idx].as_ref().unwrap().status;
        match status {
            StreamStatus::Listen => Ok(ServerHandle(idx)),
            StreamStatus::ListenWait if timed_out.timed_out() => {
                inner.servers[idx].as_mut().unwrap().status = StreamStatus::ListenFailed;
                Err(Error::Timeout)
            }
            _ => Err(Error::NotConnected),
        }
    }

    /// `accept(fd)` — blocks until an inbound connection is ready;
    /// dequeues the head of the server's pending-accept FIFO.
    pub fn accept(&self, server: ServerHandle) -> Result<StreamHandle> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, _) = self
            .cv
            .wait_timeout_while(inner, std::time::Duration::from_secs(5), |inner| {
                match inner.servers.get(server.0).and_then(|s| s.as_ref()) {
                    Some(s) => !s.has_pending() && !inner.desynced,
                    None => false,
                }
            })
            .unwrap();

        let srv = inner.servers.get_mut(server.0).and_then(|s| s.as_mut()).ok_or(Error::InvalidFd)?;
        let accepted_id = srv.pop_incoming().ok_or(Error::Timeout)?;
        let idx = inner.find_stream_by_id(accepted_id).ok_or(Error::InvalidFd)?;
        Ok(StreamHandle(idx))
    }

    /// `write(fd, data)` — single-packet semantics: overwrites any
    /// unsent pending packet for the next period.
    pub fn write(&self, fd: StreamHandle, data: &[u8]) -> Result<usize> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::BufferOverflow);
        }
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.get_mut(fd.0).and_then(|s| s.as_mut()).ok_or(Error::InvalidFd)?;
        if stream.status != StreamStatus::Established {
            return Err(Error::NotConnected);
        }
        stream.pending_tx.set(data);
        Ok(data.len())
    }

    /// `read(fd, buf)` — returns the last packet received in the
    /// current period.
    pub fn read(&self, fd: StreamHandle, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        let stream = inner.streams.get(fd.0).and_then(|s| s.as_ref()).ok_or(Error::InvalidFd)?;
        let slice = stream.last_rx.as_slice();
        if slice.len() > buf.len() {
            return Err(Error::BufferOverflow);
        }
        buf[..slice.len()].copy_from_slice(slice);
        Ok(slice.len())
    }

    /// `close(fd)` — transitions through CLOSE_WAIT, enqueues a CLOSED
    /// SME, retained until the master confirms removal.
    pub fn close(&self, fd: StreamHandle) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let (stream_id, already_closing) = {
            let stream = inner.streams.get_mut(fd.0).and_then(|s| s.as_mut()).ok_or(Error::InvalidFd)?;
            if stream.status == StreamStatus::CloseWait {
                (stream.stream_id, true)
            } else {
                stream.status = StreamStatus::CloseWait;
                (stream.stream_id, false)
            }
        };
        if already_closing {
            return Err(Error::NotConnected);
        }
        inner.sme_queue.enqueue(Sme {
            stream_id,
            params: None,
            kind: SmeKind::Closed,
        });
        Ok(())
    }

    pub fn set_send_callback(&self, fd: StreamHandle, cb: SendCallback) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.get_mut(fd.0).and_then(|s| s.as_mut()).ok_or(Error::InvalidFd)?;
        stream.send_callback = Some(cb);
        Ok(())
    }

    pub fn set_receive_callback(&self, fd: StreamHandle, cb: ReceiveCallback) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.get_mut(fd.0).and_then(|s| s.as_mut()).ok_or(Error::InvalidFd)?;
        stream.receive_callback = Some(cb);
        Ok(())
    }

    // ── MAC-thread-facing API (phases drive these) ─────────────────

    /// Decrement every open endpoint's timers and re-enqueue/abort per
    /// §4.5. Called once per uplink opportunity.
    pub fn periodic_update(&self) {
        let mut inner = self.inner.lock().unwrap();
        let fail_max = inner.fail_timeout_max;
        let sme_default = inner.sme_timeout_default;

        for slot in inner.streams.iter_mut() {
            let Some(stream) = slot else { continue };
            match stream.status {
                StreamStatus::Connecting => {
                    if stream.fail_timeout == 0 {
                        stream.status = StreamStatus::ConnectFailed;
                    } else {
                        stream.fail_timeout -= 1;
                    }
                }
                StreamStatus::CloseWait => {
                    if stream.sme_timeout == 0 {
                        stream.sme_timeout = sme_default;
                    } else {
                        stream.sme_timeout -= 1;
                    }
                }
                _ => {}
            }
        }
        for slot in inner.servers.iter_mut() {
            let Some(server) = slot else { continue };
            if server.status == StreamStatus::ListenWait {
                if server.fail_timeout == 0 {
                    server.status = StreamStatus::ListenFailed;
                } else {
                    server.fail_timeout -= 1;
                }
            }
        }
        let _ = fail_max;
        drop(inner);
        self.cv.notify_all();
    }

    /// Drain up to `max` queued SMEs for the next outbound uplink packet.
    pub fn drain_smes(&self, max: usize) -> heapless::Vec<Sme, { super::sme::MAX_QUEUED_SMES }> {
        let mut inner = self.inner.lock().unwrap();
        inner.sme_queue.drain(max)
    }

    /// Apply an `InfoElement` delivered by the schedule-distribution
    /// phase — applies immediately regardless of schedule-apply state
    /// (§4.6).
    pub fn apply_info_element(&self, info: InfoElement) {
        let mut inner = self.inner.lock().unwrap();
        match info.kind {
            InfoKind::Accepted => {
                if let Some(idx) = inner.find_stream_by_id(info.stream_id) {
                    inner.streams[idx].as_mut().unwrap().status = StreamStatus::Established;
                } else {
                    // Inbound connection: materialize the Stream and queue it on the server.
                    let port = info.stream_id.dst_port;
                    if let Some(server_idx) = inner.find_server_by_port(port) {
                        if let Some(slot) = Self::alloc_slot(&mut inner.streams) {
                            let params = inner.servers[server_idx].as_ref().unwrap().params;
                            inner.streams[slot] =
                                Some(Stream::new(info.stream_id, params, StreamStatus::Established));
                            inner.servers[server_idx].as_mut().unwrap().push_incoming(info.stream_id);
                        }
                    }
                }
            }
            InfoKind::Rejected => {
                if let Some(idx) = inner.find_stream_by_id(info.stream_id) {
                    inner.streams[idx].as_mut().unwrap().status = StreamStatus::ConnectFailed;
                }
            }
            InfoKind::Reopened => {
                if let Some(idx) = inner.find_stream_by_id(info.stream_id) {
                    inner.streams[idx].as_mut().unwrap().status = StreamStatus::Reopened;
                }
            }
            InfoKind::Removed => {
                if let Some(idx) = inner.find_stream_by_id(info.stream_id) {
                    inner.streams[idx] = None;
                }
            }
        }
        // A LISTEN ack is modeled as the server transitioning on its own
        // SME acknowledgement path; surfaced via `ack_listen`.
        drop(inner);
        self.cv.notify_all();
    }

    /// Master's uplink acknowledged a LISTEN SME: move the server from
    /// LISTEN_WAIT to LISTEN.
    pub fn ack_listen(&self, port: u8) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(idx) = inner.find_server_by_port(port) {
            if let Some(server) = inner.servers[idx].as_mut() {
                if server.status == StreamStatus::ListenWait {
                    server.status = StreamStatus::Listen;
                }
            }
        }
        drop(inner);
        self.cv.notify_all();
    }

    /// §7 Desync: broadcast through every endpoint's condition variable;
    /// all opens abort; streams/servers transition to the terminal
    /// failure state appropriate to their current phase.
    pub fn on_desync(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.desynced = true;
        for slot in inner.streams.iter_mut() {
            if let Some(s) = slot {
                s.status = match s.status {
                    StreamStatus::Connecting => StreamStatus::ConnectFailed,
                    StreamStatus::Established | StreamStatus::Reopened => StreamStatus::RemotelyClosed,
                    other => other,
                };
            }
        }
        for slot in inner.servers.iter_mut() {
            if let Some(s) = slot {
                if s.status == StreamStatus::ListenWait {
                    s.status = StreamStatus::ListenFailed;
                }
            }
        }
        drop(inner);
        self.cv.notify_all();
    }

    /// Called by the data phase with a freshly dispatched TX packet for
    /// `fd`'s underlying stream, or `None` if nothing was pending.
    pub fn take_tx_packet(&self, fd: StreamHandle) -> Option<([u8; MAX_PAYLOAD], usize)> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.get_mut(fd.0)?.as_mut()?;
        let payload_size = stream.params.payload_size as usize;
        stream.send_packet().map(|buf| (buf, payload_size))
    }

    /// Called by the data phase with a freshly received payload for
    /// `fd`'s underlying stream.
    pub fn deliver_rx_packet(&self, fd: StreamHandle, payload: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stream) = inner.streams.get_mut(fd.0).and_then(|s| s.as_mut()) {
            stream.receive_packet(payload);
        }
        drop(inner);
        self.cv.notify_all();
    }

    /// Called by the data phase on a RECV timeout/CRC failure for `fd`'s
    /// underlying stream (§4.7 `missPacket`).
    pub fn miss_packet(&self, fd: StreamHandle) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stream) = inner.streams.get_mut(fd.0).and_then(|s| s.as_mut()) {
            stream.miss_packet();
        }
    }

    /// §4.6 fallback: the schedule-distribution phase calls this when a
    /// schedule is still incomplete at its activation tile, asking the
    /// master (node 0) to retransmit it. Not tied to any application
    /// stream, so it's addressed on a reserved, port-0 stream id rather
    /// than an existing stream's.
    pub fn request_schedule_resend(&self) {
        let mut inner = self.inner.lock().unwrap();
        let local = inner.local_node;
        inner.sme_queue.enqueue(Sme {
            stream_id: StreamId { src_node: local, dst_node: 0, src_port: 0, dst_port: 0 },
            params: None,
            kind: SmeKind::Resend,
        });
    }

    pub fn find_handle(&self, stream_id: StreamId) -> Option<StreamHandle> {
        let inner = self.inner.lock().unwrap();
        inner.find_stream_by_id(stream_id).map(StreamHandle)
    }

    /// Current per-period sequence counter for `fd`'s underlying stream —
    /// bumps once per exhausted redundancy budget (I4), so callers can
    /// confirm a period advanced exactly once regardless of how many
    /// redundant copies were sent/received within it.
    pub fn seq_no(&self, fd: StreamHandle) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        inner.streams.get(fd.0)?.as_ref().map(|s| s.seq_no)
    }

    // ── internals ───────────────────────────────────────────────────

    fn alloc_slot(table: &mut [Option<Stream>]) -> Option<usize> {
        table.iter().position(|s| s.is_none())
    }

    fn alloc_server_slot(table: &mut [Option<Server>]) -> Option<usize> {
        table.iter().position(|s| s.is_none())
    }

    fn alloc_ephemeral_port(inner: &Inner) -> u8 {
        for port in 16u8..=255 {
            if !inner.streams.iter().any(|s| matches!(s, Some(s) if s.stream_id.src_port == port)) {
                return port;
            }
        }
        255
    }
}
