//! Connection state machine and its server-side counterpart, `Listener`.
//!
//! Each connection splits its work across four independent `std::thread`s —
//! reader, sender, retransmission timer, keep-alive/delayed-ACK timer —
//! coordinated through `parking_lot::RwLock`-guarded shared state and a
//! `crossbeam_channel` for inbound datagram delivery. A client connection
//! owns its own socket and an extra pump thread that reads it; a
//! server-accepted connection instead has its inbound channel fed by the
//! listener's demultiplexing thread, so both share the same dispatch code
//! downstream.

use crate::config::ConnectionConfig;
use crate::congestion::adapter::CongestionAdapter;
use crate::constants::{
    HANDSHAKE_RETRIES, HANDSHAKE_RETRY_INTERVAL, MTU, RETRANSMIT_TICK, WINDOW_POLL_INTERVAL,
};
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketType};
use crate::retransmission::RetransmissionQueue;
use crate::ring::RingBuffer;
use crate::rtt::RttEstimator;
use crate::seq::SeqNumber;
use crate::stats::ConnectionStats;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Listening,
    Connecting,
    Connected,
    Closing,
    Closed,
}

#[derive(Debug, Default)]
struct DelayedAck {
    oldest_pending_since: Option<Instant>,
    segments_since_standalone_ack: u32,
}

/// Every field the connection mutates, behind one `RwLock`: mutations take
/// the writer, snapshots take the reader.
struct Protocol {
    state: State,
    next_send_seq: SeqNumber,
    next_expected_recv: SeqNumber,
    peer_window: u32,
    last_received_timestamp: u32,
    rtt: RttEstimator,
    delayed_ack: DelayedAck,
    last_activity: Instant,
    last_keepalive_probe: Option<Instant>,
    missed_keepalives: u32,
    standalone_ack_count: u64,
    fin_sent: bool,
    fin_seq: Option<u32>,
    fin_acked: bool,
    peer_fin_received: bool,
}

#[derive(Default)]
struct StatsCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    retransmissions: AtomicU64,
    checksum_mismatches: AtomicU64,
}

struct Shared {
    config: ConnectionConfig,
    protocol: RwLock<Protocol>,
    send_ring: RingBuffer,
    recv_ring: RingBuffer,
    retrans: Mutex<RetransmissionQueue>,
    congestion: CongestionAdapter,
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbound: Receiver<Vec<u8>>,
    stats: StatsCounters,
    epoch: Instant,
    last_error: RwLock<Option<Error>>,
}

impl Shared {
    fn new(
        config: ConnectionConfig,
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        inbound: Receiver<Vec<u8>>,
        state: State,
        own_initial_seq: u32,
    ) -> Shared {
        let congestion = CongestionAdapter::new(
            config.congestion_algorithm,
            config.mss,
            config.window_size,
            config.congestion_params,
        );
        Shared {
            protocol: RwLock::new(Protocol {
                state,
                next_send_seq: SeqNumber::new(own_initial_seq),
                next_expected_recv: SeqNumber::new(0),
                peer_window: config.window_size,
                last_received_timestamp: 0,
                rtt: RttEstimator::new(),
                delayed_ack: DelayedAck::default(),
                last_activity: Instant::now(),
                last_keepalive_probe: None,
                missed_keepalives: 0,
                standalone_ack_count: 0,
                fin_sent: false,
                fin_seq: None,
                fin_acked: false,
                peer_fin_received: false,
            }),
            send_ring: RingBuffer::new(config.window_size as usize),
            recv_ring: RingBuffer::new(config.window_size as usize),
            retrans: Mutex::new(RetransmissionQueue::new(
                config.max_retransmissions,
                crate::constants::MAX_RTO,
            )),
            congestion,
            socket,
            peer,
            inbound,
            stats: StatsCounters::default(),
            epoch: Instant::now(),
            last_error: RwLock::new(None),
            config,
        }
    }
}

/// A FILLP connection: a cheap, `Clone`-able handle over the actual shared
/// state, so each background thread gets its own handle without the
/// connection owning a back-pointer to its threads — the threads hold the
/// state, not the other way around, so nothing needs to join them on drop.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

fn random_initial_seq() -> u32 {
    rand::random()
}

impl Connection {
    /// Client-side three-way handshake: SYN, wait for SYN-ACK, send ACK.
    pub fn connect(peer: SocketAddr, config: ConnectionConfig) -> Result<Connection> {
        config.validate()?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(peer)?;
        let socket = Arc::new(socket);

        let (tx, rx) = unbounded();
        spawn_socket_pump(socket.clone(), peer, tx);

        let initial_seq = random_initial_seq();
        let shared = Arc::new(Shared::new(
            config.clone(),
            socket.clone(),
            peer,
            rx,
            State::Connecting,
            initial_seq,
        ));
        let conn = Connection { shared };

        let syn = Packet::new(PacketType::Syn, initial_seq, 0, config.window_size, conn.now_ms());
        let mut syn_ack = None;
        for _ in 0..HANDSHAKE_RETRIES {
            conn.transmit(syn.clone());
            match conn.shared.inbound.recv_timeout(HANDSHAKE_RETRY_INTERVAL) {
                Ok(bytes) => {
                    if let Some(pkt) = Packet::decode(&bytes) {
                        if pkt.packet_type == PacketType::Syn
                            && pkt.ack_number == initial_seq.wrapping_add(1)
                        {
                            syn_ack = Some(pkt);
                            break;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Closed),
            }
        }
        let syn_ack = syn_ack.ok_or(Error::Timeout)?;

        {
            let mut proto = conn.shared.protocol.write();
            proto.next_expected_recv = SeqNumber::new(syn_ack.sequence) + 1;
            proto.peer_window = syn_ack.window;
            proto.next_send_seq = SeqNumber::new(initial_seq) + 1;
            proto.state = State::Connected;
            proto.last_activity = Instant::now();
        }
        let ack = Packet::new(
            PacketType::Ack,
            initial_seq.wrapping_add(1),
            syn_ack.sequence.wrapping_add(1),
            config.window_size,
            conn.now_ms(),
        );
        conn.transmit(ack);

        conn.spawn_background_threads();
        debug!("fillp: connected to {peer}");
        Ok(conn)
    }

    /// Server-side handshake completion for a SYN already demultiplexed by
    /// a `Listener`: send SYN-ACK, wait for ACK.
    fn accept_handshake(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        config: ConnectionConfig,
        inbound: Receiver<Vec<u8>>,
        syn: Packet,
    ) -> Result<Connection> {
        let server_seq = random_initial_seq();
        let shared = Arc::new(Shared::new(
            config.clone(),
            socket,
            peer,
            inbound,
            State::Listening,
            server_seq,
        ));
        let conn = Connection { shared };
        {
            let mut proto = conn.shared.protocol.write();
            proto.next_expected_recv = SeqNumber::new(syn.sequence) + 1;
        }

        let syn_ack = Packet::new(
            PacketType::Syn,
            server_seq,
            syn.sequence.wrapping_add(1),
            config.window_size,
            conn.now_ms(),
        );
        let deadline = Instant::now() + config.timeout;
        loop {
            conn.transmit(syn_ack.clone());
            match conn.shared.inbound.recv_timeout(HANDSHAKE_RETRY_INTERVAL) {
                Ok(bytes) => {
                    if let Some(pkt) = Packet::decode(&bytes) {
                        if pkt.packet_type == PacketType::Ack
                            && pkt.ack_number == server_seq.wrapping_add(1)
                        {
                            let mut proto = conn.shared.protocol.write();
                            proto.peer_window = pkt.window;
                            break;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Closed),
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
        }

        {
            let mut proto = conn.shared.protocol.write();
            proto.next_send_seq = SeqNumber::new(server_seq) + 1;
            proto.state = State::Connected;
            proto.last_activity = Instant::now();
        }
        conn.spawn_background_threads();
        debug!("fillp: accepted connection from {peer}");
        Ok(conn)
    }

    fn now_ms(&self) -> u32 {
        self.shared.epoch.elapsed().as_millis() as u32
    }

    fn transmit(&self, packet: Packet) {
        let wire = packet.encode();
        if let Err(e) = self.shared.socket.send_to(&wire, self.shared.peer) {
            warn!("fillp: send_to {} failed: {e}", self.shared.peer);
            return;
        }
        self.shared.stats.packets_sent.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn build_control_packet(&self, packet_type: PacketType) -> Packet {
        let proto = self.shared.protocol.read();
        let seq = proto.next_send_seq.raw();
        let ack = proto.next_expected_recv.raw();
        let ts = proto.last_received_timestamp;
        drop(proto);
        Packet::new(packet_type, seq, ack, self.shared.config.window_size, ts)
    }

    fn send_standalone_ack(&self) {
        let packet = self.build_control_packet(PacketType::Ack);
        self.transmit(packet);
        self.shared.protocol.write().standalone_ack_count += 1;
    }

    fn touch_activity(&self) {
        let mut proto = self.shared.protocol.write();
        proto.last_activity = Instant::now();
        proto.missed_keepalives = 0;
    }

    fn dispatch(&self, bytes: &[u8]) {
        let packet = match Packet::decode(bytes) {
            Some(p) => p,
            None => {
                self.shared.stats.checksum_mismatches.fetch_add(1, AtomicOrdering::Relaxed);
                trace!("fillp: dropping malformed/checksum-mismatched datagram from {}", self.shared.peer);
                return;
            }
        };
        self.shared.stats.packets_received.fetch_add(1, AtomicOrdering::Relaxed);
        self.touch_activity();
        match packet.packet_type {
            PacketType::Syn => trace!("fillp: ignoring SYN on an established connection"),
            PacketType::Data => self.on_data(packet),
            PacketType::Ack => self.on_ack(packet),
            PacketType::Fin => self.on_fin(packet),
            PacketType::KeepAlive => self.on_keepalive(packet),
            PacketType::WindowUpdate => self.on_window_update(packet),
        }
    }

    /// Inbound DATA dispatch: in-order segments enqueue and drive the
    /// delayed-ACK heuristic; duplicates (already-seen sequence numbers)
    /// re-ACK immediately to accelerate the peer's loss recovery;
    /// out-of-order segments are dropped rather than buffered for
    /// reassembly, relying on the peer's retransmission to fill the gap.
    fn on_data(&self, pkt: Packet) {
        let now = Instant::now();
        let (ordering, expected) = {
            let proto = self.shared.protocol.read();
            if proto.state != State::Connected {
                return;
            }
            (
                SeqNumber::new(pkt.sequence).cmp(&proto.next_expected_recv),
                proto.next_expected_recv,
            )
        };
        match ordering {
            Ordering::Equal => {
                let len = pkt.payload.len();
                let accepted = len == 0 || self.shared.recv_ring.try_write(&pkt.payload).is_ok();
                if !accepted {
                    warn!("fillp: receive ring full, dropping segment {}", pkt.sequence);
                    return;
                }
                if len > 0 {
                    self.shared.stats.bytes_received.fetch_add(len as u64, AtomicOrdering::Relaxed);
                }

                let mut proto = self.shared.protocol.write();
                proto.next_expected_recv = proto.next_expected_recv + len as u32;
                proto.last_received_timestamp = pkt.timestamp;
                if proto.delayed_ack.oldest_pending_since.is_none() {
                    proto.delayed_ack.oldest_pending_since = Some(now);
                }
                proto.delayed_ack.segments_since_standalone_ack += 1;
                // RFC 1122: ACK at least every second full segment.
                let send_now = proto.delayed_ack.segments_since_standalone_ack % 2 == 0;
                if send_now {
                    proto.delayed_ack.oldest_pending_since = None;
                    proto.delayed_ack.segments_since_standalone_ack = 0;
                }
                drop(proto);
                if send_now {
                    self.send_standalone_ack();
                }
            }
            Ordering::Less => {
                self.shared.protocol.write().last_received_timestamp = pkt.timestamp;
                self.send_standalone_ack();
            }
            Ordering::Greater => {
                trace!("fillp: dropping out-of-order segment {} (expected {expected})", pkt.sequence);
            }
        }
    }

    /// Inbound ACK dispatch: cumulative trim of the retransmission queue,
    /// an RTT sample from the echoed timestamp, and a congestion-adapter
    /// notification.
    fn on_ack(&self, pkt: Packet) {
        {
            let mut proto = self.shared.protocol.write();
            if proto.state == State::Closed {
                return;
            }
            proto.peer_window = pkt.window;
        }

        let up_to = SeqNumber::new(pkt.ack_number.wrapping_sub(1));
        let trimmed = self.shared.retrans.lock().trim_up_to(up_to);
        if trimmed.is_empty() {
            self.shared.congestion.on_ack_received(0, None);
        } else {
            let span: u32 = trimmed.iter().map(|e| e.payload.len() as u32).sum();
            let rtt = if pkt.timestamp != 0 {
                Some(Duration::from_millis(
                    self.now_ms().wrapping_sub(pkt.timestamp) as u64,
                ))
            } else {
                trimmed.first().map(|e| e.first_sent.elapsed())
            };
            if let Some(sample) = rtt {
                self.shared.protocol.write().rtt.update(sample);
            }
            self.shared.congestion.on_ack_received(span, rtt);
        }
        self.note_fin_ack(pkt.ack_number);
    }

    fn note_fin_ack(&self, ack_number: u32) {
        let mut proto = self.shared.protocol.write();
        if let Some(fin_seq) = proto.fin_seq {
            if SeqNumber::new(ack_number).signed_diff(SeqNumber::new(fin_seq)) > 0 {
                proto.fin_acked = true;
            }
        }
        if proto.fin_acked && proto.peer_fin_received && proto.state != State::Closed {
            proto.state = State::Closed;
            drop(proto);
            self.shared.send_ring.close();
            self.shared.recv_ring.close();
        }
    }

    fn on_fin(&self, pkt: Packet) {
        let mut proto = self.shared.protocol.write();
        if proto.state == State::Closed {
            return;
        }
        proto.peer_fin_received = true;
        if proto.state == State::Connected {
            proto.state = State::Closing;
        }
        // The FIN occupies one sequence number, matching TCP convention.
        if SeqNumber::new(pkt.sequence) == proto.next_expected_recv {
            proto.next_expected_recv = proto.next_expected_recv + 1;
        }
        let already_sent = proto.fin_sent;
        let already_acked = proto.fin_acked;
        drop(proto);

        self.shared.recv_ring.close();
        self.send_standalone_ack();

        if already_sent && already_acked {
            let mut proto = self.shared.protocol.write();
            proto.state = State::Closed;
            drop(proto);
            self.shared.send_ring.close();
        }
    }

    fn on_keepalive(&self, _pkt: Packet) {
        let packet = self.build_control_packet(PacketType::KeepAlive);
        self.transmit(packet);
    }

    fn on_window_update(&self, pkt: Packet) {
        self.shared.protocol.write().peer_window = pkt.window;
    }

    fn send_budget(&self) -> usize {
        let peer_window = self.shared.protocol.read().peer_window as usize;
        let outstanding = self.shared.retrans.lock().bytes_outstanding();
        let cwnd = self.shared.congestion.cwnd() as usize;
        peer_window
            .saturating_sub(outstanding)
            .min(cwnd.saturating_sub(outstanding))
    }

    fn emit_data(&self, bytes: Vec<u8>) {
        let payload = Bytes::from(bytes);
        let (seq, ack_number, rto) = {
            let mut proto = self.shared.protocol.write();
            let seq = proto.next_send_seq;
            proto.next_send_seq = seq + payload.len() as u32;
            proto.delayed_ack.oldest_pending_since = None;
            proto.delayed_ack.segments_since_standalone_ack = 0;
            (seq, proto.next_expected_recv.raw(), proto.rtt.rto())
        };
        let packet = Packet::new(PacketType::Data, seq.raw(), ack_number, self.shared.config.window_size, self.now_ms())
            .with_payload(payload.clone());

        self.shared
            .retrans
            .lock()
            .add(seq, payload.clone(), Instant::now(), rto);
        self.shared.congestion.on_packet_sent(payload.len() as u32);
        self.shared.stats.bytes_sent.fetch_add(payload.len() as u64, AtomicOrdering::Relaxed);
        self.transmit(packet);
    }

    /// Writes `bytes` into the send ring; the sender thread drains it into
    /// MSS-sliced segments as window budget allows.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if let Some(err) = self.shared.last_error.read().clone() {
            return Err(err);
        }
        {
            let proto = self.shared.protocol.read();
            if proto.state == State::Closed || proto.state == State::Closing {
                return Err(Error::Closed);
            }
        }
        self.shared.send_ring.write(bytes)
    }

    /// Blocks until at least one byte is available or the connection closes.
    pub fn receive(&self) -> Result<Bytes> {
        if let Some(err) = self.shared.last_error.read().clone() {
            return Err(err);
        }
        let data = self.shared.recv_ring.read(self.shared.recv_ring.capacity());
        if data.is_empty() && self.shared.recv_ring.is_closed() {
            return Err(Error::Closed);
        }
        Ok(Bytes::from(data))
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Result<Bytes> {
        if let Some(err) = self.shared.last_error.read().clone() {
            return Err(err);
        }
        match self.shared.recv_ring.read_timeout(self.shared.recv_ring.capacity(), timeout) {
            None => Err(Error::Timeout),
            Some(data) if data.is_empty() && self.shared.recv_ring.is_closed() => Err(Error::Closed),
            Some(data) => Ok(Bytes::from(data)),
        }
    }

    pub fn state(&self) -> State {
        self.shared.protocol.read().state
    }

    pub fn stats(&self) -> ConnectionStats {
        let proto = self.shared.protocol.read();
        ConnectionStats {
            bytes_sent: self.shared.stats.bytes_sent.load(AtomicOrdering::Relaxed),
            bytes_received: self.shared.stats.bytes_received.load(AtomicOrdering::Relaxed),
            packets_sent: self.shared.stats.packets_sent.load(AtomicOrdering::Relaxed),
            packets_received: self.shared.stats.packets_received.load(AtomicOrdering::Relaxed),
            retransmissions: self.shared.stats.retransmissions.load(AtomicOrdering::Relaxed),
            checksum_mismatches: self.shared.stats.checksum_mismatches.load(AtomicOrdering::Relaxed),
            rtt: proto.rtt.smoothed_rtt(),
            congestion: self.shared.congestion.stats(),
        }
    }

    /// Standalone-ACK count, exposed so delayed-ACK and piggyback behavior
    /// can be asserted on directly in tests instead of inferred from timing.
    pub fn standalone_ack_count(&self) -> u64 {
        self.shared.protocol.read().standalone_ack_count
    }

    /// Local close: emit FIN, wait for FIN-ACK and the peer's FIN within
    /// the connection's timeout, forcing CLOSED if it elapses first.
    pub fn close(&self) -> Result<()> {
        {
            let mut proto = self.shared.protocol.write();
            if proto.state == State::Closed {
                return Ok(());
            }
            proto.state = State::Closing;
        }
        self.shared.send_ring.close();

        let deadline = Instant::now() + self.shared.config.timeout;
        while self.shared.retrans.lock().len() > 0 && Instant::now() < deadline {
            thread::sleep(RETRANSMIT_TICK);
        }

        let fin_packet = {
            let mut proto = self.shared.protocol.write();
            let seq = proto.next_send_seq;
            proto.fin_seq = Some(seq.raw());
            proto.next_send_seq = seq + 1;
            proto.fin_sent = true;
            let ack = proto.next_expected_recv.raw();
            let ts = proto.last_received_timestamp;
            Packet::new(PacketType::Fin, seq.raw(), ack, self.shared.config.window_size, ts)
        };
        self.transmit(fin_packet);

        while Instant::now() < deadline {
            if self.shared.protocol.read().state == State::Closed {
                return Ok(());
            }
            thread::sleep(RETRANSMIT_TICK);
        }

        warn!("fillp: shutdown timeout elapsed, forcing CLOSED for {}", self.shared.peer);
        let mut proto = self.shared.protocol.write();
        proto.state = State::Closed;
        drop(proto);
        self.shared.recv_ring.close();
        Ok(())
    }

    fn spawn_background_threads(&self) {
        let reader = self.clone();
        thread::spawn(move || run_reader(reader));
        let sender = self.clone();
        thread::spawn(move || run_sender(sender));
        let timers = self.clone();
        thread::spawn(move || run_timers(timers));
        let retransmit = self.clone();
        thread::spawn(move || run_retransmit(retransmit));
    }
}

fn spawn_socket_pump(socket: Arc<UdpSocket>, peer: SocketAddr, tx: Sender<Vec<u8>>) {
    socket
        .set_read_timeout(None)
        .expect("connected UDP sockets support blocking reads");
    thread::spawn(move || {
        let mut buf = vec![0u8; MTU];
        loop {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) if from == peer => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("fillp: socket pump for {peer} stopping: {e}");
                    break;
                }
            }
        }
    });
}

fn run_reader(conn: Connection) {
    loop {
        match conn.shared.inbound.recv() {
            Ok(bytes) => conn.dispatch(&bytes),
            Err(_) => break,
        }
        if conn.shared.protocol.read().state == State::Closed {
            break;
        }
    }
}

fn run_sender(conn: Connection) {
    loop {
        if conn.shared.protocol.read().state == State::Closed {
            break;
        }
        let budget = conn.send_budget();
        if budget == 0 {
            thread::sleep(WINDOW_POLL_INTERVAL);
            continue;
        }
        let take = budget.min(conn.shared.config.mss as usize);
        match conn.shared.send_ring.read_timeout(take, WINDOW_POLL_INTERVAL) {
            None => continue,
            Some(bytes) if bytes.is_empty() => {
                if conn.shared.send_ring.is_closed() {
                    break;
                }
            }
            Some(bytes) => conn.emit_data(bytes),
        }
    }
}

fn run_timers(conn: Connection) {
    loop {
        if conn.shared.protocol.read().state == State::Closed {
            break;
        }
        thread::sleep(RETRANSMIT_TICK);
        check_delayed_ack_timeout(&conn);
        check_keepalive(&conn);
    }
}

fn check_delayed_ack_timeout(conn: &Connection) {
    let fire = {
        let mut proto = conn.shared.protocol.write();
        let fire = matches!(
            proto.delayed_ack.oldest_pending_since,
            Some(since) if since.elapsed() >= crate::constants::DELAYED_ACK_DEADLINE
        );
        if fire {
            proto.delayed_ack.oldest_pending_since = None;
            proto.delayed_ack.segments_since_standalone_ack = 0;
        }
        fire
    };
    if fire {
        conn.send_standalone_ack();
    }
}

fn check_keepalive(conn: &Connection) {
    let probe = {
        let mut proto = conn.shared.protocol.write();
        if proto.state != State::Connected {
            return;
        }
        if proto.last_activity.elapsed() < conn.shared.config.keepalive_interval {
            return;
        }
        let since_last_probe = proto
            .last_keepalive_probe
            .map(|t| t.elapsed())
            .unwrap_or(Duration::MAX);
        if since_last_probe < conn.shared.config.keepalive_interval {
            return;
        }
        proto.missed_keepalives += 1;
        proto.last_keepalive_probe = Some(Instant::now());
        if proto.missed_keepalives >= 2 {
            proto.state = State::Closed;
            None
        } else {
            Some(())
        }
    };
    match probe {
        None => {
            warn!("fillp: keep-alive exhausted for {}, closing", conn.shared.peer);
            conn.shared.send_ring.close();
            conn.shared.recv_ring.close();
        }
        Some(()) => {
            let packet = conn.build_control_packet(PacketType::KeepAlive);
            conn.transmit(packet);
        }
    }
}

fn run_retransmit(conn: Connection) {
    loop {
        if conn.shared.protocol.read().state == State::Closed {
            break;
        }
        thread::sleep(RETRANSMIT_TICK);

        let report = conn.shared.retrans.lock().get_expired(Instant::now());
        for expired in report.to_retransmit {
            conn.shared.stats.retransmissions.fetch_add(1, AtomicOrdering::Relaxed);
            conn.shared.congestion.on_packet_lost();
            let ack = conn.shared.protocol.read().next_expected_recv.raw();
            let packet = Packet::new(
                PacketType::Data,
                expired.sequence.raw(),
                ack,
                conn.shared.config.window_size,
                conn.now_ms(),
            )
            .with_payload(expired.payload);
            conn.transmit(packet);
        }

        for seq in report.exhausted {
            warn!("fillp: sequence {seq} exceeded max retransmissions, closing connection");
            *conn.shared.last_error.write() = Some(Error::RetransmissionExhausted { sequence: seq.raw() });
            conn.shared.protocol.write().state = State::Closed;
            conn.shared.send_ring.close();
            conn.shared.recv_ring.close();
            break;
        }
    }
}

/// Server-side accept point: a single shared socket demultiplexed by peer
/// address, with each inbound SYN from a previously-unseen peer spawning
/// its own handshake thread so one slow or stalled handshake can't block
/// new connections from being accepted.
pub struct Listener {
    socket: Arc<UdpSocket>,
    accept_rx: Receiver<Connection>,
}

impl Listener {
    pub fn bind(addr: SocketAddr, config: ConnectionConfig) -> Result<Listener> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(addr)?);
        let (accept_tx, accept_rx) = unbounded();
        let demux: Arc<Mutex<HashMap<SocketAddr, Sender<Vec<u8>>>>> = Arc::new(Mutex::new(HashMap::new()));

        let demux_socket = socket.clone();
        thread::spawn(move || run_demux(demux_socket, demux, config, accept_tx));

        Ok(Listener { socket, accept_rx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Blocks until a connection completes its handshake.
    pub fn accept(&self) -> Result<Connection> {
        self.accept_rx.recv().map_err(|_| Error::Closed)
    }
}

fn run_demux(
    socket: Arc<UdpSocket>,
    demux: Arc<Mutex<HashMap<SocketAddr, Sender<Vec<u8>>>>>,
    config: ConnectionConfig,
    accept_tx: Sender<Connection>,
) {
    let mut buf = vec![0u8; MTU];
    loop {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                warn!("fillp: listener recv_from failed: {e}");
                continue;
            }
        };
        let datagram = buf[..n].to_vec();

        let forwarded = {
            let map = demux.lock();
            map.get(&from).map(|tx| tx.send(datagram.clone()))
        };
        match forwarded {
            Some(Ok(())) => continue,
            Some(Err(_)) => {
                demux.lock().remove(&from);
            }
            None => {}
        }

        let packet = match Packet::decode(&datagram) {
            Some(p) => p,
            None => continue,
        };
        if packet.packet_type != PacketType::Syn {
            trace!("fillp: listener ignoring non-SYN from unknown peer {from}");
            continue;
        }

        let (tx, rx) = unbounded();
        demux.lock().insert(from, tx);

        let socket = socket.clone();
        let config = config.clone();
        let accept_tx = accept_tx.clone();
        let demux = demux.clone();
        thread::spawn(move || match Connection::accept_handshake(socket, from, config, rx, packet) {
            Ok(conn) => {
                if accept_tx.send(conn).is_err() {
                    debug!("fillp: accept queue closed, dropping completed handshake from {from}");
                }
            }
            Err(e) => {
                warn!("fillp: handshake with {from} failed: {e}");
                demux.lock().remove(&from);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use std::net::SocketAddr;

    fn loopback(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn happy_path_echo() {
        let server_addr = loopback(19_002);
        let listener = Listener::bind(server_addr, ConnectionConfig::default()).unwrap();

        let server = thread::spawn(move || {
            let conn = listener.accept().unwrap();
            let msg = conn.receive().unwrap();
            conn.send(&msg).unwrap();
            msg
        });

        let client = Connection::connect(server_addr, ConnectionConfig::default()).unwrap();
        assert_eq!(client.state(), State::Connected);
        client.send(b"Hello FILLP").unwrap();
        let echoed = client.receive().unwrap();
        assert_eq!(&echoed[..], b"Hello FILLP");

        let received_by_server = server.join().unwrap();
        assert_eq!(&received_by_server[..], b"Hello FILLP");
        assert!(client.stats().packets_sent >= 1);
        assert_eq!(client.stats().retransmissions, 0);
    }

    #[test]
    fn send_budget_is_bounded_by_peer_window_and_cwnd() {
        let config = ConnectionConfig::default().mss(500).window_size(1000);
        assert!(config.validate().is_ok());

        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap());
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (_tx, rx) = unbounded();
        let shared = Arc::new(Shared::new(config, socket, peer, rx, State::Connected, 0));
        let conn = Connection { shared };

        // peer_window and cwnd both start at 1000 (2*mss); nothing outstanding yet.
        assert_eq!(conn.send_budget(), conn.shared.congestion.cwnd() as usize);
    }
}
