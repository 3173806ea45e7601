//! Connection state shared by the client and the test server: the receive
//! path, frame dispatch and handshake progress.

use std::collections::{BTreeMap, VecDeque};

use rand::RngCore;

use crate::crypto::{Level, PacketKeys};
use crate::endpoint::ack::RecvPnTracker;
use crate::endpoint::keys::KeySet;
use crate::endpoint::{random_bytes, random_cid, DefaultLimits, EndpointConfig, EndpointLimits, Event};
use crate::error::{Error, TerminateCause, TransportError};
use crate::fault::PacketProtection;
use crate::frame::{self, Frame};
use crate::packet::{unprotect, CoalescedPackets, ConnectionId, PacketHeader};
use crate::tls::handshake::Role;
use crate::tls::{TlsEngine, TlsSession, TransportParams};
use crate::varint::decode_varint;

/// Length of the destination connection id a client picks for its first Initial.
const INITIAL_DCID_LEN: usize = 8;

const MAX_EVENTS: usize = <DefaultLimits as EndpointLimits>::MAX_EVENTS;
const MAX_PENDING_WRITES: usize = <DefaultLimits as EndpointLimits>::MAX_PENDING_WRITES;

/// High-level state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TLS handshake in progress.
    Handshaking,
    /// Handshake complete, stream data flows.
    Established,
    /// A CONNECTION_CLOSE is queued but not yet sent.
    Closing,
    /// Nothing more is sent or processed.
    Closed,
}

/// Turns out-of-order chunks of a byte stream back into contiguous bytes.
#[derive(Debug, Default)]
pub(crate) struct Reassembler {
    delivered: u64,
    pending: BTreeMap<u64, Vec<u8>>,
}

impl Reassembler {
    /// Accept `data` at stream `offset`; returns the bytes that became contiguous.
    pub fn push(&mut self, offset: u64, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        self.accept(offset, data, &mut out);
        while let Some((&next, _)) = self.pending.first_key_value() {
            if next > self.delivered {
                break;
            }
            let Some((next, chunk)) = self.pending.pop_first() else {
                break;
            };
            self.accept(next, &chunk, &mut out);
        }
        out
    }

    fn accept(&mut self, offset: u64, data: &[u8], out: &mut Vec<u8>) {
        let end = offset + data.len() as u64;
        if end <= self.delivered {
            return;
        }
        if offset > self.delivered {
            self.pending.insert(offset, data.to_vec());
            return;
        }
        let skip = (self.delivered - offset) as usize;
        out.extend_from_slice(&data[skip..]);
        self.delivered = end;
    }
}

/// Outgoing and incoming CRYPTO data at one level.
#[derive(Debug, Default)]
pub(crate) struct CryptoStream {
    pub send: Vec<u8>,
    pub send_offset: u64,
    pub recv: Reassembler,
}

/// Stream 0, the only stream the endpoints use.
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    pub pending: heapless::Deque<Vec<u8>, MAX_PENDING_WRITES>,
    pub send_offset: u64,
    pub recv: Reassembler,
    pub readable: VecDeque<u8>,
}

/// One end of a QUIC connection.
pub struct Connection {
    pub(crate) role: Role,
    pub(crate) state: ConnectionState,
    pub(crate) tls: TlsEngine,
    pub(crate) keys: KeySet,
    pub(crate) local_cid: ConnectionId,
    pub(crate) remote_cid: ConnectionId,
    /// The client has switched to the connection id the server chose.
    remote_cid_learned: bool,
    pub(crate) crypto: [CryptoStream; 3],
    pub(crate) received: [RecvPnTracker; 3],
    pub(crate) stream: StreamState,
    pub(crate) handshake_done_pending: bool,
    handshake_confirmed: bool,
    pub(crate) pending_close: Option<TerminateCause>,
    terminate_cause: Option<TerminateCause>,
    inbox: VecDeque<Vec<u8>>,
    pub(crate) outbox: VecDeque<Vec<u8>>,
    events: heapless::Deque<Event, MAX_EVENTS>,
    pub(crate) max_datagram_size: usize,
}

impl Connection {
    fn new(role: Role, tls: TlsEngine, local_cid: ConnectionId, config: &EndpointConfig) -> Self {
        Self {
            role,
            state: ConnectionState::Handshaking,
            tls,
            keys: KeySet::new(),
            local_cid,
            remote_cid: ConnectionId::new(),
            remote_cid_learned: false,
            crypto: Default::default(),
            received: Default::default(),
            stream: StreamState::default(),
            handshake_done_pending: false,
            handshake_confirmed: false,
            pending_close: None,
            terminate_cause: None,
            inbox: VecDeque::new(),
            outbox: VecDeque::new(),
            events: heapless::Deque::new(),
            max_datagram_size: config.max_datagram_size,
        }
    }

    /// Client side: pick the initial destination id, derive Initial keys and
    /// queue the ClientHello.
    pub(crate) fn client<R: RngCore + ?Sized>(config: &EndpointConfig, rng: &mut R) -> Result<Self, Error> {
        config.validate()?;
        let tls = TlsEngine::new_client(config.tls.clone(), random_bytes(rng), random_bytes(rng))?;
        let local_cid = random_cid(rng, config.cid_len)?;
        let mut conn = Self::new(Role::Client, tls, local_cid, config);
        conn.remote_cid = random_cid(rng, INITIAL_DCID_LEN.max(config.cid_len))?;
        conn.keys.install_initial(Role::Client, &conn.remote_cid)?;
        conn.pull_tls()?;
        Ok(conn)
    }

    /// Server side: keys arrive with the client's first Initial.
    pub(crate) fn server<R: RngCore + ?Sized>(config: &EndpointConfig, rng: &mut R) -> Result<Self, Error> {
        config.validate()?;
        let tls = TlsEngine::new_server(config.tls.clone(), random_bytes(rng), random_bytes(rng));
        let local_cid = random_cid(rng, config.cid_len)?;
        Ok(Self::new(Role::Server, tls, local_cid, config))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    /// Client only: the server's HANDSHAKE_DONE arrived.
    pub fn is_handshake_confirmed(&self) -> bool {
        self.handshake_confirmed
    }

    pub fn terminate_cause(&self) -> Option<TerminateCause> {
        self.terminate_cause
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate_cause.is_some()
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.tls.alpn()
    }

    pub fn peer_transport_params(&self) -> Option<&TransportParams> {
        self.tls.peer_transport_params()
    }

    pub fn local_cid(&self) -> &[u8] {
        &self.local_cid
    }

    pub fn remote_cid(&self) -> &[u8] {
        &self.remote_cid
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn push_event(&mut self, event: Event) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        // a slot was freed above
        let _ = self.events.push_back(event);
    }

    /// Queue a datagram for the next [`process_inbox`](Self::process_inbox).
    pub fn recv_datagram(&mut self, datagram: Vec<u8>) {
        self.inbox.push_back(datagram);
    }

    /// Next datagram waiting to go on the wire.
    pub fn pop_datagram(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Process every queued datagram.
    ///
    /// Protocol errors close the connection and are not returned; only
    /// internal failures are.
    pub fn process_inbox(&mut self) -> Result<(), Error> {
        while let Some(datagram) = self.inbox.pop_front() {
            self.recv(&datagram)?;
        }
        Ok(())
    }

    fn recv(&mut self, datagram: &[u8]) -> Result<(), Error> {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            tracing::trace!(len = datagram.len(), "dropping datagram on closed connection");
            return Ok(());
        }

        for item in CoalescedPackets::new(datagram, self.local_cid.len()) {
            let (header, packet) = match item {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(error = %e, "dropping undecodable rest of datagram");
                    break;
                }
            };
            self.recv_packet(header, packet)?;
            if self.state == ConnectionState::Closing || self.state == ConnectionState::Closed {
                return Ok(());
            }
            // keys derived from this packet may be needed for the next one
            self.pull_tls()?;
        }
        Ok(())
    }

    fn recv_packet(&mut self, header: PacketHeader, packet: &[u8]) -> Result<(), Error> {
        let level = header.level;
        if level == Level::Initial && self.role == Role::Server && !self.keys.has_send(Level::Initial) {
            self.keys.install_initial(Role::Server, &header.dcid)?;
            self.remote_cid = header.scid.clone();
        }

        let Some(keys) = self.keys.recv(level) else {
            tracing::trace!(?level, "no keys for packet, dropping it");
            return Ok(());
        };
        let largest = self.received[level.index()].largest();
        let (header, buf) = match unprotect(packet, header, keys, largest) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(?level, error = %e, "dropping packet that failed to open");
                return Ok(());
            }
        };

        if self.role == Role::Client && header.is_long() && !self.remote_cid_learned {
            self.remote_cid = header.scid.clone();
            self.remote_cid_learned = true;
        }
        tracing::trace!(?level, pn = header.pn, len = packet.len(), "received packet");

        let payload = &buf[header.payload_start()..];
        let ack_eliciting = self.process_frames(level, payload)?;
        self.received[level.index()].record(header.pn, ack_eliciting);
        Ok(())
    }

    /// Dispatch every frame of a packet. Returns whether any was ack-eliciting.
    fn process_frames(&mut self, level: Level, payload: &[u8]) -> Result<bool, Error> {
        let mut ack_eliciting = false;
        let mut pos = 0;
        while pos < payload.len() {
            let frame_type = decode_varint(payload, pos).map_or(0, |(ty, _)| ty);
            let result = frame::decode(&payload[pos..]).and_then(|(frame, consumed)| {
                ack_eliciting |= frame.is_ack_eliciting();
                self.handle_frame(level, frame).map(|()| consumed)
            });
            match result {
                Ok(consumed) => pos += consumed,
                Err(e @ (Error::Transport(_) | Error::Alert(_))) => {
                    self.close(e.close_code(), frame_type);
                    return Ok(ack_eliciting);
                }
                Err(e) => return Err(e),
            }
            if self.state == ConnectionState::Closed {
                break;
            }
        }
        Ok(ack_eliciting)
    }

    fn handle_frame(&mut self, level: Level, frame: Frame<'_>) -> Result<(), Error> {
        match frame {
            Frame::Padding | Frame::Ping | Frame::Ack(_) => {}
            Frame::Crypto(cf) => {
                let data = self.crypto[level.index()].recv.push(cf.offset, cf.data);
                if !data.is_empty() {
                    self.tls.read_handshake(level, &data)?;
                }
            }
            Frame::Stream(sf) => {
                if level != Level::Application {
                    return Err(TransportError::ProtocolViolation.into());
                }
                if sf.stream_id != 0 {
                    return Err(TransportError::StreamStateError.into());
                }
                let data = self.stream.recv.push(sf.offset, sf.data);
                if !data.is_empty() {
                    self.stream.readable.extend(data);
                    self.push_event(Event::StreamReadable);
                }
            }
            Frame::ConnectionClose(cc) => {
                self.state = ConnectionState::Closed;
                self.record_termination(TerminateCause {
                    error_code: cc.error_code,
                    frame_type: cc.frame_type,
                    remote: true,
                });
            }
            Frame::HandshakeDone => {
                if self.role == Role::Server {
                    return Err(TransportError::ProtocolViolation.into());
                }
                self.handshake_confirmed = true;
            }
        }
        Ok(())
    }

    /// Install new secrets, queue new flights and notice handshake completion.
    pub(crate) fn pull_tls(&mut self) -> Result<(), Error> {
        while let Some(derived) = self.tls.derived_keys() {
            let suite = self.tls.cipher_suite().ok_or(Error::InvalidState)?;
            self.keys.install(suite, &derived)?;
        }
        while let Some((level, bytes)) = self.tls.write_handshake() {
            self.crypto[level.index()].send.extend_from_slice(&bytes);
        }

        if self.state == ConnectionState::Handshaking && self.tls.is_complete() {
            self.state = ConnectionState::Established;
            tracing::info!(
                role = ?self.role,
                alpn = ?self.tls.alpn().map(String::from_utf8_lossy),
                "connection established"
            );
            self.push_event(Event::Connected);
            if self.role == Role::Server {
                self.handshake_done_pending = true;
            }
        }
        Ok(())
    }

    /// Close with `error_code`, queueing a CONNECTION_CLOSE for the next flush.
    pub(crate) fn close(&mut self, error_code: u64, frame_type: u64) {
        if self.terminate_cause.is_some() {
            return;
        }
        let cause = TerminateCause {
            error_code,
            frame_type,
            remote: false,
        };
        self.pending_close = Some(cause);
        self.state = ConnectionState::Closing;
        self.record_termination(cause);
    }

    fn record_termination(&mut self, cause: TerminateCause) {
        self.terminate_cause = Some(cause);
        if cause.is_protocol_error() {
            tracing::info!(role = ?self.role, %cause, frame_type = cause.frame_type, "connection terminated");
        } else {
            tracing::info!(role = ?self.role, %cause, "connection closed");
        }
        self.push_event(Event::Terminated(cause));
    }

    /// Queue `data` on stream 0.
    pub(crate) fn queue_write(&mut self, data: &[u8]) -> Result<usize, Error> {
        if let Some(cause) = self.terminate_cause {
            return Err(Error::Terminated(cause));
        }
        if data.is_empty() {
            return Ok(0);
        }
        self.stream
            .pending
            .push_back(data.to_vec())
            .map_err(|_| Error::WouldBlock)?;
        Ok(data.len())
    }

    /// Copy readable stream 0 bytes into `buf`.
    ///
    /// A connection that failed with a protocol error reports it before any
    /// buffered data; a clean close drains the data first.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.terminate_cause {
            Some(cause) if cause.is_protocol_error() => return Err(Error::Terminated(cause)),
            Some(cause) if self.stream.readable.is_empty() => return Err(Error::Terminated(cause)),
            _ => {}
        }
        if self.stream.readable.is_empty() {
            return Err(Error::WouldBlock);
        }
        let n = buf.len().min(self.stream.readable.len());
        for (dst, src) in buf.iter_mut().zip(self.stream.readable.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl PacketProtection for Connection {
    fn role(&self) -> Role {
        self.role
    }

    fn send_keys(&self, level: Level) -> Option<&PacketKeys> {
        self.keys.send(level)
    }

    fn largest_sent_pn(&self, level: Level) -> Option<u64> {
        self.keys.largest_sent(level)
    }

    fn short_header_dcid_len(&self) -> usize {
        self.remote_cid.len()
    }
}
