//! Minimal QUIC endpoints for driving a connection under test.
//!
//! Enough of QUIC v1 to complete a real handshake with real packet
//! protection, move bytes on stream 0 and close with a transport error.
//! There is no loss recovery, congestion or flow control: the harness link
//! never drops or reorders datagrams.

pub mod ack;
pub mod client;
pub mod connection;
pub mod keys;
pub mod server;
mod transmit;

pub use client::QuicClient;
pub use connection::{Connection, ConnectionState};
pub use server::TestServer;

use rand::RngCore;

use crate::error::{Error, TerminateCause};
use crate::packet::{connection_id, ConnectionId, MIN_INITIAL_PACKET_SIZE};
use crate::tls::TlsConfig;

/// Compile-time capacities of an endpoint.
///
/// Associated constants cannot size fields of a generic type, so the
/// endpoints read [`DefaultLimits`] directly; the trait documents the bundle.
pub trait EndpointLimits {
    /// Queued application events before the oldest is dropped.
    const MAX_EVENTS: usize;
    /// Writes queued on stream 0 before the data goes out.
    const MAX_PENDING_WRITES: usize;
    /// Received packet number ranges remembered per space.
    const ACK_RANGES: usize;
}

pub struct DefaultLimits;

impl EndpointLimits for DefaultLimits {
    const MAX_EVENTS: usize = 8;
    const MAX_PENDING_WRITES: usize = 16;
    const ACK_RANGES: usize = 32;
}

/// Largest UDP payload an endpoint emits by default.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1350;

/// Endpoint settings.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// ALPN, transport parameters and cipher suites.
    pub tls: TlsConfig,
    /// Length of the connection ids this endpoint issues.
    pub cid_len: usize,
    /// Largest UDP payload to emit; at least 1200.
    pub max_datagram_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            tls: TlsConfig::default(),
            cid_len: 8,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

impl EndpointConfig {
    fn validate(&self) -> Result<(), Error> {
        if self.max_datagram_size < MIN_INITIAL_PACKET_SIZE {
            return Err(Error::BufferTooSmall {
                needed: MIN_INITIAL_PACKET_SIZE,
            });
        }
        Ok(())
    }
}

/// What happened on a connection since the last poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The handshake completed.
    Connected,
    /// Stream 0 has data to read.
    StreamReadable,
    /// The connection closed, locally or by the peer.
    Terminated(TerminateCause),
}

/// A fresh connection id of `len` random bytes.
pub(crate) fn random_cid<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Result<ConnectionId, Error> {
    let mut bytes = [0u8; crate::packet::MAX_CID_LEN];
    let bytes = bytes.get_mut(..len).ok_or(Error::InvalidState)?;
    rng.fill_bytes(bytes);
    Ok(connection_id(bytes)?)
}

/// 32 random bytes, for X25519 secrets and hello randoms.
pub(crate) fn random_bytes<R: RngCore + ?Sized>(rng: &mut R) -> [u8; 32] {
    let mut out = [0u8; 32];
    rng.fill_bytes(&mut out);
    out
}
