//! Fault-injection context.
//!
//! A [`QuicFault`] sits on the link between two endpoints. Each datagram it
//! is handed is split into its coalesced packets; every packet is decrypted
//! with the sender's keys, offered to the registered listeners, re-encrypted
//! under the same packet number and re-coalesced. Listeners may resize the
//! plaintext or edit the extensions of handshake messages; every enclosing
//! length field is recomputed before the packet is sealed again.

pub mod listener;
mod pipeline;
mod stream;

use core::ops::{Deref, DerefMut};

pub use listener::{HandshakeListener, ListenerCategory, PlaintextListener, Policy};

use crate::buf::PacketBuf;
use crate::crypto::{Level, PacketKeys};
use crate::error::FaultError;
use crate::mutator::HandshakeMessageView;
use crate::packet::PacketHeader;
use crate::tls::handshake::Role;
use crate::tls::HandshakeType;

use self::listener::Registry;
use self::stream::CryptoStreams;

/// 1500-byte Ethernet MTU less IPv4 and UDP headers.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1472;

/// Read-only access to the key material of the endpoint whose datagrams are
/// being intercepted.
pub trait PacketProtection {
    /// Which side of the connection the endpoint is.
    fn role(&self) -> Role;

    /// Keys the endpoint seals packets of `level` with.
    fn send_keys(&self, level: Level) -> Option<&PacketKeys>;

    /// Largest packet number the endpoint has sent at `level`.
    fn largest_sent_pn(&self, level: Level) -> Option<u64>;

    /// Length of the connection id the endpoint puts in short headers.
    fn short_header_dcid_len(&self) -> usize;
}

/// Interceptor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultConfig {
    /// Largest protected packet the interceptor will emit.
    pub max_packet_size: usize,
    /// Forward packets of a level the sender has no keys for instead of
    /// failing with `DecryptionFailure`.
    pub pass_through_unkeyed: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            pass_through_unkeyed: true,
        }
    }
}

/// Decrypted packet handed to a plaintext listener.
///
/// Indexing covers the frame bytes only; the header and packet number stay
/// out of reach. Growing the packet goes through [`resize`](Self::resize) or
/// [`insert`](Self::insert).
pub struct PlainPacket<'a> {
    buf: &'a mut PacketBuf,
    payload_start: usize,
}

impl<'a> PlainPacket<'a> {
    pub(crate) fn new(buf: &'a mut PacketBuf, payload_start: usize) -> Self {
        Self { buf, payload_start }
    }

    /// Frame bytes in the packet.
    pub fn len(&self) -> usize {
        self.buf.len() - self.payload_start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow (zero-filled) or shrink the frame bytes to `new_len`.
    pub fn resize(&mut self, new_len: usize) -> Result<(), FaultError> {
        self.buf.resize(self.payload_start + new_len)
    }

    /// Insert `bytes` at frame offset `offset`, shifting the tail.
    pub fn insert(&mut self, offset: usize, bytes: &[u8]) -> Result<(), FaultError> {
        self.check(offset, 0)?;
        self.buf.insert(self.payload_start + offset, bytes)
    }

    /// Remove `count` frame bytes starting at `offset`.
    pub fn remove(&mut self, offset: usize, count: usize) -> Result<(), FaultError> {
        self.check(offset, count)?;
        self.buf.remove(self.payload_start + offset, count)
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), FaultError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(FaultError::RangeError {
                offset,
                len,
                buf_len: self.len(),
            }),
        }
    }
}

impl Deref for PlainPacket<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[self.payload_start..]
    }
}

impl DerefMut for PlainPacket<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.payload_start..]
    }
}

/// Fault-injection context for one connection under test.
#[derive(Default)]
pub struct QuicFault {
    config: FaultConfig,
    registry: Registry,
    streams: CryptoStreams,
    expect_corrupt: bool,
}

impl QuicFault {
    pub fn new(config: FaultConfig) -> Self {
        Self {
            config,
            registry: Registry::default(),
            streams: CryptoStreams::default(),
            expect_corrupt: false,
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Register the listener invoked on every decrypted packet.
    pub fn set_plaintext_listener<F>(&mut self, policy: Policy, listener: F) -> Result<(), FaultError>
    where
        F: FnMut(&PacketHeader, &mut PlainPacket<'_>) -> bool + 'static,
    {
        self.registry.register_plaintext(policy, Box::new(listener))
    }

    /// Register the listener invoked on complete handshake messages of type `ty`.
    ///
    /// Only ClientHello, ServerHello and EncryptedExtensions carry editable
    /// extensions; any other type is [`FaultError::UnsupportedMessage`].
    pub fn set_handshake_listener<F>(
        &mut self,
        ty: HandshakeType,
        policy: Policy,
        listener: F,
    ) -> Result<(), FaultError>
    where
        F: FnMut(&mut HandshakeMessageView) -> bool + 'static,
    {
        self.registry.register_handshake(ty, policy, Box::new(listener))
    }

    pub fn set_encrypted_extensions_listener<F>(&mut self, policy: Policy, listener: F) -> Result<(), FaultError>
    where
        F: FnMut(&mut HandshakeMessageView) -> bool + 'static,
    {
        self.set_handshake_listener(HandshakeType::EncryptedExtensions, policy, listener)
    }

    /// Drop the listener registered for `category`. Returns `false` if there was none.
    pub fn clear_listener(&mut self, category: ListenerCategory) -> bool {
        self.registry.clear(category)
    }

    pub fn is_registered(&self, category: ListenerCategory) -> bool {
        self.registry.is_registered(category)
    }

    /// How many times the listener of `category` has been invoked.
    pub fn fire_count(&self, category: ListenerCategory) -> usize {
        self.registry.fire_count(category)
    }

    /// Forward packets that fail to decrypt instead of failing the datagram.
    ///
    /// For tests that have already corrupted a packet on purpose.
    pub fn expect_corrupt(&mut self, expect: bool) {
        self.expect_corrupt = expect;
    }

    pub fn is_expecting_corrupt(&self) -> bool {
        self.expect_corrupt
    }
}
