//! TLS 1.3 handshake pieces for the test endpoints and the fault pipeline.
//!
//! QUIC uses TLS 1.3 differently from TCP:
//! - No TLS record layer; handshake messages travel raw in CRYPTO frames
//! - QUIC does its own packet protection with secrets exported by TLS
//! - QUIC transport parameters are exchanged as a TLS extension
//!
//! The engine here is deliberately small: X25519 key exchange, no
//! certificates, SHA-256 key schedule. It exists so the endpoints can run a
//! real handshake that the fault pipeline can then pick apart.

pub mod alert;
pub mod extensions;
pub mod handshake;
pub mod key_schedule;
pub mod messages;
pub mod transcript;
pub mod transport_params;

pub use alert::AlertDescription;
pub use extensions::ExtensionType;
pub use handshake::{Role, TlsConfig, TlsEngine};
pub use messages::HandshakeType;
pub use transport_params::TransportParams;

use crate::crypto::Level;
use crate::error::Error;

/// Traffic secrets derived during the handshake, ready for QUIC packet keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    /// The encryption level these secrets protect.
    pub level: Level,
    pub send_secret: [u8; 32],
    pub recv_secret: [u8; 32],
}

/// The TLS session interface the QUIC connection drives.
pub trait TlsSession {
    /// Feed handshake bytes received in CRYPTO frames at `level`.
    ///
    /// Bytes must arrive in stream order; a message split across calls is
    /// buffered until complete.
    fn read_handshake(&mut self, level: Level, data: &[u8]) -> Result<(), Error>;

    /// Take the next flight of outgoing handshake bytes and the level to send them at.
    fn write_handshake(&mut self) -> Option<(Level, Vec<u8>)>;

    /// Take the next set of newly derived secrets.
    fn derived_keys(&mut self) -> Option<DerivedKeys>;

    fn is_complete(&self) -> bool;

    /// Negotiated ALPN protocol.
    fn alpn(&self) -> Option<&[u8]>;

    /// Peer's QUIC transport parameters, once received.
    fn peer_transport_params(&self) -> Option<&TransportParams>;
}

/// Map any parse failure of peer handshake bytes to a `decode_error` alert.
pub(crate) fn decode_error<E>(_: E) -> Error {
    Error::Alert(AlertDescription::DecodeError)
}
