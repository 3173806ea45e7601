//! QUIC + TLS 1.3 fault injection.
//!
//! A [`QuicFault`] sits on the link between a [`QuicClient`] and a
//! [`TestServer`] and decrypts each packet with its sender's keys. Registered
//! listeners may rewrite the plaintext or individual handshake messages; the
//! context then repairs every length field and stream offset the edit
//! invalidated and protects the packet again. The [`qtest`] module wires the three together.

#![forbid(unsafe_code)]

pub mod buf;
pub mod codec;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod fault;
pub mod frame;
pub mod mutator;
pub mod packet;
pub mod qtest;
pub mod tls;
pub mod varint;

pub use buf::PacketBuf;
pub use endpoint::{Connection, ConnectionState, EndpointConfig, Event, QuicClient, TestServer};
pub use error::{Error, ErrorKind, FaultError, TerminateCause, TransportError};
pub use fault::{FaultConfig, ListenerCategory, PlainPacket, Policy, QuicFault};
pub use mutator::HandshakeMessageView;
pub use tls::handshake::Role;
