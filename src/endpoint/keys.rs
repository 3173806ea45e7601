//! Per-level packet keys and packet number spaces of one endpoint.
//!
//! Keys are never discarded: an interceptor holding a borrow of the sender
//! must be able to open any packet still in flight.

use crate::crypto::key_schedule::initial_keys;
use crate::crypto::{CipherSuite, Level, PacketKeys};
use crate::error::Error;
use crate::tls::handshake::Role;
use crate::tls::DerivedKeys;

#[derive(Debug, Default)]
struct Space {
    send: Option<PacketKeys>,
    recv: Option<PacketKeys>,
    next_pn: u64,
    largest_sent: Option<u64>,
}

/// Send and receive keys for Initial, Handshake and 1-RTT.
#[derive(Debug, Default)]
pub struct KeySet {
    spaces: [Space; 3],
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive Initial keys from the client's first destination connection id.
    ///
    /// The client sends with the client keys, the server with the server keys.
    pub fn install_initial(&mut self, role: Role, dcid: &[u8]) -> Result<(), Error> {
        let (client, server) = initial_keys(dcid)?;
        let space = &mut self.spaces[Level::Initial.index()];
        let (send, recv) = match role {
            Role::Client => (client, server),
            Role::Server => (server, client),
        };
        space.send = Some(send);
        space.recv = Some(recv);
        Ok(())
    }

    /// Install packet keys for secrets the handshake produced.
    pub fn install(&mut self, suite: CipherSuite, derived: &DerivedKeys) -> Result<(), Error> {
        let space = &mut self.spaces[derived.level.index()];
        space.send = Some(suite.packet_keys(&derived.send_secret)?);
        space.recv = Some(suite.packet_keys(&derived.recv_secret)?);
        tracing::trace!(level = ?derived.level, "installed packet keys");
        Ok(())
    }

    pub fn send(&self, level: Level) -> Option<&PacketKeys> {
        self.spaces[level.index()].send.as_ref()
    }

    pub fn recv(&self, level: Level) -> Option<&PacketKeys> {
        self.spaces[level.index()].recv.as_ref()
    }

    pub fn has_send(&self, level: Level) -> bool {
        self.send(level).is_some()
    }

    /// Highest level we can send at.
    pub fn highest_send_level(&self) -> Option<Level> {
        Level::ALL.into_iter().rev().find(|l| self.has_send(*l))
    }

    /// Allocate the next packet number at `level`.
    pub fn next_pn(&mut self, level: Level) -> u64 {
        let space = &mut self.spaces[level.index()];
        let pn = space.next_pn;
        space.next_pn += 1;
        space.largest_sent = Some(pn);
        pn
    }

    pub fn largest_sent(&self, level: Level) -> Option<u64> {
        self.spaces[level.index()].largest_sent
    }
}
