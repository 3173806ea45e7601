//! Test harness: a client, a test server and an optional fault context over
//! an in-memory link.
//!
//! Datagrams in both directions pass through the fault context, each opened
//! with the sending endpoint's own packet keys. Nothing is ever lost or
//! reordered; the link only moves datagrams when one side is ticked.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::endpoint::{EndpointConfig, QuicClient, TestServer};
use crate::error::Error;
use crate::fault::{FaultConfig, QuicFault};

/// Harness settings.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub client: EndpointConfig,
    pub server: EndpointConfig,
    pub fault: FaultConfig,
    /// Client and server ticks allowed for the handshake to finish.
    pub round_limit: usize,
    pub client_seed: u64,
    pub server_seed: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            client: EndpointConfig::default(),
            server: EndpointConfig::default(),
            fault: FaultConfig::default(),
            round_limit: 16,
            client_seed: 0x00c1_1e47,
            server_seed: 0x005e_7e44,
        }
    }
}

/// A client and server wired together.
pub struct Harness {
    pub client: QuicClient,
    pub server: TestServer,
    fault: Option<QuicFault>,
    round_limit: usize,
}

impl Harness {
    pub fn fault(&self) -> Option<&QuicFault> {
        self.fault.as_ref()
    }

    pub fn fault_mut(&mut self) -> Option<&mut QuicFault> {
        self.fault.as_mut()
    }

    /// Move every client datagram to the server through the fault context.
    ///
    /// Errors stop delivery the same way as in
    /// [`deliver_to_client`](Self::deliver_to_client).
    pub fn deliver_to_server(&mut self) -> Result<usize, Error> {
        let mut moved = 0;
        while let Some(datagram) = self.client.pop_datagram() {
            let datagram = match &mut self.fault {
                Some(fault) => fault.process_datagram(self.client.connection(), &datagram)?,
                None => datagram,
            };
            self.server.recv_datagram(datagram);
            moved += 1;
        }
        Ok(moved)
    }

    /// Move every server datagram to the client through the fault context.
    ///
    /// A fault error stops delivery; the failed datagram is dropped and later
    /// ones stay queued at the server.
    pub fn deliver_to_client(&mut self) -> Result<usize, Error> {
        let mut moved = 0;
        while let Some(datagram) = self.server.pop_datagram() {
            let datagram = match &mut self.fault {
                Some(fault) => fault.process_datagram(self.server.connection(), &datagram)?,
                None => datagram,
            };
            self.client.recv_datagram(datagram);
            moved += 1;
        }
        Ok(moved)
    }

    /// Deliver to the server, tick it, deliver its output to the client.
    pub fn tick_server(&mut self) -> Result<(), Error> {
        self.deliver_to_server()?;
        self.server.tick()?;
        self.deliver_to_client()?;
        Ok(())
    }

    /// Deliver to the client and tick it. Its output waits for the next
    /// server tick.
    pub fn tick_client(&mut self) -> Result<(), Error> {
        self.deliver_to_client()?;
        self.client.tick()
    }
}

/// Create a client, a server and, if `with_fault`, a fault context.
pub fn create_quic_objects(config: &HarnessConfig, with_fault: bool) -> Result<Harness, Error> {
    let mut client_rng = StdRng::seed_from_u64(config.client_seed);
    let mut server_rng = StdRng::seed_from_u64(config.server_seed);
    Ok(Harness {
        client: QuicClient::new(&config.client, &mut client_rng)?,
        server: TestServer::new(&config.server, &mut server_rng)?,
        fault: with_fault.then(|| QuicFault::new(config.fault.clone())),
        round_limit: config.round_limit,
    })
}

/// Tick both sides until the handshake completes.
///
/// `Ok(false)` when either side terminates or the round limit runs out;
/// `Err` only for harness failures, including fault pipeline errors.
pub fn create_quic_connection(harness: &mut Harness) -> Result<bool, Error> {
    for round in 0..harness.round_limit {
        harness.tick_client()?;
        harness.tick_server()?;

        if harness.client.is_terminated() || harness.server.is_terminated() {
            tracing::debug!(
                round,
                client = ?harness.client.terminate_cause(),
                server = ?harness.server.terminate_cause(),
                "connection failed"
            );
            return Ok(false);
        }
        if harness.client.is_established() && harness.server.is_established() {
            tracing::debug!(round, "connection established");
            return Ok(true);
        }
    }
    tracing::warn!(rounds = harness.round_limit, "handshake did not finish");
    Ok(false)
}

/// Tick the server once, then ask whether it saw a protocol error.
pub fn check_server_protocol_err(harness: &mut Harness) -> Result<bool, Error> {
    harness.tick_server()?;
    Ok(harness.server.has_protocol_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Event;
    use crate::error::ErrorKind;

    #[test]
    fn handshake_without_fault() {
        let mut h = create_quic_objects(&HarnessConfig::default(), false).unwrap();
        assert!(h.fault().is_none());
        assert!(create_quic_connection(&mut h).unwrap());
        assert_eq!(h.client.connection().alpn(), Some(&b"hq-interop"[..]));
        assert!(h.server.connection().peer_transport_params().is_some());
        assert_eq!(h.client.poll_event(), Some(Event::Connected));
        assert!(!h.server.has_protocol_error());
    }

    #[test]
    fn server_may_write_first() {
        let mut h = create_quic_objects(&HarnessConfig::default(), true).unwrap();
        assert!(create_quic_connection(&mut h).unwrap());
        h.server.write(b"ping").unwrap();
        h.tick_server().unwrap();
        h.tick_client().unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(h.client.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(h.client.read(&mut buf).unwrap_err().kind(), ErrorKind::WantRead);
    }

    #[test]
    fn clean_shutdown_is_zero_return() {
        let mut h = create_quic_objects(&HarnessConfig::default(), false).unwrap();
        assert!(create_quic_connection(&mut h).unwrap());
        h.client.shutdown().unwrap();
        assert!(!check_server_protocol_err(&mut h).unwrap());
        let cause = h.server.terminate_cause().unwrap();
        assert!(cause.remote);

        let mut buf = [0u8; 4];
        assert_eq!(h.server.read(&mut buf).unwrap_err().kind(), ErrorKind::ZeroReturn);
    }

    #[test]
    fn handshake_round_limit() {
        let config = HarnessConfig {
            round_limit: 1,
            ..HarnessConfig::default()
        };
        let mut h = create_quic_objects(&config, false).unwrap();
        assert!(!create_quic_connection(&mut h).unwrap());
    }
}
