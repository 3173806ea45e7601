//! Test server stub.

use rand::RngCore;

use crate::endpoint::{Connection, EndpointConfig, Event};
use crate::error::{Error, TerminateCause, TransportError};

/// Server side of a connection under test: accepts one client.
///
/// Unlike the client, writes are only queued; they go out on the next
/// [`tick`](Self::tick).
pub struct TestServer {
    conn: Connection,
}

impl TestServer {
    pub fn new<R: RngCore + ?Sized>(config: &EndpointConfig, rng: &mut R) -> Result<Self, Error> {
        Ok(Self {
            conn: Connection::server(config, rng)?,
        })
    }

    /// Process received datagrams, then send everything queued.
    pub fn tick(&mut self) -> Result<(), Error> {
        self.conn.process_inbox()?;
        self.conn.flush()
    }

    /// Read stream 0; `WouldBlock` when nothing has arrived.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.conn.read(buf)
    }

    /// Queue `data` on stream 0 for the next tick.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.conn.queue_write(data)
    }

    /// Close without an error on the next tick.
    pub fn shutdown(&mut self) {
        self.conn.close(TransportError::NoError.to_code(), 0);
    }

    /// The connection ended with a non-zero error code, raised by either side.
    pub fn has_protocol_error(&self) -> bool {
        self.conn
            .terminate_cause()
            .is_some_and(|cause| cause.is_protocol_error())
    }

    pub fn is_established(&self) -> bool {
        self.conn.is_established()
    }

    pub fn is_terminated(&self) -> bool {
        self.conn.is_terminated()
    }

    pub fn terminate_cause(&self) -> Option<TerminateCause> {
        self.conn.terminate_cause()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.conn.poll_event()
    }

    pub fn recv_datagram(&mut self, datagram: Vec<u8>) {
        self.conn.recv_datagram(datagram);
    }

    pub fn pop_datagram(&mut self) -> Option<Vec<u8>> {
        self.conn.pop_datagram()
    }

    /// The connection, also the key source for intercepting its datagrams.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
