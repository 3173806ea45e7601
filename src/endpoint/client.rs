//! Client endpoint.

use rand::RngCore;

use crate::endpoint::{Connection, EndpointConfig, Event};
use crate::error::{Error, TerminateCause, TransportError};

/// Client side of a connection under test.
///
/// Writes go out immediately; incoming datagrams are processed on
/// [`tick`](Self::tick).
pub struct QuicClient {
    conn: Connection,
}

impl QuicClient {
    /// Create a client; its first Initial flight is ready on the outbox.
    pub fn new<R: RngCore + ?Sized>(config: &EndpointConfig, rng: &mut R) -> Result<Self, Error> {
        let mut conn = Connection::client(config, rng)?;
        conn.flush()?;
        Ok(Self { conn })
    }

    /// Process received datagrams and send whatever they caused.
    ///
    /// A protocol error closes the connection but is not an `Err`: it shows
    /// up in [`terminate_cause`](Self::terminate_cause) and on the next
    /// [`read`](Self::read).
    pub fn tick(&mut self) -> Result<(), Error> {
        self.conn.process_inbox()?;
        self.conn.flush()
    }

    /// Read stream 0.
    ///
    /// `WouldBlock` when nothing has arrived; `Terminated` once the
    /// connection has failed, classified by [`Error::kind`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.conn.read(buf)
    }

    /// Write to stream 0 and transmit.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let n = self.conn.queue_write(data)?;
        self.conn.flush()?;
        Ok(n)
    }

    /// Close without an error.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.conn.close(TransportError::NoError.to_code(), 0);
        self.conn.flush()
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

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
