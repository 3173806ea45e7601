//! Transmit path: build frames, protect packets, coalesce datagrams.

use crate::crypto::Level;
use crate::endpoint::connection::{Connection, ConnectionState};
use crate::error::Error;
use crate::frame::{self, ConnectionCloseFrame, CryptoFrame, Frame, StreamFrame};
use crate::packet::{build_packet, pn_length, protect, PacketSpec, MIN_INITIAL_PACKET_SIZE};
use crate::tls::handshake::Role;
use crate::tls::TlsSession;

/// Room left for the long header, packet number and AEAD tag.
const PACKET_OVERHEAD: usize = 80;

/// Worst-case CRYPTO or STREAM frame header: type plus three 8-byte varints.
const FRAME_OVERHEAD: usize = 25;

impl Connection {
    /// Turn everything queued into datagrams on the outbox.
    pub fn flush(&mut self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Closing => return self.flush_close(),
            ConnectionState::Handshaking | ConnectionState::Established => {}
        }

        let mut datagram = Vec::new();
        for level in Level::ALL {
            while let Some(packet) = self.next_packet(level)? {
                if !datagram.is_empty() && datagram.len() + packet.len() > self.max_datagram_size {
                    self.outbox.push_back(core::mem::take(&mut datagram));
                }
                datagram.extend_from_slice(&packet);
            }
        }
        if !datagram.is_empty() {
            tracing::trace!(role = ?self.role, len = datagram.len(), "queued datagram");
            self.outbox.push_back(datagram);
        }
        Ok(())
    }

    /// Frames for one packet at `level`, or `None` if nothing is waiting.
    fn next_payload(&mut self, level: Level) -> Result<Option<Vec<u8>>, Error> {
        if !self.keys.has_send(level) {
            return Ok(None);
        }
        let budget = self.max_datagram_size - PACKET_OVERHEAD;
        let mut payload = Vec::new();

        if let Some(ack) = self.received[level.index()].take_ack() {
            frame::encode(&Frame::Ack(ack), &mut payload)?;
        }

        let crypto = &mut self.crypto[level.index()];
        let room = budget.saturating_sub(payload.len() + FRAME_OVERHEAD);
        if !crypto.send.is_empty() && room > 0 {
            let n = crypto.send.len().min(room);
            let frame = Frame::Crypto(CryptoFrame {
                offset: crypto.send_offset,
                data: &crypto.send[..n],
            });
            frame::encode(&frame, &mut payload)?;
            crypto.send_offset += n as u64;
            crypto.send.drain(..n);
        }

        if level == Level::Application && self.state == ConnectionState::Established {
            if self.handshake_done_pending {
                frame::encode(&Frame::HandshakeDone, &mut payload)?;
                self.handshake_done_pending = false;
            }
            self.push_stream_frames(&mut payload, budget)?;
        }

        Ok((!payload.is_empty()).then_some(payload))
    }

    fn push_stream_frames(&mut self, payload: &mut Vec<u8>, budget: usize) -> Result<(), Error> {
        while let Some(chunk) = self.stream.pending.front_mut() {
            let room = budget.saturating_sub(payload.len() + FRAME_OVERHEAD);
            if room == 0 {
                break;
            }
            let n = chunk.len().min(room);
            let frame = Frame::Stream(StreamFrame {
                stream_id: 0,
                offset: self.stream.send_offset,
                data: &chunk[..n],
                fin: false,
            });
            frame::encode(&frame, payload)?;
            self.stream.send_offset += n as u64;
            if n == chunk.len() {
                self.stream.pending.pop_front();
            } else {
                chunk.drain(..n);
            }
        }
        Ok(())
    }

    fn next_packet(&mut self, level: Level) -> Result<Option<Vec<u8>>, Error> {
        match self.next_payload(level)? {
            Some(payload) => self.seal(level, payload).map(Some),
            None => Ok(None),
        }
    }

    /// Protect `payload` as the next packet at `level`.
    ///
    /// Client Initial packets are padded to the 1200-byte minimum.
    fn seal(&mut self, level: Level, mut payload: Vec<u8>) -> Result<Vec<u8>, Error> {
        let pn = self.keys.next_pn(level);
        let keys = self.keys.send(level).ok_or(Error::InvalidState)?;
        let tag_len = keys.aead.tag_len();
        let spec = PacketSpec {
            level,
            dcid: &self.remote_cid,
            scid: &self.local_cid,
            token: &[],
            pn,
            pn_len: pn_length(pn, None),
        };

        if self.role == Role::Client && level == Level::Initial {
            let (header, _) = build_packet(&spec, &payload, tag_len)?;
            if header.packet_len < MIN_INITIAL_PACKET_SIZE {
                payload.resize(payload.len() + MIN_INITIAL_PACKET_SIZE - header.packet_len, 0);
            }
        }

        let (header, buf) = build_packet(&spec, &payload, tag_len)?;
        tracing::trace!(?level, pn, len = header.packet_len, "sealing packet");
        Ok(protect(&header, buf, keys)?)
    }

    /// Level the peer can certainly open: a server that has not finished the
    /// handshake holds 1-RTT keys the client may not have yet.
    fn close_level(&self) -> Option<Level> {
        let highest = self.keys.highest_send_level()?;
        if self.role == Role::Server
            && highest == Level::Application
            && !self.tls.is_complete()
            && self.keys.has_send(Level::Handshake)
        {
            return Some(Level::Handshake);
        }
        Some(highest)
    }

    fn flush_close(&mut self) -> Result<(), Error> {
        self.state = ConnectionState::Closed;
        let (Some(cause), Some(level)) = (self.pending_close.take(), self.close_level()) else {
            return Ok(());
        };

        let mut payload = Vec::new();
        let frame = Frame::ConnectionClose(ConnectionCloseFrame {
            is_application: false,
            error_code: cause.error_code,
            frame_type: cause.frame_type,
            reason: &[],
        });
        frame::encode(&frame, &mut payload)?;
        let packet = self.seal(level, payload)?;
        tracing::debug!(?level, code = cause.error_code, "sent CONNECTION_CLOSE");
        self.outbox.push_back(packet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointConfig;
    use crate::packet::parse_header;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn client_initial_is_padded() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut client = Connection::client(&EndpointConfig::default(), &mut rng).unwrap();
        client.flush().unwrap();
        let datagram = client.pop_datagram().unwrap();
        assert!(datagram.len() >= MIN_INITIAL_PACKET_SIZE);
        let header = parse_header(&datagram, 8).unwrap();
        assert_eq!(header.level, Level::Initial);
        assert_eq!(header.packet_len, datagram.len());
        assert!(client.pop_datagram().is_none());
    }

    #[test]
    fn closing_sends_one_close_then_stays_quiet() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut client = Connection::client(&EndpointConfig::default(), &mut rng).unwrap();
        client.flush().unwrap();
        client.pop_datagram().unwrap();

        client.close(0x0a, 0);
        client.flush().unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(client.pop_datagram().is_some());
        client.flush().unwrap();
        assert!(client.pop_datagram().is_none());
    }
}
