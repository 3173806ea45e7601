//! Per-datagram interception pass.

use crate::buf::PacketBuf;
use crate::codec::{rewrite_length_field, LengthField, PatchList};
use crate::error::FaultError;
use crate::fault::listener::Registry;
use crate::fault::stream::{CryptoStreamLog, StreamMessage};
use crate::fault::{ListenerCategory, PacketProtection, PlainPacket, QuicFault};
use crate::frame::{scan_crypto_frames, CryptoFrameSite};
use crate::mutator::HandshakeMessageView;
use crate::packet::{protect, unprotect, CoalescedPackets, PacketHeader};
use crate::tls::handshake::Role;
use crate::tls::HandshakeType;

/// Propagate `delta` bytes of payload change through `inner` length fields
/// and then the packet's own Length field.
///
/// `inner` must be ordered by increasing offset. A widened packet Length
/// shifts the packet number, so `header` is refreshed to match `buf`.
fn patch_lengths(
    header: &mut PacketHeader,
    buf: &mut PacketBuf,
    inner: &[LengthField],
    delta: isize,
) -> Result<isize, FaultError> {
    let mut patches = PatchList::new();
    if let Some(field) = header.length_field {
        patches.push(field, true);
    }
    for field in inner {
        patches.push(*field, true);
    }
    let total = patches.apply(buf, delta)?;
    tracing::trace!(delta, total, sites = patches.len(), "patched length fields");

    if let Some(field) = header.length_field {
        let refreshed = LengthField::varint_at(buf, field.offset)?;
        header.pn_offset += refreshed.end() - field.end();
        header.payload_length = refreshed.read(buf)? as usize;
        header.length_field = Some(refreshed);
    }
    header.packet_len = header.packet_len.saturating_add_signed(total);
    Ok(total)
}

/// `field` of the CRYPTO frame at `site`, as a position in the whole packet.
fn in_packet(field: LengthField, payload_start: usize) -> LengthField {
    LengthField {
        offset: payload_start + field.offset,
        width: field.width,
    }
}

/// Registered messages in the frame data covering `[start, end)` of the
/// stream.
///
/// A registered message that is not wholly inside the frame cannot be
/// edited in place and fails with [`FaultError::FragmentedHandshake`].
fn registered_messages(
    log: &CryptoStreamLog,
    registry: &Registry,
    start: u64,
    end: u64,
) -> Result<Vec<(StreamMessage, HandshakeType)>, FaultError> {
    let mut found = Vec::new();
    for msg in log.messages_overlapping(start, end) {
        let Some(ty) = HandshakeType::from_u8(msg.msg_type) else {
            continue;
        };
        if !registry.is_registered(ListenerCategory::Handshake(ty)) {
            continue;
        }
        if !msg.within(start, end) {
            tracing::warn!(
                msg = ?ty,
                offset = msg.start,
                frame = start,
                "registered message split across CRYPTO frames"
            );
            return Err(FaultError::FragmentedHandshake(ty));
        }
        found.push((msg, ty));
    }
    Ok(found)
}

impl QuicFault {
    /// Run one datagram sent by `sender` through the listeners.
    ///
    /// Returns the datagram to deliver in its place: every coalesced packet
    /// re-protected, in the original order. Any error drops the whole
    /// datagram.
    pub fn process_datagram<P>(&mut self, sender: &P, datagram: &[u8]) -> Result<Vec<u8>, FaultError>
    where
        P: PacketProtection + ?Sized,
    {
        let mut out = Vec::with_capacity(datagram.len());
        for item in CoalescedPackets::new(datagram, sender.short_header_dcid_len()) {
            let (header, packet) = item?;
            let forwarded = self.process_packet(sender, header, packet)?;
            out.extend_from_slice(&forwarded);
        }
        Ok(out)
    }

    fn process_packet<P>(
        &mut self,
        sender: &P,
        header: PacketHeader,
        packet: &[u8],
    ) -> Result<Vec<u8>, FaultError>
    where
        P: PacketProtection + ?Sized,
    {
        let level = header.level;
        let Some(keys) = sender.send_keys(level) else {
            if self.config.pass_through_unkeyed {
                tracing::warn!(?level, "no keys for packet, forwarding it unmodified");
                return Ok(packet.to_vec());
            }
            return Err(FaultError::DecryptionFailure(level));
        };

        let (mut header, mut buf) =
            match unprotect(packet, header, keys, sender.largest_sent_pn(level)) {
                Ok(v) => v,
                Err(e) if self.expect_corrupt => {
                    tracing::warn!(?level, error = %e, "corrupt packet forwarded unmodified");
                    return Ok(packet.to_vec());
                }
                Err(e) => return Err(e),
            };
        tracing::debug!(?level, pn = header.pn, len = packet.len(), "intercepted packet");

        self.run_plaintext_listener(&mut header, &mut buf)?;
        self.run_handshake_listeners(sender.role(), &mut header, &mut buf)?;

        let size = buf.len() + keys.aead.tag_len();
        if size > self.config.max_packet_size {
            return Err(FaultError::PacketTooLarge {
                size,
                max: self.config.max_packet_size,
            });
        }
        protect(&header, buf, keys)
    }

    fn run_plaintext_listener(
        &mut self,
        header: &mut PacketHeader,
        buf: &mut PacketBuf,
    ) -> Result<(), FaultError> {
        let before = buf.len();
        let mut plain = PlainPacket::new(buf, header.payload_start());
        if !self.registry.dispatch_plaintext(header, &mut plain)? {
            return Ok(());
        }

        let delta = buf.len() as isize - before as isize;
        if delta != 0 {
            patch_lengths(header, buf, &[], delta)?;
        }
        Ok(())
    }

    /// The CRYPTO frame at `index`, as currently laid out in `buf`.
    fn crypto_site(header: &PacketHeader, buf: &PacketBuf, index: usize) -> Result<CryptoFrameSite, FaultError> {
        scan_crypto_frames(&buf[header.payload_start()..])
            .get(index)
            .copied()
            .ok_or(FaultError::MalformedEncoding {
                offset: header.payload_start(),
            })
    }

    /// Walk the packet's CRYPTO frames against the sender's stream: move
    /// each frame past earlier size changes, then offer every complete
    /// message with a registered listener and splice the re-encoded message
    /// back in place.
    ///
    /// Offsets move after every edit, so frames are rescanned each round.
    fn run_handshake_listeners(
        &mut self,
        sender: Role,
        header: &mut PacketHeader,
        buf: &mut PacketBuf,
    ) -> Result<(), FaultError> {
        let level = header.level;
        let mut index = 0;
        loop {
            let payload_start = header.payload_start();
            let Some(site) = scan_crypto_frames(&buf[payload_start..]).get(index).copied() else {
                break;
            };
            let frame_start = site.stream_offset;
            let frame_end = frame_start + site.data_len as u64;

            let log = self.streams.get_mut(sender, level);
            let data = buf.range(payload_start + site.data_start, site.data_len)?;
            if !log.record(frame_start, data) {
                tracing::warn!(
                    ?level,
                    offset = frame_start,
                    known = log.recorded_len(),
                    "CRYPTO data past a gap forwarded unmodified"
                );
                index += 1;
                continue;
            }
            let shift = log.shift_at(frame_start);
            let targets = registered_messages(log, &self.registry, frame_start, frame_end)?;

            if shift != 0 {
                let field = in_packet(site.offset_field, payload_start);
                let grown = rewrite_length_field(buf, &field, shift as isize, true)?;
                if grown != 0 {
                    patch_lengths(header, buf, &[], grown as isize)?;
                }
                tracing::trace!(from = frame_start, shift, "moved CRYPTO frame");
            }

            let mut moved: isize = 0;
            for (msg, ty) in targets {
                let Some(len) = msg.len else {
                    continue;
                };
                let site = Self::crypto_site(header, buf, index)?;
                let payload_start = header.payload_start();
                let msg_start = (payload_start + site.data_start + (msg.start - frame_start) as usize)
                    .checked_add_signed(moved)
                    .ok_or(FaultError::MalformedEncoding { offset: payload_start })?;

                let mut view = HandshakeMessageView::parse(buf.range(msg_start, len)?)?;
                self.registry.dispatch_handshake(&mut view)?;
                let encoded = view.reencode()?;
                buf.splice(msg_start, len, &encoded)?;

                let delta = encoded.len() as isize - len as isize;
                if delta != 0 {
                    let crypto_length = in_packet(site.length_field, payload_start);
                    patch_lengths(header, buf, &[crypto_length], delta)?;
                    moved += delta;
                    self.streams
                        .get_mut(sender, level)
                        .note_edit(msg.start + len as u64, delta as i64);
                }
                tracing::debug!(msg = ?ty, delta, pn = header.pn, "rewrote handshake message");
            }
            index += 1;
        }
        Ok(())
    }
}
