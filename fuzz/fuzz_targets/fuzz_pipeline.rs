#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_fault::crypto::key_schedule::initial_keys;
use milli_fault::crypto::{Level, PacketKeys};
use milli_fault::fault::PacketProtection;
use milli_fault::packet::{build_packet, pn_length, protect, PacketSpec};
use milli_fault::{FaultConfig, Policy, QuicFault, Role};

const DCID: [u8; 8] = [0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];

struct Sender {
    keys: PacketKeys,
}

impl PacketProtection for Sender {
    fn role(&self) -> Role {
        Role::Server
    }

    fn send_keys(&self, level: Level) -> Option<&PacketKeys> {
        (level == Level::Initial).then_some(&self.keys)
    }

    fn largest_sent_pn(&self, _level: Level) -> Option<u64> {
        Some(0)
    }

    fn short_header_dcid_len(&self) -> usize {
        DCID.len()
    }
}

fuzz_target!(|data: &[u8]| {
    // Seal the input as an Initial payload, then resize it by an
    // input-chosen amount and strip the first extension of any handshake
    // message found. Errors are fine; panics are not.
    let Some((&delta, payload)) = data.split_first() else {
        return;
    };
    let payload = if payload.is_empty() { &[0x01][..] } else { payload };

    let Ok((keys, _)) = initial_keys(&DCID) else {
        return;
    };
    let spec = PacketSpec {
        level: Level::Initial,
        dcid: &DCID,
        scid: &[],
        token: &[],
        pn: 0,
        pn_len: pn_length(0, None),
    };
    let Ok((header, buf)) = build_packet(&spec, payload, keys.aead.tag_len()) else {
        return;
    };
    let Ok(datagram) = protect(&header, buf, &keys) else {
        return;
    };

    let mut fault = QuicFault::new(FaultConfig::default());
    let _ = fault.set_plaintext_listener(Policy::Persistent, move |_, packet| {
        let len = packet.len();
        let new_len = if delta & 0x80 != 0 {
            len.saturating_sub(usize::from(delta & 0x7f))
        } else {
            len + usize::from(delta)
        };
        packet.resize(new_len).is_ok()
    });
    for ty in [
        milli_fault::tls::HandshakeType::ClientHello,
        milli_fault::tls::HandshakeType::ServerHello,
        milli_fault::tls::HandshakeType::EncryptedExtensions,
    ] {
        let _ = fault.set_handshake_listener(ty, Policy::Persistent, |msg| {
            if let Some(&first) = msg.extension_types().first() {
                msg.delete_extension(first);
            }
            true
        });
    }

    let _ = fault.process_datagram(&Sender { keys }, &datagram);
});
