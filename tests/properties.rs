//! Property tests for the handshake mutator and the packet buffer.

use std::collections::BTreeMap;

use milli_fault::tls::messages::encode_message;
use milli_fault::tls::HandshakeType;
use milli_fault::{HandshakeMessageView, PacketBuf};
use proptest::prelude::*;

/// EncryptedExtensions with the given extensions, in map order.
fn encrypted_extensions(exts: &BTreeMap<u16, Vec<u8>>) -> Vec<u8> {
    let mut entries = Vec::new();
    for (ty, body) in exts {
        entries.extend_from_slice(&ty.to_be_bytes());
        entries.extend_from_slice(&(body.len() as u16).to_be_bytes());
        entries.extend_from_slice(body);
    }
    let mut block = (entries.len() as u16).to_be_bytes().to_vec();
    block.extend_from_slice(&entries);
    encode_message(HandshakeType::EncryptedExtensions.to_u8(), &block).unwrap()
}

fn extension_sets() -> impl Strategy<Value = BTreeMap<u16, Vec<u8>>> {
    prop::collection::btree_map(any::<u16>(), prop::collection::vec(any::<u8>(), 0..48), 0..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Parsing and re-encoding an untouched message reproduces it exactly.
    #[test]
    fn untouched_message_reencodes_identically(exts in extension_sets()) {
        let msg = encrypted_extensions(&exts);
        let view = HandshakeMessageView::parse(&msg).unwrap();
        prop_assert_eq!(view.original_len(), msg.len());
        prop_assert_eq!(view.encoded_len(), msg.len());
        prop_assert_eq!(view.reencode().unwrap(), msg);
    }

    /// Deleting an extension shrinks the message by its entry and leaves the
    /// others in order.
    #[test]
    fn delete_removes_exactly_one_entry(exts in extension_sets(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!exts.is_empty());
        let msg = encrypted_extensions(&exts);
        let (&ty, body) = exts.iter().nth(pick.index(exts.len())).unwrap();

        let mut view = HandshakeMessageView::parse(&msg).unwrap();
        prop_assert!(view.delete_extension(ty));
        prop_assert!(!view.delete_extension(ty));

        let out = view.reencode().unwrap();
        prop_assert_eq!(out.len(), msg.len() - 4 - body.len());

        let mut rest = exts.clone();
        rest.remove(&ty);
        prop_assert_eq!(out, encrypted_extensions(&rest));
    }

    /// Growing by `k`, shifting and filling the front keeps the old bytes as
    /// the tail.
    #[test]
    fn resize_then_prepend_keeps_tail(
        bytes in prop::collection::vec(any::<u8>(), 0..256),
        prefix in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut buf = PacketBuf::from_slice(&bytes).unwrap();
        let old = buf.len();
        let k = prefix.len();
        buf.resize(old + k).unwrap();
        buf.copy_within(0..old, k);
        buf[..k].copy_from_slice(&prefix);

        prop_assert_eq!(buf.len(), old + k);
        prop_assert_eq!(&buf[..k], &prefix[..]);
        prop_assert_eq!(&buf[k..], &bytes[..]);
    }

    /// Shrinking keeps the prefix.
    #[test]
    fn shrink_keeps_prefix(bytes in prop::collection::vec(any::<u8>(), 0..256), cut in any::<prop::sample::Index>()) {
        let mut buf = PacketBuf::from_slice(&bytes).unwrap();
        let new_len = if bytes.is_empty() { 0 } else { cut.index(bytes.len() + 1) };
        buf.resize(new_len).unwrap();
        prop_assert_eq!(&buf[..], &bytes[..new_len]);
    }
}
