//! Listener registry: one callback slot per fault category.

use core::fmt;

use crate::error::FaultError;
use crate::fault::PlainPacket;
use crate::mutator::{HandshakeMessageView, EDITABLE_TYPES};
use crate::packet::PacketHeader;
use crate::tls::HandshakeType;

/// What a listener is invoked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerCategory {
    /// Every decrypted packet, before handshake data is looked at.
    Plaintext,
    /// Complete handshake messages of one type found in CRYPTO frames.
    Handshake(HandshakeType),
}

impl fmt::Display for ListenerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plaintext => f.write_str("plaintext packet"),
            Self::Handshake(ty) => write!(f, "{ty:?} message"),
        }
    }
}

/// How long a registration lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Consumed by its first invocation.
    Once,
    /// Kept until cleared or the context is dropped.
    #[default]
    Persistent,
}

/// Return `true` to forward the packet, `false` to abort it.
pub type PlaintextListener = Box<dyn FnMut(&PacketHeader, &mut PlainPacket<'_>) -> bool>;

/// Return `true` to forward the packet, `false` to abort it.
pub type HandshakeListener = Box<dyn FnMut(&mut HandshakeMessageView) -> bool>;

struct Slot<F> {
    callback: F,
    policy: Policy,
}

/// One slot per editable message type.
const HANDSHAKE_SLOTS: usize = EDITABLE_TYPES.len();
/// Plaintext plus the handshake slots.
const MAX_CATEGORIES: usize = HANDSHAKE_SLOTS + 1;

#[derive(Default)]
pub(crate) struct Registry {
    plaintext: Option<Slot<PlaintextListener>>,
    handshake: heapless::Vec<(HandshakeType, Slot<HandshakeListener>), HANDSHAKE_SLOTS>,
    fired: heapless::LinearMap<ListenerCategory, usize, MAX_CATEGORIES>,
}

impl Registry {
    pub fn is_registered(&self, category: ListenerCategory) -> bool {
        match category {
            ListenerCategory::Plaintext => self.plaintext.is_some(),
            ListenerCategory::Handshake(ty) => self.handshake.iter().any(|(t, _)| *t == ty),
        }
    }

    pub fn has_handshake_listeners(&self) -> bool {
        !self.handshake.is_empty()
    }

    pub fn register_plaintext(
        &mut self,
        policy: Policy,
        callback: PlaintextListener,
    ) -> Result<(), FaultError> {
        if self.plaintext.is_some() {
            return Err(FaultError::RegistrationConflict(ListenerCategory::Plaintext));
        }
        self.plaintext = Some(Slot { callback, policy });
        Ok(())
    }

    pub fn register_handshake(
        &mut self,
        ty: HandshakeType,
        policy: Policy,
        callback: HandshakeListener,
    ) -> Result<(), FaultError> {
        if !HandshakeMessageView::is_editable(ty) {
            return Err(FaultError::UnsupportedMessage(ty));
        }
        let category = ListenerCategory::Handshake(ty);
        if self.is_registered(category) {
            return Err(FaultError::RegistrationConflict(category));
        }
        // distinct editable types only, so the push cannot overflow
        self.handshake
            .push((ty, Slot { callback, policy }))
            .map_err(|_| FaultError::UnsupportedMessage(ty))
    }

    /// Drop the registration for `category`. Returns `false` if the slot was empty.
    pub fn clear(&mut self, category: ListenerCategory) -> bool {
        match category {
            ListenerCategory::Plaintext => self.plaintext.take().is_some(),
            ListenerCategory::Handshake(ty) => self.take_handshake(ty).is_some(),
        }
    }

    fn take_handshake(&mut self, ty: HandshakeType) -> Option<Slot<HandshakeListener>> {
        let i = self.handshake.iter().position(|(t, _)| *t == ty)?;
        Some(self.handshake.swap_remove(i).1)
    }

    pub fn fire_count(&self, category: ListenerCategory) -> usize {
        self.fired.get(&category).copied().unwrap_or(0)
    }

    fn record_fire(&mut self, category: ListenerCategory) {
        if let Some(n) = self.fired.get_mut(&category) {
            *n += 1;
        } else {
            // sized for every category
            let _ = self.fired.insert(category, 1);
        }
    }

    /// Invoke the plaintext listener, if any. Returns whether one fired.
    ///
    /// The slot is taken out for the duration of the call, so a listener can
    /// never observe its own registration.
    pub fn dispatch_plaintext(
        &mut self,
        header: &PacketHeader,
        packet: &mut PlainPacket<'_>,
    ) -> Result<bool, FaultError> {
        let Some(mut slot) = self.plaintext.take() else {
            return Ok(false);
        };
        let category = ListenerCategory::Plaintext;
        tracing::debug!(%category, pn = header.pn, level = ?header.level, "dispatching listener");
        let keep_going = (slot.callback)(header, packet);
        self.record_fire(category);
        if slot.policy == Policy::Persistent {
            self.plaintext = Some(slot);
        }
        if keep_going {
            Ok(true)
        } else {
            Err(FaultError::ListenerAborted(category))
        }
    }

    /// Invoke the listener registered for `view`'s message type, if any.
    pub fn dispatch_handshake(&mut self, view: &mut HandshakeMessageView) -> Result<bool, FaultError> {
        let ty = view.msg_type();
        let Some(mut slot) = self.take_handshake(ty) else {
            return Ok(false);
        };
        let category = ListenerCategory::Handshake(ty);
        tracing::debug!(%category, len = view.encoded_len(), "dispatching listener");
        let keep_going = (slot.callback)(view);
        self.record_fire(category);
        if slot.policy == Policy::Persistent {
            // the slot was just vacated
            let _ = self.handshake.push((ty, slot));
        }
        if keep_going {
            Ok(true)
        } else {
            Err(FaultError::ListenerAborted(category))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::PacketBuf;
    use crate::crypto::Level;
    use crate::packet::{build_packet, PacketSpec};

    fn header_and_buf() -> (PacketHeader, PacketBuf) {
        let spec = PacketSpec {
            level: Level::Application,
            dcid: &[1, 2, 3, 4],
            scid: &[],
            token: &[],
            pn: 3,
            pn_len: 1,
        };
        build_packet(&spec, &[0x01], 16).unwrap()
    }

    #[test]
    fn second_registration_conflicts() {
        let mut reg = Registry::default();
        reg.register_plaintext(Policy::Persistent, Box::new(|_, _| true))
            .unwrap();
        assert_eq!(
            reg.register_plaintext(Policy::Once, Box::new(|_, _| true)),
            Err(FaultError::RegistrationConflict(ListenerCategory::Plaintext))
        );

        let ee = HandshakeType::EncryptedExtensions;
        reg.register_handshake(ee, Policy::Once, Box::new(|_| true))
            .unwrap();
        assert_eq!(
            reg.register_handshake(ee, Policy::Once, Box::new(|_| true)),
            Err(FaultError::RegistrationConflict(ListenerCategory::Handshake(ee)))
        );
        // a different message type is a different category
        reg.register_handshake(HandshakeType::ServerHello, Policy::Once, Box::new(|_| true))
            .unwrap();

        assert!(reg.clear(ListenerCategory::Plaintext));
        assert!(!reg.clear(ListenerCategory::Plaintext));
        reg.register_plaintext(Policy::Once, Box::new(|_, _| true))
            .unwrap();
    }

    #[test]
    fn only_editable_types_register() {
        let mut reg = Registry::default();
        for ty in [HandshakeType::Finished, HandshakeType::Certificate, HandshakeType::NewSessionTicket] {
            assert_eq!(
                reg.register_handshake(ty, Policy::Persistent, Box::new(|_| true)),
                Err(FaultError::UnsupportedMessage(ty))
            );
            assert!(!reg.is_registered(ListenerCategory::Handshake(ty)));
        }
        assert!(!reg.has_handshake_listeners());

        // every editable type fits at once
        for ty in EDITABLE_TYPES {
            reg.register_handshake(ty, Policy::Persistent, Box::new(|_| true))
                .unwrap();
        }
        assert_eq!(reg.handshake.len(), reg.handshake.capacity());
        assert_eq!(
            reg.register_handshake(HandshakeType::ClientHello, Policy::Once, Box::new(|_| true)),
            Err(FaultError::RegistrationConflict(ListenerCategory::Handshake(
                HandshakeType::ClientHello
            )))
        );
        // a fire count per category fits too
        reg.record_fire(ListenerCategory::Plaintext);
        for ty in EDITABLE_TYPES {
            reg.record_fire(ListenerCategory::Handshake(ty));
        }
        for ty in EDITABLE_TYPES {
            assert_eq!(reg.fire_count(ListenerCategory::Handshake(ty)), 1);
        }
        assert_eq!(reg.fire_count(ListenerCategory::Plaintext), 1);
    }

    #[test]
    fn once_is_consumed_persistent_is_kept() {
        let (header, mut buf) = header_and_buf();
        let payload_start = header.payload_start();
        let mut reg = Registry::default();
        reg.register_plaintext(Policy::Once, Box::new(|_, _| true))
            .unwrap();

        let mut plain = PlainPacket::new(&mut buf, payload_start);
        assert_eq!(reg.dispatch_plaintext(&header, &mut plain), Ok(true));
        assert_eq!(reg.dispatch_plaintext(&header, &mut plain), Ok(false));
        assert_eq!(reg.fire_count(ListenerCategory::Plaintext), 1);

        reg.register_plaintext(Policy::Persistent, Box::new(|_, _| true))
            .unwrap();
        for _ in 0..3 {
            assert_eq!(reg.dispatch_plaintext(&header, &mut plain), Ok(true));
        }
        assert_eq!(reg.fire_count(ListenerCategory::Plaintext), 4);
        assert!(reg.is_registered(ListenerCategory::Plaintext));
    }

    #[test]
    fn false_aborts() {
        let (header, mut buf) = header_and_buf();
        let payload_start = header.payload_start();
        let mut reg = Registry::default();
        reg.register_plaintext(Policy::Persistent, Box::new(|_, _| false))
            .unwrap();
        let mut plain = PlainPacket::new(&mut buf, payload_start);
        assert_eq!(
            reg.dispatch_plaintext(&header, &mut plain),
            Err(FaultError::ListenerAborted(ListenerCategory::Plaintext))
        );
    }

    #[test]
    fn category_display() {
        assert_eq!(ListenerCategory::Plaintext.to_string(), "plaintext packet");
        assert_eq!(
            ListenerCategory::Handshake(HandshakeType::EncryptedExtensions).to_string(),
            "EncryptedExtensions message"
        );
    }
}
