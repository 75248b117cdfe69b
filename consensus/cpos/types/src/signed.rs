// Copyright (c) 2024 Botho Foundation

//! Key pairs and signed values.
//!
//! A [`Signed`] value wraps a payload together with the identity of its
//! signer and an Ed25519 signature over the payload's content digest. It is
//! the single verification capability shared by transactions, blocks,
//! orders and beliefs.

use crate::hash::Hash;
use bth_common::PeerId;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Deref, sync::Arc};

pub use ed25519_dalek::Signature;

/// A peer's signing key together with its public identity.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    peer_id: PeerId,
}

impl KeyPair {
    /// Derive a key pair from a 32-byte secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let peer_id = PeerId::from(&signing_key.verifying_key());
        Self {
            signing_key,
            peer_id,
        }
    }

    /// The public identity of this key pair.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Sign an arbitrary message.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

/// A value that can be signed: it has a domain tag and a content digest.
pub trait Signable {
    /// Domain separation tag mixed into the signed message.
    const DOMAIN: &'static [u8];

    /// Digest of the value's content.
    fn content_hash(&self) -> Hash;
}

fn signing_message(domain: &[u8], hash: &Hash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain.len() + 32);
    msg.extend_from_slice(domain);
    msg.extend_from_slice(hash.as_bytes());
    msg
}

/// A payload, its signer, and the signer's signature over it.
///
/// The payload sits behind an `Arc`, so cloning a signed value (and the
/// orders and beliefs built from them) shares rather than copies it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    value: Arc<T>,
    signer: PeerId,
    signature: Signature,
}

impl<T: Signable> Signed<T> {
    /// Sign `value` with `keypair`.
    pub fn sign(keypair: &KeyPair, value: T) -> Self {
        let msg = signing_message(T::DOMAIN, &value.content_hash());
        Self {
            signature: keypair.sign(&msg),
            signer: keypair.peer_id(),
            value: Arc::new(value),
        }
    }

    /// Reassemble a signed value received from elsewhere. No verification
    /// happens here; call [`Signed::verify`].
    pub fn from_parts(value: T, signer: PeerId, signature: Signature) -> Self {
        Self {
            value: Arc::new(value),
            signer,
            signature,
        }
    }

    /// Check the signature against the signer identity.
    pub fn verify(&self) -> bool {
        let msg = signing_message(T::DOMAIN, &self.value.content_hash());
        self.signer.verify(&msg, &self.signature)
    }

    /// Content digest of the payload.
    pub fn hash(&self) -> Hash {
        self.value.content_hash()
    }
}

impl<T> Signed<T> {
    /// The signed payload.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// The identity that signed the payload.
    pub fn signer(&self) -> &PeerId {
        &self.signer
    }

    /// The signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Whether both handles share the same payload allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Deref for Signed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Signed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signed")
            .field("signer", &self.signer)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHasher;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Note(u64);

    impl Signable for Note {
        const DOMAIN: &'static [u8] = b"test-note";

        fn content_hash(&self) -> Hash {
            let mut hasher = ContentHasher::new(Self::DOMAIN);
            hasher.u64(self.0);
            hasher.finalize()
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = KeyPair::from_seed([1; 32]);
        let signed = Signed::sign(&keypair, Note(42));

        assert!(signed.verify());
        assert_eq!(signed.signer(), &keypair.peer_id());
        assert_eq!(signed.value(), &Note(42));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let keypair = KeyPair::from_seed([1; 32]);
        let signed = Signed::sign(&keypair, Note(42));

        let mut bytes = signed.signature().to_bytes();
        bytes[0] ^= 0x01;
        let forged = Signed::from_parts(Note(42), *signed.signer(), Signature::from_bytes(&bytes));
        assert!(!forged.verify());
    }

    #[test]
    fn test_wrong_signer_fails() {
        let keypair = KeyPair::from_seed([1; 32]);
        let other = KeyPair::from_seed([2; 32]);
        let signed = Signed::sign(&keypair, Note(7));

        let relabelled = Signed::from_parts(Note(7), other.peer_id(), *signed.signature());
        assert!(!relabelled.verify());
    }

    #[test]
    fn test_swapped_payload_fails() {
        let keypair = KeyPair::from_seed([3; 32]);
        let signed = Signed::sign(&keypair, Note(1));

        let swapped = Signed::from_parts(Note(2), keypair.peer_id(), *signed.signature());
        assert!(!swapped.verify());
    }

    #[test]
    fn test_clone_shares_payload() {
        let keypair = KeyPair::from_seed([4; 32]);
        let signed = Signed::sign(&keypair, Note(9));
        let cloned = signed.clone();

        assert!(signed.ptr_eq(&cloned));
        assert_eq!(signed, cloned);
    }

    #[test]
    fn test_bincode_round_trip_preserves_signature() {
        let keypair = KeyPair::from_seed([5; 32]);
        let signed = Signed::sign(&keypair, Note(11));

        let bytes = bincode::serialize(&signed).unwrap();
        let decoded: Signed<Note> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, signed);
        assert!(decoded.verify());
    }
}
