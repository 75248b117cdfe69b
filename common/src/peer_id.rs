// Copyright (c) 2018-2022 The Botho Foundation

//! The Peer ID type

use core::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use displaydoc::Display;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Length in bytes of an encoded peer identity.
pub const PEER_ID_LEN: usize = 32;

/// Errors that can occur when parsing a [`PeerId`].
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Hash, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum PeerIdError {
    /// The input length was not 32 bytes
    InvalidInputLength,
    /// The input data contained invalid characters
    InvalidInput,
    /// The bytes are not a valid Ed25519 public key
    KeyParseError,
}

/// Peer unique identifier: the peer's Ed25519 message-signing public key.
///
/// The identity is also the unit of stake attribution, so two peers never
/// share one. Ordering and hashing are over the raw key bytes, which gives
/// every peer the same iteration order over a belief.
#[derive(Clone, Copy, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Wrap raw public key bytes, checking they decode as an Ed25519 point.
    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Result<Self, PeerIdError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| PeerIdError::KeyParseError)?;
        Ok(Self(bytes))
    }

    /// The raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Verify `signature` over `msg` against this identity.
    ///
    /// Never fails loudly: a key that does not decode, or a signature that
    /// does not match, both verify as `false`.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> bool {
        match VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key.verify(msg, signature).is_ok(),
            Err(_) => false,
        }
    }

    /// Abbreviated hex form used in log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<&VerifyingKey> for PeerId {
    fn from(src: &VerifyingKey) -> Self {
        Self(src.to_bytes())
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(src).map_err(|_| PeerIdError::InvalidInput)?;
        let bytes: [u8; PEER_ID_LEN] = bytes
            .try_into()
            .map_err(|_| PeerIdError::InvalidInputLength)?;
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use std::collections::HashSet;

    /// Helper to create a test identity with a deterministic key
    fn make_test_key(seed: u8) -> (SigningKey, PeerId) {
        let signing_key = SigningKey::from_bytes(&[seed; 32]);
        let peer_id = PeerId::from(&signing_key.verifying_key());
        (signing_key, peer_id)
    }

    #[test]
    fn test_peer_id_display_round_trips_through_from_str() {
        let (_, peer) = make_test_key(7);
        let parsed = PeerId::from_str(&peer.to_string()).unwrap();
        assert_eq!(peer, parsed);
    }

    #[test]
    fn test_peer_id_from_str_rejects_bad_input() {
        assert_eq!(PeerId::from_str("zz"), Err(PeerIdError::InvalidInput));
        assert_eq!(
            PeerId::from_str("abcd"),
            Err(PeerIdError::InvalidInputLength)
        );
    }

    #[test]
    fn test_peer_id_verify() {
        let (key, peer) = make_test_key(1);
        let (_, other) = make_test_key(2);
        let signature = key.sign(b"belief");

        assert!(peer.verify(b"belief", &signature));
        assert!(!peer.verify(b"belie", &signature));
        assert!(!other.verify(b"belief", &signature));
    }

    #[test]
    fn test_peer_id_ordering_is_by_key_bytes() {
        let (_, a) = make_test_key(1);
        let (_, b) = make_test_key(2);
        assert_eq!(a.cmp(&b), a.as_bytes().cmp(b.as_bytes()));
    }

    #[test]
    fn test_peer_id_in_hash_set() {
        let (_, a) = make_test_key(3);
        let (_, b) = make_test_key(3);
        let (_, c) = make_test_key(4);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_peer_id_serde_roundtrip() {
        let (_, peer) = make_test_key(77);
        let json = serde_json::to_string(&peer).unwrap();
        let decoded: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(peer, decoded);
    }

    #[test]
    fn test_peer_id_error_display() {
        let errors = [
            PeerIdError::InvalidInputLength,
            PeerIdError::InvalidInput,
            PeerIdError::KeyParseError,
        ];

        for err in errors {
            assert!(!format!("{}", err).is_empty());
        }
    }
}
