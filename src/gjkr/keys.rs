//! Ephemeral ECDH key pairs and pairwise symmetric encryption.
//!
//! Each member generates one ephemeral key pair per counterparty and derives
//! a shared ChaCha20-Poly1305 key from the ECDH secret. A pairwise key
//! encrypts exactly one blob per direction per run, so the nonce is simply
//! the little-endian sender index. Private keys are revealed on the wire only
//! to support accusations, which is why they carry a codec.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::group::MemberIndex;

use super::message::{read_point, read_scalar};

/// Ephemeral key pair generated for a single counterparty in a single run.
#[derive(Clone)]
pub(crate) struct EphemeralKeyPair {
    pub(crate) private: EphemeralPrivateKey,
    pub(crate) public: EphemeralPublicKey,
}

impl EphemeralKeyPair {
    pub(crate) fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let scalar = Scalar::random(rng);
        Self {
            public: EphemeralPublicKey(RistrettoPoint::mul_base(&scalar)),
            private: EphemeralPrivateKey(scalar),
        }
    }
}

/// Private half of an ephemeral key pair.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralPrivateKey(pub(crate) Scalar);

impl EphemeralPrivateKey {
    /// The public key this private key belongs to.
    pub(crate) fn public_key(&self) -> EphemeralPublicKey {
        EphemeralPublicKey(RistrettoPoint::mul_base(&self.0))
    }

    /// Derive the symmetric key shared with the owner of `peer`.
    pub(crate) fn ecdh(&self, peer: &EphemeralPublicKey) -> SymmetricKey {
        SymmetricKey::derive(&(peer.0 * self.0))
    }
}

impl std::fmt::Debug for EphemeralPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralPrivateKey(..)")
    }
}

impl parity_scale_codec::Encode for EphemeralPrivateKey {
    fn size_hint(&self) -> usize {
        32
    }

    fn encode_to<T: parity_scale_codec::Output + ?Sized>(&self, dest: &mut T) {
        dest.write(self.0.as_bytes());
    }
}

impl parity_scale_codec::Decode for EphemeralPrivateKey {
    fn decode<I: parity_scale_codec::Input>(
        input: &mut I,
    ) -> Result<Self, parity_scale_codec::Error> {
        Ok(Self(read_scalar(input)?))
    }
}

/// Public half of an ephemeral key pair, broadcast in the first phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EphemeralPublicKey(pub(crate) RistrettoPoint);

impl parity_scale_codec::Encode for EphemeralPublicKey {
    fn size_hint(&self) -> usize {
        32
    }

    fn encode_to<T: parity_scale_codec::Output + ?Sized>(&self, dest: &mut T) {
        dest.write(self.0.compress().as_bytes());
    }
}

impl parity_scale_codec::Decode for EphemeralPublicKey {
    fn decode<I: parity_scale_codec::Input>(
        input: &mut I,
    ) -> Result<Self, parity_scale_codec::Error> {
        Ok(Self(read_point(input)?))
    }
}

/// Pairwise symmetric key derived from an ECDH secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    fn derive(shared: &RistrettoPoint) -> Self {
        let digest = Sha256::digest(shared.compress().as_bytes());
        Self(digest.into())
    }

    /// Encrypt `plaintext` as `sender`. Fails only on internal AEAD errors.
    pub(crate) fn encrypt(&self, sender: MemberIndex, plaintext: &[u8]) -> Option<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher.encrypt(Nonce::from_slice(&nonce(sender)), plaintext).ok()
    }

    /// Decrypt a blob produced by `sender`. `None` means the ciphertext does
    /// not authenticate under this key.
    pub(crate) fn decrypt(&self, sender: MemberIndex, ciphertext: &[u8]) -> Option<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher.decrypt(Nonce::from_slice(&nonce(sender)), ciphertext).ok()
    }
}

fn nonce(sender: MemberIndex) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(&sender.to_le_bytes());
    nonce
}
