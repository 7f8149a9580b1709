//! The result of a DKG run and its lifecycle rules.
//!
//! Every honest member derives the same result from the shared transcript.
//! Equality is deliberately order-sensitive on the disqualified and inactive
//! lists: members that disagree on the order of verdicts did not follow the
//! same transcript and must not co-sign each other's results.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parity_scale_codec::{Decode, Encode, Error as CodecError, Input, Output};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::group::Group;

use super::message::CurvePoint;

/// The public key a successful run established for the group.
pub type GroupPublicKey = CurvePoint;

/// Outcome of a DKG run as seen by one member.
#[derive(Clone, Debug, Encode, Decode)]
pub struct DkgResult {
    /// The established group public key; `None` when the run failed before
    /// one could be derived.
    pub group_public_key: Option<GroupPublicKey>,
    /// Final group classification.
    pub group: Group,
}

impl DkgResult {
    /// Digest members sign and submissions carry: SHA-256 over the encoded
    /// result.
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.encode()).into()
    }
}

impl PartialEq for DkgResult {
    fn eq(&self, other: &Self) -> bool {
        self.group_public_key == other.group_public_key
            && self.group.disqualified() == other.group.disqualified()
            && self.group.inactive() == other.group.inactive()
    }
}

impl Eq for DkgResult {}

/// A member's signature over a result hash, attesting support for the
/// result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSignature(pub(crate) Signature);

impl ResultSignature {
    /// Verify this signature over `result` against the signer's operator
    /// key.
    pub fn verify(&self, result: &DkgResult, signer: &VerifyingKey) -> bool {
        signer.verify(&result.hash(), &self.0).is_ok()
    }
}

impl Encode for ResultSignature {
    fn size_hint(&self) -> usize {
        64
    }

    fn encode_to<T: Output + ?Sized>(&self, dest: &mut T) {
        dest.write(&self.0.to_bytes());
    }
}

impl Decode for ResultSignature {
    fn decode<I: Input>(input: &mut I) -> Result<Self, CodecError> {
        let mut raw = [0u8; 64];
        input.read(&mut raw)?;
        Ok(Self(Signature::from_bytes(&raw)))
    }
}

/// This member's share of the group private key. Never broadcast; handed to
/// the caller for the threshold-signing stage and wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyShare(curve25519_dalek::scalar::Scalar);

impl PrivateKeyShare {
    pub(super) fn new(share: curve25519_dalek::scalar::Scalar) -> Self {
        Self(share)
    }

    /// Raw scalar bytes of the share.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl std::fmt::Debug for PrivateKeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKeyShare(..)")
    }
}
