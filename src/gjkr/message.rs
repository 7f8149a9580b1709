//! On-wire protocol messages and their binary codec.
//!
//! Curve points travel compressed (32 bytes) and scalars canonical
//! (32 bytes); both decoders reject malformed bytes with a codec error
//! rather than panicking. Every message embeds its sender index, which the
//! state machine checks against the transport-level sender before delivery.

use std::collections::BTreeMap;

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use parity_scale_codec::{Decode, Encode, Error as CodecError, Input, Output};

use crate::group::MemberIndex;
use crate::net::Payload;

use super::keys::{EphemeralPrivateKey, EphemeralPublicKey};

pub(crate) fn read_point<I: Input>(input: &mut I) -> Result<RistrettoPoint, CodecError> {
    let mut raw = [0u8; 32];
    input.read(&mut raw)?;
    CompressedRistretto(raw)
        .decompress()
        .ok_or_else(|| "malformed curve point".into())
}

pub(crate) fn read_scalar<I: Input>(input: &mut I) -> Result<Scalar, CodecError> {
    let mut raw = [0u8; 32];
    input.read(&mut raw)?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(raw))
        .ok_or_else(|| "non-canonical scalar".into())
}

/// A point on the protocol's curve: a commitment, a public key share, or the
/// group public key itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurvePoint(pub(crate) RistrettoPoint);

impl Encode for CurvePoint {
    fn size_hint(&self) -> usize {
        32
    }

    fn encode_to<T: Output + ?Sized>(&self, dest: &mut T) {
        dest.write(self.0.compress().as_bytes());
    }
}

impl Decode for CurvePoint {
    fn decode<I: Input>(input: &mut I) -> Result<Self, CodecError> {
        Ok(Self(read_point(input)?))
    }
}

/// Phase 1: one ephemeral public key per counterparty.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct EphemeralPublicKeysMessage {
    pub sender: MemberIndex,
    /// Keyed by the counterparty the key was generated for.
    pub ephemeral_public_keys: BTreeMap<MemberIndex, EphemeralPublicKey>,
}

/// Phase 3: Pedersen commitments to the sender's secret polynomial.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct CommitmentsMessage {
    pub sender: MemberIndex,
    pub commitments: Vec<CurvePoint>,
}

/// Phase 3: encrypted share pairs, one ciphertext per recipient.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct PeerSharesMessage {
    pub sender: MemberIndex,
    pub shares: BTreeMap<MemberIndex, Vec<u8>>,
}

/// Phase 4: shares that failed verification, with the accuser's ephemeral
/// private key for each accused member revealed for public replay. Broadcast
/// by every member, empty when there is nothing to accuse.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct SecretSharesAccusationsMessage {
    pub sender: MemberIndex,
    pub accused_members_keys: BTreeMap<MemberIndex, EphemeralPrivateKey>,
}

/// Phase 7: Feldman coefficients of the sender's secret polynomial.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct PublicKeySharePointsMessage {
    pub sender: MemberIndex,
    pub share_points: Vec<CurvePoint>,
}

/// Phase 8: share points that failed verification, same reveal scheme as
/// [`SecretSharesAccusationsMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct PointsAccusationsMessage {
    pub sender: MemberIndex,
    pub accused_members_keys: BTreeMap<MemberIndex, EphemeralPrivateKey>,
}

/// Phase 10: the sender's ephemeral private keys for every disqualified
/// member. Broadcast by every member, empty when nobody was disqualified.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct DisqualifiedEphemeralKeysMessage {
    pub sender: MemberIndex,
    pub private_keys: BTreeMap<MemberIndex, EphemeralPrivateKey>,
}

/// Any message of the protocol.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum GjkrMessage {
    EphemeralPublicKeys(EphemeralPublicKeysMessage),
    Commitments(CommitmentsMessage),
    PeerShares(PeerSharesMessage),
    SecretSharesAccusations(SecretSharesAccusationsMessage),
    PublicKeySharePoints(PublicKeySharePointsMessage),
    PointsAccusations(PointsAccusationsMessage),
    DisqualifiedEphemeralKeys(DisqualifiedEphemeralKeysMessage),
}

impl Payload for GjkrMessage {
    fn sender(&self) -> MemberIndex {
        match self {
            Self::EphemeralPublicKeys(m) => m.sender,
            Self::Commitments(m) => m.sender,
            Self::PeerShares(m) => m.sender,
            Self::SecretSharesAccusations(m) => m.sender,
            Self::PublicKeySharePoints(m) => m.sender,
            Self::PointsAccusations(m) => m.sender,
            Self::DisqualifiedEphemeralKeys(m) => m.sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use curve25519_dalek::ristretto::RistrettoPoint;
    use curve25519_dalek::scalar::Scalar;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::super::keys::EphemeralKeyPair;
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let mut rng = StdRng::seed_from_u64(7);
        let pair = EphemeralKeyPair::generate(&mut rng);
        let message = GjkrMessage::EphemeralPublicKeys(EphemeralPublicKeysMessage {
            sender: 3,
            ephemeral_public_keys: [(1, pair.public.clone()), (2, pair.public)].into(),
        });
        let decoded = GjkrMessage::decode(&mut &message.encode()[..]).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.sender(), 3);
    }

    #[test]
    fn test_malformed_point_is_rejected() {
        let mut rng = StdRng::seed_from_u64(8);
        let point = CurvePoint(RistrettoPoint::mul_base(&Scalar::random(&mut rng)));
        let message = GjkrMessage::Commitments(CommitmentsMessage {
            sender: 1,
            commitments: vec![point],
        });
        let mut encoded = message.encode();
        // Flip bits in the compressed point at the tail of the encoding.
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        encoded[last - 1] ^= 0xff;
        assert!(GjkrMessage::decode(&mut &encoded[..]).is_err());
    }

    #[test]
    fn test_non_canonical_scalar_is_rejected() {
        let message = GjkrMessage::SecretSharesAccusations(SecretSharesAccusationsMessage {
            sender: 2,
            accused_members_keys: [(1, EphemeralPrivateKey(Scalar::from(5u64)))].into(),
        });
        let mut encoded = message.encode();
        // Saturate the scalar bytes; the group order is below 2^255 so this
        // cannot be canonical.
        let len = encoded.len();
        encoded[len - 32..].fill(0xff);
        assert!(GjkrMessage::decode(&mut &encoded[..]).is_err());
    }

    #[test]
    fn test_truncated_message_is_rejected() {
        let message = GjkrMessage::PeerShares(PeerSharesMessage {
            sender: 1,
            shares: [(2, vec![0xaa; 80])].into(),
        });
        let encoded = message.encode();
        assert!(GjkrMessage::decode(&mut &encoded[..encoded.len() - 4]).is_err());
    }
}
