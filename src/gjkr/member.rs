//! Per-member protocol context.
//!
//! A [`Member`] accumulates everything a participant learns over the run:
//! its own key material, every counterparty's broadcasts, and the evolving
//! group classification. The phase operations in `protocol.rs` read and
//! extend this context; phase states in `states.rs` own it and move it from
//! phase to phase by value.

use std::collections::BTreeMap;

use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::SigningKey;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::group::{Group, MemberIndex};

use super::keys::{EphemeralKeyPair, EphemeralPrivateKey, EphemeralPublicKey, SymmetricKey};
use super::message::CurvePoint;

pub(super) struct Member {
    pub(super) index: MemberIndex,
    pub(super) group: Group,
    pub(super) operator_key: SigningKey,

    /// Own ephemeral key pairs, one per counterparty.
    pub(super) ephemeral_key_pairs: BTreeMap<MemberIndex, EphemeralKeyPair>,
    /// Counterparties' published ephemeral public keys: owner, then the
    /// member the key was generated for.
    pub(super) peer_ephemeral_keys: BTreeMap<MemberIndex, BTreeMap<MemberIndex, EphemeralPublicKey>>,
    /// Pairwise symmetric keys, derived once phase 1 closed.
    pub(super) symmetric_keys: BTreeMap<MemberIndex, SymmetricKey>,

    /// Own secret sharing polynomial (degree threshold - 1).
    pub(super) secret_coefficients: Vec<Scalar>,
    /// Blinding polynomial for the Pedersen commitments.
    pub(super) blinding_coefficients: Vec<Scalar>,

    /// Pedersen commitments by sender, own included.
    pub(super) commitments: BTreeMap<MemberIndex, Vec<CurvePoint>>,
    /// Encrypted share blobs by sender, then recipient, own included. Kept
    /// whole so accusations can be replayed against the original transcript.
    pub(super) encrypted_shares: BTreeMap<MemberIndex, BTreeMap<MemberIndex, Vec<u8>>>,
    /// Decrypted, verified share pairs addressed to this member.
    pub(super) received_shares: BTreeMap<MemberIndex, (Scalar, Scalar)>,
    /// Phase 4 accusations by accuser, own included.
    pub(super) share_accusations: BTreeMap<MemberIndex, BTreeMap<MemberIndex, EphemeralPrivateKey>>,

    /// Feldman public key share points by sender, own included.
    pub(super) share_points: BTreeMap<MemberIndex, Vec<CurvePoint>>,
    /// Phase 8 accusations by accuser, own included.
    pub(super) points_accusations:
        BTreeMap<MemberIndex, BTreeMap<MemberIndex, EphemeralPrivateKey>>,

    /// Phase 10 reveals by revealer, own included.
    pub(super) revealed_keys: BTreeMap<MemberIndex, BTreeMap<MemberIndex, EphemeralPrivateKey>>,

    /// This member's share of the group private key, set in phase 6.
    pub(super) group_private_key_share: Option<Scalar>,
}

impl Member {
    /// Create the context for one run. All randomness the member will ever
    /// need is drawn here: one ephemeral key pair per counterparty and both
    /// sharing polynomials.
    pub(super) fn new(
        index: MemberIndex,
        group: Group,
        operator_key: SigningKey,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Self {
        let ephemeral_key_pairs = group
            .members()
            .iter()
            .copied()
            .filter(|peer| *peer != index)
            .map(|peer| (peer, EphemeralKeyPair::generate(rng)))
            .collect();
        let threshold = group.threshold() as usize;
        let secret_coefficients = (0..threshold).map(|_| Scalar::random(rng)).collect();
        let blinding_coefficients = (0..threshold).map(|_| Scalar::random(rng)).collect();

        Self {
            index,
            group,
            operator_key,
            ephemeral_key_pairs,
            peer_ephemeral_keys: BTreeMap::new(),
            symmetric_keys: BTreeMap::new(),
            secret_coefficients,
            blinding_coefficients,
            commitments: BTreeMap::new(),
            encrypted_shares: BTreeMap::new(),
            received_shares: BTreeMap::new(),
            share_accusations: BTreeMap::new(),
            share_points: BTreeMap::new(),
            points_accusations: BTreeMap::new(),
            revealed_keys: BTreeMap::new(),
            group_private_key_share: None,
        }
    }

    /// Operating members other than this one, in formation order.
    pub(super) fn operating_peers(&self) -> Vec<MemberIndex> {
        self.group
            .operating_members()
            .into_iter()
            .filter(|peer| *peer != self.index)
            .collect()
    }

    /// The ephemeral public key `owner` published for `counterparty`, if
    /// known. Resolves "own" keys from the local pairs.
    pub(super) fn published_ephemeral_key(
        &self,
        owner: MemberIndex,
        counterparty: MemberIndex,
    ) -> Option<EphemeralPublicKey> {
        if owner == self.index {
            self.ephemeral_key_pairs
                .get(&counterparty)
                .map(|pair| pair.public.clone())
        } else {
            self.peer_ephemeral_keys
                .get(&owner)
                .and_then(|keys| keys.get(&counterparty))
                .cloned()
        }
    }
}

impl Drop for Member {
    fn drop(&mut self) {
        self.secret_coefficients.zeroize();
        self.blinding_coefficients.zeroize();
        if let Some(share) = self.group_private_key_share.as_mut() {
            share.zeroize();
        }
        for (secret, blinding) in self.received_shares.values_mut() {
            secret.zeroize();
            blinding.zeroize();
        }
    }
}
