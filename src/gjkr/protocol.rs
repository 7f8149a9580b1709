//! Phase operations of the distributed key generation protocol.
//!
//! Message recording is tolerant: anything malformed, duplicated, or sent by
//! a non-operating member is logged and dropped, and the sender pays for
//! missing broadcasts by being marked inactive when the phase closes.
//! Accusation resolution replays the published transcript with the revealed
//! ephemeral key, so every honest member reaches the same verdict without
//! further interaction.

use std::sync::OnceLock;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use ed25519_dalek::Signer;
use sha2::Sha512;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::group::MemberIndex;

use super::keys::EphemeralPrivateKey;
use super::member::Member;
use super::message::{
    CommitmentsMessage, CurvePoint, DisqualifiedEphemeralKeysMessage, EphemeralPublicKeysMessage,
    PeerSharesMessage, PointsAccusationsMessage, PublicKeySharePointsMessage,
    SecretSharesAccusationsMessage,
};
use super::result::{DkgResult, PrivateKeyShare, ResultSignature};
use super::{DkgOutcome, Error};

/// Second generator for Pedersen commitments, with no known discrete log
/// relative to the curve's base point.
fn blinding_generator() -> &'static RistrettoPoint {
    static GENERATOR: OnceLock<RistrettoPoint> = OnceLock::new();
    GENERATOR.get_or_init(|| {
        RistrettoPoint::hash_from_bytes::<Sha512>(b"random-beacon/gjkr/blinding-generator")
    })
}

/// Evaluate a scalar polynomial at a member index (Horner).
fn evaluate_at(coefficients: &[Scalar], index: MemberIndex) -> Scalar {
    let x = Scalar::from(u64::from(index));
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
}

/// Evaluate a committed polynomial at a member index.
fn evaluate_points_at(points: &[CurvePoint], index: MemberIndex) -> RistrettoPoint {
    let x = Scalar::from(u64::from(index));
    points
        .iter()
        .rev()
        .fold(RistrettoPoint::identity(), |acc, point| acc * x + point.0)
}

fn pedersen_commit(secret: &Scalar, blinding: &Scalar) -> RistrettoPoint {
    RistrettoPoint::mul_base(secret) + blinding_generator() * blinding
}

fn parse_share_pair(plaintext: &[u8]) -> Option<(Scalar, Scalar)> {
    let bytes: &[u8; 64] = plaintext.try_into().ok()?;
    let secret: Option<Scalar> =
        Scalar::from_canonical_bytes(bytes[..32].try_into().ok()?).into();
    let blinding: Option<Scalar> =
        Scalar::from_canonical_bytes(bytes[32..].try_into().ok()?).into();
    Some((secret?, blinding?))
}

impl Member {
    // Phase 1: ephemeral key generation.

    pub(super) fn ephemeral_public_keys_message(&self) -> EphemeralPublicKeysMessage {
        EphemeralPublicKeysMessage {
            sender: self.index,
            ephemeral_public_keys: self
                .ephemeral_key_pairs
                .iter()
                .map(|(peer, pair)| (*peer, pair.public.clone()))
                .collect(),
        }
    }

    pub(super) fn record_ephemeral_public_keys(&mut self, message: EphemeralPublicKeysMessage) {
        let sender = message.sender;
        if !self.accepts_broadcast_from(sender) {
            return;
        }
        if self.peer_ephemeral_keys.contains_key(&sender) {
            debug!(member = self.index, sender, "duplicate ephemeral keys ignored");
            return;
        }
        self.peer_ephemeral_keys
            .insert(sender, message.ephemeral_public_keys);
    }

    /// Completeness is judged here rather than on receipt: classification is
    /// settled at phase close, so every honest member applies the same
    /// operating set.
    pub(super) fn close_ephemeral_keys_phase(&mut self) {
        let operating = self.group.operating_members();
        self.mark_absentees(|member, peer| {
            member.peer_ephemeral_keys.get(&peer).is_some_and(|keys| {
                operating
                    .iter()
                    .all(|counterparty| *counterparty == peer || keys.contains_key(counterparty))
            })
        });
    }

    // Phase 3: commitments and encrypted shares.

    pub(super) fn generate_symmetric_keys(&mut self) {
        for peer in self.operating_peers() {
            let Some(pair) = self.ephemeral_key_pairs.get(&peer) else {
                continue;
            };
            let Some(peer_key) = self
                .peer_ephemeral_keys
                .get(&peer)
                .and_then(|keys| keys.get(&self.index))
            else {
                continue;
            };
            let key = pair.private.ecdh(peer_key);
            self.symmetric_keys.insert(peer, key);
        }
    }

    pub(super) fn commitments_and_shares_messages(
        &mut self,
    ) -> Result<(CommitmentsMessage, PeerSharesMessage), Error> {
        let commitments: Vec<CurvePoint> = self
            .secret_coefficients
            .iter()
            .zip(&self.blinding_coefficients)
            .map(|(secret, blinding)| CurvePoint(pedersen_commit(secret, blinding)))
            .collect();
        self.commitments.insert(self.index, commitments.clone());

        let mut shares = std::collections::BTreeMap::new();
        for peer in self.operating_peers() {
            let secret = evaluate_at(&self.secret_coefficients, peer);
            let blinding = evaluate_at(&self.blinding_coefficients, peer);
            let mut plaintext = [0u8; 64];
            plaintext[..32].copy_from_slice(secret.as_bytes());
            plaintext[32..].copy_from_slice(blinding.as_bytes());
            let key = self
                .symmetric_keys
                .get(&peer)
                .ok_or(Error::MissingSymmetricKey(peer))?;
            let sealed = key
                .encrypt(self.index, &plaintext)
                .ok_or(Error::ShareEncryption(peer))?;
            plaintext.zeroize();
            shares.insert(peer, sealed);
        }
        self.encrypted_shares.insert(self.index, shares.clone());

        Ok((
            CommitmentsMessage {
                sender: self.index,
                commitments,
            },
            PeerSharesMessage {
                sender: self.index,
                shares,
            },
        ))
    }

    pub(super) fn record_commitments(&mut self, message: CommitmentsMessage) {
        let sender = message.sender;
        if !self.accepts_broadcast_from(sender) {
            return;
        }
        if message.commitments.len() != self.group.threshold() as usize {
            warn!(member = self.index, sender, "commitments of unexpected degree");
            return;
        }
        self.commitments.entry(sender).or_insert(message.commitments);
    }

    pub(super) fn record_peer_shares(&mut self, message: PeerSharesMessage) {
        let sender = message.sender;
        if !self.accepts_broadcast_from(sender) {
            return;
        }
        self.encrypted_shares.entry(sender).or_insert(message.shares);
    }

    /// A member that skipped either broadcast, or whose shares do not cover
    /// every operating member, is an absentee.
    pub(super) fn close_sharing_phase(&mut self) {
        let operating = self.group.operating_members();
        self.mark_absentees(|member, peer| {
            member.commitments.contains_key(&peer)
                && member.encrypted_shares.get(&peer).is_some_and(|shares| {
                    operating
                        .iter()
                        .all(|recipient| *recipient == peer || shares.contains_key(recipient))
                })
        });
    }

    // Phase 4: share verification and accusations.

    pub(super) fn verify_shares_and_accuse(&mut self) -> SecretSharesAccusationsMessage {
        let mut accused = std::collections::BTreeMap::new();
        for peer in self.operating_peers() {
            if !self.verify_shares_from(peer) {
                info!(member = self.index, accused = peer, "accusing: invalid shares");
                if let Some(pair) = self.ephemeral_key_pairs.get(&peer) {
                    accused.insert(peer, pair.private.clone());
                }
            }
        }
        let message = SecretSharesAccusationsMessage {
            sender: self.index,
            accused_members_keys: accused,
        };
        self.share_accusations
            .insert(self.index, message.accused_members_keys.clone());
        message
    }

    /// Decrypt and check the share pair `peer` sent to this member, storing
    /// it on success.
    fn verify_shares_from(&mut self, peer: MemberIndex) -> bool {
        let Some(blob) = self
            .encrypted_shares
            .get(&peer)
            .and_then(|shares| shares.get(&self.index))
        else {
            return false;
        };
        let Some(key) = self.symmetric_keys.get(&peer) else {
            return false;
        };
        let Some(plaintext) = key.decrypt(peer, blob) else {
            return false;
        };
        let Some((secret, blinding)) = parse_share_pair(&plaintext) else {
            return false;
        };
        let Some(commitments) = self.commitments.get(&peer) else {
            return false;
        };
        if pedersen_commit(&secret, &blinding) != evaluate_points_at(commitments, self.index) {
            return false;
        }
        self.received_shares.insert(peer, (secret, blinding));
        true
    }

    pub(super) fn record_share_accusations(&mut self, message: SecretSharesAccusationsMessage) {
        let sender = message.sender;
        if !self.accepts_broadcast_from(sender) {
            return;
        }
        self.share_accusations
            .entry(sender)
            .or_insert(message.accused_members_keys);
    }

    pub(super) fn close_share_accusations_phase(&mut self) {
        self.mark_absentees(|member, peer| member.share_accusations.contains_key(&peer));
    }

    // Phase 5: share accusation resolution.

    pub(super) fn resolve_share_accusations(&mut self) {
        let accusations = self.share_accusations.clone();
        for (accuser, accused_keys) in accusations {
            // An accuser that was classified in the meantime lost its
            // standing.
            if !self.group.is_operating(accuser) {
                continue;
            }
            for (accused, revealed) in accused_keys {
                if let Some(guilty) = self.judge_share_accusation(accuser, accused, &revealed) {
                    info!(
                        member = self.index,
                        accuser, accused, guilty, "share accusation resolved"
                    );
                    self.group.mark_disqualified(guilty);
                }
            }
        }
    }

    /// Replay one phase 4 accusation against the public transcript. Returns
    /// the member the verdict falls on, if any.
    fn judge_share_accusation(
        &self,
        accuser: MemberIndex,
        accused: MemberIndex,
        revealed: &EphemeralPrivateKey,
    ) -> Option<MemberIndex> {
        // Accusing oneself, a stranger, or a member that was inactive anyway
        // convicts the accuser.
        if accused == accuser
            || !self.group.is_member(accused)
            || self.group.inactive().contains(&accused)
        {
            return Some(accuser);
        }
        // A verdict against this accused was already reached.
        if self.group.disqualified().contains(&accused) {
            return None;
        }
        // The revealed key must be the one the accuser advertised for the
        // accused, or the replay below could be rigged.
        let published = self.published_ephemeral_key(accuser, accused)?;
        if revealed.public_key() != published {
            return Some(accuser);
        }
        let accused_key = match self.published_ephemeral_key(accused, accuser) {
            Some(key) => key,
            None => return Some(accused),
        };
        let symmetric = revealed.ecdh(&accused_key);
        let Some(blob) = self
            .encrypted_shares
            .get(&accused)
            .and_then(|shares| shares.get(&accuser))
        else {
            return Some(accused);
        };
        let Some(plaintext) = symmetric.decrypt(accused, blob) else {
            return Some(accused);
        };
        let Some((secret, blinding)) = parse_share_pair(&plaintext) else {
            return Some(accused);
        };
        let Some(commitments) = self.commitments.get(&accused) else {
            return Some(accused);
        };
        if pedersen_commit(&secret, &blinding) == evaluate_points_at(commitments, accuser) {
            // The share was fine; the accusation was false.
            Some(accuser)
        } else {
            Some(accused)
        }
    }

    // Phase 6: private key share combination.

    pub(super) fn combine_private_key_share(&mut self) {
        let mut share = evaluate_at(&self.secret_coefficients, self.index);
        for peer in self.operating_peers() {
            if let Some((secret, _)) = self.received_shares.get(&peer) {
                share += secret;
            }
        }
        self.group_private_key_share = Some(share);
    }

    // Phase 7: public key share points.

    pub(super) fn public_key_share_points_message(&mut self) -> PublicKeySharePointsMessage {
        let share_points: Vec<CurvePoint> = self
            .secret_coefficients
            .iter()
            .map(|coefficient| CurvePoint(RistrettoPoint::mul_base(coefficient)))
            .collect();
        self.share_points.insert(self.index, share_points.clone());
        PublicKeySharePointsMessage {
            sender: self.index,
            share_points,
        }
    }

    pub(super) fn record_share_points(&mut self, message: PublicKeySharePointsMessage) {
        let sender = message.sender;
        if !self.accepts_broadcast_from(sender) {
            return;
        }
        if message.share_points.len() != self.group.threshold() as usize {
            warn!(member = self.index, sender, "share points of unexpected degree");
            return;
        }
        self.share_points.entry(sender).or_insert(message.share_points);
    }

    pub(super) fn close_share_points_phase(&mut self) {
        self.mark_absentees(|member, peer| member.share_points.contains_key(&peer));
    }

    // Phase 8: share point verification and accusations.

    pub(super) fn verify_share_points_and_accuse(&mut self) -> PointsAccusationsMessage {
        let mut accused = std::collections::BTreeMap::new();
        for peer in self.operating_peers() {
            let consistent = match (self.received_shares.get(&peer), self.share_points.get(&peer))
            {
                (Some((secret, _)), Some(points)) => {
                    RistrettoPoint::mul_base(secret) == evaluate_points_at(points, self.index)
                }
                _ => false,
            };
            if !consistent {
                info!(member = self.index, accused = peer, "accusing: invalid share points");
                if let Some(pair) = self.ephemeral_key_pairs.get(&peer) {
                    accused.insert(peer, pair.private.clone());
                }
            }
        }
        let message = PointsAccusationsMessage {
            sender: self.index,
            accused_members_keys: accused,
        };
        self.points_accusations
            .insert(self.index, message.accused_members_keys.clone());
        message
    }

    pub(super) fn record_points_accusations(&mut self, message: PointsAccusationsMessage) {
        let sender = message.sender;
        if !self.accepts_broadcast_from(sender) {
            return;
        }
        self.points_accusations
            .entry(sender)
            .or_insert(message.accused_members_keys);
    }

    pub(super) fn close_points_accusations_phase(&mut self) {
        self.mark_absentees(|member, peer| member.points_accusations.contains_key(&peer));
    }

    // Phase 9: share point accusation resolution.

    pub(super) fn resolve_points_accusations(&mut self) {
        let accusations = self.points_accusations.clone();
        for (accuser, accused_keys) in accusations {
            if !self.group.is_operating(accuser) {
                continue;
            }
            for (accused, revealed) in accused_keys {
                if let Some(guilty) = self.judge_points_accusation(accuser, accused, &revealed) {
                    info!(
                        member = self.index,
                        accuser, accused, guilty, "points accusation resolved"
                    );
                    self.group.mark_disqualified(guilty);
                }
            }
        }
    }

    fn judge_points_accusation(
        &self,
        accuser: MemberIndex,
        accused: MemberIndex,
        revealed: &EphemeralPrivateKey,
    ) -> Option<MemberIndex> {
        if accused == accuser
            || !self.group.is_member(accused)
            || self.group.inactive().contains(&accused)
        {
            return Some(accuser);
        }
        if self.group.disqualified().contains(&accused) {
            return None;
        }
        let published = self.published_ephemeral_key(accuser, accused)?;
        if revealed.public_key() != published {
            return Some(accuser);
        }
        let accused_key = match self.published_ephemeral_key(accused, accuser) {
            Some(key) => key,
            None => return Some(accused),
        };
        let symmetric = revealed.ecdh(&accused_key);
        let Some(blob) = self
            .encrypted_shares
            .get(&accused)
            .and_then(|shares| shares.get(&accuser))
        else {
            return Some(accused);
        };
        let Some(plaintext) = symmetric.decrypt(accused, blob) else {
            return Some(accused);
        };
        let Some((secret, _)) = parse_share_pair(&plaintext) else {
            return Some(accused);
        };
        let Some(points) = self.share_points.get(&accused) else {
            return Some(accused);
        };
        if RistrettoPoint::mul_base(&secret) == evaluate_points_at(points, accuser) {
            Some(accuser)
        } else {
            Some(accused)
        }
    }

    // Phase 10: disqualified ephemeral key reveal.

    pub(super) fn disqualified_keys_message(&mut self) -> DisqualifiedEphemeralKeysMessage {
        let private_keys: std::collections::BTreeMap<_, _> = self
            .group
            .disqualified()
            .iter()
            .filter_map(|member| {
                self.ephemeral_key_pairs
                    .get(member)
                    .map(|pair| (*member, pair.private.clone()))
            })
            .collect();
        self.revealed_keys.insert(self.index, private_keys.clone());
        DisqualifiedEphemeralKeysMessage {
            sender: self.index,
            private_keys,
        }
    }

    pub(super) fn record_revealed_keys(&mut self, message: DisqualifiedEphemeralKeysMessage) {
        let sender = message.sender;
        if !self.accepts_broadcast_from(sender) {
            return;
        }
        self.revealed_keys.entry(sender).or_insert(message.private_keys);
    }

    pub(super) fn close_reveal_phase(&mut self) {
        self.mark_absentees(|member, peer| member.revealed_keys.contains_key(&peer));
    }

    // Phase 11: revealed key validation.

    pub(super) fn resolve_revealed_keys(&mut self) {
        let reveals = self.revealed_keys.clone();
        for (revealer, keys) in reveals {
            if !self.group.is_operating(revealer) {
                continue;
            }
            for (named, key) in keys {
                // Revealing the key of a member that was not disqualified
                // compromises that member's shares.
                if !self.group.disqualified().contains(&named) {
                    info!(
                        member = self.index,
                        revealer, named, "revealed key of an operating member"
                    );
                    self.group.mark_disqualified(revealer);
                    break;
                }
                let valid = self
                    .published_ephemeral_key(revealer, named)
                    .is_some_and(|published| key.public_key() == published);
                if !valid {
                    info!(member = self.index, revealer, named, "revealed key is not genuine");
                    self.group.mark_disqualified(revealer);
                    break;
                }
            }
        }
    }

    // Finalization.

    /// Combine the qualified members' public contributions, sign the result,
    /// and hand everything to the caller. `None` only if the protocol never
    /// reached phase 6.
    pub(super) fn finalize(&self) -> Option<DkgOutcome> {
        let group_public_key = self
            .group
            .operating_members()
            .iter()
            .filter_map(|member| self.share_points.get(member))
            .filter_map(|points| points.first())
            .fold(RistrettoPoint::identity(), |acc, point| acc + point.0);
        let result = DkgResult {
            group_public_key: Some(CurvePoint(group_public_key)),
            group: self.group.clone(),
        };
        let signature = ResultSignature(self.operator_key.sign(&result.hash()));
        let private_key_share = PrivateKeyShare::new(self.group_private_key_share?);
        Some(DkgOutcome {
            member_index: self.index,
            result,
            signature,
            operator_public_key: self.operator_key.verifying_key(),
            private_key_share,
        })
    }

    // Shared plumbing.

    /// Whether a broadcast from `sender` should be recorded at all.
    fn accepts_broadcast_from(&self, sender: MemberIndex) -> bool {
        if sender == self.index {
            return false;
        }
        if !self.group.is_operating(sender) {
            debug!(
                member = self.index,
                sender, "ignoring broadcast from non-operating member"
            );
            return false;
        }
        true
    }

    /// Mark every operating peer for which `participated` is false inactive.
    fn mark_absentees(&mut self, participated: impl Fn(&Self, MemberIndex) -> bool) {
        for peer in self.operating_peers() {
            if !participated(self, peer) {
                info!(member = self.index, absentee = peer, "marking absent member inactive");
                self.group.mark_inactive(peer);
            }
        }
    }
}
