//! The concrete phase states and their block budgets.
//!
//! Phases form a closed enum driven by the generic machine in
//! [`crate::state`]. The per-member context travels by value from phase to
//! phase. Incoming messages are recorded by type rather than by current
//! phase: a message for a later phase that arrives early is retained, and
//! each phase judges absence only when it closes. Messaging phases budget
//! several blocks; resolution phases are local computation and budget one.

use crate::group::MemberIndex;
use crate::state::{State, Transition};

use super::member::Member;
use super::message::GjkrMessage;
use super::{DkgOutcome, Error};

const KEY_GENERATION_BLOCKS: u64 = 3;
const SHARING_BLOCKS: u64 = 4;
const ACCUSATION_BLOCKS: u64 = 3;
const POINTS_BLOCKS: u64 = 3;
const REVEAL_BLOCKS: u64 = 3;
const LOCAL_BLOCKS: u64 = 1;

/// One run's phase progression.
pub(super) enum DkgState {
    /// Phase 1: broadcast ephemeral public keys.
    EphemeralKeyGeneration(Member),
    /// Phase 3: broadcast Pedersen commitments and encrypted shares.
    CommitmentsAndShares(Member),
    /// Phase 4: verify received shares, broadcast accusations.
    SharesVerification(Member),
    /// Phase 5: resolve share accusations locally.
    SharesJustification(Member),
    /// Phase 6: combine the private key share locally.
    KeyShareCombination(Member),
    /// Phase 7: broadcast public key share points.
    SharePoints(Member),
    /// Phase 8: verify share points, broadcast accusations.
    PointsVerification(Member),
    /// Phase 9: resolve share point accusations locally.
    PointsJustification(Member),
    /// Phase 10: broadcast disqualified members' ephemeral keys.
    KeyReveal(Member),
    /// Phase 11: validate revealed keys locally.
    RevealJustification(Member),
    /// Terminal: derive the group public key and sign the result.
    Finalization(Member),
}

impl DkgState {
    pub(super) fn new(member: Member) -> Self {
        Self::EphemeralKeyGeneration(member)
    }

    fn member(&self) -> &Member {
        match self {
            Self::EphemeralKeyGeneration(m)
            | Self::CommitmentsAndShares(m)
            | Self::SharesVerification(m)
            | Self::SharesJustification(m)
            | Self::KeyShareCombination(m)
            | Self::SharePoints(m)
            | Self::PointsVerification(m)
            | Self::PointsJustification(m)
            | Self::KeyReveal(m)
            | Self::RevealJustification(m)
            | Self::Finalization(m) => m,
        }
    }

    fn member_mut(&mut self) -> &mut Member {
        match self {
            Self::EphemeralKeyGeneration(m)
            | Self::CommitmentsAndShares(m)
            | Self::SharesVerification(m)
            | Self::SharesJustification(m)
            | Self::KeyShareCombination(m)
            | Self::SharePoints(m)
            | Self::PointsVerification(m)
            | Self::PointsJustification(m)
            | Self::KeyReveal(m)
            | Self::RevealJustification(m)
            | Self::Finalization(m) => m,
        }
    }

    /// Extract the run's outcome once the machine declared this state final.
    pub(super) fn into_outcome(self) -> Option<DkgOutcome> {
        match self {
            Self::Finalization(member) => member.finalize(),
            _ => None,
        }
    }
}

impl State for DkgState {
    type Message = GjkrMessage;
    type Error = Error;

    fn name(&self) -> &'static str {
        match self {
            Self::EphemeralKeyGeneration(_) => "ephemeral key generation",
            Self::CommitmentsAndShares(_) => "commitments and shares",
            Self::SharesVerification(_) => "shares verification",
            Self::SharesJustification(_) => "shares justification",
            Self::KeyShareCombination(_) => "key share combination",
            Self::SharePoints(_) => "public key share points",
            Self::PointsVerification(_) => "points verification",
            Self::PointsJustification(_) => "points justification",
            Self::KeyReveal(_) => "disqualified keys reveal",
            Self::RevealJustification(_) => "reveal justification",
            Self::Finalization(_) => "finalization",
        }
    }

    fn member_index(&self) -> MemberIndex {
        self.member().index
    }

    fn active_blocks(&self) -> u64 {
        match self {
            Self::EphemeralKeyGeneration(_) => KEY_GENERATION_BLOCKS,
            Self::CommitmentsAndShares(_) => SHARING_BLOCKS,
            Self::SharesVerification(_) => ACCUSATION_BLOCKS,
            Self::SharesJustification(_) => LOCAL_BLOCKS,
            Self::KeyShareCombination(_) => LOCAL_BLOCKS,
            Self::SharePoints(_) => POINTS_BLOCKS,
            Self::PointsVerification(_) => ACCUSATION_BLOCKS,
            Self::PointsJustification(_) => LOCAL_BLOCKS,
            Self::KeyReveal(_) => REVEAL_BLOCKS,
            Self::RevealJustification(_) => LOCAL_BLOCKS,
            Self::Finalization(_) => LOCAL_BLOCKS,
        }
    }

    fn initiate(&mut self) -> Result<Vec<GjkrMessage>, Error> {
        match self {
            Self::EphemeralKeyGeneration(member) => Ok(vec![GjkrMessage::EphemeralPublicKeys(
                member.ephemeral_public_keys_message(),
            )]),
            Self::CommitmentsAndShares(member) => {
                member.generate_symmetric_keys();
                let (commitments, shares) = member.commitments_and_shares_messages()?;
                Ok(vec![
                    GjkrMessage::Commitments(commitments),
                    GjkrMessage::PeerShares(shares),
                ])
            }
            Self::SharesVerification(member) => Ok(vec![GjkrMessage::SecretSharesAccusations(
                member.verify_shares_and_accuse(),
            )]),
            Self::SharesJustification(member) => {
                member.resolve_share_accusations();
                Ok(Vec::new())
            }
            Self::KeyShareCombination(member) => {
                member.combine_private_key_share();
                Ok(Vec::new())
            }
            Self::SharePoints(member) => Ok(vec![GjkrMessage::PublicKeySharePoints(
                member.public_key_share_points_message(),
            )]),
            Self::PointsVerification(member) => Ok(vec![GjkrMessage::PointsAccusations(
                member.verify_share_points_and_accuse(),
            )]),
            Self::PointsJustification(member) => {
                member.resolve_points_accusations();
                Ok(Vec::new())
            }
            Self::KeyReveal(member) => Ok(vec![GjkrMessage::DisqualifiedEphemeralKeys(
                member.disqualified_keys_message(),
            )]),
            Self::RevealJustification(member) => {
                member.resolve_revealed_keys();
                Ok(Vec::new())
            }
            Self::Finalization(_) => Ok(Vec::new()),
        }
    }

    fn receive(&mut self, message: GjkrMessage) -> Result<(), Error> {
        let member = self.member_mut();
        match message {
            GjkrMessage::EphemeralPublicKeys(m) => member.record_ephemeral_public_keys(m),
            GjkrMessage::Commitments(m) => member.record_commitments(m),
            GjkrMessage::PeerShares(m) => member.record_peer_shares(m),
            GjkrMessage::SecretSharesAccusations(m) => member.record_share_accusations(m),
            GjkrMessage::PublicKeySharePoints(m) => member.record_share_points(m),
            GjkrMessage::PointsAccusations(m) => member.record_points_accusations(m),
            GjkrMessage::DisqualifiedEphemeralKeys(m) => member.record_revealed_keys(m),
        }
        Ok(())
    }

    fn next(self) -> Result<Transition<Self>, Error> {
        Ok(match self {
            Self::EphemeralKeyGeneration(mut member) => {
                member.close_ephemeral_keys_phase();
                Transition::Continue(Self::CommitmentsAndShares(member))
            }
            Self::CommitmentsAndShares(mut member) => {
                member.close_sharing_phase();
                Transition::Continue(Self::SharesVerification(member))
            }
            Self::SharesVerification(mut member) => {
                member.close_share_accusations_phase();
                Transition::Continue(Self::SharesJustification(member))
            }
            Self::SharesJustification(member) => {
                Transition::Continue(Self::KeyShareCombination(member))
            }
            Self::KeyShareCombination(member) => Transition::Continue(Self::SharePoints(member)),
            Self::SharePoints(mut member) => {
                member.close_share_points_phase();
                Transition::Continue(Self::PointsVerification(member))
            }
            Self::PointsVerification(mut member) => {
                member.close_points_accusations_phase();
                Transition::Continue(Self::PointsJustification(member))
            }
            Self::PointsJustification(member) => Transition::Continue(Self::KeyReveal(member)),
            Self::KeyReveal(mut member) => {
                member.close_reveal_phase();
                Transition::Continue(Self::RevealJustification(member))
            }
            Self::RevealJustification(member) => {
                Transition::Continue(Self::Finalization(member))
            }
            Self::Finalization(member) => Transition::Final(Self::Finalization(member)),
        })
    }
}
