//! Distributed key generation, after Gennaro, Jarecki, Krawczyk, and Rabin.
//!
//! A group of members jointly derives a public key and per-member private
//! key shares over a broadcast channel, tolerating members that go silent
//! and members that actively cheat. Progress is synchronized by chain block
//! height: every phase consumes a fixed block budget, so all honest members
//! transition together and derive the same result without any coordinator.
//!
//! [`execute`] runs the whole protocol for one member and returns its
//! [`DkgOutcome`].

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};
use thiserror::Error as ThisError;
use tokio::sync::mpsc;

use crate::chain::BlockCounter;
use crate::group::{Group, MemberIndex};
use crate::net::{BroadcastChannel, Delivery};
use crate::state::{ExecutionError, Machine};

mod keys;
mod member;
pub mod message;
mod protocol;
pub mod result;
mod states;

pub use keys::{EphemeralPrivateKey, EphemeralPublicKey};
pub use message::{CurvePoint, GjkrMessage};
pub use result::{DkgResult, GroupPublicKey, PrivateKeyShare, ResultSignature};

use member::Member;
use states::DkgState;

/// Failures of the phase logic itself.
#[derive(Debug, ThisError)]
pub enum Error {
    /// No symmetric key was established with a member shares must be
    /// encrypted for.
    #[error("no symmetric key established with member {0}")]
    MissingSymmetricKey(MemberIndex),
    /// Encrypting a share pair failed.
    #[error("failed to encrypt shares for member {0}")]
    ShareEncryption(MemberIndex),
}

/// Failures of a whole protocol run.
#[derive(Debug, ThisError)]
pub enum ExecuteError {
    /// The group size, threshold, and member index do not form a runnable
    /// configuration.
    #[error("cannot run group of {group_size} with threshold {threshold} as member {member_index}")]
    Parameters {
        group_size: u32,
        threshold: u32,
        member_index: MemberIndex,
    },
    /// The state machine failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError<Error>),
    /// The machine stopped in a non-terminal phase.
    #[error("protocol halted before finalization")]
    Incomplete,
}

/// Everything one member takes away from a successful run.
pub struct DkgOutcome {
    /// Index of the member that produced this outcome.
    pub member_index: MemberIndex,
    /// The result this member will support on-chain.
    pub result: DkgResult,
    /// This member's signature over the result hash.
    pub signature: ResultSignature,
    /// The operator key the signature verifies under.
    pub operator_public_key: VerifyingKey,
    /// This member's share of the group private key.
    pub private_key_share: PrivateKeyShare,
}

/// Run the protocol as `member_index` in a group of `group_size` members
/// with the given reconstruction `threshold`.
///
/// `counter` and `channel` must be shared with the other members (the same
/// chain, the same broadcast group); `incoming` is this member's delivery
/// stream from that channel. Returns the outcome and the block height the
/// run finished at.
#[allow(clippy::too_many_arguments)]
pub async fn execute<C: BroadcastChannel>(
    member_index: MemberIndex,
    group_size: u32,
    threshold: u32,
    operator_key: SigningKey,
    rng: &mut (impl RngCore + CryptoRng),
    counter: &BlockCounter,
    channel: &C,
    incoming: mpsc::UnboundedReceiver<Delivery>,
) -> Result<(DkgOutcome, u64), ExecuteError> {
    if threshold < 2
        || threshold > group_size
        || member_index == 0
        || member_index > group_size
    {
        return Err(ExecuteError::Parameters {
            group_size,
            threshold,
            member_index,
        });
    }
    let group = Group::new(threshold, group_size);
    let member = Member::new(member_index, group, operator_key, rng);
    let machine = Machine::new(counter, channel, incoming);
    let (last, height) = machine.execute(DkgState::new(member)).await?;
    let outcome = last.into_outcome().ok_or(ExecuteError::Incomplete)?;
    Ok((outcome, height))
}
