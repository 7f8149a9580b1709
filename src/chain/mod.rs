//! Ledger client abstraction.
//!
//! The protocol only ever talks to the chain through the [`Chain`] trait:
//! a monotonic block-height source, a registry of group public keys, and a
//! result submission endpoint that broadcasts accepted submissions to all
//! subscribers. Production backends live outside this crate; tests use
//! [`mocks::LocalChain`].

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::gjkr::{DkgResult, GroupPublicKey, ResultSignature};
use crate::group::MemberIndex;

mod counter;
#[cfg(test)]
pub mod mocks;

pub use counter::BlockCounter;

/// Chain parameters relevant to the protocol.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    /// Number of blocks each member's exclusive result submission window
    /// lasts before the next member in line becomes eligible.
    pub result_publication_block_step: u64,
}

/// An accepted result submission, as observed on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSubmission {
    /// Index of the member whose submission was accepted.
    pub member_index: MemberIndex,
    /// Group public key the submitted result established.
    pub group_public_key: GroupPublicKey,
    /// Height of the block that included the submission.
    pub block_number: u64,
}

/// Errors surfaced by chain backends and the block counter.
#[derive(Debug, Error)]
pub enum Error {
    /// The current block height could not be read.
    #[error("failed to read block height: {0}")]
    HeightUnavailable(String),
    /// A block observation could not be interpreted.
    #[error("malformed block observation: {0}")]
    MalformedBlock(String),
    /// Subscribing to chain events failed.
    #[error("event subscription failed: {0}")]
    SubscriptionFailed(String),
    /// The chain rejected a result submission.
    #[error("result submission rejected: {0}")]
    SubmissionRejected(String),
    /// The block counter's ingestion stream ended while waits were pending.
    #[error("block counter shut down")]
    CounterShutdown,
}

/// Client of the ledger the beacon is anchored to.
#[allow(async_fn_in_trait)]
pub trait Chain: Send + Sync {
    /// Chain parameters relevant to the protocol.
    fn config(&self) -> ChainConfig;

    /// Height of the best block currently known.
    async fn current_block_height(&self) -> Result<u64, Error>;

    /// Stream of new best-block heights. Observations may skip heights or
    /// repeat; consumers must tolerate both.
    fn new_blocks(&self) -> mpsc::UnboundedReceiver<Result<u64, Error>>;

    /// Whether a result with the given group public key has already been
    /// accepted on-chain.
    async fn is_group_registered(&self, group_public_key: &GroupPublicKey) -> Result<bool, Error>;

    /// Submit a DKG result on behalf of `member_index`, with the supporting
    /// signatures gathered off-chain. Returns the accepted submission.
    async fn submit_result(
        &self,
        member_index: MemberIndex,
        result: &DkgResult,
        signatures: &BTreeMap<MemberIndex, ResultSignature>,
    ) -> Result<ResultSubmission, Error>;

    /// Subscribe to accepted result submissions.
    async fn result_submissions(&self) -> Result<broadcast::Receiver<ResultSubmission>, Error>;
}
