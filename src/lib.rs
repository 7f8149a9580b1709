//! Generate verifiable randomness with a committee of untrusted members.
//!
//! The core of a random beacon node: a committee of members jointly derives
//! a group public key and per-member private key shares through distributed
//! key generation, without ever materializing the group private key in one
//! place. The protocol tolerates members that go silent and members that
//! actively cheat, needs no coordinator, and synchronizes phase progression
//! through the block height of the chain the beacon is anchored to. Once a
//! run finishes, members take turns racing the agreed result onto the chain
//! so it lands exactly once.
//!
//! # Layout
//!
//! - [`group`]: group membership bookkeeping.
//! - [`chain`]: the ledger client abstraction and the block counter that
//!   turns its block stream into height-triggered waits.
//! - [`net`]: the group broadcast transport abstraction.
//! - [`state`]: the generic block-synchronized state machine.
//! - [`gjkr`]: the distributed key generation protocol itself.
//! - [`submission`]: turn-based, race-resolved result submission.
//!
//! # Example
//!
//! ```ignore
//! let counter = chain::BlockCounter::bind(&chain).await?;
//! let (outcome, finished_at) = gjkr::execute(
//!     member_index, group_size, threshold,
//!     operator_key, &mut rng, &counter, &channel, incoming,
//! ).await?;
//! submission::SubmittingMember::new(member_index)
//!     .submit_result(&chain, &counter, &outcome.result, &signatures, finished_at)
//!     .await?;
//! ```

pub mod chain;
pub mod gjkr;
pub mod group;
pub mod net;
pub mod state;
pub mod submission;

pub use group::{Group, MemberIndex};
