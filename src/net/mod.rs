//! Group broadcast transport abstraction.
//!
//! The protocol broadcasts encoded messages to the whole group and consumes
//! deliveries tagged with the transport-level sender. Authentication of the
//! transport itself is out of scope here; the state machine only checks that
//! the sender a message claims in its payload matches the transport tag.

use bytes::Bytes;
use parity_scale_codec::{Decode, Encode};
use thiserror::Error;

use crate::group::MemberIndex;

#[cfg(test)]
pub mod mocks;

/// A message received from the group channel.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Transport-level sender of the message.
    pub sender: MemberIndex,
    /// Encoded message payload.
    pub payload: Bytes,
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum Error {
    /// The broadcast channel is no longer accepting messages.
    #[error("broadcast channel closed")]
    ChannelClosed,
}

/// Sender half of a group broadcast channel.
#[allow(async_fn_in_trait)]
pub trait BroadcastChannel: Send + Sync {
    /// Broadcast `payload` to every other group member.
    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), Error>;
}

/// An on-wire protocol message: binary-codable and self-describing about its
/// sender.
pub trait Payload: Encode + Decode + Clone + Send + 'static {
    /// The sender the message claims in its payload.
    fn sender(&self) -> MemberIndex;
}
