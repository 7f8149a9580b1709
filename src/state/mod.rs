//! Block-synchronized protocol state machine.
//!
//! A [`Machine`] drives a chain of [`State`]s: each state announces its
//! outgoing messages on entry, consumes incoming messages for the duration of
//! its block budget, and then hands off to its successor. Because every
//! participant runs the same budgets against the same block counter, all
//! honest members transition on the same heights.
//!
//! Messages that arrive after a state's budget elapsed but before the next
//! state initiates are still routed to the current state. Payloads that fail
//! to decode, or whose claimed sender does not match the transport sender,
//! are logged and dropped without affecting the run.

use parity_scale_codec::{Decode, Encode};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chain::BlockCounter;
use crate::group::MemberIndex;
use crate::net::{self, BroadcastChannel, Delivery, Payload};

/// Outcome of leaving a state.
pub enum Transition<S> {
    /// The protocol continues with the given state.
    Continue(S),
    /// The given state is terminal; the machine stops.
    Final(S),
}

/// One phase of a block-synchronized protocol.
pub trait State: Sized + Send {
    /// Message type exchanged while this protocol runs.
    type Message: Payload;
    /// Error produced by the phase logic.
    type Error: std::error::Error + Send + 'static;

    /// Short human-readable phase name, for logs.
    fn name(&self) -> &'static str;

    /// Index of the member executing the protocol, for logs.
    fn member_index(&self) -> MemberIndex;

    /// Number of blocks this state consumes messages for.
    fn active_blocks(&self) -> u64;

    /// Perform the phase's entry work and return the messages to broadcast.
    fn initiate(&mut self) -> Result<Vec<Self::Message>, Self::Error>;

    /// Consume one incoming message.
    fn receive(&mut self, message: Self::Message) -> Result<(), Self::Error>;

    /// Close the phase and produce the successor.
    fn next(self) -> Result<Transition<Self>, Self::Error>;
}

/// Fatal failures of a protocol execution.
#[derive(Debug, Error)]
pub enum ExecutionError<E: std::error::Error + 'static> {
    #[error("failed to initiate {state}: {source}")]
    Initiate {
        state: &'static str,
        #[source]
        source: E,
    },
    #[error("failed to process message in {state}: {source}")]
    Receive {
        state: &'static str,
        #[source]
        source: E,
    },
    #[error("failed to close {state}: {source}")]
    Transition {
        state: &'static str,
        #[source]
        source: E,
    },
    #[error(transparent)]
    Broadcast(#[from] net::Error),
    #[error("block counter shut down mid-run")]
    CounterShutdown,
    #[error("incoming message channel closed mid-run")]
    ChannelClosed,
}

/// Drives states against a block counter and a broadcast channel.
pub struct Machine<'a, C: BroadcastChannel> {
    counter: &'a BlockCounter,
    channel: &'a C,
    incoming: mpsc::UnboundedReceiver<Delivery>,
}

impl<'a, C: BroadcastChannel> Machine<'a, C> {
    pub fn new(
        counter: &'a BlockCounter,
        channel: &'a C,
        incoming: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            counter,
            channel,
            incoming,
        }
    }

    /// Run states from `initial` until one declares itself final. Returns the
    /// final state and the block height the machine finished at.
    pub async fn execute<S: State>(
        mut self,
        initial: S,
    ) -> Result<(S, u64), ExecutionError<S::Error>> {
        let mut state = initial;
        loop {
            let entry = self.counter.current_block();
            info!(
                member = state.member_index(),
                state = state.name(),
                block = entry,
                "initiating state"
            );
            let outgoing = state.initiate().map_err(|source| ExecutionError::Initiate {
                state: state.name(),
                source,
            })?;
            for message in outgoing {
                self.channel.broadcast(message.encode()).await?;
            }

            let mut deadline = self.counter.block_height_waiter(entry + state.active_blocks());
            loop {
                tokio::select! {
                    biased;
                    delivery = self.incoming.recv() => {
                        let delivery = delivery.ok_or(ExecutionError::ChannelClosed)?;
                        deliver(&mut state, delivery)?;
                    }
                    reached = &mut deadline => {
                        reached.map_err(|_| ExecutionError::CounterShutdown)?;
                        break;
                    }
                }
            }
            // The budget elapsed, but messages already queued still belong to
            // the current state.
            while let Ok(delivery) = self.incoming.try_recv() {
                deliver(&mut state, delivery)?;
            }

            let height = self.counter.current_block();
            let name = state.name();
            match state
                .next()
                .map_err(|source| ExecutionError::Transition { state: name, source })?
            {
                Transition::Continue(next) => state = next,
                Transition::Final(last) => {
                    info!(
                        member = last.member_index(),
                        state = last.name(),
                        block = height,
                        "protocol finished"
                    );
                    return Ok((last, height));
                }
            }
        }
    }
}

fn deliver<S: State>(state: &mut S, delivery: Delivery) -> Result<(), ExecutionError<S::Error>> {
    let mut payload = &delivery.payload[..];
    let message = match S::Message::decode(&mut payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(
                sender = delivery.sender,
                %err,
                "dropping undecodable message"
            );
            return Ok(());
        }
    };
    if message.sender() != delivery.sender {
        warn!(
            sender = delivery.sender,
            claimed = message.sender(),
            "dropping message with mismatched sender"
        );
        return Ok(());
    }
    debug!(
        member = state.member_index(),
        state = state.name(),
        sender = delivery.sender,
        "received message"
    );
    state.receive(message).map_err(|source| ExecutionError::Receive {
        state: state.name(),
        source,
    })
}
