//! In-memory chain for tests.
//!
//! Blocks are "mined" on a fixed virtual-time tick by a background task, so
//! tests running under `start_paused` advance the chain deterministically.
//! Result submissions are serialized through an async mutex and broadcast to
//! subscribers, mirroring how a real backend would sequence transactions from
//! one operator account.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use super::{Chain, ChainConfig, Error, ResultSubmission};
use crate::gjkr::{DkgResult, GroupPublicKey, ResultSignature};
use crate::group::MemberIndex;

struct ChainState {
    height: u64,
    block_subscribers: Vec<mpsc::UnboundedSender<Result<u64, Error>>>,
    registered: Vec<GroupPublicKey>,
    submitted: Vec<(MemberIndex, DkgResult, BTreeMap<MemberIndex, ResultSignature>)>,
    subscription_failures: u32,
}

/// Single-node chain stand-in with automatic block production.
#[derive(Clone)]
pub struct LocalChain {
    state: Arc<Mutex<ChainState>>,
    submissions: broadcast::Sender<ResultSubmission>,
    submit_lock: Arc<tokio::sync::Mutex<()>>,
    step: u64,
}

impl LocalChain {
    /// Start a chain at `initial_height`, mining one block every `tick` of
    /// virtual time. `step` is the per-member result publication window.
    pub fn new(initial_height: u64, tick: Duration, step: u64) -> Self {
        let (submissions, _) = broadcast::channel(64);
        let state = Arc::new(Mutex::new(ChainState {
            height: initial_height,
            block_subscribers: Vec::new(),
            registered: Vec::new(),
            submitted: Vec::new(),
            subscription_failures: 0,
        }));
        tokio::spawn(mine(Arc::downgrade(&state), tick));
        Self {
            state,
            submissions,
            submit_lock: Arc::new(tokio::sync::Mutex::new(())),
            step,
        }
    }

    /// Make the next `failures` calls to [`Chain::result_submissions`] fail.
    pub fn fail_subscriptions(&self, failures: u32) {
        self.state.lock().unwrap().subscription_failures = failures;
    }

    /// Pre-register a group public key, as if a result had been accepted in
    /// an earlier run.
    pub fn register_group(&self, group_public_key: GroupPublicKey) {
        self.state.lock().unwrap().registered.push(group_public_key);
    }

    /// Submissions accepted so far, in acceptance order.
    pub fn submitted(
        &self,
    ) -> Vec<(MemberIndex, DkgResult, BTreeMap<MemberIndex, ResultSignature>)> {
        self.state.lock().unwrap().submitted.clone()
    }
}

async fn mine(state: Weak<Mutex<ChainState>>, tick: Duration) {
    loop {
        tokio::time::sleep(tick).await;
        let Some(state) = state.upgrade() else {
            return;
        };
        let mut state = state.lock().unwrap();
        state.height += 1;
        let height = state.height;
        state
            .block_subscribers
            .retain(|subscriber| subscriber.send(Ok(height)).is_ok());
    }
}

impl Chain for LocalChain {
    fn config(&self) -> ChainConfig {
        ChainConfig {
            result_publication_block_step: self.step,
        }
    }

    async fn current_block_height(&self) -> Result<u64, Error> {
        Ok(self.state.lock().unwrap().height)
    }

    fn new_blocks(&self) -> mpsc::UnboundedReceiver<Result<u64, Error>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().block_subscribers.push(tx);
        rx
    }

    async fn is_group_registered(&self, group_public_key: &GroupPublicKey) -> Result<bool, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .registered
            .contains(group_public_key))
    }

    async fn submit_result(
        &self,
        member_index: MemberIndex,
        result: &DkgResult,
        signatures: &BTreeMap<MemberIndex, ResultSignature>,
    ) -> Result<ResultSubmission, Error> {
        let _guard = self.submit_lock.lock().await;
        let group_public_key = result
            .group_public_key
            .clone()
            .ok_or_else(|| Error::SubmissionRejected("result carries no public key".into()))?;
        let submission = {
            let mut state = self.state.lock().unwrap();
            state.registered.push(group_public_key.clone());
            state
                .submitted
                .push((member_index, result.clone(), signatures.clone()));
            ResultSubmission {
                member_index,
                group_public_key,
                block_number: state.height,
            }
        };
        // No subscribers is fine.
        let _ = self.submissions.send(submission.clone());
        Ok(submission)
    }

    async fn result_submissions(&self) -> Result<broadcast::Receiver<ResultSubmission>, Error> {
        {
            let mut state = self.state.lock().unwrap();
            if state.subscription_failures > 0 {
                state.subscription_failures -= 1;
                return Err(Error::SubscriptionFailed("injected".into()));
            }
        }
        Ok(self.submissions.subscribe())
    }
}
