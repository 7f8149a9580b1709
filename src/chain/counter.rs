//! Block height tracking and height-triggered waits.
//!
//! [`BlockCounter`] ingests a chain's new-block stream on a background task
//! and fans observed heights out to single-fire waiters. Waiters for heights
//! already reached fire immediately; the ingestion loop flushes every waiter
//! at or below each newly observed height, so skipped heights never strand a
//! wait. Notifications are sent outside the registry lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{Chain, Error};

struct Registry {
    latest: u64,
    closed: bool,
    waiters: BTreeMap<u64, Vec<oneshot::Sender<u64>>>,
}

/// Tracks the best block height and wakes waiters when target heights are
/// reached.
///
/// Cloning is cheap; all clones share the same registry and ingestion task.
/// The ingestion task ends when the chain's block stream closes, at which
/// point every pending and future wait resolves to [`Error::CounterShutdown`].
#[derive(Clone)]
pub struct BlockCounter {
    registry: Arc<Mutex<Registry>>,
}

impl BlockCounter {
    /// Read the initial height from `chain` and start ingesting its block
    /// stream. Fails if the chain cannot report its current height.
    pub async fn bind<C: Chain>(chain: &C) -> Result<Self, Error> {
        let latest = chain.current_block_height().await?;
        let stream = chain.new_blocks();
        let registry = Arc::new(Mutex::new(Registry {
            latest,
            closed: false,
            waiters: BTreeMap::new(),
        }));
        tokio::spawn(ingest(registry.clone(), stream));
        Ok(Self { registry })
    }

    /// Best block height observed so far.
    pub fn current_block(&self) -> u64 {
        self.lock().latest
    }

    /// Single-fire notification for the chain reaching `height`. Fires
    /// immediately if the height has already been observed. The notification
    /// carries the target height, not the height that triggered it.
    pub fn block_height_waiter(&self, height: u64) -> oneshot::Receiver<u64> {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.lock();
        if height <= registry.latest {
            let _ = tx.send(height);
        } else if !registry.closed {
            registry.waiters.entry(height).or_default().push(tx);
        }
        // A closed registry drops the sender, surfacing the shutdown to the
        // receiver.
        rx
    }

    /// Single-fire notification for `blocks` more blocks elapsing, counted
    /// from the height known at call time.
    pub fn block_waiter(&self, blocks: u64) -> oneshot::Receiver<u64> {
        let target = self.current_block() + blocks;
        self.block_height_waiter(target)
    }

    /// Wait until the chain reaches `height`.
    pub async fn wait_for_block_height(&self, height: u64) -> Result<u64, Error> {
        self.block_height_waiter(height)
            .await
            .map_err(|_| Error::CounterShutdown)
    }

    /// Wait for `blocks` more blocks, counted from the height known at call
    /// time.
    pub async fn wait_for_blocks(&self, blocks: u64) -> Result<u64, Error> {
        let target = self.current_block() + blocks;
        self.wait_for_block_height(target).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn ingest(
    registry: Arc<Mutex<Registry>>,
    mut stream: mpsc::UnboundedReceiver<Result<u64, Error>>,
) {
    while let Some(observation) = stream.recv().await {
        let height = match observation {
            Ok(height) => height,
            Err(err) => {
                warn!(%err, "skipping unreadable block observation");
                continue;
            }
        };

        // Collect due waiters under the lock, notify outside it.
        let due = {
            let mut registry = registry.lock().unwrap_or_else(|p| p.into_inner());
            if height <= registry.latest {
                continue;
            }
            registry.latest = height;
            let remaining = registry.waiters.split_off(&(height + 1));
            std::mem::replace(&mut registry.waiters, remaining)
        };
        for (target, waiters) in due {
            for waiter in waiters {
                // Receiver may have been dropped; that wait was cancelled.
                let _ = waiter.send(target);
            }
        }
        debug!(height, "block observed");
    }

    // Stream ended. Fail pending waits and refuse new ones.
    let orphaned = {
        let mut registry = registry.lock().unwrap_or_else(|p| p.into_inner());
        registry.closed = true;
        std::mem::take(&mut registry.waiters)
    };
    if !orphaned.is_empty() {
        warn!("block stream ended with waits pending");
    }
    drop(orphaned);
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::sync::{broadcast, mpsc, oneshot};

    use super::super::{Chain, ChainConfig, Error, ResultSubmission};
    use super::BlockCounter;
    use crate::gjkr::{DkgResult, GroupPublicKey, ResultSignature};
    use crate::group::MemberIndex;

    /// Chain stub with a hand-fed block stream.
    struct StubChain {
        initial: u64,
        blocks: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Result<u64, Error>>>>,
    }

    impl StubChain {
        fn new(initial: u64) -> (Self, mpsc::UnboundedSender<Result<u64, Error>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    initial,
                    blocks: std::sync::Mutex::new(Some(rx)),
                },
                tx,
            )
        }
    }

    impl Chain for StubChain {
        fn config(&self) -> ChainConfig {
            ChainConfig {
                result_publication_block_step: 1,
            }
        }

        async fn current_block_height(&self) -> Result<u64, Error> {
            Ok(self.initial)
        }

        fn new_blocks(&self) -> mpsc::UnboundedReceiver<Result<u64, Error>> {
            self.blocks.lock().unwrap().take().unwrap()
        }

        async fn is_group_registered(&self, _: &GroupPublicKey) -> Result<bool, Error> {
            Ok(false)
        }

        async fn submit_result(
            &self,
            _: MemberIndex,
            _: &DkgResult,
            _: &BTreeMap<MemberIndex, ResultSignature>,
        ) -> Result<ResultSubmission, Error> {
            Err(Error::SubmissionRejected("stub".into()))
        }

        async fn result_submissions(&self) -> Result<broadcast::Receiver<ResultSubmission>, Error> {
            Err(Error::SubscriptionFailed("stub".into()))
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_waiter_for_reached_height_fires_immediately() {
        let (chain, _blocks) = StubChain::new(7);
        let counter = BlockCounter::bind(&chain).await.unwrap();
        assert_eq!(counter.current_block(), 7);
        assert_eq!(counter.block_height_waiter(7).await.unwrap(), 7);
        assert_eq!(counter.block_height_waiter(3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_waiter_fires_after_expected_number_of_blocks() {
        let (chain, blocks) = StubChain::new(0);
        let counter = BlockCounter::bind(&chain).await.unwrap();

        let mut waiter = counter.block_waiter(5);
        for height in 1..5 {
            blocks.send(Ok(height)).unwrap();
        }
        settle().await;
        assert!(matches!(
            waiter.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));

        blocks.send(Ok(5)).unwrap();
        assert_eq!(waiter.await.unwrap(), 5);
        assert_eq!(counter.current_block(), 5);
    }

    #[tokio::test]
    async fn test_skipped_heights_flush_intermediate_waiters() {
        let (chain, blocks) = StubChain::new(0);
        let counter = BlockCounter::bind(&chain).await.unwrap();

        let early = counter.block_height_waiter(2);
        let middle = counter.block_height_waiter(5);
        let late = counter.block_height_waiter(9);

        // One observation jumps straight past two targets.
        blocks.send(Ok(6)).unwrap();
        assert_eq!(early.await.unwrap(), 2);
        assert_eq!(middle.await.unwrap(), 5);

        let mut late = late;
        settle().await;
        assert!(matches!(
            late.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        blocks.send(Ok(9)).unwrap();
        assert_eq!(late.await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_non_advancing_observations_are_ignored() {
        let (chain, blocks) = StubChain::new(4);
        let counter = BlockCounter::bind(&chain).await.unwrap();

        blocks.send(Ok(4)).unwrap();
        blocks.send(Ok(2)).unwrap();
        settle().await;
        assert_eq!(counter.current_block(), 4);

        blocks.send(Ok(5)).unwrap();
        settle().await;
        assert_eq!(counter.current_block(), 5);
    }

    #[tokio::test]
    async fn test_unreadable_observations_are_skipped() {
        let (chain, blocks) = StubChain::new(0);
        let counter = BlockCounter::bind(&chain).await.unwrap();

        let waiter = counter.block_height_waiter(1);
        blocks
            .send(Err(Error::MalformedBlock("bad header".into())))
            .unwrap();
        blocks.send(Ok(1)).unwrap();
        assert_eq!(waiter.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_multiple_waiters_for_one_height_all_fire() {
        let (chain, blocks) = StubChain::new(0);
        let counter = BlockCounter::bind(&chain).await.unwrap();

        let a = counter.block_height_waiter(3);
        let b = counter.block_height_waiter(3);
        blocks.send(Ok(3)).unwrap();
        assert_eq!(a.await.unwrap(), 3);
        assert_eq!(b.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_closed_stream_fails_pending_and_future_waits() {
        let (chain, blocks) = StubChain::new(0);
        let counter = BlockCounter::bind(&chain).await.unwrap();

        let pending = counter.wait_for_block_height(10);
        drop(blocks);
        assert!(matches!(pending.await, Err(Error::CounterShutdown)));
        assert!(matches!(
            counter.wait_for_blocks(1).await,
            Err(Error::CounterShutdown)
        ));
    }
}
