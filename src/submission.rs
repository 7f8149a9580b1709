//! Turn-based, race-resolved result submission.
//!
//! Every member supports the same result, so only one copy needs to reach
//! the chain. Member `i` becomes eligible to submit `(i - 1) * blockStep`
//! blocks after the protocol finished; while waiting for its turn a member
//! watches accepted submissions and stands down as soon as anyone publishes
//! the result it supports. The first eligible member therefore submits and
//! everyone else skips, with later members acting only if all earlier ones
//! failed to.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::chain::{self, BlockCounter, Chain, ResultSubmission};
use crate::gjkr::{DkgResult, ResultSignature};
use crate::group::MemberIndex;

const SUBSCRIPTION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Submission failures.
#[derive(Debug, Error)]
pub enum Error {
    /// Member indices are 1-based; index 0 has no submission turn.
    #[error("invalid submitter index 0")]
    InvalidMemberIndex,
    /// The result does not establish a group public key, so there is nothing
    /// to register.
    #[error("result carries no group public key")]
    MissingGroupPublicKey,
    #[error(transparent)]
    Chain(#[from] chain::Error),
    /// The submission event stream ended before the race was decided.
    #[error("result submission stream closed")]
    SubmissionStreamClosed,
}

/// How a member's submission duty ended.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// This member submitted the result itself.
    Submitted(ResultSubmission),
    /// Another member got there first (or the group was already registered,
    /// in which case no submission was observed).
    Skipped(Option<ResultSubmission>),
}

/// A member taking part in the submission race.
pub struct SubmittingMember {
    index: MemberIndex,
}

impl SubmittingMember {
    pub fn new(index: MemberIndex) -> Self {
        Self { index }
    }

    /// Submit `result` with its supporting `signatures`, or stand down once
    /// an equivalent submission is observed. `start_block_height` is the
    /// height the protocol finished at; eligibility turns are counted from
    /// there.
    pub async fn submit_result<C: Chain>(
        &self,
        chain: &C,
        counter: &BlockCounter,
        result: &DkgResult,
        signatures: &BTreeMap<MemberIndex, ResultSignature>,
        start_block_height: u64,
    ) -> Result<SubmissionOutcome, Error> {
        if self.index == 0 {
            return Err(Error::InvalidMemberIndex);
        }
        let group_public_key = result
            .group_public_key
            .as_ref()
            .ok_or(Error::MissingGroupPublicKey)?;

        // Subscribe before the registration check so a submission landing
        // between the two cannot be missed.
        let mut submissions = subscribe_with_retry(chain).await;
        if chain.is_group_registered(group_public_key).await? {
            info!(
                member = self.index,
                "group already registered; nothing to submit"
            );
            return Ok(SubmissionOutcome::Skipped(None));
        }

        let step = chain.config().result_publication_block_step;
        let eligible_at = start_block_height + u64::from(self.index - 1) * step;
        info!(
            member = self.index,
            block = eligible_at,
            "waiting for result submission eligibility"
        );
        let mut eligibility = counter.block_height_waiter(eligible_at);

        loop {
            tokio::select! {
                reached = &mut eligibility => {
                    reached.map_err(|_| chain::Error::CounterShutdown)?;
                    info!(member = self.index, "submitting result");
                    let submission = chain
                        .submit_result(self.index, result, signatures)
                        .await?;
                    return Ok(SubmissionOutcome::Submitted(submission));
                }
                observed = submissions.recv() => {
                    match observed {
                        Ok(submission) if submission.group_public_key == *group_public_key => {
                            info!(
                                member = self.index,
                                submitter = submission.member_index,
                                "result submitted by another member; standing down"
                            );
                            return Ok(SubmissionOutcome::Skipped(Some(submission)));
                        }
                        // A submission for some other group.
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(member = self.index, missed, "submission events lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(Error::SubmissionStreamClosed);
                        }
                    }
                }
            }
        }
    }
}

async fn subscribe_with_retry<C: Chain>(chain: &C) -> broadcast::Receiver<ResultSubmission> {
    loop {
        match chain.result_submissions().await {
            Ok(submissions) => return submissions,
            Err(err) => {
                warn!(%err, "result submission subscription failed; retrying");
                tokio::time::sleep(SUBSCRIPTION_RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use curve25519_dalek::ristretto::RistrettoPoint;
    use curve25519_dalek::scalar::Scalar;
    use ed25519_dalek::Signer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::chain::mocks::LocalChain;
    use crate::gjkr::CurvePoint;
    use crate::group::Group;

    fn supported_result() -> (DkgResult, BTreeMap<MemberIndex, ResultSignature>) {
        let result = DkgResult {
            group_public_key: Some(CurvePoint(RistrettoPoint::mul_base(&Scalar::from(42u64)))),
            group: Group::new(3, 5),
        };
        let mut rng = StdRng::seed_from_u64(17);
        let signatures = (1..=5u32)
            .map(|member| {
                let key = ed25519_dalek::SigningKey::generate(&mut rng);
                (member, ResultSignature(key.sign(&result.hash())))
            })
            .collect();
        (result, signatures)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_member_is_immediately_eligible() {
        let chain = LocalChain::new(10, Duration::from_millis(50), 2);
        let counter = BlockCounter::bind(&chain).await.unwrap();
        let (result, signatures) = supported_result();

        let outcome = SubmittingMember::new(1)
            .submit_result(&chain, &counter, &result, &signatures, 10)
            .await
            .unwrap();
        let SubmissionOutcome::Submitted(submission) = outcome else {
            panic!("expected a submission");
        };
        assert_eq!(submission.member_index, 1);

        let submitted = chain.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, 1);
        assert_eq!(submitted[0].1, result);
        assert_eq!(submitted[0].2.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_member_stands_down_after_observing_a_submission() {
        let chain = LocalChain::new(10, Duration::from_millis(50), 2);
        let counter = BlockCounter::bind(&chain).await.unwrap();
        let (result, signatures) = supported_result();

        let racer = {
            let chain = chain.clone();
            let counter = counter.clone();
            let result = result.clone();
            let signatures = signatures.clone();
            tokio::spawn(async move {
                SubmittingMember::new(3)
                    .submit_result(&chain, &counter, &result, &signatures, 10)
                    .await
            })
        };
        // Let the racer subscribe and start waiting for its turn at block 14.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let outcome = SubmittingMember::new(1)
            .submit_result(&chain, &counter, &result, &signatures, 10)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Submitted(_)));

        let outcome = racer.await.unwrap().unwrap();
        let SubmissionOutcome::Skipped(Some(observed)) = outcome else {
            panic!("expected the racer to stand down");
        };
        assert_eq!(observed.member_index, 1);
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_registered_group_short_circuits() {
        let chain = LocalChain::new(10, Duration::from_millis(50), 2);
        let counter = BlockCounter::bind(&chain).await.unwrap();
        let (result, signatures) = supported_result();
        chain.register_group(result.group_public_key.clone().unwrap());

        let outcome = SubmittingMember::new(2)
            .submit_result(&chain, &counter, &result, &signatures, 10)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Skipped(None)));
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_failures_are_retried() {
        let chain = LocalChain::new(10, Duration::from_millis(50), 2);
        let counter = BlockCounter::bind(&chain).await.unwrap();
        let (result, signatures) = supported_result();
        chain.fail_subscriptions(2);

        let outcome = SubmittingMember::new(1)
            .submit_result(&chain, &counter, &result, &signatures, counter.current_block())
            .await
            .unwrap();
        assert!(matches!(outcome, SubmissionOutcome::Submitted(_)));
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_index_zero_is_rejected() {
        let chain = LocalChain::new(10, Duration::from_millis(50), 2);
        let counter = BlockCounter::bind(&chain).await.unwrap();
        let (result, signatures) = supported_result();

        let outcome = SubmittingMember::new(0)
            .submit_result(&chain, &counter, &result, &signatures, 10)
            .await;
        assert!(matches!(outcome, Err(Error::InvalidMemberIndex)));
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_without_public_key_is_rejected() {
        let chain = LocalChain::new(10, Duration::from_millis(50), 2);
        let counter = BlockCounter::bind(&chain).await.unwrap();
        let result = DkgResult {
            group_public_key: None,
            group: Group::new(3, 5),
        };

        let outcome = SubmittingMember::new(1)
            .submit_result(&chain, &counter, &result, &BTreeMap::new(), 10)
            .await;
        assert!(matches!(outcome, Err(Error::MissingGroupPublicKey)));
    }
}
