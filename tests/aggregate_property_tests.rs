//! Property-based tests for step vote aggregation
//!
//! The aggregation rule is small but every verdict goes through it: any reject
//! settles the step, a step is approved only when every approver said yes, and
//! anything else keeps waiting.

use proptest::prelude::*;
use approval_engine::aggregate::{StepOutcome, evaluate_step};
use approval_engine::ledger::{ApproverVote, Step, StepStatus};
use approval_engine::{EntityKind, EntityRef, Passcode, TimeStamp};

fn step_with(votes: &[Option<bool>]) -> Step {
    Step {
        timeout_secs: 60,
        timeout_approve: true,
        status: StepStatus::Ongoing,
        started_at: Some(TimeStamp::new_with(2024, 1, 1, 0, 0, 0).unwrap()),
        ended_at: None,
        approved: None,
        approvers: votes
            .iter()
            .enumerate()
            .map(|(i, approval)| ApproverVote {
                approver: EntityRef::new(EntityKind::Person, i as u64),
                passcode: Passcode::from("00"),
                answered_at: approval.map(|_| TimeStamp::new_with(2024, 1, 1, 0, 1, 0).unwrap()),
                approval: *approval,
            })
            .collect(),
    }
}

fn votes_strategy() -> impl Strategy<Value = Vec<Option<bool>>> {
    prop::collection::vec(prop::option::of(any::<bool>()), 0..8)
}

proptest! {
    /// One reject is enough, whatever the others did
    #[test]
    fn any_reject_rejects(mut votes in votes_strategy(), at in any::<prop::sample::Index>()) {
        votes.push(None);
        let i = at.index(votes.len());
        votes[i] = Some(false);
        prop_assert_eq!(evaluate_step(&step_with(&votes)), StepOutcome::Rejected);
    }

    #[test]
    fn outcome_matches_the_votes(votes in votes_strategy()) {
        let expected = if votes.contains(&Some(false)) {
            StepOutcome::Rejected
        } else if votes.contains(&None) {
            StepOutcome::Pending
        } else {
            StepOutcome::Approved
        };
        prop_assert_eq!(evaluate_step(&step_with(&votes)), expected);
    }

    /// The order in which approvers answered never matters
    #[test]
    fn order_does_not_matter(votes in votes_strategy()) {
        let mut reversed = votes.clone();
        reversed.reverse();
        prop_assert_eq!(
            evaluate_step(&step_with(&votes)),
            evaluate_step(&step_with(&reversed))
        );
    }
}
