//! Vote aggregation for a single step
use crate::ledger::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Approved,
    Rejected,
    Pending,
}

/// One reject settles the step; otherwise every approver must have answered yes.
/// Timestamps and timeouts are not looked at here.
pub fn evaluate_step(step: &Step) -> StepOutcome {
    let mut expecting_answers = false;
    for vote in &step.approvers {
        match vote.approval {
            Some(false) => return StepOutcome::Rejected,
            Some(true) => {}
            None => expecting_answers = true,
        }
    }

    if expecting_answers {
        StepOutcome::Pending
    } else {
        StepOutcome::Approved
    }
}
