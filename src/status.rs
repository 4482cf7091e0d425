//! Read-only view of a scheme's progress
//!
//! Steps that have not ended are given a projected end: the previous end plus
//! the step timeout. For the running step this is its time limit; for idle
//! steps it is only a theoretical bound.
use crate::ledger::{Step, StepStatus};
use crate::ports::ObjectStore;
use crate::scheme::{ApprovalScheme, SchemeStatus};
use crate::types::{EntityRef, TimeStamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeSummary {
    pub status: SchemeStatus,
    pub started_at: TimeStamp,
    pub ended_at: Option<TimeStamp>,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    pub state: StepState,
    pub end: Option<StepEnd>,
    pub replies: Vec<ApproverReply>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Idle,
    /// Never started because the scheme settled before reaching it.
    Skipped,
    Ongoing,
    Approved,
    Rejected,
    TimedOutApproved,
    TimedOutRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEnd {
    Actual(TimeStamp),
    /// The running step's deadline.
    Limit(TimeStamp),
    Theoretical(TimeStamp),
}

impl StepEnd {
    pub fn at(&self) -> TimeStamp {
        match self {
            StepEnd::Actual(at) | StepEnd::Limit(at) | StepEnd::Theoretical(at) => *at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproverReply {
    pub approver: EntityRef,
    /// Display name, or `kind::id` when the approver cannot be found.
    pub name: String,
    pub approval: Option<bool>,
    pub answered_at: Option<TimeStamp>,
}

impl SchemeSummary {
    pub fn of(scheme: &ApprovalScheme, objects: &dyn ObjectStore) -> Self {
        let mut last_end = scheme.started_at();
        let steps = scheme
            .steps()
            .steps()
            .iter()
            .map(|step| {
                let end = projected_end(step, &mut last_end);
                StepSummary {
                    state: step_state(step, scheme.status()),
                    end,
                    replies: step
                        .approvers
                        .iter()
                        .map(|vote| ApproverReply {
                            approver: vote.approver.clone(),
                            name: display_name(objects, &vote.approver),
                            approval: vote.approval,
                            answered_at: vote.answered_at,
                        })
                        .collect(),
                }
            })
            .collect();

        Self {
            status: scheme.status(),
            started_at: scheme.started_at(),
            ended_at: scheme.ended_at(),
            steps,
        }
    }
}

fn step_state(step: &Step, scheme_status: SchemeStatus) -> StepState {
    match step.status {
        StepStatus::Ongoing => StepState::Ongoing,
        StepStatus::Done if step.approved == Some(true) => StepState::Approved,
        StepStatus::Done => StepState::Rejected,
        StepStatus::TimedOut if step.timeout_approve => StepState::TimedOutApproved,
        StepStatus::TimedOut => StepState::TimedOutRejected,
        StepStatus::Idle if scheme_status.is_terminal() => StepState::Skipped,
        StepStatus::Idle => StepState::Idle,
    }
}

fn projected_end(step: &Step, last_end: &mut TimeStamp) -> Option<StepEnd> {
    match step.status {
        StepStatus::Done | StepStatus::TimedOut => {
            let ended = step.ended_at.unwrap_or(*last_end);
            *last_end = ended;
            Some(StepEnd::Actual(ended))
        }
        StepStatus::Ongoing => {
            let start = step.started_at.unwrap_or(*last_end);
            *last_end = start.plus_secs(step.timeout_secs);
            (step.timeout_secs > 0).then_some(StepEnd::Limit(*last_end))
        }
        StepStatus::Idle => {
            *last_end = last_end.plus_secs(step.timeout_secs);
            (step.timeout_secs > 0).then_some(StepEnd::Theoretical(*last_end))
        }
    }
}

fn display_name(objects: &dyn ObjectStore, approver: &EntityRef) -> String {
    match objects.resolve(approver) {
        Ok(Some(object)) => object.name().to_string(),
        _ => approver.to_string(),
    }
}
