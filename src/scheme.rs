//! The approval scheme record and its transitions
//!
//! Transitions here only touch the in-memory record; persistence, notifications
//! and terminal hooks are driven by the engine around them. Every transition
//! re-checks that the scheme and the addressed step are still ongoing, which is
//! what makes a late vote or a late timeout a harmless no-op.
use minicbor::bytes::ByteVec;

use crate::aggregate::{StepOutcome, evaluate_step};
use crate::error::Result;
use crate::ledger::{Step, StepLedger, StepStatus};
use crate::types::{EntityRef, SchemeId, TimeStamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum SchemeStatus {
    #[n(0)]
    Ongoing,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
}

impl SchemeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SchemeStatus::Ongoing)
    }
}

/// What `advance` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    StartStep(usize),
    Resolve(SchemeStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded,
    NotOngoing,
    StaleStep,
    UnknownApprover,
    AlreadyAnswered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalScheme {
    id: SchemeId,
    process: String,
    target: EntityRef,
    started_at: TimeStamp,
    ended_at: Option<TimeStamp>,
    deadline: Option<TimeStamp>,
    current_step: usize,
    status: SchemeStatus,
    steps: StepLedger,
}

// persisted row; the ledger travels as one opaque blob
#[derive(minicbor::Encode, minicbor::Decode)]
#[cbor(map)]
struct SchemeRecord {
    #[n(0)]
    id: SchemeId,
    #[n(1)]
    process: String,
    #[n(2)]
    target: EntityRef,
    #[n(3)]
    started_at: TimeStamp,
    #[n(4)]
    ended_at: Option<TimeStamp>,
    #[n(5)]
    deadline: Option<TimeStamp>,
    #[n(6)]
    current_step: u64,
    #[n(7)]
    status: SchemeStatus,
    #[n(8)]
    steps: ByteVec,
}

impl ApprovalScheme {
    pub fn new(
        id: SchemeId,
        process: impl Into<String>,
        target: EntityRef,
        steps: StepLedger,
        now: TimeStamp,
    ) -> Self {
        Self {
            id,
            process: process.into(),
            target,
            started_at: now,
            ended_at: None,
            deadline: None,
            current_step: 0,
            status: SchemeStatus::Ongoing,
            steps,
        }
    }

    pub fn id(&self) -> &SchemeId {
        &self.id
    }
    pub fn process(&self) -> &str {
        &self.process
    }
    pub fn target(&self) -> &EntityRef {
        &self.target
    }
    pub fn started_at(&self) -> TimeStamp {
        self.started_at
    }
    pub fn ended_at(&self) -> Option<TimeStamp> {
        self.ended_at
    }
    pub fn deadline(&self) -> Option<TimeStamp> {
        self.deadline
    }
    pub fn current_step(&self) -> usize {
        self.current_step
    }
    pub fn status(&self) -> SchemeStatus {
        self.status
    }
    pub fn steps(&self) -> &StepLedger {
        &self.steps
    }

    /// The step currently collecting votes, if any.
    pub fn active_step(&self) -> Option<&Step> {
        if self.status.is_terminal() {
            return None;
        }
        self.steps
            .get(self.current_step)
            .filter(|step| step.status == StepStatus::Ongoing)
    }

    pub fn is_due(&self, now: TimeStamp) -> bool {
        self.status == SchemeStatus::Ongoing && self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Start the step under the cursor, or settle the scheme when the previous
    /// step was rejected or there is nothing left to run.
    pub(crate) fn advance(&mut self, now: TimeStamp) -> Option<Advance> {
        if self.status.is_terminal() {
            return None;
        }

        let previous_approved = match self.current_step.checked_sub(1) {
            Some(previous) => self
                .steps
                .get(previous)
                .and_then(|step| step.approved)
                .unwrap_or(false),
            None => true,
        };

        let index = self.current_step;
        if previous_approved {
            if let Some(step) = self.steps.get_mut(index) {
                if step.status != StepStatus::Idle {
                    return None;
                }
                step.status = StepStatus::Ongoing;
                step.started_at = Some(now);
                self.deadline = (step.timeout_secs > 0).then(|| now.plus_secs(step.timeout_secs));
                return Some(Advance::StartStep(index));
            }
        }

        self.ended_at = Some(now);
        self.deadline = None;
        self.status = if previous_approved {
            SchemeStatus::Accepted
        } else {
            SchemeStatus::Rejected
        };
        Some(Advance::Resolve(self.status))
    }

    /// Record one reply. The first answer of an approver is final.
    pub(crate) fn record_vote(
        &mut self,
        step_index: usize,
        approver: &EntityRef,
        approve: bool,
        now: TimeStamp,
    ) -> VoteOutcome {
        if self.status.is_terminal() {
            return VoteOutcome::NotOngoing;
        }
        if step_index != self.current_step {
            return VoteOutcome::StaleStep;
        }
        let Some(step) = self
            .steps
            .get_mut(step_index)
            .filter(|step| step.status == StepStatus::Ongoing)
        else {
            return VoteOutcome::StaleStep;
        };
        let Some(vote) = step.vote_of_mut(approver) else {
            return VoteOutcome::UnknownApprover;
        };
        if vote.has_answered() {
            return VoteOutcome::AlreadyAnswered;
        }

        vote.answered_at = Some(now);
        vote.approval = Some(approve);
        VoteOutcome::Recorded
    }

    /// Close the active step if its votes are conclusive. Returns the step result.
    pub(crate) fn conclude_if_settled(&mut self, now: TimeStamp) -> Option<bool> {
        if self.status.is_terminal() {
            return None;
        }
        let step = self
            .steps
            .get_mut(self.current_step)
            .filter(|step| step.status == StepStatus::Ongoing)?;

        let approved = match evaluate_step(step) {
            StepOutcome::Pending => return None,
            StepOutcome::Approved => true,
            StepOutcome::Rejected => false,
        };
        step.status = StepStatus::Done;
        step.ended_at = Some(now);
        step.approved = Some(approved);
        self.deadline = None;
        self.current_step += 1;
        Some(approved)
    }

    /// Force the active step to its configured default outcome. Votes already
    /// collected are not tallied.
    pub(crate) fn expire_active_step(&mut self, now: TimeStamp) -> Option<bool> {
        if self.status.is_terminal() {
            return None;
        }
        let step = self
            .steps
            .get_mut(self.current_step)
            .filter(|step| step.status == StepStatus::Ongoing)?;

        step.status = StepStatus::TimedOut;
        step.ended_at = Some(now);
        step.approved = Some(step.timeout_approve);
        self.deadline = None;
        self.current_step += 1;
        Some(step.timeout_approve)
    }

    #[cfg(test)]
    pub(crate) fn set_deadline_for_tests(&mut self, deadline: Option<TimeStamp>) {
        self.deadline = deadline;
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let record = SchemeRecord {
            id: self.id.clone(),
            process: self.process.clone(),
            target: self.target.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            deadline: self.deadline,
            current_step: self.current_step as u64,
            status: self.status,
            steps: ByteVec::from(self.steps.encode()?),
        };
        Ok(minicbor::to_vec(&record)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: SchemeRecord = minicbor::decode(bytes)?;
        Ok(Self {
            id: record.id,
            process: record.process,
            target: record.target,
            started_at: record.started_at,
            ended_at: record.ended_at,
            deadline: record.deadline,
            current_step: usize::try_from(record.current_step).unwrap_or(usize::MAX),
            status: record.status,
            steps: StepLedger::decode(&record.steps)?,
        })
    }
}
