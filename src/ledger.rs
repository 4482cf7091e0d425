//! The step ledger: the ordered steps of a scheme and their persisted form
//!
//! The ledger is stored as one opaque blob inside the scheme record. The blob is
//! a CBOR array `[version, steps]`; steps and votes are CBOR maps so optional
//! fields can be added without breaking records written by older versions.
use crate::error::{ApprovalError, Result};
use crate::ports::ObjectStore;
use crate::types::{EntityRef, Passcode, TimeStamp};

pub const LEDGER_VERSION: u16 = 1;
pub const PASSCODE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum StepStatus {
    #[n(0)]
    Idle,
    #[n(1)]
    Ongoing,
    #[n(2)]
    Done,
    #[n(3)]
    TimedOut,
}

impl StepStatus {
    pub fn is_concluded(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(map)]
pub struct ApproverVote {
    #[n(0)]
    pub approver: EntityRef,
    #[n(1)]
    pub passcode: Passcode,
    #[n(2)]
    pub answered_at: Option<TimeStamp>, // absent until the approver replies
    #[n(3)]
    pub approval: Option<bool>,
}

impl ApproverVote {
    pub fn has_answered(&self) -> bool {
        self.approval.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(map)]
pub struct Step {
    #[n(0)]
    pub timeout_secs: u64, // 0 disables the timeout
    #[n(1)]
    pub timeout_approve: bool,
    #[n(2)]
    pub status: StepStatus,
    #[n(3)]
    pub started_at: Option<TimeStamp>,
    #[n(4)]
    pub ended_at: Option<TimeStamp>,
    #[n(5)]
    pub approved: Option<bool>, // set once the step is done or timed out
    #[n(6)]
    pub approvers: Vec<ApproverVote>,
}

impl Step {
    pub fn vote_of(&self, approver: &EntityRef) -> Option<&ApproverVote> {
        self.approvers.iter().find(|vote| &vote.approver == approver)
    }
    pub(crate) fn vote_of_mut(&mut self, approver: &EntityRef) -> Option<&mut ApproverVote> {
        self.approvers
            .iter_mut()
            .find(|vote| &vote.approver == approver)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepLedger {
    steps: Vec<Step>,
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an idle step. Every approver kind must be known to `objects`; each
    /// approver gets a fresh passcode.
    pub fn append_step(
        &mut self,
        objects: &dyn ObjectStore,
        approvers: impl IntoIterator<Item = EntityRef>,
        timeout_secs: u64,
        timeout_approve: bool,
    ) -> Result<()> {
        let mut votes = Vec::new();
        for approver in approvers {
            if !objects.is_known_kind(&approver.kind) {
                return Err(ApprovalError::InvalidApproverType(approver.kind));
            }
            votes.push(ApproverVote {
                approver,
                passcode: Passcode::generate(PASSCODE_BYTES),
                answered_at: None,
                approval: None,
            });
        }

        self.steps.push(Step {
            timeout_secs,
            timeout_approve,
            status: StepStatus::Idle,
            started_at: None,
            ended_at: None,
            approved: None,
            approvers: votes,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    #[cfg(test)]
    pub(crate) fn push_for_tests(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut e = minicbor::Encoder::new(Vec::new());
        e.array(2)?.u16(LEDGER_VERSION)?.encode(&self.steps)?;
        Ok(e.into_writer())
    }

    /// An empty blob is an empty ledger.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }

        let mut d = minicbor::Decoder::new(bytes);
        d.array()?;
        let version = d.u16()?;
        if version != LEDGER_VERSION {
            return Err(ApprovalError::UnsupportedLedgerVersion(version));
        }
        let steps: Vec<Step> = d.decode()?;

        Ok(Self { steps })
    }
}
