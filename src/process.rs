//! Approval process variants and the registry they are looked up in
//!
//! A process decides whether an object reaching a state needs approval and what
//! the steps are, words the invitation sent to each approver, and applies the
//! final verdict to the object. Schemes remember the process by name so the
//! verdict can be applied after a restart.
use std::sync::Arc;

use crate::error::{ApprovalError, Result};
use crate::ledger::StepLedger;
use crate::ports::{ObjectStore, TrackedObject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationText {
    pub title: String,
    pub introduction: String,
}

pub trait ApprovalProcess: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when `object` needs no approval on reaching `reaching_state`.
    /// Steps are built with [`StepLedger::append_step`] against `objects`.
    fn define_scheme(
        &self,
        object: &TrackedObject,
        reaching_state: &str,
        objects: &dyn ObjectStore,
    ) -> anyhow::Result<Option<StepLedger>>;

    fn invitation_text(&self, approver: &TrackedObject, target: &TrackedObject) -> InvitationText;

    /// May modify `object`; changes are saved by the engine afterwards.
    fn do_approve(&self, object: &mut TrackedObject) -> anyhow::Result<()>;

    /// May modify `object`; changes are saved by the engine afterwards.
    fn do_reject(&self, object: &mut TrackedObject) -> anyhow::Result<()>;
}

/// Immutable once built. Processes are consulted in registration order.
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    processes: Vec<Arc<dyn ApprovalProcess>>,
}

#[derive(Default)]
pub struct ProcessRegistryBuilder {
    processes: Vec<Arc<dyn ApprovalProcess>>,
}

impl ProcessRegistryBuilder {
    pub fn register(mut self, process: impl ApprovalProcess + 'static) -> Self {
        self.processes.push(Arc::new(process));
        self
    }

    pub fn build(self) -> Result<ProcessRegistry> {
        for (i, process) in self.processes.iter().enumerate() {
            if self.processes[..i]
                .iter()
                .any(|other| other.name() == process.name())
            {
                return Err(ApprovalError::DuplicateProcess(process.name().to_string()));
            }
        }
        Ok(ProcessRegistry {
            processes: self.processes,
        })
    }
}

impl ProcessRegistry {
    pub fn builder() -> ProcessRegistryBuilder {
        ProcessRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<&dyn ApprovalProcess> {
        self.processes
            .iter()
            .find(|process| process.name() == name)
            .map(|process| process.as_ref())
            .ok_or_else(|| ApprovalError::UnknownProcess(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ApprovalProcess> {
        self.processes.iter().map(|process| process.as_ref())
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
