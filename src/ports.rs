//! Narrow interfaces to the host application
//!
//! The engine never owns the objects under approval nor the approvers. It reaches
//! them through [`ObjectStore`], sends invitations through [`Notifier`] and reads
//! time from [`Clock`] so that deadlines can be driven by an external clock.
use std::collections::BTreeMap;

use crate::types::{EntityKind, EntityRef, Passcode, SchemeId, TimeStamp};

/// A host record as seen by the engine and the terminal hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedObject {
    reference: EntityRef,
    name: String,
    state: Option<String>,
    fields: BTreeMap<String, String>,
    modified: bool,
}

impl TrackedObject {
    pub fn new(reference: EntityRef, name: impl Into<String>) -> Self {
        Self {
            reference,
            name: name.into(),
            state: None,
            fields: BTreeMap::new(),
            modified: false,
        }
    }
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
    pub fn reference(&self) -> &EntityRef {
        &self.reference
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
    pub fn set_state(&mut self, state: impl Into<String>) {
        let state = state.into();
        if self.state.as_deref() != Some(state.as_str()) {
            self.state = Some(state);
            self.modified = true;
        }
    }
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let previous = self.fields.insert(key.into(), value.clone());
        if previous.as_deref() != Some(value.as_str()) {
            self.modified = true;
        }
    }
    pub fn is_modified(&self) -> bool {
        self.modified
    }
    /// Called by stores once the changes have been written.
    pub fn mark_clean(&mut self) {
        self.modified = false;
    }
}

/// Attribution attached to writes made on behalf of an approval process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub at: TimeStamp,
    pub user_info: String,
}

pub trait ObjectStore: Send + Sync {
    fn is_known_kind(&self, kind: &EntityKind) -> bool;
    /// A missing record is `Ok(None)`, never an error.
    fn resolve(&self, reference: &EntityRef) -> anyhow::Result<Option<TrackedObject>>;
    fn persist(&self, object: &TrackedObject, change: &ChangeRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub scheme_id: SchemeId,
    pub step: usize,
    pub approver: TrackedObject,
    pub target: TrackedObject,
    pub passcode: Passcode,
    pub token: String, // opaque, handed back through the reply channel
    pub title: String,
    pub introduction: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Pending,
    Failed(String),
}

pub trait Notifier: Send + Sync {
    fn send_invitation(&self, invitation: &Invitation) -> NotifyOutcome;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp {
        TimeStamp::now()
    }
}
