//! The approval state machine
//!
//! Entry points load the scheme, apply one transition from [`ApprovalScheme`],
//! persist, and then perform the side effects that go with it: inviting the
//! approvers of a step that just started, or applying the verdict to the target
//! object once the scheme is settled.
//!
//! Calls for the same scheme are serialised with a per-scheme mutex; different
//! schemes never wait on each other.
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{ApprovalError, Result};
use crate::ledger::StepLedger;
use crate::ports::{ChangeRecord, Clock, Invitation, Notifier, NotifyOutcome, ObjectStore, SystemClock, TrackedObject};
use crate::process::{ApprovalProcess, ProcessRegistry};
use crate::reply::ReplyToken;
use crate::scheme::{Advance, ApprovalScheme, SchemeStatus, VoteOutcome};
use crate::status::SchemeSummary;
use crate::store::SchemeStore;
use crate::types::{EntityRef, SchemeId, TimeStamp};

pub struct ApprovalEngine {
    schemes: Arc<dyn SchemeStore>,
    objects: Arc<dyn ObjectStore>,
    notifier: Arc<dyn Notifier>,
    processes: Arc<ProcessRegistry>,
    clock: Arc<dyn Clock>,
    max_notify_attempts: u32,
    locks: DashMap<SchemeId, Arc<Mutex<()>>>,
}

impl ApprovalEngine {
    pub fn new(
        schemes: Arc<dyn SchemeStore>,
        objects: Arc<dyn ObjectStore>,
        notifier: Arc<dyn Notifier>,
        processes: Arc<ProcessRegistry>,
    ) -> Self {
        Self {
            schemes,
            objects,
            notifier,
            processes,
            clock: Arc::new(SystemClock),
            max_notify_attempts: EngineConfig::default().notifications.max_attempts,
            locks: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.max_notify_attempts = config.notifications.max_attempts.max(1);
        self
    }

    pub fn now(&self) -> TimeStamp {
        self.clock.now()
    }

    pub fn scheme(&self, id: &SchemeId) -> Result<Option<ApprovalScheme>> {
        self.schemes.get(id)
    }

    pub fn scheme_for_target(&self, target: &EntityRef) -> Result<Option<ApprovalScheme>> {
        self.schemes.find_by_target(target)
    }

    pub fn summary(&self, id: &SchemeId) -> Result<Option<SchemeSummary>> {
        Ok(self
            .schemes
            .get(id)?
            .map(|scheme| SchemeSummary::of(&scheme, self.objects.as_ref())))
    }

    /// Ongoing schemes whose deadline has elapsed.
    pub fn due(&self) -> Result<Vec<SchemeId>> {
        self.schemes.due(self.clock.now())
    }

    /// Persist a new ongoing scheme. Step 0 is not started until
    /// [`advance_or_resolve`](Self::advance_or_resolve) is called.
    pub fn create(&self, process: &str, target: EntityRef, steps: StepLedger) -> Result<SchemeId> {
        self.processes.get(process)?;
        let id = SchemeId::generate()?;
        let scheme = ApprovalScheme::new(id.clone(), process, target, steps, self.clock.now());
        self.schemes.insert(&scheme)?;

        info!(
            scheme_id = %id,
            process,
            target = %scheme.target(),
            steps = scheme.steps().len(),
            "Approval scheme created"
        );
        Ok(id)
    }

    /// Start the step under the cursor, or settle the scheme.
    pub fn advance_or_resolve(&self, id: &SchemeId) -> Result<()> {
        self.serialized(id, || {
            let mut scheme = self.load(id)?;
            self.advance(&mut scheme)
        })
    }

    /// Record a reply for the active step. Replies for another step, from an
    /// approver not listed in the step, or after the approver already answered
    /// are ignored.
    pub fn record_vote(
        &self,
        id: &SchemeId,
        step: usize,
        approver: &EntityRef,
        approve: bool,
    ) -> Result<VoteOutcome> {
        self.serialized(id, || {
            let mut scheme = self.load(id)?;
            let now = self.clock.now();
            let outcome = scheme.record_vote(step, approver, approve, now);
            if outcome != VoteOutcome::Recorded {
                debug!(scheme_id = %id, step, approver = %approver, ?outcome, "Vote ignored");
                return Ok(outcome);
            }
            self.schemes.update(&scheme)?;
            info!(scheme_id = %id, step, approver = %approver, approve, "Vote recorded");

            if let Some(approved) = scheme.conclude_if_settled(now) {
                self.schemes.update(&scheme)?;
                info!(scheme_id = %id, step, approved, "Approval step done");
                self.advance(&mut scheme)?;
            }
            Ok(outcome)
        })
    }

    /// Apply the timeout default of the active step. Returns false when there
    /// was nothing to time out.
    ///
    /// Unlike a bare step expiry, this only acts once the scheme's deadline has
    /// passed: calls made before the deadline, or for a step without a timeout,
    /// are no-ops. A due list read before the step concluded can therefore never
    /// expire the step that followed it.
    pub fn on_timeout(&self, id: &SchemeId) -> Result<bool> {
        self.serialized(id, || {
            let mut scheme = self.load(id)?;
            let now = self.clock.now();
            if !scheme.is_due(now) {
                debug!(scheme_id = %id, "Timeout ignored, scheme not due");
                return Ok(false);
            }
            let step = scheme.current_step();
            let Some(approved) = scheme.expire_active_step(now) else {
                debug!(scheme_id = %id, "Timeout ignored, no step in progress");
                return Ok(false);
            };
            self.schemes.update(&scheme)?;
            info!(scheme_id = %id, step, approved, "Approval step timed out");

            self.advance(&mut scheme)?;
            Ok(true)
        })
    }

    /// Decision point: `object` has just reached `reaching_state`. Every
    /// registered process is asked for a scheme; each one returned is created
    /// and started.
    pub fn on_reaching_state(
        &self,
        object: &TrackedObject,
        reaching_state: &str,
    ) -> Result<Vec<SchemeId>> {
        let mut started = Vec::new();
        for process in self.processes.iter() {
            let Some(steps) = process.define_scheme(object, reaching_state, self.objects.as_ref())?
            else {
                continue;
            };
            let id = self.create(process.name(), object.reference().clone(), steps)?;
            self.advance_or_resolve(&id)?;
            started.push(id);
        }
        Ok(started)
    }

    /// Drop every scheme attached to a deleted object. Each scheme is removed
    /// under its own lock so a vote or timeout in flight finishes first.
    pub fn on_object_deleted(&self, target: &EntityRef) -> Result<usize> {
        let mut removed = 0;
        for scheme in self.schemes.for_target(target)? {
            if self.serialized(scheme.id(), || self.schemes.delete(scheme.id()))? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(target = %target, removed, "Approval schemes removed with their target");
        }
        Ok(removed)
    }

    /// Reply channel: verify the token's passcode, then record the vote.
    pub fn reply(&self, token: &str, approve: bool) -> Result<VoteOutcome> {
        let token = ReplyToken::decode(token)?;
        let scheme = self.load(&token.scheme_id)?;
        if let Err(err) = token.verify(&scheme) {
            warn!(scheme_id = %token.scheme_id, step = token.step(), "Reply token rejected");
            return Err(err);
        }
        self.record_vote(&token.scheme_id, token.step(), &token.approver, approve)
    }

    /// Number of per-scheme locks currently held in the lock map.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    fn load(&self, id: &SchemeId) -> Result<ApprovalScheme> {
        self.schemes
            .get(id)?
            .ok_or_else(|| ApprovalError::SchemeNotFound(id.clone()))
    }

    /// Run `f` holding the lock of scheme `id`.
    fn serialized<T>(&self, id: &SchemeId, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.locks.entry(id.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        // clones are only taken under the shard lock, so a count of two (ours
        // and the map's) means no other caller is waiting on this mutex
        self.locks.remove_if(id, |_, held| Arc::strong_count(held) == 2);
        result
    }

    fn advance(&self, scheme: &mut ApprovalScheme) -> Result<()> {
        match scheme.advance(self.clock.now()) {
            None => Ok(()),
            Some(Advance::StartStep(index)) => {
                self.schemes.update(scheme)?;
                info!(
                    scheme_id = %scheme.id(),
                    step = index,
                    deadline = ?scheme.deadline().map(|d| d.to_string()),
                    "Approval step started"
                );
                self.invite(scheme, index)
            }
            Some(Advance::Resolve(status)) => {
                self.schemes.update(scheme)?;
                info!(scheme_id = %scheme.id(), ?status, "Approval scheme settled");
                self.apply_verdict(scheme, status)
            }
        }
    }

    fn invite(&self, scheme: &ApprovalScheme, index: usize) -> Result<()> {
        let process = self.processes.get(scheme.process())?;
        let Some(step) = scheme.steps().get(index) else {
            return Ok(());
        };

        let target = match self.objects.resolve(scheme.target()) {
            Ok(Some(target)) => Some(target),
            Ok(None) => {
                warn!(scheme_id = %scheme.id(), target = %scheme.target(), "Target not found, approvers not invited");
                None
            }
            Err(err) => {
                warn!(scheme_id = %scheme.id(), target = %scheme.target(), error = %err, "Target lookup failed, approvers not invited");
                None
            }
        };

        let mut delivered = 0;
        if let Some(target) = target {
            for vote in &step.approvers {
                let approver = match self.objects.resolve(&vote.approver) {
                    Ok(Some(approver)) => approver,
                    Ok(None) => {
                        warn!(scheme_id = %scheme.id(), step = index, approver = %vote.approver, "Approver not found, not invited");
                        continue;
                    }
                    Err(err) => {
                        warn!(scheme_id = %scheme.id(), step = index, approver = %vote.approver, error = %err, "Approver lookup failed, not invited");
                        continue;
                    }
                };
                let token = ReplyToken::new(
                    scheme.id().clone(),
                    index,
                    vote.approver.clone(),
                    vote.passcode.clone(),
                )
                .encode()?;
                let text = process.invitation_text(&approver, &target);
                let invitation = Invitation {
                    scheme_id: scheme.id().clone(),
                    step: index,
                    approver,
                    target: target.clone(),
                    passcode: vote.passcode.clone(),
                    token,
                    title: text.title,
                    introduction: text.introduction,
                };
                if self.dispatch(&invitation) {
                    delivered += 1;
                }
            }
        }

        if delivered == 0 && step.timeout_secs == 0 {
            error!(
                scheme_id = %scheme.id(),
                step = index,
                "No approver could be invited and the step has no timeout; it cannot conclude"
            );
        }
        Ok(())
    }

    // Pending counts as delivered. Failed sends are retried, then left to the timeout.
    fn dispatch(&self, invitation: &Invitation) -> bool {
        for attempt in 1..=self.max_notify_attempts {
            match self.notifier.send_invitation(invitation) {
                NotifyOutcome::Sent | NotifyOutcome::Pending => return true,
                NotifyOutcome::Failed(reason) => warn!(
                    scheme_id = %invitation.scheme_id,
                    step = invitation.step,
                    approver = %invitation.approver.reference(),
                    attempt,
                    reason = %reason,
                    "Invitation not delivered"
                ),
            }
        }
        error!(
            scheme_id = %invitation.scheme_id,
            step = invitation.step,
            approver = %invitation.approver.reference(),
            "Giving up on invitation, step relies on its timeout"
        );
        false
    }

    fn apply_verdict(&self, scheme: &ApprovalScheme, status: SchemeStatus) -> Result<()> {
        let process = self.processes.get(scheme.process())?;
        let Some(mut object) = self.objects.resolve(scheme.target())? else {
            warn!(scheme_id = %scheme.id(), target = %scheme.target(), "Target gone, verdict not applied");
            return Ok(());
        };

        apply_hook(process, status, &mut object)?;

        if object.is_modified() {
            let change = ChangeRecord {
                at: self.clock.now(),
                user_info: format!("Approval process {} ({})", process.name(), scheme.id()),
            };
            self.objects.persist(&object, &change)?;
            debug!(scheme_id = %scheme.id(), target = %scheme.target(), "Target saved after verdict");
        }
        Ok(())
    }
}

fn apply_hook(
    process: &dyn ApprovalProcess,
    status: SchemeStatus,
    object: &mut TrackedObject,
) -> anyhow::Result<()> {
    match status {
        SchemeStatus::Accepted => process.do_approve(object),
        SchemeStatus::Rejected => process.do_reject(object),
        SchemeStatus::Ongoing => Ok(()),
    }
}
