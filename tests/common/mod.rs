#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use approval_engine::{
    ApprovalEngine, ApprovalProcess, ChangeRecord, Clock, EngineConfig, EntityKind, EntityRef,
    Invitation, InvitationText, Notifier, NotifyOutcome, ObjectStore, ProcessRegistry, SchemeId,
    SledSchemeStore, StepLedger, TimeStamp, TrackedObject,
};
use tempfile::TempDir;

pub const PROCESS: &str = "request_approval";
pub const WAITING: &str = "waiting_for_approval";

pub fn person(id: u64) -> EntityRef {
    EntityRef::new(EntityKind::Person, id)
}

pub fn request(id: u64) -> EntityRef {
    EntityRef::new(EntityKind::UserRequest, id)
}

/// Host records kept in memory. Persists are recorded with their attribution.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<EntityRef, TrackedObject>>,
    writes: Mutex<Vec<(TrackedObject, ChangeRecord)>>,
}

impl MemoryObjectStore {
    pub fn add(&self, object: TrackedObject) {
        self.objects
            .lock()
            .unwrap()
            .insert(object.reference().clone(), object);
    }

    pub fn remove(&self, reference: &EntityRef) {
        self.objects.lock().unwrap().remove(reference);
    }

    pub fn get(&self, reference: &EntityRef) -> Option<TrackedObject> {
        self.objects.lock().unwrap().get(reference).cloned()
    }

    pub fn writes(&self) -> Vec<(TrackedObject, ChangeRecord)> {
        self.writes.lock().unwrap().clone()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn is_known_kind(&self, kind: &EntityKind) -> bool {
        !matches!(kind, EntityKind::Other(_))
    }

    fn resolve(&self, reference: &EntityRef) -> anyhow::Result<Option<TrackedObject>> {
        Ok(self.get(reference))
    }

    fn persist(&self, object: &TrackedObject, change: &ChangeRecord) -> anyhow::Result<()> {
        let mut saved = object.clone();
        saved.mark_clean();
        self.add(saved.clone());
        self.writes.lock().unwrap().push((saved, change.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Invitation>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    always_fail: AtomicBool,
    pending: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn fail_always(&self) {
        self.always_fail.store(true, Ordering::SeqCst);
    }

    pub fn answer_pending(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Invitation> {
        self.sent.lock().unwrap().clone()
    }

    pub fn invitation_for(&self, approver: &EntityRef, step: usize) -> Option<Invitation> {
        self.sent()
            .into_iter()
            .rev()
            .find(|inv| inv.approver.reference() == approver && inv.step == step)
    }
}

impl Notifier for RecordingNotifier {
    fn send_invitation(&self, invitation: &Invitation) -> NotifyOutcome {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return NotifyOutcome::Failed("mailbox unavailable".into());
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return NotifyOutcome::Failed("temporary failure".into());
        }
        self.sent.lock().unwrap().push(invitation.clone());
        if self.pending.load(Ordering::SeqCst) {
            NotifyOutcome::Pending
        } else {
            NotifyOutcome::Sent
        }
    }
}

pub struct ManualClock {
    now: Mutex<TimeStamp>,
}

impl ManualClock {
    pub fn new(start: TimeStamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, secs: u64) {
        let mut now = self.now.lock().unwrap();
        *now = now.plus_secs(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct HookCalls {
    pub approved: AtomicUsize,
    pub rejected: AtomicUsize,
}

impl HookCalls {
    pub fn approved(&self) -> usize {
        self.approved.load(Ordering::SeqCst)
    }
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

/// (approver person ids, timeout secs, default verdict on timeout)
pub type PlannedStep = (Vec<u64>, u64, bool);

/// Requests reaching `waiting_for_approval` go through the planned steps. The
/// verdict is written to the request state.
pub struct RequestApproval {
    plan: Vec<PlannedStep>,
    hooks: Arc<HookCalls>,
}

impl ApprovalProcess for RequestApproval {
    fn name(&self) -> &str {
        PROCESS
    }

    fn define_scheme(
        &self,
        object: &TrackedObject,
        reaching_state: &str,
        objects: &dyn ObjectStore,
    ) -> anyhow::Result<Option<StepLedger>> {
        if object.reference().kind != EntityKind::UserRequest || reaching_state != WAITING {
            return Ok(None);
        }
        Ok(Some(plan_ledger(&self.plan, objects)?))
    }

    fn invitation_text(&self, approver: &TrackedObject, target: &TrackedObject) -> InvitationText {
        InvitationText {
            title: format!("Approval required for {}", target.name()),
            introduction: format!("Dear {}, please review {}.", approver.name(), target.name()),
        }
    }

    fn do_approve(&self, object: &mut TrackedObject) -> anyhow::Result<()> {
        self.hooks.approved.fetch_add(1, Ordering::SeqCst);
        object.set_state("approved");
        Ok(())
    }

    fn do_reject(&self, object: &mut TrackedObject) -> anyhow::Result<()> {
        self.hooks.rejected.fetch_add(1, Ordering::SeqCst);
        object.set_state("rejected");
        Ok(())
    }
}

pub fn plan_ledger(plan: &[PlannedStep], objects: &dyn ObjectStore) -> anyhow::Result<StepLedger> {
    let mut ledger = StepLedger::new();
    for (approvers, timeout_secs, timeout_approve) in plan {
        ledger.append_step(
            objects,
            approvers.iter().map(|id| person(*id)),
            *timeout_secs,
            *timeout_approve,
        )?;
    }
    Ok(ledger)
}

pub struct Harness {
    pub engine: Arc<ApprovalEngine>,
    pub objects: Arc<MemoryObjectStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub hooks: Arc<HookCalls>,
    pub start: TimeStamp,
    _dir: TempDir,
}

impl Harness {
    /// Engine over a fresh sled db in a temp dir, with people 1..=9 and
    /// requests 100..=109 registered in the object store.
    pub fn new(plan: Vec<PlannedStep>) -> anyhow::Result<Self> {
        Self::with_config(plan, &EngineConfig::default())
    }

    pub fn with_config(plan: Vec<PlannedStep>, config: &EngineConfig) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = SledSchemeStore::open(dir.path().join("approvals.db"))?;

        let objects = Arc::new(MemoryObjectStore::default());
        for id in 1..=9 {
            objects.add(TrackedObject::new(person(id), format!("Person {id}")));
        }
        for id in 100..=109 {
            objects.add(TrackedObject::new(request(id), format!("R-{id}")).with_state(WAITING));
        }

        let hooks = Arc::new(HookCalls::default());
        let registry = ProcessRegistry::builder()
            .register(RequestApproval {
                plan,
                hooks: hooks.clone(),
            })
            .build()?;

        let start = TimeStamp::new_with(2024, 6, 15, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let notifier = Arc::new(RecordingNotifier::default());

        let engine = ApprovalEngine::new(
            Arc::new(store),
            objects.clone(),
            notifier.clone(),
            Arc::new(registry),
        )
        .with_clock(clock.clone())
        .with_config(config);

        Ok(Self {
            engine: Arc::new(engine),
            objects,
            notifier,
            clock,
            hooks,
            start,
            _dir: dir,
        })
    }

    /// Create and start a scheme for `target` with the given steps.
    pub fn start(&self, target: EntityRef, plan: &[PlannedStep]) -> anyhow::Result<SchemeId> {
        let ledger = plan_ledger(plan, self.objects.as_ref())?;
        let id = self.engine.create(PROCESS, target, ledger)?;
        self.engine.advance_or_resolve(&id)?;
        Ok(id)
    }
}
