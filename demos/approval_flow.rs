//! Walks an expense claim through a two step approval.
//!
//! The manager approves through the reply token from their invitation, the
//! finance team never answers and the sweeper applies the step default.
//!
//! Run with `cargo run --example approval_flow`. The scheme database lives at
//! `store.path` (`APPROVAL_STORE_PATH`); `APPROVAL_LOG_FORMAT=pretty` and
//! friends are honoured.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use approval_engine::{
    ApprovalEngine, ApprovalProcess, ChangeRecord, EngineConfig, EntityKind, EntityRef, Invitation,
    InvitationText, LoadOptions, LogFormat, Notifier, NotifyOutcome, ObjectStore, ProcessRegistry,
    SledSchemeStore, StepLedger, TimeoutSweeper, TrackedObject,
};

fn init_logging(config: &EngineConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[derive(Default)]
struct Records(Mutex<HashMap<EntityRef, TrackedObject>>);

impl Records {
    fn add(&self, object: TrackedObject) {
        if let Ok(mut records) = self.0.lock() {
            records.insert(object.reference().clone(), object);
        }
    }
}

impl ObjectStore for Records {
    fn is_known_kind(&self, kind: &EntityKind) -> bool {
        matches!(kind, EntityKind::Person | EntityKind::Team | EntityKind::UserRequest)
    }

    fn resolve(&self, reference: &EntityRef) -> anyhow::Result<Option<TrackedObject>> {
        let records = self.0.lock().map_err(|_| anyhow::anyhow!("records poisoned"))?;
        Ok(records.get(reference).cloned())
    }

    fn persist(&self, object: &TrackedObject, change: &ChangeRecord) -> anyhow::Result<()> {
        println!("  saved {} as `{}` ({})", object.name(), object.state().unwrap_or("-"), change.user_info);
        let mut saved = object.clone();
        saved.mark_clean();
        self.add(saved);
        Ok(())
    }
}

/// Prints invitations and keeps the reply tokens around.
#[derive(Default)]
struct Mailbox(Mutex<Vec<Invitation>>);

impl Notifier for Mailbox {
    fn send_invitation(&self, invitation: &Invitation) -> NotifyOutcome {
        println!("  to {}: {}", invitation.approver.name(), invitation.title);
        match self.0.lock() {
            Ok(mut sent) => {
                sent.push(invitation.clone());
                NotifyOutcome::Sent
            }
            Err(_) => NotifyOutcome::Failed("mailbox poisoned".into()),
        }
    }
}

struct ExpenseClaim {
    manager: EntityRef,
    finance: EntityRef,
}

impl ApprovalProcess for ExpenseClaim {
    fn name(&self) -> &str {
        "expense_claim"
    }

    fn define_scheme(
        &self,
        object: &TrackedObject,
        reaching_state: &str,
        objects: &dyn ObjectStore,
    ) -> anyhow::Result<Option<StepLedger>> {
        if reaching_state != "submitted" {
            return Ok(None);
        }
        let mut steps = StepLedger::new();
        steps.append_step(objects, [self.manager.clone()], 3600, false)?;
        // small claims go through when finance does not object in time
        let small = object
            .field("amount")
            .and_then(|amount| amount.parse::<u64>().ok())
            .is_some_and(|amount| amount < 500);
        steps.append_step(objects, [self.finance.clone()], 1, small)?;
        Ok(Some(steps))
    }

    fn invitation_text(&self, approver: &TrackedObject, target: &TrackedObject) -> InvitationText {
        InvitationText {
            title: format!("Expense claim {} needs your approval", target.name()),
            introduction: format!("Hello {}, an expense claim is waiting for you.", approver.name()),
        }
    }

    fn do_approve(&self, object: &mut TrackedObject) -> anyhow::Result<()> {
        object.set_state("approved");
        Ok(())
    }

    fn do_reject(&self, object: &mut TrackedObject) -> anyhow::Result<()> {
        object.set_state("rejected");
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let store = SledSchemeStore::from_config(&config)?;

    let manager = EntityRef::new(EntityKind::Person, 1);
    let finance = EntityRef::new(EntityKind::Team, 2);
    let claim_ref = EntityRef::new(EntityKind::UserRequest, 1042);

    let records = Arc::new(Records::default());
    records.add(TrackedObject::new(manager.clone(), "Grace"));
    records.add(TrackedObject::new(finance.clone(), "Finance"));
    let claim = TrackedObject::new(claim_ref.clone(), "EC-1042")
        .with_state("submitted")
        .with_field("amount", "180");
    records.add(claim.clone());

    let mailbox = Arc::new(Mailbox::default());
    let registry = ProcessRegistry::builder()
        .register(ExpenseClaim { manager: manager.clone(), finance })
        .build()?;
    let engine = Arc::new(
        ApprovalEngine::new(Arc::new(store), records.clone(), mailbox.clone(), Arc::new(registry))
            .with_config(&config),
    );

    println!("claim submitted");
    let started = engine.on_reaching_state(&claim, "submitted")?;
    let id = started.first().context("no approval was started")?;

    println!("manager replies");
    let token = mailbox
        .0
        .lock()
        .map_err(|_| anyhow::anyhow!("mailbox poisoned"))?
        .iter()
        .find(|invitation| invitation.approver.reference() == &manager)
        .map(|invitation| invitation.token.clone())
        .context("manager was not invited")?;
    engine.reply(&token, true)?;

    println!("waiting for finance");
    thread::sleep(Duration::from_millis(1100));
    // the first pass runs as soon as the sweeper starts
    let sweeper = TimeoutSweeper::new(engine.clone()).spawn_with(&config);
    let limit = Instant::now() + Duration::from_secs(5);
    while engine.scheme(id)?.is_some_and(|scheme| !scheme.status().is_terminal())
        && Instant::now() < limit
    {
        thread::sleep(Duration::from_millis(50));
    }
    sweeper.shutdown();

    if let Some(summary) = engine.summary(id)? {
        println!("scheme {id} is {:?}", summary.status);
        for (index, step) in summary.steps.iter().enumerate() {
            println!("  step {index}: {:?}", step.state);
        }
    }
    Ok(())
}
