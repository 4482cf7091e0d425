mod common;

use approval_engine::{EngineConfig, SchemeStatus, StepStatus};
use common::{Harness, person, request};

#[test]
fn failed_send_is_retried() -> anyhow::Result<()> {
    let h = Harness::new(vec![])?;
    h.notifier.fail_next(2);

    h.start(request(100), &[(vec![1], 600, false)])?;

    assert_eq!(h.notifier.attempts(), 3);
    assert!(h.notifier.invitation_for(&person(1), 0).is_some());
    Ok(())
}

#[test]
fn undeliverable_step_falls_back_to_its_timeout() -> anyhow::Result<()> {
    let mut config = EngineConfig::default();
    config.notifications.max_attempts = 2;
    let h = Harness::with_config(vec![], &config)?;
    h.notifier.fail_always();

    let id = h.start(request(100), &[(vec![1, 2], 600, true)])?;
    assert_eq!(h.notifier.attempts(), 4);
    assert!(h.notifier.sent().is_empty());

    // the step is persisted as started regardless of delivery
    let scheme = h.engine.scheme(&id)?.unwrap();
    assert_eq!(scheme.steps().get(0).unwrap().status, StepStatus::Ongoing);

    h.clock.advance(600);
    assert!(h.engine.on_timeout(&id)?);
    assert_eq!(h.engine.scheme(&id)?.unwrap().status(), SchemeStatus::Accepted);
    assert_eq!(h.hooks.approved(), 1);
    Ok(())
}

#[test]
fn pending_delivery_is_not_retried() -> anyhow::Result<()> {
    let h = Harness::new(vec![])?;
    h.notifier.answer_pending();

    h.start(request(100), &[(vec![1, 2], 600, false)])?;

    assert_eq!(h.notifier.attempts(), 2);
    assert_eq!(h.notifier.sent().len(), 2);
    Ok(())
}

#[test]
fn step_without_timeout_waits_for_replies() -> anyhow::Result<()> {
    let h = Harness::new(vec![])?;
    let id = h.start(request(100), &[(vec![1], 0, false)])?;

    let scheme = h.engine.scheme(&id)?.unwrap();
    assert!(scheme.deadline().is_none());

    h.clock.advance(365 * 24 * 3600);
    assert!(h.engine.due()?.is_empty());

    h.engine.record_vote(&id, 0, &person(1), true)?;
    assert_eq!(h.engine.scheme(&id)?.unwrap().status(), SchemeStatus::Accepted);
    Ok(())
}
