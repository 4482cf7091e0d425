mod common;

use std::thread;
use std::time::{Duration, Instant};

use approval_engine::{EngineConfig, SchemeStatus, TimeoutSweeper};
use common::{Harness, person, request};

#[test]
fn sweep_times_out_due_schemes_only() -> anyhow::Result<()> {
    let h = Harness::new(vec![])?;
    let short = h.start(request(100), &[(vec![1], 60, false)])?;
    let long = h.start(request(101), &[(vec![2], 3600, true)])?;
    let answered = h.start(request(102), &[(vec![3], 60, false)])?;
    h.engine.record_vote(&answered, 0, &person(3), true)?;

    h.clock.advance(120);
    let sweeper = TimeoutSweeper::new(h.engine.clone());
    let report = sweeper.sweep(Duration::from_secs(30))?;

    assert_eq!(report.timed_out, vec![short.clone()]);
    assert!(report.failed.is_empty());
    assert_eq!(report.deferred, 0);
    assert_eq!(report.to_string(), format!("Timeout for approval #{short}"));

    assert_eq!(h.engine.scheme(&short)?.unwrap().status(), SchemeStatus::Rejected);
    assert_eq!(h.engine.scheme(&long)?.unwrap().status(), SchemeStatus::Ongoing);
    assert_eq!(h.engine.scheme(&answered)?.unwrap().status(), SchemeStatus::Accepted);

    let again = sweeper.sweep(Duration::from_secs(30))?;
    assert!(again.timed_out.is_empty());
    assert_eq!(again.to_string(), "No approval has timed out");
    Ok(())
}

#[test]
fn exhausted_budget_leaves_the_rest_due() -> anyhow::Result<()> {
    let h = Harness::new(vec![])?;
    let first = h.start(request(100), &[(vec![1], 60, false)])?;
    let second = h.start(request(101), &[(vec![2], 60, false)])?;

    h.clock.advance(60);
    let sweeper = TimeoutSweeper::new(h.engine.clone());

    let report = sweeper.sweep(Duration::ZERO)?;
    assert!(report.timed_out.is_empty());
    assert_eq!(report.deferred, 2);

    let report = sweeper.sweep(Duration::from_secs(30))?;
    assert_eq!(report.timed_out.len(), 2);
    assert!(report.timed_out.contains(&first));
    assert!(report.timed_out.contains(&second));
    Ok(())
}

#[test]
fn background_sweeper_picks_up_timeouts() -> anyhow::Result<()> {
    let h = Harness::new(vec![])?;
    let id = h.start(request(100), &[(vec![1], 60, true)])?;
    h.clock.advance(61);

    let handle = TimeoutSweeper::new(h.engine.clone())
        .spawn(Duration::from_millis(20), Duration::from_secs(5));

    let limit = Instant::now() + Duration::from_secs(5);
    while h.engine.scheme(&id)?.unwrap().status() == SchemeStatus::Ongoing && Instant::now() < limit {
        thread::sleep(Duration::from_millis(10));
    }
    handle.shutdown();

    assert_eq!(h.engine.scheme(&id)?.unwrap().status(), SchemeStatus::Accepted);
    assert_eq!(h.hooks.approved(), 1);
    Ok(())
}

#[test]
fn unbounded_budget_still_sweeps() -> anyhow::Result<()> {
    let h = Harness::new(vec![])?;
    let id = h.start(request(100), &[(vec![1], 60, false)])?;
    h.clock.advance(60);

    let report = TimeoutSweeper::new(h.engine.clone()).sweep(Duration::from_secs(i64::MAX as u64))?;
    assert_eq!(report.timed_out, vec![id.clone()]);
    assert_eq!(report.deferred, 0);

    let report = TimeoutSweeper::new(h.engine.clone()).sweep(Duration::MAX)?;
    assert!(report.is_empty());
    assert_eq!(h.engine.scheme(&id)?.unwrap().status(), SchemeStatus::Rejected);
    Ok(())
}

#[test]
fn configured_sweeper_runs_on_start() -> anyhow::Result<()> {
    let mut config = EngineConfig::default();
    config.sweeper.interval_secs = 1;
    let h = Harness::with_config(vec![], &config)?;
    let id = h.start(request(100), &[(vec![1], 60, true)])?;
    h.clock.advance(60);

    let handle = TimeoutSweeper::new(h.engine.clone()).spawn_with(&config);
    let limit = Instant::now() + Duration::from_secs(5);
    while h.engine.scheme(&id)?.unwrap().status() == SchemeStatus::Ongoing && Instant::now() < limit {
        thread::sleep(Duration::from_millis(10));
    }
    handle.shutdown();

    assert_eq!(h.engine.scheme(&id)?.unwrap().status(), SchemeStatus::Accepted);
    Ok(())
}
