// tests/process_chain.rs

mod common;
use crate::common::builders::env_of;
use crate::common::{FakeBehaviour, FakeLauncher, fake_supervisor, init_tracing};

use std::cell::RefCell;
use std::error::Error;
use std::rc::Rc;
use std::time::Duration;

use runwatch::engine::{ChainPhase, ChainStep, TagFilter};
use runwatch::errors::RunwatchError;

type TestResult = Result<(), Box<dyn Error>>;

fn completion_slot() -> (Rc<RefCell<Vec<bool>>>, impl FnOnce(bool) + 'static) {
    let results = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&results);
    (results, move |ok| sink.borrow_mut().push(ok))
}

/// Tick until nothing is scheduled any more.
fn run_to_idle(clock: &runwatch::schedule::ManualScheduler) {
    for _ in 0..1000 {
        if !clock.advance_to_next() {
            return;
        }
    }
    panic!("scheduler never went idle");
}

#[test]
fn steps_run_in_order_and_all_succeed() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new().with_default(FakeBehaviour::ExitImmediately(0));
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    chain.add(ChainStep::new(["A"]))?;
    chain.add(ChainStep::new(["B"]))?;
    chain.add(ChainStep::new(["C"]))?;
    assert_eq!(chain.current_index(), -1);

    chain.start()?;
    assert_eq!(launcher.launched_programs(), vec!["A"]);
    run_to_idle(&clock);

    assert_eq!(launcher.launched_programs(), vec!["A", "B", "C"]);
    assert_eq!(*results.borrow(), vec![true]);
    assert_eq!(chain.phase(), ChainPhase::Finished);
    assert!(chain.success());
    assert_eq!(chain.current_index(), 3);
    assert!(chain.commands().iter().all(|c| c.success == Some(true)));
    Ok(())
}

#[test]
fn first_failure_stops_the_chain() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new()
        .with_default(FakeBehaviour::ExitImmediately(0))
        .with_behaviour("B", FakeBehaviour::ExitImmediately(1));
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    for program in ["A", "B", "C"] {
        chain.add(ChainStep::new([program]).name(format!("step {program}")))?;
    }
    chain.start()?;
    run_to_idle(&clock);

    assert_eq!(launcher.launched_programs(), vec!["A", "B"]);
    assert_eq!(*results.borrow(), vec![false]);
    assert!(!chain.success());

    let commands = chain.commands();
    assert_eq!(commands[1].return_code, Some(1));
    assert_eq!(commands[1].success, Some(false));
    assert!(!commands[2].started);
    assert_eq!(commands[2].return_code, None);
    Ok(())
}

#[test]
fn last_step_failure_reports_false_once() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new()
        .with_default(FakeBehaviour::ExitImmediately(0))
        .with_behaviour("C", FakeBehaviour::ExitImmediately(2));
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    for program in ["A", "B", "C"] {
        chain.add(ChainStep::new([program]))?;
    }
    chain.start()?;
    run_to_idle(&clock);

    assert_eq!(launcher.launched_programs(), vec!["A", "B", "C"]);
    assert_eq!(*results.borrow(), vec![false]);
    assert_eq!(chain.current_index(), 2);
    Ok(())
}

#[test]
fn steps_never_overlap() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new();
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    chain.add(ChainStep::new(["A"]))?;
    chain.add(ChainStep::new(["B"]))?;
    chain.start()?;

    clock.advance(Duration::from_secs(3));
    assert_eq!(launcher.launched_count(), 1);
    assert_eq!(supervisor.registry().len(), 1);

    launcher.process(0).exit(0);
    clock.advance(Duration::from_millis(500));
    assert_eq!(launcher.launched_count(), 2);
    assert_eq!(supervisor.registry().len(), 1);
    assert_eq!(chain.current_index(), 1);

    launcher.process(1).exit(0);
    clock.advance(Duration::from_millis(500));
    assert_eq!(*results.borrow(), vec![true]);
    assert!(supervisor.registry().is_empty());
    Ok(())
}

#[test]
fn step_timeout_fails_the_chain() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new();
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    chain.add(ChainStep::new(["hang"]).timeout_secs(1).poll_frequency(1.0))?;
    chain.add(ChainStep::new(["never"]))?;
    chain.start()?;

    clock.advance(Duration::from_secs(2));

    assert_eq!(*results.borrow(), vec![false]);
    assert!(launcher.process(0).was_killed());
    assert_eq!(launcher.launched_programs(), vec!["hang"]);
    Ok(())
}

#[test]
fn progress_reports_active_step_and_its_output() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new();
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let seen: Rc<RefCell<Vec<(String, f64, String)>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&seen);
    let chain = supervisor
        .chain()
        .on_progress(move |p| {
            sink.borrow_mut()
                .push((p.command.label(), p.elapsed, p.output.to_string()))
        })
        .build();
    chain.add(ChainStep::new(["pull"]).name("Pull image"))?;
    chain.add(ChainStep::new(["run"]))?;
    chain.start()?;

    launcher.process(0).push_output("layer\n");
    clock.advance(Duration::from_millis(500));
    launcher.process(0).exit(0);
    clock.advance(Duration::from_millis(500));
    clock.advance(Duration::from_millis(500));

    let seen = seen.borrow();
    assert_eq!(seen[0], ("Pull image".to_string(), 0.5, "layer\n".to_string()));
    // Elapsed restarts with each step.
    assert_eq!(seen[1], ("step 2".to_string(), 0.5, String::new()));
    assert_eq!(seen.len(), 2);
    Ok(())
}

#[test]
fn panicking_progress_callback_keeps_reporting_later_steps() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new();
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&seen);
    let chain = supervisor
        .chain()
        .on_progress(move |p| {
            let label = p.command.label();
            let first = sink.borrow().is_empty();
            sink.borrow_mut().push(label);
            if first {
                panic!("progress sink failed");
            }
        })
        .on_completion(on_done)
        .build();
    chain.add(ChainStep::new(["pull"]))?;
    chain.add(ChainStep::new(["run"]))?;
    chain.start()?;

    clock.advance(Duration::from_millis(500));
    clock.advance(Duration::from_millis(500));
    launcher.process(0).exit(0);
    clock.advance(Duration::from_millis(500));
    clock.advance(Duration::from_millis(500));
    launcher.process(1).exit(0);
    clock.advance(Duration::from_millis(500));

    assert_eq!(*seen.borrow(), vec!["step 1", "step 1", "step 2"]);
    assert_eq!(*results.borrow(), vec![true]);
    Ok(())
}

#[test]
fn empty_chain_completes_true_immediately() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new();
    let (supervisor, _clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    chain.start()?;

    assert_eq!(*results.borrow(), vec![true]);
    assert_eq!(chain.phase(), ChainPhase::Finished);
    assert!(launcher.attempts().is_empty());
    Ok(())
}

#[test]
fn first_step_spawn_failure_is_returned_without_callback() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new().with_default(FakeBehaviour::SpawnError);
    let (supervisor, _clock) = fake_supervisor(launcher);
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    chain.add(ChainStep::new(["missing"]))?;

    assert!(matches!(chain.start(), Err(RunwatchError::Spawn { .. })));
    assert!(results.borrow().is_empty());
    assert_eq!(chain.phase(), ChainPhase::Finished);
    assert!(!chain.success());
    Ok(())
}

#[test]
fn later_spawn_failure_completes_false() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new()
        .with_behaviour("A", FakeBehaviour::ExitImmediately(0))
        .with_behaviour("B", FakeBehaviour::SpawnError);
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    chain.add(ChainStep::new(["A"]))?;
    chain.add(ChainStep::new(["B"]))?;
    chain.start()?;
    run_to_idle(&clock);

    assert_eq!(*results.borrow(), vec![false]);
    assert_eq!(launcher.attempts().len(), 2);
    assert!(supervisor.registry().is_empty());
    Ok(())
}

#[test]
fn steps_cannot_be_added_after_start() -> TestResult {
    init_tracing();
    let (supervisor, _clock) = fake_supervisor(FakeLauncher::new());

    let chain = supervisor.chain().build();
    chain.add(ChainStep::new(["A"]))?;
    chain.start()?;

    assert!(matches!(
        chain.add(ChainStep::new(["B"])),
        Err(RunwatchError::ChainAlreadyStarted)
    ));
    assert!(matches!(chain.start(), Err(RunwatchError::ChainAlreadyStarted)));
    assert_eq!(chain.len(), 1);
    chain.cancel();
    Ok(())
}

#[test]
fn cancel_kills_active_step_and_fails_chain() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new();
    let (supervisor, clock) = fake_supervisor(launcher.clone());
    let (results, on_done) = completion_slot();

    let chain = supervisor.chain().on_completion(on_done).build();
    chain.add(ChainStep::new(["A"]))?;
    chain.add(ChainStep::new(["B"]))?;
    chain.start()?;
    clock.advance(Duration::from_secs(1));

    assert!(chain.cancel());
    assert!(!chain.cancel());
    run_to_idle(&clock);

    assert_eq!(*results.borrow(), vec![false]);
    assert!(launcher.process(0).was_killed());
    assert_eq!(launcher.launched_count(), 1);
    assert!(chain.active_task().is_none());
    Ok(())
}

#[test]
fn chain_tags_and_env_reach_every_step() -> TestResult {
    init_tracing();
    let launcher = FakeLauncher::new();
    let (supervisor, _clock) = fake_supervisor(launcher.clone());

    let chain = supervisor
        .chain()
        .env(env_of(&[("PATH", "/opt/engine/bin")]))
        .tag("image_name", "seg")
        .tag("operation", "run")
        .build();
    chain.add(ChainStep::new(["udocker", "run", "seg"]))?;
    chain.start()?;

    let filter = TagFilter::new().tag("image_name", "seg").tag("operation", "run");
    assert!(supervisor.registry().any(&filter));
    assert_eq!(
        launcher.process(0).env().and_then(|e| e.get("PATH")).map(String::as_str),
        Some("/opt/engine/bin")
    );

    assert_eq!(supervisor.kill_all(), 1);
    assert!(!supervisor.registry().any(&filter));
    Ok(())
}
