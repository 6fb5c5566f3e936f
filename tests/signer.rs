// tests/signer.rs

//! Single-key convergence loop against the in-memory hub.

mod common;

use autosigner::{BuildId, Error, RpmId, SignOutcome, SignerSettings, SigningTask};
use chrono::Utc;
use common::{Behavior, World};
use std::collections::BTreeSet;
use std::time::Duration;

fn task(build: impl Into<BuildId>) -> SigningTask {
    SigningTask::new(build, "primary", "fedora-22", Utc::now())
}

#[test]
fn test_foo_converges_and_writes_all() {
    // foo-1.0-1: three RPMs, the first batch signs two, the second the last one
    let world = World::new();
    let rpms = world.add_build(1, "foo-1.0-1", 3);
    world.script([Behavior::SignFirst(2), Behavior::SignAll]);

    let mut signer = world.signer(SignerSettings::default());
    let mut task = task("foo-1.0-1");
    let report = signer.sign(&mut task).unwrap();

    assert_eq!(report.outcome, SignOutcome::Converged);
    assert!(task.unsigned_remainder.is_empty());
    assert_eq!(report.total_rpms, 3);
    assert_eq!(report.batches, 2);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.written, 3);
    assert!(report.write_errors.is_empty());

    let state = world.state();
    assert_eq!(state.batches[0].len(), 3);
    assert_eq!(state.batches[1].len(), 1);
    assert_eq!(state.writes, vec![rpms.clone()]);
    assert_eq!(state.written, rpms);
}

#[test]
fn test_bar_stalls_after_second_iteration() {
    // bar-2.0-1: the signer never makes progress
    let world = World::new();
    let a = RpmId::new(21, "bar-2.0-1.noarch.rpm");
    let b = RpmId::new(22, "bar-2.0-1.src.rpm");
    world.add_build_rpms(2, &[a.clone(), b.clone()]);
    world.set_fallback(Behavior::Nothing);

    let mut signer = world.signer(SignerSettings::default());
    let mut task = task(2u64);
    let report = signer.sign(&mut task).unwrap();

    assert_eq!(report.outcome, SignOutcome::Stalled);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.batches, 1);
    assert_eq!(task.unsigned_remainder, BTreeSet::from([a, b]));

    // Nothing was signed, so nothing is written
    let state = world.state();
    assert!(state.writes.is_empty());
    assert_eq!(state.unsigned_queries, 2);
}

#[test]
fn test_partial_stall_writes_what_was_signed() {
    let world = World::new();
    let rpms = world.add_build(3, "baz-1-1", 3);
    world.script([Behavior::SignFirst(1)]);
    world.set_fallback(Behavior::Nothing);

    let mut signer = world.signer(SignerSettings::default());
    let mut task = task(3u64);
    let report = signer.sign(&mut task).unwrap();

    assert_eq!(report.outcome, SignOutcome::Stalled);
    assert_eq!(task.unsigned_remainder.len(), 2);
    assert_eq!(report.written, 1);

    let first = rpms.iter().next().unwrap().clone();
    assert_eq!(world.state().writes, vec![BTreeSet::from([first])]);
}

#[test]
fn test_batches_capped_with_growing_deadline() {
    let world = World::new();
    world.add_build(4, "big-1-1", 120);

    let mut signer = world.signer(SignerSettings::default());
    let mut task = task(4u64);
    let report = signer.sign(&mut task).unwrap();

    assert_eq!(report.outcome, SignOutcome::Converged);
    assert_eq!(report.batches, 3);

    let state = world.state();
    let sizes: Vec<usize> = state.batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![50, 50, 20]);
    assert_eq!(
        state.deadlines,
        vec![
            Duration::from_secs(110),
            Duration::from_secs(110),
            Duration::from_secs(80)
        ]
    );
}

#[test]
fn test_configured_batch_size() {
    let world = World::new();
    world.add_build(5, "small-1-1", 3);

    let settings = SignerSettings {
        batch_size: 1,
        ..SignerSettings::default()
    };
    let mut signer = world.signer(settings);
    let report = signer.sign(&mut task(5u64)).unwrap();

    assert_eq!(report.outcome, SignOutcome::Converged);
    assert_eq!(report.batches, 3);
    assert!(world.state().batches.iter().all(|b| b.len() == 1));
}

#[test]
fn test_timeout_and_failure_do_not_abort() {
    let world = World::new();
    world.add_build(6, "slow-1-1", 4);
    // Round 1: the first batch signs one RPM then times out, the second fails
    world.script([Behavior::TimeOut(1), Behavior::Fail]);

    let settings = SignerSettings {
        batch_size: 2,
        ..SignerSettings::default()
    };
    let mut signer = world.signer(settings);
    let mut task = task(6u64);
    let report = signer.sign(&mut task).unwrap();

    assert_eq!(report.outcome, SignOutcome::Converged);
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.batches, 4);
    assert!(task.unsigned_remainder.is_empty());
}

#[test]
fn test_failure_without_progress_is_a_stall() {
    let world = World::new();
    world.add_build(7, "broken-1-1", 2);
    world.set_fallback(Behavior::Fail);

    let mut signer = world.signer(SignerSettings::default());
    let mut task = task(7u64);
    let report = signer.sign(&mut task).unwrap();

    assert_eq!(report.outcome, SignOutcome::Stalled);
    assert_eq!(task.unsigned_remainder.len(), 2);
}

#[test]
fn test_already_signed_build_needs_no_batches() {
    let world = World::new();
    let rpms = world.add_build(8, "done-1-1", 2);
    world.state().signed.extend(rpms.iter().cloned());

    let mut signer = world.signer(SignerSettings::default());
    let report = signer.sign(&mut task(8u64)).unwrap();

    assert_eq!(report.outcome, SignOutcome::Converged);
    assert_eq!(report.iterations, 1);
    assert_eq!(report.batches, 0);
    assert_eq!(report.written, 2);
}

#[test]
fn test_writing_twice_is_idempotent() {
    let world = World::new();
    let rpms = world.add_build(9, "twice-1-1", 3);

    let mut signer = world.signer(SignerSettings::default());
    let first = signer.sign(&mut task(9u64)).unwrap();
    let written_once = world.state().written.clone();

    let second = signer.sign(&mut task(9u64)).unwrap();
    let state = world.state();

    assert!(first.write_errors.is_empty());
    assert!(second.write_errors.is_empty());
    assert_eq!(second.batches, 0);
    assert_eq!(state.writes.len(), 2);
    assert_eq!(state.written, written_once);
    assert_eq!(state.written, rpms);
}

#[test]
fn test_write_errors_are_reported_not_raised() {
    let world = World::new();
    let rpms = world.add_build(10, "wfail-1-1", 2);
    let bad = rpms.iter().next().unwrap().clone();
    world.state().failing_writes.insert(bad.filename.clone());

    let mut signer = world.signer(SignerSettings::default());
    let mut task = task(10u64);
    let report = signer.sign(&mut task).unwrap();

    assert_eq!(report.outcome, SignOutcome::Converged);
    assert!(task.unsigned_remainder.is_empty());
    assert_eq!(report.write_errors.len(), 1);
    assert_eq!(report.write_errors[0].rpm, bad);
}

#[test]
fn test_writes_can_be_disabled() {
    let world = World::new();
    world.add_build(11, "nowrite-1-1", 2);

    let settings = SignerSettings {
        write_signed_copies: false,
        ..SignerSettings::default()
    };
    let mut signer = world.signer(settings);
    let report = signer.sign(&mut task(11u64)).unwrap();

    assert_eq!(report.outcome, SignOutcome::Converged);
    assert_eq!(report.written, 0);
    assert!(world.state().writes.is_empty());
}

#[test]
fn test_missing_and_empty_builds_end_immediately() {
    let world = World::new();
    world.add_build(12, "empty-1-1", 0);

    let mut signer = world.signer(SignerSettings::default());

    let report = signer.sign(&mut task(12u64)).unwrap();
    assert_eq!(report.outcome, SignOutcome::NoRpms);
    assert!(report.outcome.is_terminal_failure());

    let mut unknown = task("nosuch-1-1");
    let report = signer.sign(&mut unknown).unwrap();
    assert_eq!(report.outcome, SignOutcome::BuildNotFound);
    assert!(unknown.unsigned_remainder.is_empty());

    let state = world.state();
    assert!(state.batches.is_empty());
    assert!(state.writes.is_empty());
}

#[test]
fn test_unreachable_hub_is_an_error() {
    let world = World::new();
    world.add_build(13, "down-1-1", 1);
    world.state().hub_down = true;

    let mut signer = world.signer(SignerSettings::default());
    let err = signer.sign(&mut task(13u64)).unwrap_err();
    assert!(matches!(err, Error::Hub(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_task_for_other_signer_is_rejected() {
    let world = World::new();
    world.add_build(14, "ppc-1-1", 1);

    let mut signer = world.signer(SignerSettings::default());
    let mut task = SigningTask::new(14u64, "ppc", "fedora-22-secondary", Utc::now());
    assert!(matches!(signer.sign(&mut task), Err(Error::Config(_))));
    assert!(world.state().batches.is_empty());
}
