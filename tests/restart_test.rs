/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of crash recovery: a replica that restarts from its key-value store resumes from its last
//! checkpoint, never votes twice in a view, and rejoins consensus.

use std::time::Duration;

use ledger_consensus::persistence::Checkpoint;
use log::LevelFilter;

mod common;

use common::{
    fleet::{Fleet, FleetSpec},
    logging::{log_with_context, setup_logger},
};

#[test]
fn crashed_replica_resumes_from_its_checkpoint() {
    setup_logger(LevelFilter::Info);

    let mut fleet = Fleet::new(FleetSpec::validators(4));
    fleet.start_all();
    let progressed = fleet.run_until(Duration::from_secs(60), |fleet| {
        (0..fleet.len()).all(|index| fleet.state_version(index).int() >= 10)
    });
    assert!(progressed);

    let version_at_crash = fleet.state_version(1);
    let last_voted_at_crash = fleet.driver(1).safety_rules().last_voted();
    assert!(last_voted_at_crash.is_some());

    log_with_context(None, "Crashing replica 1.");
    fleet.crash(1);
    fleet.run_for(Duration::from_secs(5));

    log_with_context(None, "Restarting replica 1.");
    fleet.start(1);
    // The root of the checkpoint is the last vertex committed before the crash.
    assert_eq!(fleet.state_version(1), version_at_crash);
    assert!(fleet.driver(1).safety_rules().last_voted() >= last_voted_at_crash);

    let target = fleet.state_version(0).int() + 5;
    let commits_before = fleet.commits(1);
    let rejoined = fleet.run_until(Duration::from_secs(60), |fleet| {
        fleet.state_version(1).int() >= target && fleet.commits(1) > commits_before
    });
    assert!(rejoined, "replica 1 stalled at {:?}", fleet.state_version(1));
    fleet.assert_ledgers_consistent();
}

#[test]
fn crashing_every_replica_keeps_the_committed_ledger() {
    setup_logger(LevelFilter::Info);

    let mut fleet = Fleet::new(FleetSpec::validators(4));
    fleet.start_all();
    fleet.run_until(Duration::from_secs(60), |fleet| {
        (0..fleet.len()).all(|index| fleet.state_version(index).int() >= 10)
    });
    let versions: Vec<_> = (0..fleet.len()).map(|index| fleet.state_version(index)).collect();

    for index in 0..fleet.len() {
        fleet.crash(index);
    }
    fleet.run_for(Duration::from_secs(2));
    fleet.start_all();

    for index in 0..fleet.len() {
        assert_eq!(fleet.state_version(index), versions[index]);
    }
    let resumed = fleet.run_until(Duration::from_secs(60), |fleet| {
        (0..fleet.len()).all(|index| fleet.state_version(index) > versions[index])
    });
    assert!(resumed);
    fleet.assert_ledgers_consistent();
}

#[test]
fn uninitialized_replicas_hold_no_checkpoint() {
    let kv_store = common::mem_db::MemDB::new();
    assert!(Checkpoint::load(&kv_store).unwrap().is_none());
    assert_eq!(kv_store.len(), 0);
}
