/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of epoch changes: epochs that end at a ceiling view, and epochs that end because a committed
//! command hands consensus over to a different validator set.

use std::time::Duration;

use ledger_consensus::{
    ledger::ExecutionEngine,
    types::data_types::{EpochNumber, ViewNumber},
};
use log::LevelFilter;

mod common;

use common::{
    counter_engine::CounterCommand,
    fleet::{Fleet, FleetSpec},
    logging::{log_with_context, setup_logger},
};

#[test]
fn epochs_end_at_the_ceiling_view() {
    setup_logger(LevelFilter::Info);

    let mut fleet = Fleet::new(FleetSpec {
        epoch_ceiling_view: Some(ViewNumber::new(8)),
        ..FleetSpec::validators(4)
    });
    fleet.start_all();

    log_with_context(None, "Running until every replica reaches epoch 3.");
    let progressed = fleet.run_until(Duration::from_secs(120), |fleet| {
        (0..fleet.len()).all(|index| fleet.epoch(index) >= EpochNumber::new(3))
    });
    assert!(progressed, "replicas stalled at {:?}", fleet.now());

    fleet.assert_ledgers_consistent();
    for index in 0..fleet.len() {
        let driver = fleet.driver(index);
        assert!(driver.counters().epoch_changes >= 3);
        assert_eq!(driver.ledger().header().epoch, driver.epoch());
        assert!(driver.current_view() < ViewNumber::new(8) + 8);
    }
}

#[test]
fn validator_rotation_hands_consensus_to_the_new_set() {
    setup_logger(LevelFilter::Info);

    // Replica 4 starts as an observer and replaces replica 0 in epoch 1.
    let mut fleet = Fleet::new(FleetSpec {
        replicas: 5,
        validator_sets: vec![vec![0, 1, 2, 3], vec![1, 2, 3, 4]],
        ..FleetSpec::validators(5)
    });
    fleet.start_all();
    fleet.run_for(Duration::from_secs(1));

    log_with_context(None, "Submitting the rotation to every replica.");
    for index in 0..fleet.len() {
        fleet.submit(index, CounterCommand::RotateValidators { next: 1 });
    }
    let rotated = fleet.run_until(Duration::from_secs(60), |fleet| {
        (0..fleet.len()).all(|index| fleet.epoch(index) >= EpochNumber::new(1))
    });
    assert!(rotated, "rotation stalled at {:?}", fleet.now());
    assert_eq!(fleet.driver(4).counters().votes_sent, 0);

    for index in 0..fleet.len() {
        let validator_set = fleet.driver(index).engine().current_epoch_validator_set();
        assert!(validator_set.contains(&fleet.verifying_key(4)));
        assert!(!validator_set.contains(&fleet.verifying_key(0)));
    }

    let versions: Vec<u64> = (0..fleet.len())
        .map(|index| fleet.state_version(index).int())
        .collect();
    log_with_context(None, "Running the new validator set.");
    let progressed = fleet.run_until(Duration::from_secs(60), |fleet| {
        (0..fleet.len()).all(|index| fleet.state_version(index).int() >= versions[index] + 10)
    });
    assert!(progressed, "the new validator set stalled at {:?}", fleet.now());

    assert!(fleet.driver(4).counters().votes_sent > 0);
    assert_eq!(fleet.epoch(0), EpochNumber::new(1));
    fleet.assert_ledgers_consistent();
}
