/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of consensus within a single epoch: replicas on a reliable or lossy network commit the same
//! ledger, and keep doing so while a minority of validators is down.

use std::time::Duration;

use log::LevelFilter;

mod common;

use common::{
    fleet::{Fleet, FleetSpec, NetworkConditions},
    logging::{log_with_context, setup_logger},
};

#[test]
fn validators_commit_the_same_ledger() {
    setup_logger(LevelFilter::Info);

    let mut fleet = Fleet::new(FleetSpec::validators(4));
    fleet.start_all();

    log_with_context(None, "Running until every replica has committed 20 commands.");
    let progressed = fleet.run_until(Duration::from_secs(60), |fleet| {
        (0..fleet.len()).all(|index| fleet.state_version(index).int() >= 20)
    });
    assert!(progressed, "replicas stalled at {:?}", fleet.now());

    fleet.assert_ledgers_consistent();
    for index in 0..fleet.len() {
        let driver = fleet.driver(index);
        assert!(driver.counters().proposals_sent > 0);
        assert!(driver.counters().votes_sent > 0);
        assert_eq!(
            driver.engine().counter(),
            driver.ledger().state_version().int()
        );
    }
}

#[test]
fn lossy_network_preserves_safety_and_liveness() {
    setup_logger(LevelFilter::Info);

    for seed in 1..=3 {
        let mut fleet = Fleet::new(FleetSpec {
            conditions: NetworkConditions::lossy(),
            seed,
            ..FleetSpec::validators(4)
        });
        fleet.start_all();

        log_with_context(None, &format!("Running a lossy network with seed {}.", seed));
        let progressed = fleet.run_until(Duration::from_secs(120), |fleet| {
            (0..fleet.len()).all(|index| fleet.state_version(index).int() >= 10)
        });
        assert!(progressed, "seed {} stalled at {:?}", seed, fleet.now());

        fleet.run_for(Duration::from_secs(10));
        fleet.assert_ledgers_consistent();
        assert!(fleet.oracle().highest_committed().is_some());
    }
}

#[test]
fn progress_survives_a_crashed_minority() {
    setup_logger(LevelFilter::Info);

    let mut fleet = Fleet::new(FleetSpec::validators(4));
    fleet.start_all();
    fleet.run_for(Duration::from_secs(2));

    log_with_context(None, "Crashing replica 2.");
    fleet.crash(2);
    let survivors = [0, 1, 3];
    let before = survivors
        .iter()
        .map(|index| fleet.state_version(*index).int())
        .max()
        .unwrap();

    let progressed = fleet.run_until(Duration::from_secs(60), |fleet| {
        survivors
            .iter()
            .all(|index| fleet.state_version(*index).int() >= before + 10)
    });
    assert!(progressed, "survivors stalled at {:?}", fleet.now());

    // The crashed validator's views time out, and certificates of those timeouts let the others
    // move on.
    assert!(survivors
        .iter()
        .any(|index| fleet.driver(*index).counters().tcs_formed > 0));
    fleet.assert_ledgers_consistent();
}

#[test]
fn a_single_validator_needs_no_peers() {
    setup_logger(LevelFilter::Info);

    let mut fleet = Fleet::new(FleetSpec::validators(1));
    fleet.start(0);
    let progressed = fleet.run_until(Duration::from_secs(10), |fleet| {
        fleet.state_version(0).int() >= 50
    });
    assert!(progressed);
    assert_eq!(fleet.driver(0).counters().timed_out_views, 0);
}
