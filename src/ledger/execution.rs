/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The trait that the application's state transition engine implements.

use crate::types::{
    data_types::{Command, StateVersion, ViewNumber},
    validator_set::ValidatorSet,
};

/// Methods that a type needs to implement to serve as the deterministic state transition engine
/// executed on top of the committed ledger.
///
/// Besides implementing the functions specified in the trait, implementors of `ExecutionEngine` are
/// additionally expected to be *deterministic*: given the same sequence of
/// [`apply`](Self::apply) calls, every replica's engine must answer every other method identically.
/// In particular, [`ends_epoch`](Self::ends_epoch) decides where epochs end, so replicas that
/// disagree on it cannot agree on ledger headers.
pub trait ExecutionEngine: Send + 'static {
    /// Called when this replica is the leader of `view` and has to propose a vertex.
    ///
    /// `prepared` lists the commands of the uncommitted vertices that the new vertex will extend, in
    /// order. Commands already included in `prepared` should not be proposed again.
    fn next_commands(&mut self, view: ViewNumber, prepared: &[Command]) -> Vec<Command>;

    /// Whether committing `command` ends the current epoch.
    fn ends_epoch(&self, command: &Command) -> bool;

    /// Apply a committed command. Called exactly once per command, in ledger order, with the state
    /// version that the ledger reaches by applying it.
    fn apply(&mut self, command: &Command, version: StateVersion);

    /// The validator set that the engine's current state designates. Called once the ledger has
    /// applied every command of an epoch-ending vertex, to obtain the next epoch's validator set.
    fn current_epoch_validator_set(&self) -> ValidatorSet;
}
