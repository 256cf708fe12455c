/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`CounterEngine`], a simple implementation of [`ExecutionEngine`] used in all of the integration
//! tests.

use std::sync::{Arc, Mutex};

use borsh::{BorshDeserialize, BorshSerialize};
use ledger_consensus::{
    ledger::ExecutionEngine,
    types::{
        data_types::{Command, StateVersion, ViewNumber},
        validator_set::ValidatorSet,
    },
};

/// User-sent instructions that the counter engine executes.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum CounterCommand {
    /// Increase the counter by 1. Leaders propose one of these in every vertex, so that every view
    /// produces a distinct command.
    Increment { proposer: [u8; 32], view: u64 },

    /// End the current epoch. The next epoch is governed by the validator set at position `next` of
    /// the engine's list of validator sets.
    RotateValidators { next: u32 },
}

impl CounterCommand {
    pub(crate) fn to_command(&self) -> Command {
        Command::new(self.try_to_vec().unwrap())
    }

    pub(crate) fn from_command(command: &Command) -> Option<CounterCommand> {
        CounterCommand::try_from_slice(command.bytes()).ok()
    }
}

/// An execution engine whose state is a single counter, and the position of the validator set that
/// governs the next epoch.
///
/// Commands submitted through the `tx_queue` given to [`new`](CounterEngine::new) are proposed every
/// time the replica leads, until the replica applies them.
pub(crate) struct CounterEngine {
    me: [u8; 32],
    validator_sets: Arc<Vec<ValidatorSet>>,
    current_set: usize,
    counter: u64,
    applied: Vec<(StateVersion, Command)>,
    tx_queue: Arc<Mutex<Vec<CounterCommand>>>,
}

impl CounterEngine {
    pub(crate) fn new(
        me: [u8; 32],
        validator_sets: Arc<Vec<ValidatorSet>>,
        tx_queue: Arc<Mutex<Vec<CounterCommand>>>,
    ) -> CounterEngine {
        CounterEngine {
            me,
            validator_sets,
            current_set: 0,
            counter: 0,
            applied: Vec::new(),
            tx_queue,
        }
    }

    pub(crate) fn counter(&self) -> u64 {
        self.counter
    }

    /// Every command this engine applied, with the state version it reached.
    pub(crate) fn applied(&self) -> &[(StateVersion, Command)] {
        &self.applied
    }
}

impl ExecutionEngine for CounterEngine {
    fn next_commands(&mut self, view: ViewNumber, prepared: &[Command]) -> Vec<Command> {
        let mut commands: Vec<Command> = self
            .tx_queue
            .lock()
            .unwrap()
            .iter()
            .map(CounterCommand::to_command)
            .filter(|command| !prepared.contains(command))
            .collect();
        commands.push(
            CounterCommand::Increment {
                proposer: self.me,
                view: view.int(),
            }
            .to_command(),
        );
        commands
    }

    fn ends_epoch(&self, command: &Command) -> bool {
        matches!(
            CounterCommand::from_command(command),
            Some(CounterCommand::RotateValidators { .. })
        )
    }

    fn apply(&mut self, command: &Command, version: StateVersion) {
        match CounterCommand::from_command(command) {
            Some(CounterCommand::Increment { .. }) => self.counter += 1,
            Some(CounterCommand::RotateValidators { next }) => {
                self.current_set = next as usize % self.validator_sets.len();
                self.tx_queue
                    .lock()
                    .unwrap()
                    .retain(|queued| *queued != CounterCommand::RotateValidators { next });
            }
            None => (),
        }
        self.applied.push((version, command.clone()));
    }

    fn current_epoch_validator_set(&self) -> ValidatorSet {
        self.validator_sets[self.current_set].clone()
    }
}
