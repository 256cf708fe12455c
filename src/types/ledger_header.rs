/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ledger-visible summary of the state reached after a vertex.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::HashBuilder,
    data_types::{Command, CryptoHash, EpochNumber, EpochView, StateVersion, ViewNumber},
};

/// Summary of the ledger after all commands up to and including those of some vertex were applied.
///
/// ## Accumulator
///
/// `accumulator` is a running hash chain over every command ever committed: appending `command` to a
/// ledger whose accumulator is `a` yields the accumulator [`accumulate(a, command)`](accumulate). Two
/// replicas that agree on a header's `state_version` and `accumulator` therefore agree on the entire
/// committed history up to that header, and a replica can check a batch of commands received from a
/// peer against a quorum-signed header without replaying the whole ledger.
///
/// ## End of epoch
///
/// A header with `end_of_epoch = true` closes its epoch. The flag is inherited by all descendant
/// headers in the same epoch, whose vertices carry no commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct LedgerHeader {
    pub epoch: EpochNumber,
    pub view: ViewNumber,
    pub state_version: StateVersion,
    pub accumulator: CryptoHash,
    pub end_of_epoch: bool,
}

impl LedgerHeader {
    /// The header of an empty ledger at the start of `epoch`.
    pub fn genesis(epoch: EpochNumber, accumulator: CryptoHash) -> LedgerHeader {
        LedgerHeader {
            epoch,
            view: ViewNumber::genesis(),
            state_version: StateVersion::new(0),
            accumulator,
            end_of_epoch: false,
        }
    }

    /// The header that starts the epoch following the one this (epoch-ending) header closes.
    pub fn next_epoch_genesis(&self) -> LedgerHeader {
        LedgerHeader {
            epoch: self.epoch.next(),
            view: ViewNumber::genesis(),
            state_version: self.state_version,
            accumulator: self.accumulator,
            end_of_epoch: false,
        }
    }

    pub fn epoch_view(&self) -> EpochView {
        EpochView::new(self.epoch, self.view)
    }

    /// Compute the header reached by applying `commands` on top of this header in the vertex at
    /// `epoch`/`view`.
    ///
    /// If this header already ends its epoch, the result inherits the flag, regardless of
    /// `ends_epoch`.
    pub fn extend(
        &self,
        epoch: EpochNumber,
        view: ViewNumber,
        commands: &[Command],
        ends_epoch: bool,
    ) -> LedgerHeader {
        let mut state_version = self.state_version;
        let mut accumulator = self.accumulator;
        for command in commands {
            accumulator = accumulate(&accumulator, command);
            state_version = state_version + 1;
        }

        LedgerHeader {
            epoch,
            view,
            state_version,
            accumulator,
            end_of_epoch: self.end_of_epoch || ends_epoch,
        }
    }

    /// Whether this header and `other` describe the same committed history.
    pub fn same_state(&self, other: &LedgerHeader) -> bool {
        self.state_version == other.state_version && self.accumulator == other.accumulator
    }
}

/// Append `command` to the hash chain whose head is `previous`.
pub fn accumulate(previous: &CryptoHash, command: &Command) -> CryptoHash {
    HashBuilder::new(b"accumulator")
        .chain_bytes(&previous.bytes())
        .chain(command)
        .finish()
}
