/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replica's copy of the committed command log, and the proofs it can serve to lagging peers.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use crate::types::{
    certificates::LedgerProof,
    data_types::{Command, CryptoHash, EpochNumber, StateVersion},
    ledger_header::{accumulate, LedgerHeader},
};

/// The committed commands from some base header up to the latest committed header.
///
/// The ledger is append-only and gap-free: a batch of commands is only appended if it starts at or
/// before the current state version, and commands at versions the ledger already holds are skipped.
/// This makes applying the same committed batch twice (for example, once through consensus and
/// once through sync) harmless.
pub struct CommittedLedger {
    base: LedgerHeader,
    commands: Vec<Command>,
    header: LedgerHeader,
    latest_proof: Option<LedgerProof>,
    epoch_proofs: BTreeMap<EpochNumber, LedgerProof>,
}

impl CommittedLedger {
    /// Create a ledger whose history before `base` is not held locally.
    pub fn new(base: LedgerHeader) -> CommittedLedger {
        CommittedLedger {
            base,
            commands: Vec::new(),
            header: base,
            latest_proof: None,
            epoch_proofs: BTreeMap::new(),
        }
    }

    /// The header of the latest committed vertex.
    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn state_version(&self) -> StateVersion {
        self.header.state_version
    }

    /// Append the commands of a batch that ends at `header`, i.e., that covers the versions
    /// `(header.state_version - commands.len(), header.state_version]`.
    ///
    /// The commands beyond the local state version must fold the local accumulator into
    /// `header.accumulator`. Batches that end below the local state version are not checked, since they
    /// append nothing.
    ///
    /// Returns the commands that were not in the ledger yet, each with the version it reaches.
    pub fn append(
        &mut self,
        header: &LedgerHeader,
        commands: &[Command],
    ) -> Result<Vec<(StateVersion, Command)>, LedgerError> {
        let start =
            StateVersion::new(header.state_version.int().saturating_sub(commands.len() as u64));
        if start > self.header.state_version {
            return Err(LedgerError::Gap {
                local: self.header.state_version,
                start,
            });
        }

        let appended: Vec<(StateVersion, Command)> = commands
            .iter()
            .enumerate()
            .map(|(offset, command)| (start + (offset as u64 + 1), command.clone()))
            .filter(|(version, _)| *version > self.header.state_version)
            .collect();

        if header.state_version >= self.header.state_version {
            let accumulator = appended
                .iter()
                .fold(self.header.accumulator, |accumulator, (_, command)| {
                    accumulate(&accumulator, command)
                });
            if accumulator != header.accumulator {
                return Err(LedgerError::AccumulatorMismatch {
                    expected: header.accumulator,
                    computed: accumulator,
                });
            }
        }

        self.commands
            .extend(appended.iter().map(|(_, command)| command.clone()));
        if header.epoch_view() > self.header.epoch_view() {
            self.header = *header;
        }
        Ok(appended)
    }

    /// Move into the epoch that `genesis` starts. `genesis` must describe the same history as the
    /// current header, which must end its epoch. Returns whether the ledger moved.
    pub fn enter_epoch(&mut self, genesis: &LedgerHeader) -> bool {
        if !self.header.end_of_epoch
            || !self.header.same_state(genesis)
            || genesis.epoch_view() <= self.header.epoch_view()
        {
            return false;
        }
        self.header = *genesis;
        true
    }

    /// Remember `proof` as the proof of the ledger up to its committed header. The first proof of an
    /// epoch-ending header is kept for as long as the ledger lives, so that replicas still in that
    /// epoch can be brought to its end.
    pub fn record_proof(&mut self, proof: LedgerProof) {
        let header = *proof.ledger_header();
        if header.end_of_epoch {
            self.epoch_proofs
                .entry(header.epoch)
                .or_insert_with(|| proof.clone());
        }
        let is_newer = match &self.latest_proof {
            Some(latest) => header.epoch_view() > latest.ledger_header().epoch_view(),
            None => true,
        };
        if is_newer {
            self.latest_proof = Some(proof);
        }
    }

    pub fn latest_proof(&self) -> Option<&LedgerProof> {
        self.latest_proof.as_ref()
    }

    /// The best proof to serve a replica that is in `epoch`: the proof that ends `epoch` if there is
    /// one, otherwise the latest proof if it belongs to `epoch`.
    pub fn proof_for_epoch(&self, epoch: EpochNumber) -> Option<&LedgerProof> {
        self.epoch_proofs.get(&epoch).or_else(|| {
            self.latest_proof
                .as_ref()
                .filter(|latest| latest.epoch() == epoch)
        })
    }

    /// The commands at versions `(start, end]`, or `None` if the ledger does not hold all of them.
    pub fn commands_between(&self, start: StateVersion, end: StateVersion) -> Option<Vec<Command>> {
        if start < self.base.state_version || end > self.header.state_version || start > end {
            return None;
        }
        let from = (start - self.base.state_version) as usize;
        let to = (end - self.base.state_version) as usize;
        self.commands.get(from..to).map(|slice| slice.to_vec())
    }
}

/// Why a batch of commands could not be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The batch starts after the local state version, so appending it would leave a hole.
    Gap {
        local: StateVersion,
        start: StateVersion,
    },

    /// The batch does not produce the history that its header claims.
    AccumulatorMismatch {
        expected: CryptoHash,
        computed: CryptoHash,
    },
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Gap { local, start } => write!(
                f,
                "batch starts at version {} but the ledger is at version {}",
                start, local
            ),
            LedgerError::AccumulatorMismatch { expected, computed } => write!(
                f,
                "batch accumulates to {} but its header claims {}",
                computed, expected
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{
        certificates::{BftHeader, QuorumCertificate, SignatureSet, VoteData},
        data_types::{CryptoHash, ViewNumber},
    };

    use super::*;

    fn commands(values: &[u8]) -> Vec<Command> {
        values.iter().map(|v| Command::new(vec![*v])).collect()
    }

    fn genesis() -> LedgerHeader {
        LedgerHeader::genesis(EpochNumber::new(0), CryptoHash::default())
    }

    fn proof_of(header: LedgerHeader) -> LedgerProof {
        let committed = BftHeader {
            view: header.view,
            vertex_id: CryptoHash::new([1; 32]),
            ledger_header: header,
        };
        let proposed = BftHeader {
            view: header.view + 1,
            vertex_id: CryptoHash::new([2; 32]),
            ledger_header: header,
        };
        LedgerProof::from_qc(QuorumCertificate {
            epoch: header.epoch,
            vote_data: VoteData::new(proposed, committed),
            signatures: SignatureSet::new(1),
        })
        .unwrap()
    }

    #[test]
    fn append_is_idempotent_and_gap_free() {
        let mut ledger = CommittedLedger::new(genesis());
        let first = genesis().extend(EpochNumber::new(0), ViewNumber::new(1), &commands(&[1, 2]), false);
        let appended = ledger.append(&first, &commands(&[1, 2])).unwrap();
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[1].0, StateVersion::new(2));

        // The same batch again changes nothing.
        assert!(ledger.append(&first, &commands(&[1, 2])).unwrap().is_empty());
        assert_eq!(ledger.state_version(), StateVersion::new(2));

        // A batch that overlaps the ledger only appends its new suffix.
        let second = first.extend(EpochNumber::new(0), ViewNumber::new(2), &commands(&[3]), false);
        let overlapping = genesis().extend(
            EpochNumber::new(0),
            ViewNumber::new(2),
            &commands(&[1, 2, 3]),
            false,
        );
        assert_eq!(overlapping, second);
        let appended = ledger.append(&second, &commands(&[1, 2, 3])).unwrap();
        assert_eq!(appended, vec![(StateVersion::new(3), Command::new(vec![3]))]);

        // A batch that starts past the ledger is refused.
        let far = second.extend(EpochNumber::new(0), ViewNumber::new(5), &commands(&[4, 5]), false);
        assert_eq!(
            ledger.append(&far, &commands(&[5])),
            Err(LedgerError::Gap {
                local: StateVersion::new(3),
                start: StateVersion::new(4)
            })
        );
    }

    #[test]
    fn commands_that_do_not_match_the_header_are_refused() {
        let mut ledger = CommittedLedger::new(genesis());
        let header = genesis().extend(EpochNumber::new(0), ViewNumber::new(1), &commands(&[1, 2]), false);
        let other = genesis().extend(EpochNumber::new(0), ViewNumber::new(1), &commands(&[7, 8]), false);

        assert_eq!(
            ledger.append(&header, &commands(&[7, 8])),
            Err(LedgerError::AccumulatorMismatch {
                expected: header.accumulator,
                computed: other.accumulator,
            })
        );
        assert_eq!(ledger.state_version(), StateVersion::new(0));

        // A header without commands must keep the local accumulator.
        let forged = LedgerHeader {
            accumulator: CryptoHash::new([9; 32]),
            ..genesis()
        };
        assert!(matches!(
            ledger.append(&forged, &[]),
            Err(LedgerError::AccumulatorMismatch { .. })
        ));

        assert_eq!(ledger.append(&header, &commands(&[1, 2])).unwrap().len(), 2);
    }

    #[test]
    fn enters_the_next_epoch_only_from_its_end() {
        let mut ledger = CommittedLedger::new(genesis());
        let header = genesis().extend(EpochNumber::new(0), ViewNumber::new(1), &commands(&[1]), false);
        ledger.append(&header, &commands(&[1])).unwrap();
        assert!(!ledger.enter_epoch(&header.next_epoch_genesis()));

        let ending = header.extend(EpochNumber::new(0), ViewNumber::new(2), &commands(&[2]), true);
        ledger.append(&ending, &commands(&[2])).unwrap();
        assert!(ledger.enter_epoch(&ending.next_epoch_genesis()));
        assert_eq!(ledger.header().epoch, EpochNumber::new(1));
        assert_eq!(ledger.state_version(), StateVersion::new(2));

        // The next epoch's commands extend the same history.
        let next = ending
            .next_epoch_genesis()
            .extend(EpochNumber::new(1), ViewNumber::new(1), &commands(&[3]), false);
        assert_eq!(ledger.append(&next, &commands(&[3])).unwrap().len(), 1);
        assert_eq!(
            ledger.commands_between(StateVersion::new(0), StateVersion::new(3)),
            Some(commands(&[1, 2, 3]))
        );
    }

    #[test]
    fn serves_command_ranges_it_holds() {
        let mut ledger = CommittedLedger::new(genesis());
        let header = genesis().extend(
            EpochNumber::new(0),
            ViewNumber::new(1),
            &commands(&[1, 2, 3]),
            false,
        );
        ledger.append(&header, &commands(&[1, 2, 3])).unwrap();

        assert_eq!(
            ledger.commands_between(StateVersion::new(1), StateVersion::new(3)),
            Some(commands(&[2, 3]))
        );
        assert_eq!(
            ledger.commands_between(StateVersion::new(3), StateVersion::new(3)),
            Some(Vec::new())
        );
        assert_eq!(
            ledger.commands_between(StateVersion::new(0), StateVersion::new(4)),
            None
        );
    }

    #[test]
    fn keeps_the_proof_that_ends_each_epoch() {
        let mut ledger = CommittedLedger::new(genesis());
        let ending = genesis().extend(EpochNumber::new(0), ViewNumber::new(3), &commands(&[1]), true);
        ledger.record_proof(proof_of(ending));

        let next = ending
            .next_epoch_genesis()
            .extend(EpochNumber::new(1), ViewNumber::new(2), &commands(&[2]), false);
        ledger.record_proof(proof_of(next));

        assert_eq!(
            ledger.proof_for_epoch(EpochNumber::new(0)).map(|p| *p.ledger_header()),
            Some(ending)
        );
        assert_eq!(
            ledger.proof_for_epoch(EpochNumber::new(1)).map(|p| *p.ledger_header()),
            Some(next)
        );
        assert_eq!(ledger.proof_for_epoch(EpochNumber::new(2)), None);
        assert_eq!(ledger.latest_proof().map(|p| *p.ledger_header()), Some(next));
    }
}
