/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The committed-history guard.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use crate::types::{
    certificates::BftHeader,
    data_types::{CryptoHash, EpochView, ViewNumber},
};

/// Map from `EpochView` to the id of the vertex committed there, covering the most recent `retained`
/// commits.
///
/// Every commit goes through [`check_commit`](Self::check_commit) before it is handed to the
/// execution engine. The checker is also used in tests as a fleet-wide oracle, fed with the commits of
/// every replica.
#[derive(Clone, Debug)]
pub struct SafetyChecker {
    committed: BTreeMap<EpochView, CryptoHash>,
    retained: usize,
}

impl SafetyChecker {
    pub fn new(retained: usize) -> SafetyChecker {
        SafetyChecker {
            committed: BTreeMap::new(),
            retained: retained.max(1),
        }
    }

    /// Record `header` as committed without checking its ancestry.
    ///
    /// Used for the vertex a replica starts from: the genesis of an epoch, the root restored from a
    /// checkpoint, or the root adopted after ledger sync.
    pub fn seed(&mut self, header: &BftHeader) {
        self.committed.insert(header.epoch_view(), header.vertex_id);
        self.prune();
    }

    /// Check that committing `candidate`, whose parent is `parent`, keeps the committed history a
    /// single chain, and record it if so.
    ///
    /// Committing the same vertex again is accepted. If `parent` is the genesis of its epoch, the
    /// genesis is recorded as well, so that replicas that disagree on an epoch's genesis are caught.
    pub fn check_commit(
        &mut self,
        candidate: &BftHeader,
        parent: &BftHeader,
    ) -> Result<(), SafetyViolation> {
        let candidate_epoch_view = candidate.epoch_view();
        let parent_epoch_view = parent.epoch_view();

        if let Some(committed) = self.committed.get(&candidate_epoch_view) {
            if *committed == candidate.vertex_id {
                return Ok(());
            }
            return Err(SafetyViolation::ConflictingCommit {
                epoch_view: candidate_epoch_view,
                committed: *committed,
                candidate: candidate.vertex_id,
            });
        }

        if parent_epoch_view >= candidate_epoch_view {
            return Err(SafetyViolation::BrokenChain {
                epoch_view: candidate_epoch_view,
                vertex: candidate.vertex_id,
                parent: parent_epoch_view,
            });
        }

        if parent.view == ViewNumber::genesis() {
            match self.committed.get(&parent_epoch_view) {
                Some(genesis) if *genesis != parent.vertex_id => {
                    return Err(SafetyViolation::ConflictingCommit {
                        epoch_view: parent_epoch_view,
                        committed: *genesis,
                        candidate: parent.vertex_id,
                    })
                }
                Some(_) => (),
                None => {
                    self.committed
                        .insert(parent_epoch_view, parent.vertex_id);
                }
            }
        }

        // The closest earlier commit must be the parent itself. Anything else means the candidate either
        // skips a committed vertex or hangs off a vertex that was never committed.
        if let Some((previous_epoch_view, previous_id)) =
            self.committed.range(..candidate_epoch_view).next_back()
        {
            if *previous_epoch_view != parent_epoch_view || *previous_id != parent.vertex_id {
                return Err(SafetyViolation::BrokenChain {
                    epoch_view: candidate_epoch_view,
                    vertex: candidate.vertex_id,
                    parent: parent_epoch_view,
                });
            }
        }

        self.committed
            .insert(candidate_epoch_view, candidate.vertex_id);
        self.prune();
        Ok(())
    }

    /// The id committed at `epoch_view`, if it is still retained.
    pub fn committed_at(&self, epoch_view: &EpochView) -> Option<CryptoHash> {
        self.committed.get(epoch_view).copied()
    }

    pub fn highest_committed(&self) -> Option<EpochView> {
        self.committed.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    fn prune(&mut self) {
        while self.committed.len() > self.retained {
            self.committed.pop_first();
        }
    }
}

/// A commit that would break the single-chain history. Replicas halt on these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyViolation {
    /// Two different vertices committed at the same `EpochView`.
    ConflictingCommit {
        epoch_view: EpochView,
        committed: CryptoHash,
        candidate: CryptoHash,
    },

    /// A vertex whose parent is not the most recent commit before it.
    BrokenChain {
        epoch_view: EpochView,
        vertex: CryptoHash,
        parent: EpochView,
    },
}

impl Display for SafetyViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SafetyViolation::ConflictingCommit {
                epoch_view,
                committed,
                candidate,
            } => write!(
                f,
                "conflicting commit at {}: {} already committed, {} attempted",
                epoch_view, committed, candidate
            ),
            SafetyViolation::BrokenChain {
                epoch_view,
                vertex,
                parent,
            } => write!(
                f,
                "broken chain: {} at {} extends {}, which is not the latest commit before it",
                vertex, epoch_view, parent
            ),
        }
    }
}
