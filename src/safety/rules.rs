/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The voting rules of a replica.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    data_types::{EpochNumber, EpochView, ViewNumber},
    vertex::Vertex,
};

/// What a replica must remember about its own votes to never vote unsafely, even across restarts.
///
/// ## Rules
///
/// A replica votes for a vertex only if:
/// 1. The vertex's `EpochView` is higher than that of anything it voted for (or timed out) before,
///    so it casts at most one vote per view.
/// 2. The vertex's quorum certificate is for a view at least as high as the replica's lock. The lock
///    is the highest quorum certificate found in a vertex the replica voted for.
///
/// Rule 2 is what makes the commit rule safe: once a vertex is committed, a quorum of replicas is
/// locked on it, and no certificate that skips it can form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SafetyRules {
    last_voted: Option<EpochView>,
    locked: EpochView,
}

impl SafetyRules {
    pub fn new() -> SafetyRules {
        SafetyRules {
            last_voted: None,
            locked: EpochView::new(EpochNumber::new(0), ViewNumber::genesis()),
        }
    }

    /// Check whether this replica may vote for `vertex`.
    pub fn check_vote(&self, vertex: &Vertex) -> Result<(), VoteRefusal> {
        let epoch_view = vertex.epoch_view();
        if let Some(last_voted) = self.last_voted {
            if epoch_view <= last_voted {
                return Err(VoteRefusal::AlreadyVoted {
                    epoch_view,
                    last_voted,
                });
            }
        }

        let justify = vertex.qc.epoch_view();
        if justify < self.locked {
            return Err(VoteRefusal::BelowLock {
                justify,
                locked: self.locked,
            });
        }

        Ok(())
    }

    /// Remember that this replica voted for `vertex`.
    pub fn record_vote(&mut self, vertex: &Vertex) {
        self.last_voted = Some(vertex.epoch_view());
        self.locked = self.locked.max(vertex.qc.epoch_view());
    }

    /// Remember that this replica sent a timeout vote for `epoch_view`. A proposal for that view that
    /// arrives later is not voted for.
    pub fn record_timeout_vote(&mut self, epoch_view: EpochView) {
        self.last_voted = Some(match self.last_voted {
            Some(last_voted) => last_voted.max(epoch_view),
            None => epoch_view,
        });
    }

    pub fn last_voted(&self) -> Option<EpochView> {
        self.last_voted
    }

    pub fn locked(&self) -> EpochView {
        self.locked
    }
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self::new()
    }
}

/// Why [`SafetyRules::check_vote`] refused a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRefusal {
    AlreadyVoted {
        epoch_view: EpochView,
        last_voted: EpochView,
    },
    BelowLock {
        justify: EpochView,
        locked: EpochView,
    },
}

impl Display for VoteRefusal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VoteRefusal::AlreadyVoted {
                epoch_view,
                last_voted,
            } => write!(
                f,
                "already voted at {}, refusing {}",
                last_voted, epoch_view
            ),
            VoteRefusal::BelowLock { justify, locked } => write!(
                f,
                "justifying certificate at {} is below the lock at {}",
                justify, locked
            ),
        }
    }
}
