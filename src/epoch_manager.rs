/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validator-set rotation at epoch boundaries.
//!
//! An epoch ends with the commit of a vertex whose ledger header carries `end_of_epoch`. The
//! [`EpochManager`] then freezes the outgoing validator set, installs the one that the execution engine
//! designates, and produces the genesis vertex of the new epoch, at view 0. The caller resets the
//! pacemaker, the vertex store, and the vote collectors to the new epoch in the same event, so that
//! no message of the old epoch is processed after the switch.
//!
//! Consensus messages of the current epoch are processed; messages of past epochs are dropped.
//! Messages of future epochs are buffered, up to a configured number, and replayed right after the
//! switch.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use crate::{
    networking::messages::ConsensusMessage,
    types::{
        certificates::BftHeader,
        crypto_primitives::VerifyingKey,
        data_types::{EpochNumber, EpochView},
        ledger_header::LedgerHeader,
        validator_set::ValidatorSet,
    },
};

/// The epoch a replica is in and its validator set.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochState {
    pub epoch: EpochNumber,
    pub validator_set: Arc<ValidatorSet>,
}

/// How a message's epoch relates to the current epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EpochRelation {
    Past,
    Current,
    Future,
}

/// The result of a successful [`EpochManager::transition`].
#[derive(Clone, Debug, PartialEq)]
pub struct EpochTransition {
    pub state: EpochState,

    /// The genesis vertex of the new epoch, at view 0.
    pub genesis: BftHeader,

    /// Buffered messages of the new epoch, in arrival order.
    pub replay: Vec<(VerifyingKey, ConsensusMessage)>,
}

pub struct EpochManager {
    current: EpochState,
    past_validator_sets: BTreeMap<EpochNumber, Arc<ValidatorSet>>,
    future_messages: VecDeque<(VerifyingKey, ConsensusMessage)>,
    buffer_capacity: usize,
}

impl EpochManager {
    pub fn new(state: EpochState, buffer_capacity: usize) -> EpochManager {
        EpochManager {
            current: state,
            past_validator_sets: BTreeMap::new(),
            future_messages: VecDeque::new(),
            buffer_capacity,
        }
    }

    pub fn current(&self) -> &EpochState {
        &self.current
    }

    pub fn epoch(&self) -> EpochNumber {
        self.current.epoch
    }

    pub fn validator_set(&self) -> &Arc<ValidatorSet> {
        &self.current.validator_set
    }

    /// The validator set of `epoch`, if it is the current epoch or a past epoch that this replica went
    /// through.
    pub fn validator_set_of(&self, epoch: EpochNumber) -> Option<Arc<ValidatorSet>> {
        if epoch == self.current.epoch {
            Some(self.current.validator_set.clone())
        } else {
            self.past_validator_sets.get(&epoch).cloned()
        }
    }

    pub fn classify(&self, epoch: EpochNumber) -> EpochRelation {
        if epoch < self.current.epoch {
            EpochRelation::Past
        } else if epoch == self.current.epoch {
            EpochRelation::Current
        } else {
            EpochRelation::Future
        }
    }

    /// Buffer `message` of a future epoch. Returns `false` if the buffer was full, in which case the
    /// oldest buffered message made room for it.
    pub fn buffer_future_message(&mut self, origin: VerifyingKey, message: ConsensusMessage) -> bool {
        if self.buffer_capacity == 0 {
            return false;
        }
        let mut kept_all = true;
        while self.future_messages.len() >= self.buffer_capacity {
            self.future_messages.pop_front();
            kept_all = false;
        }
        self.future_messages.push_back((origin, message));
        kept_all
    }

    pub fn buffered_messages(&self) -> usize {
        self.future_messages.len()
    }

    /// Switch to the epoch that follows the one `ending` closes, governed by `next_validator_set`.
    pub fn transition(
        &mut self,
        ending: &LedgerHeader,
        next_validator_set: ValidatorSet,
    ) -> Result<EpochTransition, EpochError> {
        if !ending.end_of_epoch {
            return Err(EpochError::NotEpochEnd {
                epoch_view: ending.epoch_view(),
            });
        }
        if ending.epoch != self.current.epoch {
            return Err(EpochError::WrongEpoch {
                current: self.current.epoch,
                ending: ending.epoch,
            });
        }

        let next = EpochState {
            epoch: ending.epoch.next(),
            validator_set: Arc::new(next_validator_set),
        };
        let previous = std::mem::replace(&mut self.current, next);
        self.past_validator_sets
            .insert(previous.epoch, previous.validator_set);

        let epoch = self.current.epoch;
        let mut replay = Vec::new();
        let mut later = VecDeque::new();
        for (origin, message) in self.future_messages.drain(..) {
            if message.epoch() == epoch {
                replay.push((origin, message));
            } else if message.epoch() > epoch {
                later.push_back((origin, message));
            }
        }
        self.future_messages = later;

        Ok(EpochTransition {
            state: self.current.clone(),
            genesis: BftHeader::genesis(ending.next_epoch_genesis()),
            replay,
        })
    }
}

/// Why an epoch transition was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochError {
    /// The header does not end its epoch.
    NotEpochEnd { epoch_view: EpochView },

    /// The header ends another epoch than the current one.
    WrongEpoch {
        current: EpochNumber,
        ending: EpochNumber,
    },
}

impl Display for EpochError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EpochError::NotEpochEnd { epoch_view } => {
                write!(f, "header at {} does not end its epoch", epoch_view)
            }
            EpochError::WrongEpoch { current, ending } => {
                write!(f, "header ends epoch {} but the current epoch is {}", ending, current)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use crate::{
        pacemaker::messages::TimeoutVote,
        types::{
            certificates::QuorumCertificate,
            crypto_primitives::Keypair,
            data_types::{Command, CryptoHash, Power, ViewNumber},
        },
    };

    use super::*;

    fn validator_set(seeds: &[u8]) -> ValidatorSet {
        ValidatorSet::new(
            seeds
                .iter()
                .map(|seed| (SigningKey::from_bytes(&[*seed; 32]).verifying_key(), Power::new(1))),
        )
        .unwrap()
    }

    fn timeout_vote(epoch: u64) -> (VerifyingKey, ConsensusMessage) {
        let keypair = Keypair::new(SigningKey::from_bytes(&[1; 32]));
        let genesis = BftHeader::genesis(LedgerHeader::genesis(
            EpochNumber::new(epoch),
            CryptoHash::default(),
        ));
        let vote = TimeoutVote::new(
            &keypair,
            EpochNumber::new(epoch),
            ViewNumber::new(1),
            QuorumCertificate::genesis(genesis),
            None,
        );
        (keypair.public(), ConsensusMessage::TimeoutVote(vote))
    }

    fn manager(capacity: usize) -> EpochManager {
        EpochManager::new(
            EpochState {
                epoch: EpochNumber::new(0),
                validator_set: Arc::new(validator_set(&[1, 2, 3, 4])),
            },
            capacity,
        )
    }

    fn ending_header() -> LedgerHeader {
        LedgerHeader::genesis(EpochNumber::new(0), CryptoHash::default()).extend(
            EpochNumber::new(0),
            ViewNumber::new(9),
            &[Command::new(vec![1])],
            true,
        )
    }

    #[test]
    fn transition_rotates_the_validator_set_and_replays_the_new_epoch() {
        let mut manager = manager(10);
        for epoch in [1, 2, 1] {
            let (origin, message) = timeout_vote(epoch);
            assert_eq!(manager.classify(message.epoch()), EpochRelation::Future);
            assert!(manager.buffer_future_message(origin, message));
        }

        let transition = manager
            .transition(&ending_header(), validator_set(&[5, 6, 7]))
            .unwrap();
        assert_eq!(transition.state.epoch, EpochNumber::new(1));
        assert_eq!(transition.state.validator_set.len(), 3);
        assert_eq!(transition.replay.len(), 2);
        assert_eq!(manager.buffered_messages(), 1);

        let genesis = transition.genesis;
        assert_eq!(genesis.epoch_view(), EpochView::new(EpochNumber::new(1), ViewNumber::genesis()));
        assert!(genesis.ledger_header.same_state(&ending_header()));
        assert!(!genesis.ledger_header.end_of_epoch);

        assert_eq!(manager.classify(EpochNumber::new(0)), EpochRelation::Past);
        assert_eq!(
            manager.validator_set_of(EpochNumber::new(0)).map(|set| set.len()),
            Some(4)
        );
        assert_eq!(manager.validator_set_of(EpochNumber::new(2)), None);
    }

    #[test]
    fn only_epoch_ending_headers_of_the_current_epoch_transition() {
        let mut manager = manager(10);
        let not_ending = LedgerHeader::genesis(EpochNumber::new(0), CryptoHash::default());
        assert!(matches!(
            manager.transition(&not_ending, validator_set(&[5])),
            Err(EpochError::NotEpochEnd { .. })
        ));

        manager
            .transition(&ending_header(), validator_set(&[5]))
            .unwrap();
        assert_eq!(
            manager.transition(&ending_header(), validator_set(&[6])),
            Err(EpochError::WrongEpoch {
                current: EpochNumber::new(1),
                ending: EpochNumber::new(0)
            })
        );
    }

    #[test]
    fn future_buffer_is_bounded() {
        let mut manager = manager(1);
        let (origin, older) = timeout_vote(2);
        assert!(manager.buffer_future_message(origin, older));
        let (origin, newer) = timeout_vote(1);
        assert!(!manager.buffer_future_message(origin, newer.clone()));
        assert_eq!(manager.buffered_messages(), 1);

        // The newest message survives, and is replayed when its epoch starts.
        let transition = manager
            .transition(&ending_header(), validator_set(&[5, 6, 7]))
            .unwrap();
        assert_eq!(transition.replay, vec![(origin, newer)]);
        assert_eq!(manager.buffered_messages(), 0);
    }
}
