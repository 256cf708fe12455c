/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Collectors that combine individual votes of one epoch into certificates.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use crate::{
    pacemaker::messages::{TimeoutVote, Vote},
    types::{
        certificates::{timeout_signed_hash, QuorumCertificate, TimeoutCertificate, VoteData},
        crypto_primitives::{HashBuilder, VerifyingKey},
        data_types::{CryptoHash, EpochNumber, ViewNumber},
        validator_set::ValidatorSet,
    },
};

use super::validation_state::{ValidationError, ValidationState};

/// How many views above the pruning floor a collector accepts votes for.
pub const MAX_VIEWS_AHEAD: u64 = 100;

/// Helps the leader of the next view form [`QuorumCertificate`]s by grouping votes of one epoch by the
/// exact `VoteData` they sign.
///
/// A certificate is returned exactly once per view: once a group completes, votes for that view and
/// all lower views are ignored. Votes for views more than [`MAX_VIEWS_AHEAD`] above the last
/// [`prune_below`](Self::prune_below) floor are refused, and so are votes that do not count, so only
/// counted votes occupy memory.
pub struct VoteCollector {
    epoch: EpochNumber,
    validator_set: Arc<ValidatorSet>,
    pending: HashMap<CryptoHash, PendingVotes>,
    last_votes: HashMap<VerifyingKey, (ViewNumber, CryptoHash)>,
    last_quorum_view: Option<ViewNumber>,
    floor: ViewNumber,
}

struct PendingVotes {
    vote_data: VoteData,
    validation_state: ValidationState,
}

impl VoteCollector {
    pub fn new(epoch: EpochNumber, validator_set: Arc<ValidatorSet>) -> VoteCollector {
        VoteCollector {
            epoch,
            validator_set,
            pending: HashMap::new(),
            last_votes: HashMap::new(),
            last_quorum_view: None,
            floor: ViewNumber::genesis(),
        }
    }

    /// Collect `vote` from `voter`, returning a newly formed quorum certificate if the vote completes one.
    pub fn collect(
        &mut self,
        voter: &VerifyingKey,
        vote: &Vote,
    ) -> Result<Option<QuorumCertificate>, CollectError> {
        if vote.epoch != self.epoch {
            return Err(CollectError::WrongEpoch {
                expected: self.epoch,
                found: vote.epoch,
            });
        }

        let view = vote.view();
        if self.last_quorum_view.is_some_and(|v| view <= v) {
            return Err(CollectError::Stale { view });
        }
        if view > self.floor + MAX_VIEWS_AHEAD {
            return Err(CollectError::TooFarAhead { view });
        }
        if !self.validator_set.contains(voter) {
            return Err(ValidationError::UnknownValidator { validator: *voter }.into());
        }

        let key = HashBuilder::new(b"vote_data")
            .chain(&vote.vote_data)
            .finish();
        match self.last_votes.get(voter) {
            Some((last_view, last_key)) if *last_view == view && *last_key != key => {
                return Err(CollectError::Equivocation { view });
            }
            Some((last_view, _)) if *last_view > view => return Err(CollectError::Stale { view }),
            _ => (),
        }

        let pending = self
            .pending
            .entry(key)
            .or_insert_with(|| PendingVotes {
                vote_data: vote.vote_data.clone(),
                validation_state: ValidationState::new(self.validator_set.clone()),
            });
        let complete = match pending.validation_state.add_signature(
            voter,
            &vote.vote_data.signed_hash(self.epoch, vote.timestamp),
            vote.timestamp,
            vote.signature,
        ) {
            Ok(complete) => complete,
            Err(error) => {
                if pending.validation_state.power().int() == 0 {
                    self.pending.remove(&key);
                }
                return Err(error.into());
            }
        };
        self.last_votes.insert(*voter, (view, key));

        if !complete {
            return Ok(None);
        }

        let qc = QuorumCertificate {
            epoch: self.epoch,
            vote_data: pending.vote_data.clone(),
            signatures: pending.validation_state.signature_set(),
        };
        self.last_quorum_view = Some(view);
        self.pending
            .retain(|_, pending| pending.vote_data.proposed.view > view);
        Ok(Some(qc))
    }

    /// Forget partially collected votes for views lower than `view`, and accept votes for views up to
    /// [`MAX_VIEWS_AHEAD`] above it.
    pub fn prune_below(&mut self, view: ViewNumber) {
        self.floor = self.floor.max(view);
        self.pending
            .retain(|_, pending| pending.vote_data.proposed.view >= view);
    }

    pub fn epoch(&self) -> EpochNumber {
        self.epoch
    }

    /// Number of vote groups that have not formed a certificate yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Helps replicas form [`TimeoutCertificate`]s out of the timeout votes of one epoch.
///
/// Unlike votes, timeout votes are broadcast, so every replica collects them. Repeated timeout votes
/// from one replica for one view (re-broadcast after its timer fired again) count once. The same view
/// window as in [`VoteCollector`] applies.
pub struct TimeoutVoteCollector {
    epoch: EpochNumber,
    validator_set: Arc<ValidatorSet>,
    pending: BTreeMap<ViewNumber, ValidationState>,
    last_certified_view: Option<ViewNumber>,
    floor: ViewNumber,
}

impl TimeoutVoteCollector {
    pub fn new(epoch: EpochNumber, validator_set: Arc<ValidatorSet>) -> TimeoutVoteCollector {
        TimeoutVoteCollector {
            epoch,
            validator_set,
            pending: BTreeMap::new(),
            last_certified_view: None,
            floor: ViewNumber::genesis(),
        }
    }

    pub fn collect(
        &mut self,
        voter: &VerifyingKey,
        timeout_vote: &TimeoutVote,
    ) -> Result<Option<TimeoutCertificate>, CollectError> {
        if timeout_vote.epoch != self.epoch {
            return Err(CollectError::WrongEpoch {
                expected: self.epoch,
                found: timeout_vote.epoch,
            });
        }

        let view = timeout_vote.view;
        if self.last_certified_view.is_some_and(|v| view <= v) {
            return Err(CollectError::Stale { view });
        }
        if view > self.floor + MAX_VIEWS_AHEAD {
            return Err(CollectError::TooFarAhead { view });
        }
        if !self.validator_set.contains(voter) {
            return Err(ValidationError::UnknownValidator { validator: *voter }.into());
        }

        let validation_state = self
            .pending
            .entry(view)
            .or_insert_with(|| ValidationState::new(self.validator_set.clone()));
        let complete = match validation_state.add_signature(
            voter,
            &timeout_signed_hash(self.epoch, view, timeout_vote.timestamp),
            timeout_vote.timestamp,
            timeout_vote.signature,
        ) {
            Ok(complete) => complete,
            Err(error) => {
                if validation_state.power().int() == 0 {
                    self.pending.remove(&view);
                }
                return Err(error.into());
            }
        };

        if !complete {
            return Ok(None);
        }

        let tc = TimeoutCertificate {
            epoch: self.epoch,
            view,
            signatures: validation_state.signature_set(),
        };
        self.last_certified_view = Some(view);
        self.pending = self.pending.split_off(&(view + 1));
        Ok(Some(tc))
    }

    /// Forget partially collected timeout votes for views lower than `view`, and accept timeout votes
    /// for views up to [`MAX_VIEWS_AHEAD`] above it.
    pub fn prune_below(&mut self, view: ViewNumber) {
        self.floor = self.floor.max(view);
        self.pending = self.pending.split_off(&view);
    }

    /// Number of views with timeout votes that have not formed a certificate yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Why a vote was not collected.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    /// The vote belongs to another epoch than the collector's.
    WrongEpoch {
        expected: EpochNumber,
        found: EpochNumber,
    },

    /// A certificate was already formed for this view or a higher one.
    Stale { view: ViewNumber },

    /// The voter already voted for different vote data in the same view.
    Equivocation { view: ViewNumber },

    /// The view is too far above the views the collector is working on.
    TooFarAhead { view: ViewNumber },

    /// See [`ValidationError`].
    Validation(ValidationError),
}

impl From<ValidationError> for CollectError {
    fn from(value: ValidationError) -> Self {
        CollectError::Validation(value)
    }
}

impl Display for CollectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::WrongEpoch { expected, found } => {
                write!(f, "vote for epoch {} collected in epoch {}", found, expected)
            }
            CollectError::Stale { view } => write!(f, "view {} already certified", view),
            CollectError::Equivocation { view } => write!(f, "equivocating vote in view {}", view),
            CollectError::TooFarAhead { view } => write!(f, "view {} is too far ahead", view),
            CollectError::Validation(err) => Display::fmt(err, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use crate::types::{
        certificates::BftHeader,
        crypto_primitives::Keypair,
        data_types::{CryptoHash, Power},
        ledger_header::LedgerHeader,
    };

    use super::*;

    fn keypairs(n: u8) -> Vec<Keypair> {
        (1..=n)
            .map(|i| Keypair::new(SigningKey::from_bytes(&[i; 32])))
            .collect()
    }

    fn validator_set(keypairs: &[Keypair]) -> Arc<ValidatorSet> {
        Arc::new(
            ValidatorSet::new(keypairs.iter().map(|k| (k.public(), Power::new(1)))).unwrap(),
        )
    }

    fn vote_data(view: u64, tag: u8) -> VoteData {
        let genesis = BftHeader::genesis(LedgerHeader::genesis(
            EpochNumber::new(0),
            CryptoHash::default(),
        ));
        let proposed = BftHeader {
            view: ViewNumber::new(view),
            vertex_id: CryptoHash::new([tag; 32]),
            ledger_header: genesis.ledger_header,
        };
        VoteData::new(proposed, genesis)
    }

    #[test]
    fn votes_form_one_qc_per_view() {
        let keypairs = keypairs(4);
        let validator_set = validator_set(&keypairs);
        let mut collector = VoteCollector::new(EpochNumber::new(0), validator_set.clone());

        let data = vote_data(1, 1);
        let mut formed = Vec::new();
        for keypair in &keypairs {
            let vote = Vote::new(keypair, EpochNumber::new(0), data.clone());
            match collector.collect(&keypair.public(), &vote) {
                Ok(Some(qc)) => formed.push(qc),
                Ok(None) => (),
                Err(CollectError::Stale { .. }) => (),
                Err(err) => panic!("unexpected error: {}", err),
            }
        }

        assert_eq!(formed.len(), 1);
        assert!(formed[0].is_correct(&validator_set));
        assert_eq!(formed[0].signatures.count(), 3);
    }

    #[test]
    fn split_votes_do_not_combine() {
        let keypairs = keypairs(4);
        let mut collector = VoteCollector::new(EpochNumber::new(0), validator_set(&keypairs));

        let a = vote_data(1, 1);
        let b = vote_data(1, 2);
        for (keypair, data) in keypairs.iter().zip([&a, &a, &b, &b]) {
            let vote = Vote::new(keypair, EpochNumber::new(0), data.clone());
            assert_eq!(collector.collect(&keypair.public(), &vote), Ok(None));
        }
    }

    #[test]
    fn equivocating_voter_is_not_counted_twice() {
        let keypairs = keypairs(4);
        let mut collector = VoteCollector::new(EpochNumber::new(0), validator_set(&keypairs));

        let a = vote_data(1, 1);
        let b = vote_data(1, 2);
        let first = Vote::new(&keypairs[0], EpochNumber::new(0), a.clone());
        let second = Vote::new(&keypairs[0], EpochNumber::new(0), b);
        assert_eq!(collector.collect(&keypairs[0].public(), &first), Ok(None));
        assert_eq!(
            collector.collect(&keypairs[0].public(), &second),
            Err(CollectError::Equivocation {
                view: ViewNumber::new(1)
            })
        );

        let vote = Vote::new(&keypairs[1], EpochNumber::new(0), a);
        assert_eq!(collector.collect(&keypairs[1].public(), &vote), Ok(None));
    }

    #[test]
    fn votes_from_other_epochs_are_refused() {
        let keypairs = keypairs(4);
        let mut collector = VoteCollector::new(EpochNumber::new(1), validator_set(&keypairs));
        let vote = Vote::new(&keypairs[0], EpochNumber::new(0), vote_data(1, 1));
        assert_eq!(
            collector.collect(&keypairs[0].public(), &vote),
            Err(CollectError::WrongEpoch {
                expected: EpochNumber::new(1),
                found: EpochNumber::new(0)
            })
        );
    }

    #[test]
    fn votes_that_do_not_count_leave_no_state_behind() {
        let keypairs = keypairs(4);
        let validator_set = validator_set(&keypairs);
        let outsider = Keypair::new(SigningKey::from_bytes(&[99; 32]));
        let epoch = EpochNumber::new(0);
        let high_qc = QuorumCertificate::genesis(BftHeader::genesis(LedgerHeader::genesis(
            epoch,
            CryptoHash::default(),
        )));
        let mut votes = VoteCollector::new(epoch, validator_set.clone());
        let mut timeout_votes = TimeoutVoteCollector::new(epoch, validator_set);

        for view in 2..50 {
            let vote = Vote::new(&outsider, epoch, vote_data(view, 1));
            assert!(matches!(
                votes.collect(&outsider.public(), &vote),
                Err(CollectError::Validation(ValidationError::UnknownValidator { .. }))
            ));
            let timeout_vote =
                TimeoutVote::new(&outsider, epoch, ViewNumber::new(view), high_qc.clone(), None);
            assert!(matches!(
                timeout_votes.collect(&outsider.public(), &timeout_vote),
                Err(CollectError::Validation(ValidationError::UnknownValidator { .. }))
            ));
        }

        // A member's vote signed by someone else is refused without keeping a group for it.
        let forged = Vote::new(&outsider, epoch, vote_data(3, 1));
        assert!(matches!(
            votes.collect(&keypairs[0].public(), &forged),
            Err(CollectError::Validation(ValidationError::InvalidSignature { .. }))
        ));
        let forged = TimeoutVote::new(&outsider, epoch, ViewNumber::new(3), high_qc.clone(), None);
        assert!(matches!(
            timeout_votes.collect(&keypairs[0].public(), &forged),
            Err(CollectError::Validation(ValidationError::InvalidSignature { .. }))
        ));

        assert_eq!(votes.pending_len(), 0);
        assert_eq!(timeout_votes.pending_len(), 0);
    }

    #[test]
    fn votes_far_above_the_floor_are_refused() {
        let keypairs = keypairs(4);
        let validator_set = validator_set(&keypairs);
        let epoch = EpochNumber::new(0);
        let high_qc = QuorumCertificate::genesis(BftHeader::genesis(LedgerHeader::genesis(
            epoch,
            CryptoHash::default(),
        )));
        let mut votes = VoteCollector::new(epoch, validator_set.clone());
        let mut timeout_votes = TimeoutVoteCollector::new(epoch, validator_set);

        let far = ViewNumber::new(MAX_VIEWS_AHEAD + 1);
        let vote = Vote::new(&keypairs[0], epoch, vote_data(far.int(), 1));
        assert_eq!(
            votes.collect(&keypairs[0].public(), &vote),
            Err(CollectError::TooFarAhead { view: far })
        );
        let timeout_vote = TimeoutVote::new(&keypairs[0], epoch, far, high_qc.clone(), None);
        assert_eq!(
            timeout_votes.collect(&keypairs[0].public(), &timeout_vote),
            Err(CollectError::TooFarAhead { view: far })
        );

        let highest = Vote::new(&keypairs[0], epoch, vote_data(u64::MAX, 1));
        assert_eq!(
            votes.collect(&keypairs[0].public(), &highest),
            Err(CollectError::TooFarAhead {
                view: ViewNumber::new(u64::MAX)
            })
        );

        // Raising the floor opens the window.
        votes.prune_below(ViewNumber::new(5));
        timeout_votes.prune_below(ViewNumber::new(5));
        assert_eq!(votes.collect(&keypairs[0].public(), &vote), Ok(None));
        assert_eq!(
            timeout_votes.collect(&keypairs[0].public(), &timeout_vote),
            Ok(None)
        );
        assert_eq!(votes.pending_len(), 1);
        assert_eq!(timeout_votes.pending_len(), 1);
    }

    #[test]
    fn timeout_votes_form_a_tc_once() {
        let keypairs = keypairs(4);
        let validator_set = validator_set(&keypairs);
        let mut collector = TimeoutVoteCollector::new(EpochNumber::new(0), validator_set.clone());
        let high_qc = QuorumCertificate::genesis(BftHeader::genesis(LedgerHeader::genesis(
            EpochNumber::new(0),
            CryptoHash::default(),
        )));

        let view = ViewNumber::new(3);
        let vote =
            |k: &Keypair| TimeoutVote::new(k, EpochNumber::new(0), view, high_qc.clone(), None);

        assert_eq!(collector.collect(&keypairs[0].public(), &vote(&keypairs[0])), Ok(None));
        // A re-broadcast timeout vote of the same replica does not add power.
        assert_eq!(collector.collect(&keypairs[0].public(), &vote(&keypairs[0])), Ok(None));
        assert_eq!(collector.collect(&keypairs[1].public(), &vote(&keypairs[1])), Ok(None));

        let tc = collector
            .collect(&keypairs[2].public(), &vote(&keypairs[2]))
            .unwrap()
            .unwrap();
        assert_eq!(tc.view, view);
        assert!(tc.is_correct(&validator_set));

        assert_eq!(
            collector.collect(&keypairs[3].public(), &vote(&keypairs[3])),
            Err(CollectError::Stale { view })
        );
    }
}
