/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Quorum certificates, timeout certificates, and the data they certify.
//!
//! Both kinds of certificates carry a [`SignatureSet`] that is positional with respect to the
//! [ordering of validators](super::validator_set::ValidatorSet#ordering-of-validators) of the epoch the
//! certificate belongs to. A certificate is checked by replaying its signatures into a fresh
//! [`ValidationState`], so that the rules for what counts as a quorum live in exactly one place.

use std::{slice, sync::Arc};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::quorum::ValidationState;

use super::{
    crypto_primitives::HashBuilder,
    data_types::{CryptoHash, EpochNumber, EpochView, SignatureBytes, Timestamp, ViewNumber},
    ledger_header::LedgerHeader,
    validator_set::ValidatorSet,
};

/// Reference to a vertex, as it appears inside [`VoteData`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BftHeader {
    pub view: ViewNumber,
    pub vertex_id: CryptoHash,
    pub ledger_header: LedgerHeader,
}

impl BftHeader {
    /// The header of the genesis vertex of the epoch that `ledger_header` starts.
    ///
    /// The genesis vertex id is derived from the ledger header alone, so every replica that agrees on
    /// how the previous epoch ended computes the same genesis.
    pub fn genesis(ledger_header: LedgerHeader) -> BftHeader {
        BftHeader {
            view: ViewNumber::genesis(),
            vertex_id: HashBuilder::new(b"genesis").chain(&ledger_header).finish(),
            ledger_header,
        }
    }

    pub fn epoch(&self) -> EpochNumber {
        self.ledger_header.epoch
    }

    pub fn epoch_view(&self) -> EpochView {
        EpochView::new(self.ledger_header.epoch, self.view)
    }
}

/// What a replica signs when it votes for a vertex.
///
/// `committed` is `Some(parent)` exactly when `parent` is the direct predecessor of `proposed` (their
/// views are consecutive). A quorum certificate over such a `VoteData` commits `parent` and all of
/// its uncommitted ancestors.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteData {
    pub proposed: BftHeader,
    pub parent: BftHeader,
    pub committed: Option<BftHeader>,
}

impl VoteData {
    pub fn new(proposed: BftHeader, parent: BftHeader) -> VoteData {
        let direct_parent =
            parent.view + 1 == proposed.view && parent.epoch() == proposed.epoch();
        let committed = if direct_parent && parent.view != ViewNumber::genesis() {
            Some(parent)
        } else {
            None
        };
        VoteData {
            proposed,
            parent,
            committed,
        }
    }

    pub fn genesis(genesis: BftHeader) -> VoteData {
        VoteData {
            proposed: genesis,
            parent: genesis,
            committed: Some(genesis),
        }
    }

    /// The hash that a validator signs when voting for this `VoteData` at `timestamp`.
    pub fn signed_hash(&self, epoch: EpochNumber, timestamp: Timestamp) -> CryptoHash {
        HashBuilder::new(b"vote")
            .chain(&epoch)
            .chain(self)
            .chain(&timestamp)
            .finish()
    }
}

/// The hash that a validator signs when voting to time out `view` of `epoch` at `timestamp`.
pub fn timeout_signed_hash(
    epoch: EpochNumber,
    view: ViewNumber,
    timestamp: Timestamp,
) -> CryptoHash {
    HashBuilder::new(b"timeout")
        .chain(&epoch)
        .chain(&view)
        .chain(&timestamp)
        .finish()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimestampedSignature {
    pub timestamp: Timestamp,
    pub signature: SignatureBytes,
}

/// Signatures of the validators of one epoch, positional with respect to the validator set.
#[derive(Clone, Debug, PartialEq, Eq, Default, BorshSerialize, BorshDeserialize)]
pub struct SignatureSet(Vec<Option<TimestampedSignature>>);

impl SignatureSet {
    /// Create a `SignatureSet` with `len` empty slots.
    pub fn new(len: usize) -> SignatureSet {
        SignatureSet(vec![None; len])
    }

    pub fn get(&self, position: usize) -> Option<&TimestampedSignature> {
        self.0.get(position).and_then(|slot| slot.as_ref())
    }

    /// Fill the slot at `position`. Positions outside the set are ignored.
    pub fn set(&mut self, position: usize, signature: TimestampedSignature) {
        if let Some(slot) = self.0.get_mut(position) {
            *slot = Some(signature)
        }
    }

    pub fn iter(&self) -> slice::Iter<'_, Option<TimestampedSignature>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of filled slots.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Proof that a quorum of the validators of `epoch` voted for `vote_data`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct QuorumCertificate {
    pub epoch: EpochNumber,
    pub vote_data: VoteData,
    pub signatures: SignatureSet,
}

impl QuorumCertificate {
    /// The quorum certificate that justifies the first proposal of an epoch. It carries no signatures.
    pub fn genesis(genesis: BftHeader) -> QuorumCertificate {
        QuorumCertificate {
            epoch: genesis.epoch(),
            vote_data: VoteData::genesis(genesis),
            signatures: SignatureSet::default(),
        }
    }

    /// Whether this is the genesis certificate of some epoch. Genesis certificates are only
    /// acceptable when they match the genesis vertex a replica derived itself.
    pub fn is_genesis(&self) -> bool {
        self.vote_data.proposed.view == ViewNumber::genesis() && self.signatures.is_empty()
    }

    pub fn view(&self) -> ViewNumber {
        self.vote_data.proposed.view
    }

    pub fn epoch_view(&self) -> EpochView {
        self.vote_data.proposed.epoch_view()
    }

    pub fn proposed(&self) -> &BftHeader {
        &self.vote_data.proposed
    }

    pub fn committed(&self) -> Option<&BftHeader> {
        self.vote_data.committed.as_ref()
    }

    /// Check that every signature verifies and that the signers together hold a quorum of
    /// `validator_set`.
    ///
    /// Genesis certificates are never correct under this check.
    pub fn is_correct(&self, validator_set: &Arc<ValidatorSet>) -> bool {
        if self.signatures.len() != validator_set.len() {
            return false;
        }

        let mut validation_state = ValidationState::new(validator_set.clone());
        for (validator, slot) in validator_set.validators().zip(self.signatures.iter()) {
            if let Some(signature) = slot {
                let signed_hash = self.vote_data.signed_hash(self.epoch, signature.timestamp);
                if validation_state
                    .add_signature(
                        validator,
                        &signed_hash,
                        signature.timestamp,
                        signature.signature,
                    )
                    .is_err()
                {
                    return false;
                }
            }
        }
        validation_state.is_complete()
    }
}

/// Proof that a quorum of the validators of `epoch` timed out `view`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeoutCertificate {
    pub epoch: EpochNumber,
    pub view: ViewNumber,
    pub signatures: SignatureSet,
}

impl TimeoutCertificate {
    pub fn epoch_view(&self) -> EpochView {
        EpochView::new(self.epoch, self.view)
    }

    /// Check that every signature verifies and that the signers together hold a quorum of
    /// `validator_set`.
    pub fn is_correct(&self, validator_set: &Arc<ValidatorSet>) -> bool {
        if self.signatures.len() != validator_set.len() {
            return false;
        }

        let mut validation_state = ValidationState::new(validator_set.clone());
        for (validator, slot) in validator_set.validators().zip(self.signatures.iter()) {
            if let Some(signature) = slot {
                let signed_hash = timeout_signed_hash(self.epoch, self.view, signature.timestamp);
                if validation_state
                    .add_signature(
                        validator,
                        &signed_hash,
                        signature.timestamp,
                        signature.signature,
                    )
                    .is_err()
                {
                    return false;
                }
            }
        }
        validation_state.is_complete()
    }
}

/// A quorum certificate used as a proof that its committed ledger header is part of the agreed
/// history.
///
/// This is what a sync response carries as the proof of its terminal header.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LedgerProof(QuorumCertificate);

impl LedgerProof {
    /// Wrap `qc` if it commits something. Genesis certificates prove nothing and are refused.
    pub fn from_qc(qc: QuorumCertificate) -> Option<LedgerProof> {
        if qc.committed().is_some() && !qc.is_genesis() {
            Some(LedgerProof(qc))
        } else {
            None
        }
    }

    pub fn qc(&self) -> &QuorumCertificate {
        &self.0
    }

    pub fn epoch(&self) -> EpochNumber {
        self.0.epoch
    }

    /// The vertex header whose ledger state this proof attests to.
    pub fn committed(&self) -> &BftHeader {
        // A deserialized proof without a committed header fails `is_correct`.
        self.0
            .vote_data
            .committed
            .as_ref()
            .unwrap_or(&self.0.vote_data.proposed)
    }

    pub fn ledger_header(&self) -> &LedgerHeader {
        &self.committed().ledger_header
    }

    pub fn is_correct(&self, validator_set: &Arc<ValidatorSet>) -> bool {
        self.0.committed().is_some() && self.0.is_correct(validator_set)
    }
}
