/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of the consensus
//! protocol proper.
//!
//! ## Messages
//!
//! Three types of messages drive views forward:
//! 1. [`Proposal`], which the leader of a view broadcasts to propose a new [`Vertex`].
//! 2. [`Vote`], which a replica sends to the leader of the next view after accepting a proposal.
//! 3. [`TimeoutVote`], which a replica broadcasts when its current view times out before it could vote.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    certificates::{timeout_signed_hash, QuorumCertificate, TimeoutCertificate, VoteData},
    crypto_primitives::Keypair,
    data_types::{EpochNumber, EpochView, SignatureBytes, Timestamp, ViewNumber},
    vertex::Vertex,
};

/// A leader's proposal of `vertex` for `vertex.view`.
///
/// If the view before `vertex.view` ended in a timeout, `high_tc` carries the certificate that proves
/// it, so that replicas that missed the timeout votes can still enter the proposal's view.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub vertex: Vertex,
    pub high_tc: Option<TimeoutCertificate>,
}

impl Proposal {
    pub fn epoch_view(&self) -> EpochView {
        self.vertex.epoch_view()
    }
}

/// A replica's vote for the vertex referenced by `vote_data.proposed`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub epoch: EpochNumber,
    pub vote_data: VoteData,
    pub timestamp: Timestamp,
    pub signature: SignatureBytes,
}

impl Vote {
    /// Sign `vote_data` with `keypair` at the current time.
    pub(crate) fn new(keypair: &Keypair, epoch: EpochNumber, vote_data: VoteData) -> Vote {
        let timestamp = Timestamp::now();
        let signature = keypair.sign(&vote_data.signed_hash(epoch, timestamp));
        Vote {
            epoch,
            vote_data,
            timestamp,
            signature,
        }
    }

    pub fn view(&self) -> ViewNumber {
        self.vote_data.proposed.view
    }
}

/// A replica's vote to abandon `view` of `epoch`.
///
/// `high_qc` is the sender's highest quorum certificate, which lets the next leader extend the highest
/// certified vertex that any timed-out replica knows about. `high_tc` is the sender's highest timeout
/// certificate, which moves replicas that missed the timeout votes of an earlier view into the view the
/// sender is timing out.
///
/// Only `epoch`, `view` and `timestamp` are signed. The certificates carry their own signatures.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeoutVote {
    pub epoch: EpochNumber,
    pub view: ViewNumber,
    pub timestamp: Timestamp,
    pub signature: SignatureBytes,
    pub high_qc: QuorumCertificate,
    pub high_tc: Option<TimeoutCertificate>,
}

impl TimeoutVote {
    pub(crate) fn new(
        keypair: &Keypair,
        epoch: EpochNumber,
        view: ViewNumber,
        high_qc: QuorumCertificate,
        high_tc: Option<TimeoutCertificate>,
    ) -> TimeoutVote {
        let timestamp = Timestamp::now();
        let signature = keypair.sign(&timeout_signed_hash(epoch, view, timestamp));
        TimeoutVote {
            epoch,
            view,
            timestamp,
            signature,
            high_qc,
            high_tc,
        }
    }

    pub fn epoch_view(&self) -> EpochView {
        EpochView::new(self.epoch, self.view)
    }
}
