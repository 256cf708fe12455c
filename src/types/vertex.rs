/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definition of the [`Vertex`] struct, the unit of proposal of the consensus protocol.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    certificates::{BftHeader, QuorumCertificate},
    crypto_primitives::HashBuilder,
    data_types::{Command, CryptoHash, EpochNumber, EpochView, VerifyingKeyBytes, ViewNumber},
};

/// A proposed, speculative unit of the consensus chain.
///
/// A vertex's parent is the vertex certified by its `qc`. Its identifier is the hash of its whole
/// content, see [`id`](Self::id).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vertex {
    pub epoch: EpochNumber,
    pub view: ViewNumber,
    pub qc: QuorumCertificate,
    pub proposer: VerifyingKeyBytes,
    pub commands: Vec<Command>,
}

impl Vertex {
    pub fn new(
        epoch: EpochNumber,
        view: ViewNumber,
        qc: QuorumCertificate,
        proposer: VerifyingKeyBytes,
        commands: Vec<Command>,
    ) -> Vertex {
        Vertex {
            epoch,
            view,
            qc,
            proposer,
            commands,
        }
    }

    /// The content-derived identifier of this vertex.
    pub fn id(&self) -> CryptoHash {
        HashBuilder::new(b"vertex").chain(self).finish()
    }

    pub fn parent(&self) -> &BftHeader {
        self.qc.proposed()
    }

    pub fn parent_id(&self) -> CryptoHash {
        self.qc.proposed().vertex_id
    }

    pub fn epoch_view(&self) -> EpochView {
        EpochView::new(self.epoch, self.view)
    }
}
