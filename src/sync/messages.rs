/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas as part of ledger sync and
//! vertex fetching.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    certificates::LedgerProof,
    data_types::{Command, CryptoHash, RequestId},
    ledger_header::LedgerHeader,
    vertex::Vertex,
};

/// Ask a peer for the committed commands that follow `start`.
///
/// `start` is the requester's latest committed header, so its epoch is the requester's epoch.
/// `target` is the header that made the requester notice that it is behind.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SyncRequest {
    pub request_id: RequestId,
    pub start: LedgerHeader,
    pub target: LedgerHeader,
}

/// The committed commands at versions `(request.start.state_version, proof.ledger_header().state_version]`,
/// with the proof that the header they end at is committed.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SyncResponse {
    pub request_id: RequestId,
    pub commands: Vec<Command>,
    pub proof: LedgerProof,
}

/// Ask a peer for up to `count` speculative vertices, starting with `vertex_id` and walking towards
/// the root of its vertex store.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetVerticesRequest {
    pub vertex_id: CryptoHash,
    pub count: u32,
}

/// Vertices in descending view order, starting with the requested one.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetVerticesResponse {
    pub vertices: Vec<Vertex>,
}

impl GetVerticesResponse {
    /// The vertices in the order in which they can be inserted into a vertex store: ancestors first.
    pub fn into_insertion_order(self) -> Vec<Vertex> {
        let mut vertices = self.vertices;
        vertices.reverse();
        vertices
    }
}
