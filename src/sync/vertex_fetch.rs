/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fetching the missing speculative ancestors of a proposal from its sender.

use std::collections::{HashMap, VecDeque};

use crate::{
    pacemaker::messages::Proposal,
    types::{
        crypto_primitives::VerifyingKey,
        data_types::{CryptoHash, ViewNumber},
    },
};

use super::messages::GetVerticesRequest;

/// The most vertices requested in one [`GetVerticesRequest`].
pub const MAX_VERTICES_PER_REQUEST: u32 = 64;

/// Proposals that are waiting for a missing ancestor, keyed by the id of that ancestor.
///
/// When a proposal's parent is unknown but the parent is not committed yet (otherwise, the replica
/// should sync the ledger instead), the proposal is parked here and its sender is asked for the
/// missing vertices. Once an ancestor arrives, the proposals waiting for it can be retried.
pub struct VertexFetcher {
    capacity: usize,
    waiting: HashMap<CryptoHash, Vec<(VerifyingKey, Proposal)>>,
    arrival: VecDeque<CryptoHash>,
}

impl VertexFetcher {
    /// Create a fetcher that parks at most `capacity` proposals.
    pub fn new(capacity: usize) -> VertexFetcher {
        VertexFetcher {
            capacity: capacity.max(1),
            waiting: HashMap::new(),
            arrival: VecDeque::new(),
        }
    }

    /// Park `proposal`, received from `origin`, until `missing` (at `missing_view`) arrives, and build
    /// the request to send to `origin`.
    ///
    /// `root_view` is the view of the local vertex store's root: no more than the vertices between the
    /// root and `missing` are requested. When the fetcher is full, the proposals parked the longest are
    /// dropped.
    pub fn on_missing_parent(
        &mut self,
        missing: CryptoHash,
        missing_view: ViewNumber,
        root_view: ViewNumber,
        origin: VerifyingKey,
        proposal: Proposal,
    ) -> GetVerticesRequest {
        while self.len() >= self.capacity {
            match self.arrival.pop_front() {
                Some(oldest) => {
                    self.waiting.remove(&oldest);
                }
                None => break,
            }
        }

        let waiting = self.waiting.entry(missing).or_default();
        if waiting.is_empty() {
            self.arrival.push_back(missing);
        }
        waiting.push((origin, proposal));

        let count = (missing_view - root_view).clamp(1, MAX_VERTICES_PER_REQUEST as u64);
        GetVerticesRequest {
            vertex_id: missing,
            count: count as u32,
        }
    }

    /// Take the proposals that were waiting for `vertex_id`.
    pub fn take_unblocked(&mut self, vertex_id: &CryptoHash) -> Vec<(VerifyingKey, Proposal)> {
        match self.waiting.remove(vertex_id) {
            Some(proposals) => {
                self.arrival.retain(|id| id != vertex_id);
                proposals
            }
            None => Vec::new(),
        }
    }

    /// Whether some proposal is waiting for `vertex_id`.
    pub fn is_waiting_for(&self, vertex_id: &CryptoHash) -> bool {
        self.waiting.contains_key(vertex_id)
    }

    /// Number of parked proposals.
    pub fn len(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Drop every parked proposal, e.g., because the vertex store was rebuilt.
    pub fn clear(&mut self) {
        self.waiting.clear();
        self.arrival.clear();
    }
}
