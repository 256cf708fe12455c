/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Arena-based implementation of the vertex store.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    safety::SafetyChecker,
    types::{
        certificates::{BftHeader, QuorumCertificate, TimeoutCertificate},
        data_types::{Command, CryptoHash, EpochNumber, ViewNumber},
        validator_set::ValidatorSet,
        vertex::Vertex,
    },
};

use super::types::{CommittedVertex, InsertOutcome, QcOutcome, VertexEntry, VertexStoreError};

/// The speculative vertices of one epoch, rooted at the highest committed vertex.
///
/// See the [module-level docs](super) for the commit rule.
pub struct VertexStore {
    epoch: EpochNumber,
    root: CryptoHash,
    entries: HashMap<CryptoHash, VertexEntry>,
    high_qc: QuorumCertificate,
    highest_committed_qc: QuorumCertificate,
    highest_tc: Option<TimeoutCertificate>,
}

impl VertexStore {
    /// Create a store rooted at `root`, where `root_qc` is the certificate that committed `root` (or the
    /// genesis certificate, if `root` is the genesis vertex of its epoch).
    pub fn new(root: BftHeader, root_qc: QuorumCertificate) -> VertexStore {
        let mut entries = HashMap::new();
        entries.insert(
            root.vertex_id,
            VertexEntry {
                header: root,
                parent: None,
                vertex: None,
                children: Vec::new(),
            },
        );
        VertexStore {
            epoch: root.epoch(),
            root: root.vertex_id,
            entries,
            high_qc: root_qc.clone(),
            highest_committed_qc: root_qc,
            highest_tc: None,
        }
    }

    /// Discard every vertex and re-root the store at `root`. The store then belongs to `root`'s epoch.
    pub fn rebuild(&mut self, root: BftHeader, root_qc: QuorumCertificate) {
        *self = VertexStore::new(root, root_qc);
    }

    /// Check `vertex` and its quorum certificate, insert it, and apply the commit rule to its
    /// certificate.
    ///
    /// `ends_epoch` decides whether `vertex` itself ends the epoch. Vertices that descend from an
    /// epoch-ending vertex end the epoch regardless, and must not carry commands.
    pub fn insert_vertex(
        &mut self,
        vertex: Vertex,
        validator_set: &Arc<ValidatorSet>,
        ends_epoch: impl Fn(&Vertex) -> bool,
        safety_checker: &mut SafetyChecker,
    ) -> Result<InsertOutcome, VertexStoreError> {
        let vertex_id = vertex.id();
        if vertex.epoch != self.epoch {
            return Err(VertexStoreError::WrongEpoch {
                expected: self.epoch,
                found: vertex.epoch,
            });
        }
        if vertex.view == ViewNumber::genesis() || vertex.qc.view() >= vertex.view {
            return Err(VertexStoreError::InvalidView {
                vertex: vertex_id,
                view: vertex.view,
                justify_view: vertex.qc.view(),
            });
        }

        if let Some(entry) = self.entries.get(&vertex_id) {
            return Ok(InsertOutcome {
                header: entry.header,
                newly_inserted: false,
                qc_outcome: QcOutcome::default(),
            });
        }

        self.check_qc(&vertex.qc, validator_set)?;

        let parent_id = vertex.parent_id();
        let parent_header = match self.entries.get(&parent_id) {
            Some(parent) => parent.header,
            None => {
                return Err(VertexStoreError::MissingParent {
                    vertex: vertex_id,
                    parent: parent_id,
                    parent_view: vertex.parent().view,
                })
            }
        };
        if parent_header != *vertex.parent() {
            return Err(VertexStoreError::InvalidQc {
                view: vertex.qc.view(),
            });
        }
        if parent_header.ledger_header.end_of_epoch && !vertex.commands.is_empty() {
            return Err(VertexStoreError::CommandsAfterEpochEnd { vertex: vertex_id });
        }

        let header = BftHeader {
            view: vertex.view,
            vertex_id,
            ledger_header: parent_header.ledger_header.extend(
                vertex.epoch,
                vertex.view,
                &vertex.commands,
                ends_epoch(&vertex),
            ),
        };

        let qc = vertex.qc.clone();
        self.entries.insert(
            vertex_id,
            VertexEntry {
                header,
                parent: Some(parent_id),
                vertex: Some(vertex),
                children: Vec::new(),
            },
        );
        if let Some(parent) = self.entries.get_mut(&parent_id) {
            parent.children.push(vertex_id);
        }

        let qc_outcome = self.process_qc(&qc, safety_checker)?;
        Ok(InsertOutcome {
            header,
            newly_inserted: true,
            qc_outcome,
        })
    }

    /// Check `qc`, which must certify a vertex already in the store, and apply the commit rule to it.
    pub fn add_qc(
        &mut self,
        qc: &QuorumCertificate,
        validator_set: &Arc<ValidatorSet>,
        safety_checker: &mut SafetyChecker,
    ) -> Result<QcOutcome, VertexStoreError> {
        self.check_qc(qc, validator_set)?;
        let proposed = qc.proposed();
        match self.entries.get(&proposed.vertex_id) {
            Some(entry) if entry.header == *proposed => (),
            Some(_) => return Err(VertexStoreError::InvalidQc { view: qc.view() }),
            None => {
                return Err(VertexStoreError::MissingVertex {
                    vertex: proposed.vertex_id,
                })
            }
        }
        self.process_qc(qc, safety_checker)
    }

    /// Remember `tc` if it is the highest timeout certificate of this epoch so far. Returns whether it
    /// was.
    pub fn insert_timeout_certificate(&mut self, tc: TimeoutCertificate) -> bool {
        if tc.epoch != self.epoch {
            return false;
        }
        match &self.highest_tc {
            Some(highest) if highest.view >= tc.view => false,
            _ => {
                self.highest_tc = Some(tc);
                true
            }
        }
    }

    pub fn epoch(&self) -> EpochNumber {
        self.epoch
    }

    /// The header of the highest committed vertex.
    pub fn root(&self) -> &BftHeader {
        // The root entry is only ever replaced together with `self.root`.
        match self.entries.get(&self.root) {
            Some(entry) => &entry.header,
            None => &self.highest_committed_qc.vote_data.proposed,
        }
    }

    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.high_qc
    }

    /// The certificate that committed the root.
    pub fn highest_committed_qc(&self) -> &QuorumCertificate {
        &self.highest_committed_qc
    }

    pub fn highest_tc(&self) -> Option<&TimeoutCertificate> {
        self.highest_tc.as_ref()
    }

    pub fn contains(&self, vertex_id: &CryptoHash) -> bool {
        self.entries.contains_key(vertex_id)
    }

    pub fn vertex(&self, vertex_id: &CryptoHash) -> Option<&Vertex> {
        self.entries
            .get(vertex_id)
            .and_then(|entry| entry.vertex.as_ref())
    }

    pub fn header(&self, vertex_id: &CryptoHash) -> Option<&BftHeader> {
        self.entries.get(vertex_id).map(|entry| &entry.header)
    }

    /// Number of vertices in the store, root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ids of the vertices from the root (exclusive) down to `vertex_id` (inclusive), in
    /// ascending view order. `None` if `vertex_id` does not descend from the root.
    pub fn path_from_root(&self, vertex_id: &CryptoHash) -> Option<Vec<CryptoHash>> {
        let mut path = Vec::new();
        let mut current = *vertex_id;
        while current != self.root {
            path.push(current);
            current = self.entries.get(&current)?.parent?;
        }
        path.reverse();
        Some(path)
    }

    /// The commands of the uncommitted vertices from the root down to `vertex_id`, in order.
    pub fn prepared_commands(&self, vertex_id: &CryptoHash) -> Vec<Command> {
        self.path_from_root(vertex_id)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.vertex(id))
            .flat_map(|vertex| vertex.commands.iter().cloned())
            .collect()
    }

    /// Up to `count` vertices, starting with `vertex_id` and walking towards the root.
    pub fn chain_to(&self, vertex_id: &CryptoHash, count: usize) -> Vec<Vertex> {
        let mut chain = Vec::new();
        let mut current = Some(*vertex_id);
        while let Some(id) = current {
            if chain.len() >= count {
                break;
            }
            match self.entries.get(&id) {
                Some(entry) => {
                    match &entry.vertex {
                        Some(vertex) => chain.push(vertex.clone()),
                        None => break,
                    }
                    current = entry.parent;
                }
                None => break,
            }
        }
        chain
    }

    /// Every speculative vertex, in ascending view order. Re-inserting them in this order into a store
    /// rebuilt at the same root restores it.
    pub fn speculative_vertices(&self) -> Vec<Vertex> {
        let mut vertices: Vec<Vertex> = self
            .entries
            .iter()
            .filter(|(id, _)| **id != self.root)
            .filter_map(|(_, entry)| entry.vertex.clone())
            .collect();
        vertices.sort_by_key(|vertex| vertex.view);
        vertices
    }

    fn check_qc(
        &self,
        qc: &QuorumCertificate,
        validator_set: &Arc<ValidatorSet>,
    ) -> Result<(), VertexStoreError> {
        if qc.epoch != self.epoch {
            return Err(VertexStoreError::WrongEpoch {
                expected: self.epoch,
                found: qc.epoch,
            });
        }

        let correct = if qc.is_genesis() {
            let root = self.root();
            root.view == ViewNumber::genesis() && *qc == QuorumCertificate::genesis(*root)
        } else {
            *qc == self.high_qc || qc.is_correct(validator_set)
        };

        if correct {
            Ok(())
        } else {
            Err(VertexStoreError::InvalidQc { view: qc.view() })
        }
    }

    // Update the highest QC and commit what `qc` commits. `qc` must already be checked.
    fn process_qc(
        &mut self,
        qc: &QuorumCertificate,
        safety_checker: &mut SafetyChecker,
    ) -> Result<QcOutcome, VertexStoreError> {
        let mut outcome = QcOutcome::default();
        if qc.epoch_view() > self.high_qc.epoch_view() {
            self.high_qc = qc.clone();
            outcome.new_high_qc = true;
        }

        if let Some(committed) = qc.committed() {
            if committed.view > self.root().view && self.entries.contains_key(&committed.vertex_id) {
                outcome.committed = self.commit(&committed.vertex_id, safety_checker)?;
                outcome.pruned = self.reroot(committed.vertex_id);
                self.highest_committed_qc = qc.clone();
            }
        }

        Ok(outcome)
    }

    fn commit(
        &self,
        target: &CryptoHash,
        safety_checker: &mut SafetyChecker,
    ) -> Result<Vec<CommittedVertex>, VertexStoreError> {
        let path = self
            .path_from_root(target)
            .ok_or(VertexStoreError::MissingVertex { vertex: *target })?;

        let mut committed = Vec::with_capacity(path.len());
        let mut parent = *self.root();
        for id in &path {
            let entry = self
                .entries
                .get(id)
                .ok_or(VertexStoreError::MissingVertex { vertex: *id })?;
            safety_checker.check_commit(&entry.header, &parent)?;
            if let Some(vertex) = &entry.vertex {
                committed.push(CommittedVertex {
                    vertex: vertex.clone(),
                    header: entry.header,
                });
            }
            parent = entry.header;
        }
        Ok(committed)
    }

    // Make `new_root` the root and drop every entry that does not descend from it.
    fn reroot(&mut self, new_root: CryptoHash) -> Vec<CryptoHash> {
        let mut keep = HashSet::new();
        let mut stack = vec![new_root];
        while let Some(id) = stack.pop() {
            if keep.insert(id) {
                if let Some(entry) = self.entries.get(&id) {
                    stack.extend(entry.children.iter().copied());
                }
            }
        }

        let pruned: Vec<CryptoHash> = self
            .entries
            .keys()
            .filter(|id| !keep.contains(*id) && **id != self.root)
            .copied()
            .collect();
        self.entries.retain(|id, _| keep.contains(id));
        if let Some(root) = self.entries.get_mut(&new_root) {
            root.parent = None;
        }
        self.root = new_root;
        pruned
    }
}
