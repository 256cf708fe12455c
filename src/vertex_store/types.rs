/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Outcomes and errors of [`VertexStore`](super::VertexStore) operations.

use std::fmt::{self, Display, Formatter};

use crate::{
    safety::SafetyViolation,
    types::{
        certificates::BftHeader,
        data_types::{CryptoHash, EpochNumber, ViewNumber},
        vertex::Vertex,
    },
};

/// One arena slot.
///
/// The root's `parent` is `None`. The root of a store that was rebuilt from a header alone has no
/// `vertex`.
#[derive(Clone, Debug)]
pub(crate) struct VertexEntry {
    pub(crate) header: BftHeader,
    pub(crate) parent: Option<CryptoHash>,
    pub(crate) vertex: Option<Vertex>,
    pub(crate) children: Vec<CryptoHash>,
}

/// A vertex that has just become part of the agreed history, with the header computed for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedVertex {
    pub vertex: Vertex,
    pub header: BftHeader,
}

/// What processing a quorum certificate changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QcOutcome {
    /// Whether the certificate became the new highest QC.
    pub new_high_qc: bool,

    /// Vertices committed by the certificate, in ascending view order.
    pub committed: Vec<CommittedVertex>,

    /// Ids of the vertices pruned because they conflict with the new root.
    pub pruned: Vec<CryptoHash>,
}

/// What inserting a vertex changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertOutcome {
    pub header: BftHeader,

    /// `false` if the vertex was already in the store, in which case nothing else changed.
    pub newly_inserted: bool,

    /// The effect of the vertex's own quorum certificate.
    pub qc_outcome: QcOutcome,
}

/// Why the vertex store refused a vertex or a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexStoreError {
    /// The vertex or certificate belongs to another epoch than the store's.
    WrongEpoch {
        expected: EpochNumber,
        found: EpochNumber,
    },

    /// The vertex claims view 0, or is justified by a certificate that is not older than itself.
    InvalidView {
        vertex: CryptoHash,
        view: ViewNumber,
        justify_view: ViewNumber,
    },

    /// The certificate does not carry a quorum of valid signatures, or does not match the vertex it
    /// names.
    InvalidQc { view: ViewNumber },

    /// The parent of `vertex` is not in the store. The caller should fetch it or sync the ledger.
    MissingParent {
        vertex: CryptoHash,
        parent: CryptoHash,
        parent_view: ViewNumber,
    },

    /// A certificate names a vertex that is not in the store.
    MissingVertex { vertex: CryptoHash },

    /// The vertex carries commands although one of its ancestors already ended the epoch.
    CommandsAfterEpochEnd { vertex: CryptoHash },

    /// Committing would fork the agreed history. Fatal.
    Safety(SafetyViolation),
}

impl VertexStoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, VertexStoreError::Safety(_))
    }
}

impl From<SafetyViolation> for VertexStoreError {
    fn from(value: SafetyViolation) -> Self {
        VertexStoreError::Safety(value)
    }
}

impl Display for VertexStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VertexStoreError::WrongEpoch { expected, found } => {
                write!(f, "expected epoch {}, found {}", expected, found)
            }
            VertexStoreError::InvalidView {
                vertex,
                view,
                justify_view,
            } => write!(
                f,
                "vertex {} at view {} is justified by view {}",
                vertex, view, justify_view
            ),
            VertexStoreError::InvalidQc { view } => {
                write!(f, "invalid quorum certificate for view {}", view)
            }
            VertexStoreError::MissingParent {
                vertex,
                parent,
                parent_view,
            } => write!(
                f,
                "parent {} (view {}) of vertex {} is unknown",
                parent, parent_view, vertex
            ),
            VertexStoreError::MissingVertex { vertex } => {
                write!(f, "vertex {} is unknown", vertex)
            }
            VertexStoreError::CommandsAfterEpochEnd { vertex } => {
                write!(f, "vertex {} carries commands after the end of its epoch", vertex)
            }
            VertexStoreError::Safety(violation) => Display::fmt(violation, f),
        }
    }
}
