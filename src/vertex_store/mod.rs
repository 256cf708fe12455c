/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The in-memory tree of speculative vertices of the current epoch.
//!
//! # The Vertex Store
//!
//! The vertex store holds a tree of [vertices](crate::types::vertex::Vertex) rooted at the highest
//! committed vertex (or at the genesis vertex of the epoch, if nothing was committed in it yet). Every
//! other vertex in the store is **speculative**: it has been proposed and its quorum certificate
//! checked, but it is not yet part of the agreed history.
//!
//! Vertices are kept in an arena keyed by their ids. Each entry refers to its parent and its children
//! by id, so pruning a branch is a matter of removing map entries.
//!
//! # Commit rule
//!
//! A quorum certificate for vertex `X` whose parent `P` has the view directly before `X`'s
//! (`P.view + 1 == X.view`) commits `P`, together with every uncommitted ancestor of `P`. The
//! certificate's [`VoteData::committed`](crate::types::certificates::VoteData::committed) field names
//! `P` in this case, so the rule can be applied to any certificate without looking at the vertices it
//! certifies.
//!
//! With three vertices `A` (view 5) ← `B` (view 6) ← `C` (view 7), where `C` carries the certificate
//! for `B`: inserting `C` commits `A`, but neither `B` nor `C`.
//!
//! Committed vertices are returned to the caller in ascending view order, after every one of them passed
//! the [`SafetyChecker`](crate::safety::SafetyChecker). Branches that do not descend from the new root
//! are pruned.
//!
//! # Epochs
//!
//! A vertex store serves exactly one epoch. The [epoch manager](crate::epoch_manager) replaces it with
//! a fresh one rooted at the next epoch's genesis vertex when an epoch-ending vertex commits.

pub mod implementation;

pub mod types;

pub use implementation::VertexStore;
pub use types::{CommittedVertex, InsertOutcome, QcOutcome, VertexStoreError};
