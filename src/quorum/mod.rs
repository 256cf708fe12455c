/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Accumulation of signatures into quorums.
//!
//! [`ValidationState`] is the single place that decides whether a set of signatures forms a quorum
//! of a [`ValidatorSet`](crate::types::validator_set::ValidatorSet). Vote collection
//! ([`VoteCollector`], [`TimeoutVoteCollector`]), certificate checking
//! ([`QuorumCertificate::is_correct`](crate::types::certificates::QuorumCertificate::is_correct)),
//! and the checking of ledger-sync proofs all go through it.

pub mod collectors;

pub mod validation_state;

pub use collectors::{CollectError, TimeoutVoteCollector, VoteCollector};
pub use validation_state::{ValidationError, ValidationState};
