/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Guards that keep a replica from committing or voting inconsistently.
//!
//! - [`SafetyChecker`] remembers which vertex was committed at each recent
//!   [`EpochView`](crate::types::data_types::EpochView) and refuses commits that would fork or skip
//!   part of that history. Its violations are fatal.
//! - [`SafetyRules`] decides whether this replica may vote for a proposal. Its state is persisted
//!   before every vote, so that a restarted replica never votes twice in the same view.

pub mod checker;

pub mod rules;

pub use checker::{SafetyChecker, SafetyViolation};
pub use rules::{SafetyRules, VoteRefusal};
