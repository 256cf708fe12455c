/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the Pacemaker.
//!
//! Main type: [`Pacemaker`].

use std::{sync::Arc, time::Duration};

use crate::types::{
    certificates::{QuorumCertificate, TimeoutCertificate},
    crypto_primitives::VerifyingKey,
    data_types::{EpochNumber, ViewNumber},
    validator_set::ValidatorSet,
};

use super::types::{PacemakerConfig, ScheduledTimeout, ViewTimeoutSchedule};

/// The view counter and view timer of one epoch.
///
/// # Usage
///
/// The `Pacemaker` never arms timers itself. Every method that changes the current view, or that
/// handles a firing timer, returns a [`ViewTimeoutSchedule`] for the caller to arm:
/// 1. [`enter_view`](Self::enter_view): move to a higher view.
/// 2. [`process_qc`](Self::process_qc) and [`process_tc`](Self::process_tc): fast-forward past the
///    view that a certificate closes.
/// 3. [`on_local_timeout`](Self::on_local_timeout): handle a firing view timer. If the timer is still
///    current, the caller should broadcast a timeout vote for the current view.
pub struct Pacemaker {
    config: PacemakerConfig,
    epoch: EpochNumber,
    validator_set: Arc<ValidatorSet>,
    view: ViewNumber,
    attempt: u32,
}

impl Pacemaker {
    /// Create a `Pacemaker` for `epoch`. It starts at the genesis view, which no timer is armed for.
    pub fn new(
        config: PacemakerConfig,
        epoch: EpochNumber,
        validator_set: Arc<ValidatorSet>,
    ) -> Pacemaker {
        Pacemaker {
            config,
            epoch,
            validator_set,
            view: ViewNumber::genesis(),
            attempt: 0,
        }
    }

    pub fn current_view(&self) -> ViewNumber {
        self.view
    }

    pub fn epoch(&self) -> EpochNumber {
        self.epoch
    }

    /// The leader of `view` in this pacemaker's epoch.
    pub fn leader(&self, view: ViewNumber) -> VerifyingKey {
        select_leader(self.epoch, view, &self.validator_set)
    }

    /// Move to `view`, if it is higher than the current view.
    ///
    /// `highest_committed_view` is the view of the highest committed vertex of the epoch, and scales
    /// the new view's timeout.
    pub fn enter_view(
        &mut self,
        view: ViewNumber,
        highest_committed_view: ViewNumber,
    ) -> Option<ViewTimeoutSchedule> {
        if view <= self.view {
            return None;
        }
        self.view = view;
        self.attempt = 0;
        Some(self.schedule(highest_committed_view))
    }

    /// Handle a firing view timer.
    ///
    /// Returns `None` for stale timers. Otherwise the current view has timed out (again), and the
    /// returned schedule re-arms the timer for the next attempt.
    pub fn on_local_timeout(
        &mut self,
        timeout: ScheduledTimeout,
        highest_committed_view: ViewNumber,
    ) -> Option<ViewTimeoutSchedule> {
        if timeout.epoch != self.epoch || timeout.view != self.view || timeout.attempt != self.attempt
        {
            return None;
        }
        self.attempt += 1;
        Some(self.schedule(highest_committed_view))
    }

    /// Fast-forward to the view after the one `qc` certifies.
    pub fn process_qc(
        &mut self,
        qc: &QuorumCertificate,
        highest_committed_view: ViewNumber,
    ) -> Option<ViewTimeoutSchedule> {
        if qc.epoch != self.epoch {
            return None;
        }
        self.enter_view(qc.view() + 1, highest_committed_view)
    }

    /// Fast-forward to the view after the one `tc` times out.
    pub fn process_tc(
        &mut self,
        tc: &TimeoutCertificate,
        highest_committed_view: ViewNumber,
    ) -> Option<ViewTimeoutSchedule> {
        if tc.epoch != self.epoch {
            return None;
        }
        self.enter_view(tc.view + 1, highest_committed_view)
    }

    /// The timeout of `view`, given the highest committed view.
    pub fn timeout_duration(
        &self,
        view: ViewNumber,
        highest_committed_view: ViewNumber,
    ) -> Duration {
        let uncommitted = (view - highest_committed_view).saturating_sub(1);
        let exponent = uncommitted.min(self.config.max_timeout_exponent as u64) as i32;
        let multiplier = self.config.timeout_rate.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.config.base_timeout.as_secs_f64() * multiplier)
            .unwrap_or(self.config.base_timeout)
    }

    fn schedule(&self, highest_committed_view: ViewNumber) -> ViewTimeoutSchedule {
        ViewTimeoutSchedule {
            timeout: ScheduledTimeout {
                epoch: self.epoch,
                view: self.view,
                attempt: self.attempt,
            },
            duration: self.timeout_duration(self.view, highest_committed_view),
        }
    }
}

/// Deterministically select a replica in `validator_set` to become the leader of `view` of `epoch`
/// using the [Interleaved WRR](https://en.wikipedia.org/wiki/Weighted_round_robin#Interleaved_WRR)
/// algorithm.
///
/// Over any `P` consecutive indices, where `P` is the total power of the validator set, every
/// validator leads exactly as many times as its power. The index is `epoch + view`, so that epochs
/// do not all start with the same leader.
pub fn select_leader(
    epoch: EpochNumber,
    view: ViewNumber,
    validator_set: &ValidatorSet,
) -> VerifyingKey {
    let validators_and_powers = validator_set.validators_and_powers();
    // Length of the abstract array.
    let p_total = validator_set.total_power().int();
    // Index in the abstract array.
    let index = (epoch.int() as u128 + view.int() as u128) % p_total.max(1);
    // Max. power among the validators.
    let p_max = validators_and_powers
        .iter()
        .map(|(_, power)| power.int())
        .max()
        .unwrap_or(0);

    // Search for the validator at `index` in the abstract array of leaders.
    let mut counter = 0u128;
    for threshold in 1..=p_max {
        for (validator, power) in &validators_and_powers {
            if power.int() >= threshold {
                if counter == index {
                    return *validator;
                }
                counter += 1
            }
        }
    }

    // Unreachable for a non-empty validator set with positive powers.
    let position = (index % validators_and_powers.len().max(1) as u128) as usize;
    validators_and_powers[position].0
}
