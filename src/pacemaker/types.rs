/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of types specific to the [Pacemaker](super::implementation::Pacemaker).

use std::time::Duration;

use crate::types::data_types::{EpochNumber, EpochView, ViewNumber};

/// Timing parameters of the [`Pacemaker`](super::implementation::Pacemaker).
///
/// The timeout of a view is `base_timeout × timeout_rate ^ min(max_timeout_exponent, n)`, where `n`
/// is the number of views since the highest committed view, not counting the current one. A
/// `timeout_rate` of `1.0` gives every view the same timeout.
#[derive(Clone, Debug, PartialEq)]
pub struct PacemakerConfig {
    pub base_timeout: Duration,
    pub timeout_rate: f64,
    pub max_timeout_exponent: u32,
}

/// Identifies one arming of the view timer.
///
/// A timer that fires with a `ScheduledTimeout` that is no longer current (the replica moved to
/// another view or epoch, or re-armed the timer since) is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScheduledTimeout {
    pub epoch: EpochNumber,
    pub view: ViewNumber,
    pub attempt: u32,
}

impl ScheduledTimeout {
    pub fn epoch_view(&self) -> EpochView {
        EpochView::new(self.epoch, self.view)
    }
}

/// A view timer that the caller should arm: fire `timeout` after `duration`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewTimeoutSchedule {
    pub timeout: ScheduledTimeout,
    pub duration: Duration,
}
