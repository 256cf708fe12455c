/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Counters of what a replica did, for external monitoring.
//!
//! [`SystemCounters`] is owned by the [driver](crate::driver::ConsensusDriver) and only ever updated
//! from within event processing. The [`Replica`](crate::replica::Replica) publishes a snapshot of it
//! after every event.

/// Monotonic counters of consensus and sync activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemCounters {
    pub proposals_sent: u64,
    /// Proposals that failed validation or whose sender is not the leader of their view.
    pub proposals_rejected: u64,
    pub votes_sent: u64,
    pub timeout_votes_sent: u64,
    /// Views whose timer fired at least once.
    pub timed_out_views: u64,
    pub qcs_formed: u64,
    pub tcs_formed: u64,
    pub vertices_committed: u64,
    pub commands_committed: u64,
    pub epoch_changes: u64,

    pub sync_requests_sent: u64,
    pub sync_requests_succeeded: u64,
    pub sync_requests_timed_out: u64,
    pub sync_responses_rejected: u64,
    pub sync_requests_served: u64,
    pub vertex_requests_sent: u64,

    /// Messages of future epochs that did not fit in the buffer.
    pub future_messages_dropped: u64,
}
