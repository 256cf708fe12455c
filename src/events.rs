/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events that a replica publishes, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published on a
//! channel by the [driver](crate::driver::ConsensusDriver) and consumed by the
//! [event bus](crate::event_bus) thread, which runs the user-provided handlers and, if enabled, the
//! default [loggers](crate::logging).

use std::{
    sync::{mpsc::Sender, Arc},
    time::{Duration, SystemTime},
};

use crate::{
    pacemaker::messages::{Proposal, TimeoutVote, Vote},
    sync::SyncError,
    types::{
        certificates::{BftHeader, QuorumCertificate, TimeoutCertificate},
        crypto_primitives::VerifyingKey,
        data_types::{CryptoHash, EpochNumber, ViewNumber},
        ledger_header::LedgerHeader,
        validator_set::ValidatorSet,
        vertex::Vertex,
    },
};

pub enum Event {
    // Events that change the vertex store or the epoch.
    InsertVertex(InsertVertexEvent),
    CommitVertex(CommitVertexEvent),
    PruneVertex(PruneVertexEvent),
    UpdateHighQc(UpdateHighQcEvent),
    EpochChange(EpochChangeEvent),

    // Events that involve broadcasting or sending a consensus message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    TimeoutVote(TimeoutVoteEvent),

    // Events that involve receiving a consensus message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    ReceiveTimeoutVote(ReceiveTimeoutVoteEvent),

    // Pacemaker events.
    StartView(StartViewEvent),
    ViewTimeout(ViewTimeoutEvent),
    CollectQc(CollectQcEvent),
    CollectTc(CollectTcEvent),

    // Sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    RejectSyncResponse(RejectSyncResponseEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus may already be shut down.
            let _ = event_publisher.send(event);
        }
    }
}

/// A vertex was inserted into the vertex store, with the header computed for it.
pub struct InsertVertexEvent {
    pub timestamp: SystemTime,
    pub vertex: Vertex,
    pub header: BftHeader,
}

/// A vertex was committed and its commands handed to the execution engine. `parent` is the vertex
/// committed right before it.
pub struct CommitVertexEvent {
    pub timestamp: SystemTime,
    pub header: BftHeader,
    pub parent: BftHeader,
}

/// A vertex was discarded because it conflicts with a committed one.
pub struct PruneVertexEvent {
    pub timestamp: SystemTime,
    pub vertex: CryptoHash,
}

pub struct UpdateHighQcEvent {
    pub timestamp: SystemTime,
    pub high_qc: QuorumCertificate,
}

/// The replica entered a new epoch.
pub struct EpochChangeEvent {
    pub timestamp: SystemTime,
    pub epoch: EpochNumber,
    pub validator_set: Arc<ValidatorSet>,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct TimeoutVoteEvent {
    pub timestamp: SystemTime,
    pub timeout_vote: TimeoutVote,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub proposal: Proposal,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub vote: Vote,
}

pub struct ReceiveTimeoutVoteEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub timeout_vote: TimeoutVote,
}

pub struct StartViewEvent {
    pub timestamp: SystemTime,
    pub leader: VerifyingKey,
    pub epoch: EpochNumber,
    pub view: ViewNumber,
}

/// The view timer fired. `attempt` counts how many times it fired before in the same view.
pub struct ViewTimeoutEvent {
    pub timestamp: SystemTime,
    pub epoch: EpochNumber,
    pub view: ViewNumber,
    pub attempt: u32,
    pub timeout: Duration,
}

pub struct CollectQcEvent {
    pub timestamp: SystemTime,
    pub quorum_certificate: QuorumCertificate,
}

pub struct CollectTcEvent {
    pub timestamp: SystemTime,
    pub timeout_certificate: TimeoutCertificate,
}

/// A sync request was sent to `peer`.
pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub target: LedgerHeader,
}

/// A verified sync response from `peer` was applied.
pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub commands_synced: u64,
    pub header: LedgerHeader,
}

pub struct RejectSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub reason: SyncError,
}

pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub start: LedgerHeader,
    pub served: bool,
}
