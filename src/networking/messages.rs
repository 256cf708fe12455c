/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumerations around every message variant exchanged between replicas.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    pacemaker::messages::{Proposal, TimeoutVote, Vote},
    sync::messages::{GetVerticesRequest, GetVerticesResponse, SyncRequest, SyncResponse},
    types::data_types::{EpochNumber, EpochView},
};

/// All message variants.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`ConsensusMessage`].
    ConsensusMessage(ConsensusMessage),

    /// See: [`SyncMessage`].
    SyncMessage(SyncMessage),
}

/// Messages of the consensus protocol proper. Every consensus message belongs to exactly one epoch,
/// and is only processed while the replica is in that epoch.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
    TimeoutVote(TimeoutVote),
}

impl ConsensusMessage {
    pub fn epoch(&self) -> EpochNumber {
        match self {
            ConsensusMessage::Proposal(proposal) => proposal.vertex.epoch,
            ConsensusMessage::Vote(vote) => vote.epoch,
            ConsensusMessage::TimeoutVote(timeout_vote) => timeout_vote.epoch,
        }
    }

    /// The epoch and view that the message is about. For a vote, this is the view of the voted vertex.
    pub fn epoch_view(&self) -> EpochView {
        match self {
            ConsensusMessage::Proposal(proposal) => proposal.epoch_view(),
            ConsensusMessage::Vote(vote) => EpochView::new(vote.epoch, vote.view()),
            ConsensusMessage::TimeoutVote(timeout_vote) => timeout_vote.epoch_view(),
        }
    }
}

/// Messages used by a lagging replica to catch up. They are not bound to an epoch.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum SyncMessage {
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
    GetVerticesRequest(GetVerticesRequest),
    GetVerticesResponse(GetVerticesResponse),
}

impl From<ConsensusMessage> for Message {
    fn from(value: ConsensusMessage) -> Self {
        Message::ConsensusMessage(value)
    }
}

impl From<SyncMessage> for Message {
    fn from(value: SyncMessage) -> Self {
        Message::SyncMessage(value)
    }
}

impl From<Proposal> for Message {
    fn from(value: Proposal) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Proposal(value))
    }
}

impl From<Vote> for Message {
    fn from(value: Vote) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Vote(value))
    }
}

impl From<TimeoutVote> for Message {
    fn from(value: TimeoutVote) -> Self {
        Message::ConsensusMessage(ConsensusMessage::TimeoutVote(value))
    }
}

impl From<SyncRequest> for Message {
    fn from(value: SyncRequest) -> Self {
        Message::SyncMessage(SyncMessage::SyncRequest(value))
    }
}

impl From<SyncResponse> for Message {
    fn from(value: SyncResponse) -> Self {
        Message::SyncMessage(SyncMessage::SyncResponse(value))
    }
}

impl From<GetVerticesRequest> for Message {
    fn from(value: GetVerticesRequest) -> Self {
        Message::SyncMessage(SyncMessage::GetVerticesRequest(value))
    }
}

impl From<GetVerticesResponse> for Message {
    fn from(value: GetVerticesResponse) -> Self {
        Message::SyncMessage(SyncMessage::GetVerticesResponse(value))
    }
}
