/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [configuration](crate::replica::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveProposal](crate::events::ReceiveProposalEvent) is printed:
//!
//! ```text
//! ReceiveProposal, 1701329264, Id5u7f6, fNGCJyk, 2, 17
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the public key of the
//!   origin of the proposal.
//! - The fourth value is the first seven characters of the Base64 encoding of the id of the proposed
//!   vertex.
//! - The fifth and sixth values are the epoch and the view of the proposed vertex.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_VERTEX: &str = "InsertVertex";
pub const COMMIT_VERTEX: &str = "CommitVertex";
pub const PRUNE_VERTEX: &str = "PruneVertex";
pub const UPDATE_HIGH_QC: &str = "UpdateHighQC";
pub const EPOCH_CHANGE: &str = "EpochChange";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";
pub const TIMEOUT_VOTE: &str = "TimeoutVote";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";
pub const RECEIVE_TIMEOUT_VOTE: &str = "ReceiveTimeoutVote";

pub const START_VIEW: &str = "StartView";
pub const VIEW_TIMEOUT: &str = "ViewTimeout";
pub const COLLECT_QC: &str = "CollectQC";
pub const COLLECT_TC: &str = "CollectTC";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const REJECT_SYNC_RESPONSE: &str = "RejectSyncResponse";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertVertexEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |insert_vertex_event: &InsertVertexEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                INSERT_VERTEX,
                secs_since_unix_epoch(insert_vertex_event.timestamp),
                first_seven_base64_chars(&insert_vertex_event.header.vertex_id.bytes()),
                insert_vertex_event.vertex.epoch,
                insert_vertex_event.vertex.view,
                insert_vertex_event.vertex.commands.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitVertexEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_vertex_event: &CommitVertexEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_VERTEX,
                secs_since_unix_epoch(commit_vertex_event.timestamp),
                first_seven_base64_chars(&commit_vertex_event.header.vertex_id.bytes()),
                commit_vertex_event.header.epoch_view(),
                commit_vertex_event.header.ledger_header.state_version
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneVertexEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prune_vertex_event: &PruneVertexEvent| {
            log::info!(
                "{}, {}, {}",
                PRUNE_VERTEX,
                secs_since_unix_epoch(prune_vertex_event.timestamp),
                first_seven_base64_chars(&prune_vertex_event.vertex.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateHighQcEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_high_qc_event: &UpdateHighQcEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_HIGH_QC,
                secs_since_unix_epoch(update_high_qc_event.timestamp),
                first_seven_base64_chars(&update_high_qc_event.high_qc.proposed().vertex_id.bytes()),
                update_high_qc_event.high_qc.epoch_view()
            )
        };
        Box::new(logger)
    }
}

impl Logger for EpochChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |epoch_change_event: &EpochChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                EPOCH_CHANGE,
                secs_since_unix_epoch(epoch_change_event.timestamp),
                epoch_change_event.epoch,
                epoch_change_event.validator_set.len(),
                epoch_change_event.validator_set.total_power()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(&propose_event.proposal.vertex.id().bytes()),
                propose_event.proposal.epoch_view(),
                propose_event.proposal.vertex.commands.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                first_seven_base64_chars(&vote_event.vote.vote_data.proposed.vertex_id.bytes()),
                vote_event.vote.epoch,
                vote_event.vote.view()
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_vote_event: &TimeoutVoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                TIMEOUT_VOTE,
                secs_since_unix_epoch(timeout_vote_event.timestamp),
                timeout_vote_event.timeout_vote.epoch_view(),
                timeout_vote_event.timeout_vote.high_qc.epoch_view()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                first_seven_base64_chars(&receive_proposal_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_proposal_event.proposal.vertex.id().bytes()),
                receive_proposal_event.proposal.vertex.epoch,
                receive_proposal_event.proposal.vertex.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                first_seven_base64_chars(&receive_vote_event.origin.to_bytes()),
                first_seven_base64_chars(
                    &receive_vote_event.vote.vote_data.proposed.vertex_id.bytes()
                ),
                receive_vote_event.vote.view()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveTimeoutVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_timeout_vote_event: &ReceiveTimeoutVoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_TIMEOUT_VOTE,
                secs_since_unix_epoch(receive_timeout_vote_event.timestamp),
                first_seven_base64_chars(&receive_timeout_vote_event.origin.to_bytes()),
                receive_timeout_vote_event.timeout_vote.epoch_view()
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_view_event: &StartViewEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_VIEW,
                secs_since_unix_epoch(start_view_event.timestamp),
                first_seven_base64_chars(&start_view_event.leader.to_bytes()),
                start_view_event.epoch,
                start_view_event.view
            )
        };
        Box::new(logger)
    }
}

impl Logger for ViewTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |view_timeout_event: &ViewTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                VIEW_TIMEOUT,
                secs_since_unix_epoch(view_timeout_event.timestamp),
                view_timeout_event.epoch,
                view_timeout_event.view,
                view_timeout_event.attempt,
                view_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectQcEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collect_qc_event: &CollectQcEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COLLECT_QC,
                secs_since_unix_epoch(collect_qc_event.timestamp),
                first_seven_base64_chars(
                    &collect_qc_event.quorum_certificate.proposed().vertex_id.bytes()
                ),
                collect_qc_event.quorum_certificate.epoch_view(),
                collect_qc_event.quorum_certificate.signatures.count()
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectTcEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |collect_tc_event: &CollectTcEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COLLECT_TC,
                secs_since_unix_epoch(collect_tc_event.timestamp),
                collect_tc_event.timeout_certificate.epoch_view(),
                collect_tc_event.timeout_certificate.signatures.count()
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                first_seven_base64_chars(&start_sync_event.peer.to_bytes()),
                start_sync_event.target.epoch_view(),
                start_sync_event.target.state_version
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                first_seven_base64_chars(&end_sync_event.peer.to_bytes()),
                end_sync_event.commands_synced,
                end_sync_event.header.state_version
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectSyncResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_sync_response_event: &RejectSyncResponseEvent| {
            log::warn!(
                "{}, {}, {}, {}",
                REJECT_SYNC_RESPONSE,
                secs_since_unix_epoch(reject_sync_response_event.timestamp),
                first_seven_base64_chars(&reject_sync_response_event.peer.to_bytes()),
                reject_sync_response_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_sync_request_event: &ReceiveSyncRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(receive_sync_request_event.timestamp),
                first_seven_base64_chars(&receive_sync_request_event.peer.to_bytes()),
                receive_sync_request_event.start.state_version,
                receive_sync_request_event.served
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

// Events stamped before the Unix Epoch print as 0.
fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
