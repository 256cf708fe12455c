/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Answering the sync requests of lagging peers out of the local [`CommittedLedger`].

use crate::ledger::CommittedLedger;

use super::messages::{SyncRequest, SyncResponse};

/// Build the response to `request`, or `None` if this replica cannot help the requester.
///
/// A requester in an older epoch is brought to the end of its epoch, since it cannot verify proofs of
/// later epochs before it learns their validator sets. A requester in the current epoch is brought to
/// the latest proof.
pub fn respond_to_sync_request(
    ledger: &CommittedLedger,
    request: &SyncRequest,
) -> Option<SyncResponse> {
    let proof = ledger.proof_for_epoch(request.start.epoch)?;
    let terminal = proof.ledger_header();
    if terminal.epoch_view() <= request.start.epoch_view()
        || terminal.state_version < request.start.state_version
    {
        return None;
    }

    let commands = ledger.commands_between(request.start.state_version, terminal.state_version)?;
    Some(SyncResponse {
        request_id: request.request_id,
        commands,
        proof: proof.clone(),
    })
}
