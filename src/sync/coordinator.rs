/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bookkeeping of the requesting side of ledger sync.
//!
//! Main type: [`LedgerSyncCoordinator`].

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

use crate::types::{
    certificates::LedgerProof,
    crypto_primitives::VerifyingKey,
    data_types::{Command, EpochNumber, RequestId},
    ledger_header::{accumulate, LedgerHeader},
    validator_set::ValidatorSet,
};

use super::messages::{SyncRequest, SyncResponse};

/// Tracks the single outstanding sync request of a replica, verifies responses, and picks peers.
///
/// # Usage
///
/// The coordinator never sends messages or arms timers itself. Every method that wants a request
/// sent returns a [`SyncRequestAction`], and the caller should send the request to the peer and
/// arm a timer that fires [`on_timeout`](Self::on_timeout) with the request's id.
///
/// 1. [`on_higher_proof_seen`](Self::on_higher_proof_seen): the replica saw a committed header that
///    is ahead of its own ledger.
/// 2. [`on_response`](Self::on_response): a response arrived. A verified response should be applied
///    to the ledger, after which the caller should call [`on_local_commit`](Self::on_local_commit).
/// 3. [`on_timeout`](Self::on_timeout): the timer of a request fired.
/// 4. [`on_local_commit`](Self::on_local_commit): the local ledger moved forward. Sync stops once the
///    target is reached, and otherwise continues from the new ledger header.
pub struct LedgerSyncCoordinator {
    request_timeout: Duration,
    next_request_id: u64,
    target: Option<LedgerHeader>,
    candidates: Vec<VerifyingKey>,
    next_candidate: usize,
    outstanding: Option<OutstandingRequest>,
}

struct OutstandingRequest {
    request_id: RequestId,
    peer: VerifyingKey,
    start: LedgerHeader,
}

impl LedgerSyncCoordinator {
    /// Create a coordinator whose request ids start at `first_request_id`.
    pub fn new(request_timeout: Duration, first_request_id: u64) -> LedgerSyncCoordinator {
        LedgerSyncCoordinator {
            request_timeout,
            next_request_id: first_request_id,
            target: None,
            candidates: Vec::new(),
            next_candidate: 0,
            outstanding: None,
        }
    }

    /// The header sync is currently working towards.
    pub fn target(&self) -> Option<&LedgerHeader> {
        self.target.as_ref()
    }

    pub fn is_syncing(&self) -> bool {
        self.target.is_some()
    }

    /// The id of the request that is currently awaiting a response.
    pub fn outstanding_request(&self) -> Option<RequestId> {
        self.outstanding.as_ref().map(|outstanding| outstanding.request_id)
    }

    /// Start or extend sync towards `remote`, if it is ahead of `local`.
    ///
    /// `candidate_peers` are the peers to try, in order of preference. They replace the previous
    /// candidates.
    pub fn on_higher_proof_seen(
        &mut self,
        remote: &LedgerHeader,
        candidate_peers: &[VerifyingKey],
        local: &LedgerHeader,
    ) -> Option<SyncRequestAction> {
        if remote.epoch_view() <= local.epoch_view() {
            return None;
        }
        if !candidate_peers.is_empty() {
            self.candidates = candidate_peers.to_vec();
            if self.outstanding.is_none() {
                self.next_candidate = 0;
            }
        }
        let is_further = match &self.target {
            Some(target) => remote.epoch_view() > target.epoch_view(),
            None => true,
        };
        if is_further {
            self.target = Some(*remote);
        }

        if self.outstanding.is_some() {
            return None;
        }
        self.issue(local)
    }

    /// Check `response`, received from `origin`, against the outstanding request.
    ///
    /// `validator_set_of` returns the validator set of an epoch, if this replica knows it. Rejected
    /// responses come with a request to a different peer.
    pub fn on_response(
        &mut self,
        origin: &VerifyingKey,
        response: SyncResponse,
        validator_set_of: impl Fn(EpochNumber) -> Option<Arc<ValidatorSet>>,
        local: &LedgerHeader,
    ) -> SyncResponseOutcome {
        let is_outstanding = matches!(
            &self.outstanding,
            Some(outstanding) if outstanding.request_id == response.request_id && outstanding.peer == *origin
        );
        if !is_outstanding {
            return SyncResponseOutcome::Stale;
        }
        let start = match self.outstanding.take() {
            Some(outstanding) => outstanding.start,
            None => return SyncResponseOutcome::Stale,
        };

        match verify(&start, &response, validator_set_of) {
            Ok(()) => SyncResponseOutcome::Apply(VerifiedSync {
                start,
                commands: response.commands,
                proof: response.proof,
            }),
            Err(reason) => SyncResponseOutcome::Rejected {
                reason,
                retry: self.issue(local),
            },
        }
    }

    /// Handle the firing of the timer of request `request_id`. Stale timers are ignored.
    pub fn on_timeout(
        &mut self,
        request_id: RequestId,
        local: &LedgerHeader,
    ) -> Option<SyncRequestAction> {
        match &self.outstanding {
            Some(outstanding) if outstanding.request_id == request_id => (),
            _ => return None,
        }
        self.outstanding = None;
        if !self.target_is_ahead_of(local) {
            self.target = None;
            return None;
        }
        self.issue(local)
    }

    /// The local ledger reached `local`, through consensus or through sync. Sync is abandoned if the
    /// target is reached, and continues with a fresh request if no request is outstanding.
    pub fn on_local_commit(&mut self, local: &LedgerHeader) -> Option<SyncRequestAction> {
        if !self.target_is_ahead_of(local) {
            self.target = None;
            self.outstanding = None;
            return None;
        }
        if self.outstanding.is_some() {
            return None;
        }
        self.issue(local)
    }

    fn target_is_ahead_of(&self, local: &LedgerHeader) -> bool {
        match &self.target {
            Some(target) => target.epoch_view() > local.epoch_view(),
            None => false,
        }
    }

    fn issue(&mut self, local: &LedgerHeader) -> Option<SyncRequestAction> {
        let target = self.target?;
        if self.candidates.is_empty() {
            return None;
        }
        let peer = self.candidates[self.next_candidate % self.candidates.len()];
        self.next_candidate = self.next_candidate.wrapping_add(1);

        let request_id = RequestId::new(self.next_request_id);
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.outstanding = Some(OutstandingRequest {
            request_id,
            peer,
            start: *local,
        });

        Some(SyncRequestAction {
            peer,
            request: SyncRequest {
                request_id,
                start: *local,
                target,
            },
            timeout: self.request_timeout,
        })
    }
}

fn verify(
    start: &LedgerHeader,
    response: &SyncResponse,
    validator_set_of: impl Fn(EpochNumber) -> Option<Arc<ValidatorSet>>,
) -> Result<(), SyncError> {
    let proof = &response.proof;
    let validator_set =
        validator_set_of(proof.epoch()).ok_or(SyncError::UnknownEpoch { epoch: proof.epoch() })?;
    if !proof.is_correct(&validator_set) {
        return Err(SyncError::InvalidProof);
    }

    let terminal = proof.ledger_header();
    if terminal.epoch_view() <= start.epoch_view() || terminal.state_version < start.state_version {
        return Err(SyncError::NotAhead);
    }

    let expected = terminal.state_version - start.state_version;
    if response.commands.len() as u64 != expected {
        return Err(SyncError::CommandCountMismatch {
            expected,
            found: response.commands.len() as u64,
        });
    }

    let accumulator = response
        .commands
        .iter()
        .fold(start.accumulator, |accumulator, command| {
            accumulate(&accumulator, command)
        });
    if accumulator != terminal.accumulator {
        return Err(SyncError::AccumulatorMismatch);
    }

    Ok(())
}

/// A request that the caller should send to `peer`, arming a timer of `timeout` for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncRequestAction {
    pub peer: VerifyingKey,
    pub request: SyncRequest,
    pub timeout: Duration,
}

/// What to do with a sync response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncResponseOutcome {
    /// The response is verified and should be applied.
    Apply(VerifiedSync),

    /// The response answers no outstanding request, e.g., because it was retried or already applied.
    Stale,

    /// The response failed verification and was discarded.
    Rejected {
        reason: SyncError,
        retry: Option<SyncRequestAction>,
    },
}

/// A batch of committed commands whose terminal header carries a valid quorum proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedSync {
    pub start: LedgerHeader,
    pub commands: Vec<Command>,
    pub proof: LedgerProof,
}

impl VerifiedSync {
    /// The header the ledger reaches by applying this batch.
    pub fn terminal(&self) -> &LedgerHeader {
        self.proof.ledger_header()
    }
}

/// Why a sync response was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The proof belongs to an epoch whose validator set this replica does not know.
    UnknownEpoch { epoch: EpochNumber },

    /// The proof does not carry a quorum of valid signatures.
    InvalidProof,

    /// The proof does not reach past the requester's ledger.
    NotAhead,

    /// The response does not carry exactly the commands between the two headers.
    CommandCountMismatch { expected: u64, found: u64 },

    /// The commands do not hash to the proof's accumulator.
    AccumulatorMismatch,
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::UnknownEpoch { epoch } => {
                write!(f, "no validator set known for epoch {}", epoch)
            }
            SyncError::InvalidProof => write!(f, "proof lacks a quorum of valid signatures"),
            SyncError::NotAhead => write!(f, "proof is not ahead of the local ledger"),
            SyncError::CommandCountMismatch { expected, found } => {
                write!(f, "expected {} commands, found {}", expected, found)
            }
            SyncError::AccumulatorMismatch => write!(f, "commands do not match the accumulator"),
        }
    }
}
