/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocols that "catch up" a replica that missed messages.
//!
//! A replica can fall behind in two ways, told apart by the committed header of the quorum
//! certificate that revealed the gap:
//! 1. **Behind the ledger**: the certificate commits a header that is ahead of the replica's committed
//!    ledger. The replica asks peers for the committed commands it misses, together with a quorum
//!    proof of where they end ([`coordinator`], answered by [`server`]), applies them, and rebuilds
//!    its vertex store on top of the proven header.
//! 2. **Behind the speculative chain only**: the replica's ledger is current, but it misses some
//!    uncommitted ancestors of a proposal. The replica asks the proposal's sender for them
//!    ([`vertex_fetch`]) and inserts them before the proposal.

pub mod coordinator;

pub mod messages;

pub mod server;

pub mod vertex_fetch;

pub use coordinator::{LedgerSyncCoordinator, SyncError, SyncRequestAction, SyncResponseOutcome, VerifiedSync};

pub use vertex_fetch::VertexFetcher;
