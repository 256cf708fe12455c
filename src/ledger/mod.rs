/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The committed ledger and the boundary to the application's execution engine.
//!
//! Committed vertices leave the [vertex store](crate::vertex_store) and flow, in commit order, into
//! the [`CommittedLedger`], which hands every command that it has not seen before to the
//! [`ExecutionEngine`] exactly once. Commands received through [ledger sync](crate::sync) take the
//! same path, so a command committed both ways is still applied once.

pub mod committed_ledger;

pub mod execution;

pub use committed_ledger::{CommittedLedger, LedgerError};

pub use execution::ExecutionEngine;
