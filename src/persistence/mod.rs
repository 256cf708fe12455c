/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable persistence of the replica's [`Checkpoint`].
//!
//! The replica persists its [`SafetyRules`](crate::safety::SafetyRules) before every vote and timeout
//! vote it sends, and its vertex store after every change to it, into a user-provided [`KVStore`]. A
//! replica restarted from its checkpoint therefore never votes twice for the same view.
//!
//! The committed command log is not part of the checkpoint: the execution engine owns the committed
//! state, and a restarted replica serves sync requests only for commands committed since it restarted.

pub mod checkpoint;

pub mod pluggables;

pub mod variables;

pub use checkpoint::{Checkpoint, Key, PersistenceError};

pub use pluggables::{KVGet, KVStore, WriteBatch};
