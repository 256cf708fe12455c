/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Byzantine-fault-tolerant consensus core that orders opaque commands into a ledger, and keeps
//! lagging replicas in step through ledger synchronization.
//!
//! A deployment is a set of replicas, the **validators** of an **epoch**, each with a voting power.
//! Consensus tolerates validators holding less than a third of the total power behaving arbitrarily.
//! Within an epoch, replicas agree on a chain of [vertices](types::vertex) in a sequence of views
//! using a pipelined, chained-HotStuff style protocol with a two-chain commit rule:
//! 1. The leader of a view [proposes](driver) a vertex that extends the highest certified vertex.
//! 2. Replicas vote for it if their [safety rules](safety::SafetyRules) allow, and a quorum of votes
//!    forms a [quorum certificate](types::certificates::QuorumCertificate).
//! 3. A vertex is committed when a quorum certificate certifies its direct child.
//!
//! Committed commands are [executed](ledger::ExecutionEngine) and appended to the
//! [committed ledger](ledger::CommittedLedger). A vertex whose execution ends the epoch moves every
//! replica to the next epoch, governed by the validator set that the execution produced. See
//! [epoch_manager].
//!
//! ## Getting started
//!
//! To run a replica, implement [`ExecutionEngine`](ledger::ExecutionEngine),
//! [`Network`](networking::Network), and [`KVStore`](persistence::KVStore), initialize the
//! key-value store with [`Replica::initialize`](replica::Replica::initialize), and start the
//! replica with [`ReplicaSpec`](replica::ReplicaSpec).
//!
//! ## Module map
//!
//! - Data: [types].
//! - Protocol components: [quorum], [safety], [vertex_store], [pacemaker], [ledger], [sync],
//!   [epoch_manager].
//! - Plumbing: [persistence], [networking], [timers], [events], [metrics].
//! - Composition: [driver], which runs all of the components on a single thread, and [replica],
//!   which runs the driver and its helper threads.

pub mod types;

pub mod quorum;

pub mod safety;

pub mod vertex_store;

pub mod pacemaker;

pub mod ledger;

pub mod sync;

pub mod epoch_manager;

pub mod persistence;

pub mod networking;

pub mod events;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub mod metrics;

pub mod timers;

pub mod driver;

pub mod replica;
