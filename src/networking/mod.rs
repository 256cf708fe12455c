/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! The library user provides the transport by implementing [`Network`](network::Network). Inside the
//! replica, a poller thread drains the network into the driver's event queue (see
//! [`receiving`]), and the driver sends through a [`SenderHandle`](sending::SenderHandle), which
//! delivers messages addressed to the replica itself without going through the network.

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;

pub use network::Network;
