/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The trait that a peer-to-peer network provider implements.

use crate::types::{crypto_primitives::VerifyingKey, validator_set::ValidatorSet};

use super::messages::Message;

/// Methods that a type needs to implement to carry messages between replicas.
///
/// Sends are fire-and-forget: the network may drop, duplicate, delay, or reorder messages, and the
/// replica never waits for delivery.
pub trait Network: Clone + Send {
    /// Inform the network provider of the validator set on wake-up.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Inform the network provider of the validator set of a new epoch, which replaces the previous
    /// one.
    fn update_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to all peers, excluding this replica, without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}
