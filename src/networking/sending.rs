/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use std::collections::VecDeque;

use crate::types::{crypto_primitives::VerifyingKey, validator_set::ValidatorSet};

use super::{messages::Message, network::Network};

/// Handle for sending and broadcasting messages to the [`Network`].
///
/// It can be used to send or broadcast instances of any type that implement the [`Into<Message>`]
/// trait.
///
/// ## Loopback
///
/// [`Network::broadcast`] excludes the sender, but a replica must process its own proposals and
/// timeout votes, and a vote addressed to itself when it leads the next view. Such messages are kept
/// in a loopback queue instead, which is handed back to the driver's caller through
/// [`ConsensusDriver::take_loopback`](crate::driver::ConsensusDriver::take_loopback).
pub(crate) struct SenderHandle<N: Network> {
    network: N,
    me: VerifyingKey,
    loopback: VecDeque<Message>,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N, me: VerifyingKey) -> Self {
        Self {
            network,
            me,
            loopback: VecDeque::new(),
        }
    }

    pub(crate) fn send<S: Into<Message>>(&mut self, peer: VerifyingKey, msg: S) {
        if peer == self.me {
            self.loopback.push_back(msg.into())
        } else {
            self.network.send(peer, msg.into())
        }
    }

    /// Send `msg` to every peer, and to this replica through the loopback queue.
    pub(crate) fn broadcast<S: Into<Message>>(&mut self, msg: S) {
        let msg = msg.into();
        self.network.broadcast(msg.clone());
        self.loopback.push_back(msg)
    }

    pub(crate) fn take_loopback(&mut self) -> Option<(VerifyingKey, Message)> {
        self.loopback.pop_front().map(|msg| (self.me, msg))
    }

    pub(crate) fn init_validator_set(&mut self, validator_set: ValidatorSet) {
        self.network.init_validator_set(validator_set)
    }

    pub(crate) fn update_validator_set(&mut self, validator_set: ValidatorSet) {
        self.network.update_validator_set(validator_set)
    }
}
