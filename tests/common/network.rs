/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Networks for integration tests that never leave the process.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use ledger_consensus::{
    networking::{messages::Message, Network},
    types::{crypto_primitives::VerifyingKey, validator_set::ValidatorSet},
};

/// A mock network stub which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: HashMap<VerifyingKey, Sender<(VerifyingKey, Message)>>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, Message)>>>,
}

impl Network for NetworkStub {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn update_validator_set(&mut self, _: ValidatorSet) {}

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_verifying_key, message));
        }
    }

    fn broadcast(&mut self, message: Message) {
        for (peer, inbox) in &self.all_peers {
            if *peer != self.my_verifying_key {
                let _ = inbox.send((self.my_verifying_key, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<(VerifyingKey, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}

/// Where a message sent through an [`OutboxNetwork`] is headed. `None` means every peer.
pub(crate) type Outgoing = (Option<VerifyingKey>, Message);

/// A network that only records what is sent through it. The [fleet](super::fleet) decides whether,
/// when, and how many times each message is delivered.
#[derive(Clone, Default)]
pub(crate) struct OutboxNetwork {
    outbox: Arc<Mutex<Vec<Outgoing>>>,
}

impl OutboxNetwork {
    pub(crate) fn drain(&self) -> Vec<Outgoing> {
        std::mem::take(&mut *self.outbox.lock().unwrap())
    }
}

impl Network for OutboxNetwork {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn update_validator_set(&mut self, _: ValidatorSet) {}

    fn broadcast(&mut self, message: Message) {
        self.outbox.lock().unwrap().push((None, message))
    }

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        self.outbox.lock().unwrap().push((Some(peer), message))
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        None
    }
}
