/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions for receiving messages from the P2P network.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::driver::DriverEvent;

use super::network::Network;

/// Spawn the poller thread, which polls the [`Network`] for messages and feeds them into the driver's
/// event queue, in the order the network delivers them.
///
/// The thread exits when `shutdown_signal` fires, or when the event queue is gone.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    event_queue: Sender<DriverEvent>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, message)) = network.recv() {
            if event_queue
                .send(DriverEvent::Message { origin, message })
                .is_err()
            {
                return;
            }
        } else {
            thread::yield_now()
        }
    })
}
