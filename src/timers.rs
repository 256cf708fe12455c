/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! One-shot timers that feed the driver's event queue.
//!
//! Timers are never cancelled. Every timer carries the identifier of what it times (a
//! [`ScheduledTimeout`] or a [`RequestId`]), and the component that armed it ignores the firing if
//! that identifier is no longer current.

use std::{
    collections::BTreeMap,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    driver::DriverEvent, pacemaker::types::ScheduledTimeout, types::data_types::RequestId,
};

/// What a timer delivers when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    ViewTimeout(ScheduledTimeout),
    SyncTimeout(RequestId),
}

impl From<TimerEvent> for DriverEvent {
    fn from(value: TimerEvent) -> Self {
        match value {
            TimerEvent::ViewTimeout(timeout) => DriverEvent::ViewTimeout(timeout),
            TimerEvent::SyncTimeout(request_id) => DriverEvent::SyncTimeout(request_id),
        }
    }
}

/// A service that delivers `event` back to the driver once `after` has elapsed.
pub trait Timer {
    fn schedule(&mut self, after: Duration, event: TimerEvent);
}

/// A [`Timer`] backed by a thread, which delivers due timers into the driver's event queue.
///
/// The thread exits once every `ThreadTimer` handle is dropped, or once the event queue is gone.
#[derive(Clone)]
pub struct ThreadTimer {
    requests: Sender<(Instant, TimerEvent)>,
}

impl ThreadTimer {
    pub(crate) fn start(event_queue: Sender<DriverEvent>) -> (ThreadTimer, JoinHandle<()>) {
        let (requests, request_receiver) = mpsc::channel();
        let timer_thread = thread::spawn(move || run_timers(request_receiver, event_queue));
        (ThreadTimer { requests }, timer_thread)
    }
}

impl Timer for ThreadTimer {
    fn schedule(&mut self, after: Duration, event: TimerEvent) {
        // The timer thread only stops after the event queue is gone, at which point no one waits
        // for the event anyway.
        let _ = self.requests.send((Instant::now() + after, event));
    }
}

fn run_timers(requests: Receiver<(Instant, TimerEvent)>, event_queue: Sender<DriverEvent>) {
    // Keyed by deadline, then by arrival, so that timers with equal deadlines fire in order.
    let mut pending: BTreeMap<(Instant, u64), TimerEvent> = BTreeMap::new();
    let mut arrivals = 0u64;

    loop {
        let received = match pending.keys().next() {
            Some((deadline, _)) => {
                requests.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => requests
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok((deadline, event)) => {
                pending.insert((deadline, arrivals), event);
                arrivals += 1;
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }

        let now = Instant::now();
        while let Some(entry) = pending.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let event = entry.remove();
            if event_queue.send(event.into()).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::types::data_types::{EpochNumber, ViewNumber};

    use super::*;

    #[test]
    fn timers_fire_in_deadline_order() {
        let (event_queue, events) = mpsc::channel();
        let (mut timer, timer_thread) = ThreadTimer::start(event_queue);

        let view_timeout = ScheduledTimeout {
            epoch: EpochNumber::new(0),
            view: ViewNumber::new(1),
            attempt: 0,
        };
        timer.schedule(
            Duration::from_millis(60),
            TimerEvent::ViewTimeout(view_timeout),
        );
        timer.schedule(
            Duration::from_millis(10),
            TimerEvent::SyncTimeout(RequestId::new(7)),
        );

        let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, DriverEvent::SyncTimeout(id) if id == RequestId::new(7)));
        let second = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(second, DriverEvent::ViewTimeout(timeout) if timeout == view_timeout));

        drop(timer);
        timer_thread.join().unwrap();
    }
}
