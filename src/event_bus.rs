/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which runs the registered handlers of every published [`Event`].

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// The handlers to run for each kind of event.
#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) insert_vertex_handlers: Vec<HandlerPtr<InsertVertexEvent>>,
    pub(crate) commit_vertex_handlers: Vec<HandlerPtr<CommitVertexEvent>>,
    pub(crate) prune_vertex_handlers: Vec<HandlerPtr<PruneVertexEvent>>,
    pub(crate) update_high_qc_handlers: Vec<HandlerPtr<UpdateHighQcEvent>>,
    pub(crate) epoch_change_handlers: Vec<HandlerPtr<EpochChangeEvent>>,

    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) timeout_vote_handlers: Vec<HandlerPtr<TimeoutVoteEvent>>,

    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) receive_timeout_vote_handlers: Vec<HandlerPtr<ReceiveTimeoutVoteEvent>>,

    pub(crate) start_view_handlers: Vec<HandlerPtr<StartViewEvent>>,
    pub(crate) view_timeout_handlers: Vec<HandlerPtr<ViewTimeoutEvent>>,
    pub(crate) collect_qc_handlers: Vec<HandlerPtr<CollectQcEvent>>,
    pub(crate) collect_tc_handlers: Vec<HandlerPtr<CollectTcEvent>>,

    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) reject_sync_response_handlers: Vec<HandlerPtr<RejectSyncResponseEvent>>,
    pub(crate) receive_sync_request_handlers: Vec<HandlerPtr<ReceiveSyncRequestEvent>>,
}

impl EventHandlers {
    /// Create a set of handlers that, if `log_events` is set, contains the default logger of every
    /// event.
    pub(crate) fn new(log_events: bool) -> EventHandlers {
        let mut handlers = EventHandlers::default();
        if log_events {
            handlers.insert_vertex_handlers.push(InsertVertexEvent::get_logger());
            handlers.commit_vertex_handlers.push(CommitVertexEvent::get_logger());
            handlers.prune_vertex_handlers.push(PruneVertexEvent::get_logger());
            handlers.update_high_qc_handlers.push(UpdateHighQcEvent::get_logger());
            handlers.epoch_change_handlers.push(EpochChangeEvent::get_logger());

            handlers.propose_handlers.push(ProposeEvent::get_logger());
            handlers.vote_handlers.push(VoteEvent::get_logger());
            handlers.timeout_vote_handlers.push(TimeoutVoteEvent::get_logger());

            handlers.receive_proposal_handlers.push(ReceiveProposalEvent::get_logger());
            handlers.receive_vote_handlers.push(ReceiveVoteEvent::get_logger());
            handlers
                .receive_timeout_vote_handlers
                .push(ReceiveTimeoutVoteEvent::get_logger());

            handlers.start_view_handlers.push(StartViewEvent::get_logger());
            handlers.view_timeout_handlers.push(ViewTimeoutEvent::get_logger());
            handlers.collect_qc_handlers.push(CollectQcEvent::get_logger());
            handlers.collect_tc_handlers.push(CollectTcEvent::get_logger());

            handlers.start_sync_handlers.push(StartSyncEvent::get_logger());
            handlers.end_sync_handlers.push(EndSyncEvent::get_logger());
            handlers
                .reject_sync_response_handlers
                .push(RejectSyncResponseEvent::get_logger());
            handlers
                .receive_sync_request_handlers
                .push(ReceiveSyncRequestEvent::get_logger());
        }
        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_vertex_handlers.is_empty()
            && self.commit_vertex_handlers.is_empty()
            && self.prune_vertex_handlers.is_empty()
            && self.update_high_qc_handlers.is_empty()
            && self.epoch_change_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.timeout_vote_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.receive_timeout_vote_handlers.is_empty()
            && self.start_view_handlers.is_empty()
            && self.view_timeout_handlers.is_empty()
            && self.collect_qc_handlers.is_empty()
            && self.collect_tc_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.reject_sync_response_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::InsertVertex(insert_vertex_event) => self
                .insert_vertex_handlers
                .iter()
                .for_each(|handler| handler(&insert_vertex_event)),

            Event::CommitVertex(commit_vertex_event) => self
                .commit_vertex_handlers
                .iter()
                .for_each(|handler| handler(&commit_vertex_event)),

            Event::PruneVertex(prune_vertex_event) => self
                .prune_vertex_handlers
                .iter()
                .for_each(|handler| handler(&prune_vertex_event)),

            Event::UpdateHighQc(update_high_qc_event) => self
                .update_high_qc_handlers
                .iter()
                .for_each(|handler| handler(&update_high_qc_event)),

            Event::EpochChange(epoch_change_event) => self
                .epoch_change_handlers
                .iter()
                .for_each(|handler| handler(&epoch_change_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Vote(vote_event) => self
                .vote_handlers
                .iter()
                .for_each(|handler| handler(&vote_event)),

            Event::TimeoutVote(timeout_vote_event) => self
                .timeout_vote_handlers
                .iter()
                .for_each(|handler| handler(&timeout_vote_event)),

            Event::ReceiveProposal(receive_proposal_event) => self
                .receive_proposal_handlers
                .iter()
                .for_each(|handler| handler(&receive_proposal_event)),

            Event::ReceiveVote(receive_vote_event) => self
                .receive_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_vote_event)),

            Event::ReceiveTimeoutVote(receive_timeout_vote_event) => self
                .receive_timeout_vote_handlers
                .iter()
                .for_each(|handler| handler(&receive_timeout_vote_event)),

            Event::StartView(start_view_event) => self
                .start_view_handlers
                .iter()
                .for_each(|handler| handler(&start_view_event)),

            Event::ViewTimeout(view_timeout_event) => self
                .view_timeout_handlers
                .iter()
                .for_each(|handler| handler(&view_timeout_event)),

            Event::CollectQc(collect_qc_event) => self
                .collect_qc_handlers
                .iter()
                .for_each(|handler| handler(&collect_qc_event)),

            Event::CollectTc(collect_tc_event) => self
                .collect_tc_handlers
                .iter()
                .for_each(|handler| handler(&collect_tc_event)),

            Event::StartSync(start_sync_event) => self
                .start_sync_handlers
                .iter()
                .for_each(|handler| handler(&start_sync_event)),

            Event::EndSync(end_sync_event) => self
                .end_sync_handlers
                .iter()
                .for_each(|handler| handler(&end_sync_event)),

            Event::RejectSyncResponse(reject_sync_response_event) => self
                .reject_sync_response_handlers
                .iter()
                .for_each(|handler| handler(&reject_sync_response_event)),

            Event::ReceiveSyncRequest(receive_sync_request_event) => self
                .receive_sync_request_handlers
                .iter()
                .for_each(|handler| handler(&receive_sync_request_event)),
        }
    }
}

/// Spawn the event bus thread, which fires the handlers of every event received on `event_subscriber`
/// until `shutdown_signal` fires or every publisher is gone.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
