/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus driver: the single-threaded actor that ties every component of a replica together.
//!
//! # Event processing
//!
//! A [`ConsensusDriver`] owns the [vertex store](crate::vertex_store), the
//! [pacemaker](crate::pacemaker), the [safety rules](crate::safety), the
//! [collectors](crate::quorum), the [epoch manager](crate::epoch_manager), the
//! [committed ledger](crate::ledger) and the [sync coordinator](crate::sync). It is driven by
//! [`DriverEvent`]s, which it handles one at a time through [`handle`](ConsensusDriver::handle):
//! 1. `Message`: a consensus or sync message received from a peer.
//! 2. `ViewTimeout`: a view timer armed by the driver fired.
//! 3. `SyncTimeout`: the timer of a sync request fired.
//!
//! The driver never blocks. Outgoing messages are handed to the [`Network`], timers to the
//! [`Timer`], and messages addressed to the replica itself are kept in a loopback queue that the
//! caller drains with [`take_loopback`](ConsensusDriver::take_loopback) and feeds back as events.
//!
//! # Persistence
//!
//! The safety rules are written to the key-value store before every vote and timeout vote leaves the
//! replica. The vertex store is written after every event that changed it, and the whole
//! [`Checkpoint`] after every epoch change. A driver created over the same store after a crash
//! resumes from the checkpoint and never votes twice in one view.
//!
//! # Errors
//!
//! Invalid or unexpected messages are dropped. [`DriverError`]s are reserved for conditions that
//! the driver cannot recover from, the most important being a [`SafetyViolation`]. The caller
//! should stop feeding events to a driver that returned an error.

use std::{
    fmt::{self, Display, Formatter},
    sync::{mpsc::Sender, Arc},
    time::{Duration, SystemTime},
};

use log::debug;

use crate::{
    epoch_manager::{EpochError, EpochManager, EpochRelation, EpochState},
    events::*,
    ledger::{CommittedLedger, ExecutionEngine, LedgerError},
    metrics::SystemCounters,
    networking::{
        messages::{ConsensusMessage, Message, SyncMessage},
        network::Network,
        sending::SenderHandle,
    },
    pacemaker::{
        messages::{Proposal, TimeoutVote, Vote},
        types::{PacemakerConfig, ScheduledTimeout, ViewTimeoutSchedule},
        Pacemaker,
    },
    persistence::{
        checkpoint::{save_safety_rules, save_vertex_store},
        Checkpoint, KVStore, PersistenceError,
    },
    quorum::{collectors::MAX_VIEWS_AHEAD, TimeoutVoteCollector, VoteCollector},
    safety::{SafetyChecker, SafetyRules, SafetyViolation},
    sync::{
        messages::{GetVerticesRequest, GetVerticesResponse, SyncRequest, SyncResponse},
        server::respond_to_sync_request,
        vertex_fetch::MAX_VERTICES_PER_REQUEST,
        LedgerSyncCoordinator, SyncRequestAction, SyncResponseOutcome, VerifiedSync, VertexFetcher,
    },
    timers::{Timer, TimerEvent},
    types::{
        certificates::{BftHeader, LedgerProof, QuorumCertificate, TimeoutCertificate, VoteData},
        crypto_primitives::{Keypair, VerifyingKey},
        data_types::{CryptoHash, EpochNumber, RequestId, ViewNumber},
        ledger_header::LedgerHeader,
        vertex::Vertex,
    },
    vertex_store::{QcOutcome, VertexStore, VertexStoreError},
};

/// Something that happened to the replica, and that the driver has to react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    Message { origin: VerifyingKey, message: Message },
    ViewTimeout(ScheduledTimeout),
    SyncTimeout(RequestId),
}

/// Parameters of a [`ConsensusDriver`].
#[derive(Clone)]
pub struct DriverConfiguration {
    pub keypair: Keypair,
    pub pacemaker: PacemakerConfig,
    pub sync_request_timeout: Duration,
    /// Number of committed `EpochView`s the local safety checker remembers.
    pub safety_history_limit: usize,
    pub future_message_buffer_capacity: usize,
    /// Number of proposals that may wait for missing ancestors at once.
    pub vertex_fetch_capacity: usize,
    /// If set, a vertex at this view or above ends its epoch.
    pub epoch_ceiling_view: Option<ViewNumber>,
    pub first_sync_request_id: u64,
}

/// The consensus state machine of one replica.
pub struct ConsensusDriver<N: Network, K: KVStore, E: ExecutionEngine, T: Timer> {
    config: DriverConfiguration,
    me: VerifyingKey,
    sender: SenderHandle<N>,
    kv_store: K,
    engine: E,
    timer: T,
    epoch_manager: EpochManager,
    vertex_store: VertexStore,
    pacemaker: Pacemaker,
    safety_rules: SafetyRules,
    safety_checker: SafetyChecker,
    vote_collector: VoteCollector,
    timeout_vote_collector: TimeoutVoteCollector,
    // A quorum certificate formed out of votes for a vertex that has not arrived yet.
    pending_qc: Option<QuorumCertificate>,
    ledger: CommittedLedger,
    sync: LedgerSyncCoordinator,
    fetcher: VertexFetcher,
    counters: SystemCounters,
    event_publisher: Option<Sender<Event>>,
    restore: Option<(Vec<Vertex>, QuorumCertificate)>,
    vertex_store_dirty: bool,
}

impl<N: Network, K: KVStore, E: ExecutionEngine, T: Timer> ConsensusDriver<N, K, E, T> {
    /// Create a driver that resumes from the checkpoint in `kv_store`.
    ///
    /// The store must have been initialized with
    /// [`Replica::initialize`](crate::replica::Replica::initialize). The driver does nothing until
    /// [`start`](Self::start) is called.
    pub fn new(
        config: DriverConfiguration,
        network: N,
        kv_store: K,
        engine: E,
        timer: T,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, DriverError> {
        let checkpoint = Checkpoint::load(&kv_store)?.ok_or(DriverError::Uninitialized)?;
        let me = config.keypair.public();
        let epoch = checkpoint.epoch;
        let validator_set = Arc::new(checkpoint.validator_set);

        let mut safety_checker = SafetyChecker::new(config.safety_history_limit);
        safety_checker.seed(&checkpoint.root);

        let mut ledger = CommittedLedger::new(checkpoint.root.ledger_header);
        if let Some(proof) = LedgerProof::from_qc(checkpoint.root_qc.clone()) {
            ledger.record_proof(proof);
        }

        Ok(Self {
            me,
            sender: SenderHandle::new(network, me),
            kv_store,
            engine,
            timer,
            epoch_manager: EpochManager::new(
                EpochState {
                    epoch,
                    validator_set: validator_set.clone(),
                },
                config.future_message_buffer_capacity,
            ),
            vertex_store: VertexStore::new(checkpoint.root, checkpoint.root_qc),
            pacemaker: Pacemaker::new(config.pacemaker.clone(), epoch, validator_set.clone()),
            safety_rules: checkpoint.safety_rules,
            safety_checker,
            vote_collector: VoteCollector::new(epoch, validator_set.clone()),
            timeout_vote_collector: TimeoutVoteCollector::new(epoch, validator_set),
            pending_qc: None,
            ledger,
            sync: LedgerSyncCoordinator::new(
                config.sync_request_timeout,
                config.first_sync_request_id,
            ),
            fetcher: VertexFetcher::new(config.vertex_fetch_capacity),
            counters: SystemCounters::default(),
            event_publisher,
            restore: Some((checkpoint.speculative_vertices, checkpoint.high_qc)),
            vertex_store_dirty: false,
            config,
        })
    }

    /// Restore the speculative vertices of the checkpoint, and enter the first view.
    ///
    /// The first view is the one after the highest quorum certificate, or the last view the replica
    /// voted in if that is higher. Re-entering a view that the replica already voted in lets it time
    /// the view out, but never vote in it again.
    pub fn start(&mut self) -> Result<(), DriverError> {
        self.sender
            .init_validator_set((**self.epoch_manager.validator_set()).clone());

        if let Some((vertices, high_qc)) = self.restore.take() {
            if self.restore_vertex_store(vertices, high_qc)? {
                return self.save_vertex_store_if_dirty();
            }
        }

        let root = *self.vertex_store.root();
        if root.ledger_header.end_of_epoch {
            self.change_epoch(root.ledger_header)?;
            return self.save_vertex_store_if_dirty();
        }

        let mut view = self.vertex_store.high_qc().view() + 1;
        if let Some(last_voted) = self.safety_rules.last_voted() {
            if last_voted.epoch == self.epoch() {
                view = view.max(last_voted.view);
            }
        }
        if let Some(schedule) = self
            .pacemaker
            .enter_view(view, self.highest_committed_view())
        {
            self.on_new_view(schedule)?;
        }
        self.save_vertex_store_if_dirty()
    }

    /// React to `event`.
    pub fn handle(&mut self, event: DriverEvent) -> Result<(), DriverError> {
        match event {
            DriverEvent::Message { origin, message } => match message {
                Message::ConsensusMessage(message) => self.on_consensus_message(origin, message)?,
                Message::SyncMessage(message) => self.on_sync_message(origin, message)?,
            },
            DriverEvent::ViewTimeout(timeout) => self.on_view_timeout(timeout)?,
            DriverEvent::SyncTimeout(request_id) => self.on_sync_timeout(request_id),
        }
        self.save_vertex_store_if_dirty()
    }

    /// Take the messages that this replica sent to itself, as events to be handled next.
    pub fn take_loopback(&mut self) -> Vec<DriverEvent> {
        let mut events = Vec::new();
        while let Some((origin, message)) = self.sender.take_loopback() {
            events.push(DriverEvent::Message { origin, message });
        }
        events
    }

    pub fn me(&self) -> VerifyingKey {
        self.me
    }

    pub fn epoch(&self) -> EpochNumber {
        self.epoch_manager.epoch()
    }

    pub fn current_view(&self) -> ViewNumber {
        self.pacemaker.current_view()
    }

    pub fn counters(&self) -> &SystemCounters {
        &self.counters
    }

    pub fn ledger(&self) -> &CommittedLedger {
        &self.ledger
    }

    pub fn vertex_store(&self) -> &VertexStore {
        &self.vertex_store
    }

    pub fn safety_rules(&self) -> &SafetyRules {
        &self.safety_rules
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.is_syncing()
    }

    /* ↓↓↓ Consensus messages ↓↓↓ */

    fn on_consensus_message(
        &mut self,
        origin: VerifyingKey,
        message: ConsensusMessage,
    ) -> Result<(), DriverError> {
        match self.epoch_manager.classify(message.epoch()) {
            EpochRelation::Past => Ok(()),
            EpochRelation::Future => {
                self.on_future_message(origin, message);
                Ok(())
            }
            EpochRelation::Current => match message {
                ConsensusMessage::Proposal(proposal) => self.on_proposal(origin, proposal),
                ConsensusMessage::Vote(vote) => self.on_vote(origin, vote),
                ConsensusMessage::TimeoutVote(timeout_vote) => {
                    self.on_timeout_vote(origin, timeout_vote)
                }
            },
        }
    }

    /// Buffer a message of a later epoch, and try to catch up with its sender.
    ///
    /// The certificates of a later epoch cannot be verified before its validator set is known, so the
    /// header the message refers to only serves as a sync target. Responses are verified against the
    /// validator sets this replica knows.
    fn on_future_message(&mut self, origin: VerifyingKey, message: ConsensusMessage) {
        let hint = match &message {
            ConsensusMessage::Proposal(proposal) => proposal.vertex.qc.proposed().ledger_header,
            ConsensusMessage::Vote(vote) => vote.vote_data.parent.ledger_header,
            ConsensusMessage::TimeoutVote(timeout_vote) => {
                timeout_vote.high_qc.proposed().ledger_header
            }
        };
        if !self.epoch_manager.buffer_future_message(origin, message) {
            self.counters.future_messages_dropped += 1;
        }
        self.sync_towards(&hint, origin);
    }

    fn on_proposal(&mut self, origin: VerifyingKey, proposal: Proposal) -> Result<(), DriverError> {
        Event::publish(
            &self.event_publisher,
            Event::ReceiveProposal(ReceiveProposalEvent {
                timestamp: SystemTime::now(),
                origin,
                proposal: proposal.clone(),
            }),
        );

        let leader = self.pacemaker.leader(proposal.vertex.view);
        if origin != leader || proposal.vertex.proposer != leader.to_bytes() {
            debug!(
                "Dropping proposal for view {} that was not sent by its leader",
                proposal.vertex.view
            );
            self.counters.proposals_rejected += 1;
            return Ok(());
        }

        if let Some(tc) = &proposal.high_tc {
            self.on_received_tc(tc)?;
        }

        let header = match self.insert_vertex(proposal.vertex.clone())? {
            StoreUpdate::Applied(header) => header,
            StoreUpdate::EpochChanged => return Ok(()),
            StoreUpdate::Refused(VertexStoreError::MissingParent {
                parent,
                parent_view,
                ..
            }) => {
                self.on_missing_parent(origin, proposal, parent, parent_view);
                return Ok(());
            }
            StoreUpdate::Refused(error) => {
                debug!("Dropping proposal for view {}: {}", proposal.vertex.view, error);
                self.counters.proposals_rejected += 1;
                return Ok(());
            }
        };

        if let Some(schedule) = self
            .pacemaker
            .process_qc(&proposal.vertex.qc, self.highest_committed_view())
        {
            self.on_new_view(schedule)?;
        }

        if proposal.vertex.view == self.pacemaker.current_view() {
            self.vote(&proposal.vertex, header)?;
        }

        let pending_qc_unblocked = self
            .pending_qc
            .as_ref()
            .is_some_and(|qc| qc.proposed().vertex_id == header.vertex_id);
        if pending_qc_unblocked {
            if let Some(qc) = self.pending_qc.take() {
                self.on_qc(None, qc)?;
            }
        }

        Ok(())
    }

    fn vote(&mut self, vertex: &Vertex, header: BftHeader) -> Result<(), DriverError> {
        if !self.is_validator() {
            return Ok(());
        }
        if let Err(refusal) = self.safety_rules.check_vote(vertex) {
            debug!("Not voting for vertex {}: {}", header.vertex_id, refusal);
            return Ok(());
        }
        self.safety_rules.record_vote(vertex);
        save_safety_rules(&mut self.kv_store, &self.safety_rules)?;

        let vote = Vote::new(
            &self.config.keypair,
            vertex.epoch,
            VoteData::new(header, *vertex.parent()),
        );
        self.counters.votes_sent += 1;
        Event::publish(
            &self.event_publisher,
            Event::Vote(VoteEvent {
                timestamp: SystemTime::now(),
                vote: vote.clone(),
            }),
        );

        let next_leader = self.pacemaker.leader(vertex.view + 1);
        self.sender.send(next_leader, vote);
        Ok(())
    }

    fn on_vote(&mut self, origin: VerifyingKey, vote: Vote) -> Result<(), DriverError> {
        Event::publish(
            &self.event_publisher,
            Event::ReceiveVote(ReceiveVoteEvent {
                timestamp: SystemTime::now(),
                origin,
                vote: vote.clone(),
            }),
        );

        let view = vote.view();
        if view > self.pacemaker.current_view() + MAX_VIEWS_AHEAD {
            debug!("Dropping vote for view {}, which is too far ahead", view);
            return Ok(());
        }
        if self.pacemaker.leader(view + 1) != self.me {
            return Ok(());
        }

        let qc = match self.vote_collector.collect(&origin, &vote) {
            Ok(Some(qc)) => qc,
            Ok(None) => return Ok(()),
            Err(error) => {
                debug!("Dropping vote from {:?}: {:?}", origin, error);
                return Ok(());
            }
        };

        self.counters.qcs_formed += 1;
        Event::publish(
            &self.event_publisher,
            Event::CollectQc(CollectQcEvent {
                timestamp: SystemTime::now(),
                quorum_certificate: qc.clone(),
            }),
        );
        self.on_qc(None, qc)?;
        Ok(())
    }

    fn on_timeout_vote(
        &mut self,
        origin: VerifyingKey,
        timeout_vote: TimeoutVote,
    ) -> Result<(), DriverError> {
        Event::publish(
            &self.event_publisher,
            Event::ReceiveTimeoutVote(ReceiveTimeoutVoteEvent {
                timestamp: SystemTime::now(),
                origin,
                timeout_vote: timeout_vote.clone(),
            }),
        );

        let high_qc = &timeout_vote.high_qc;
        if high_qc.epoch == self.epoch() && high_qc.view() > self.vertex_store.high_qc().view() {
            if self.on_qc(Some(origin), high_qc.clone())? {
                return Ok(());
            }
        }
        if let Some(tc) = &timeout_vote.high_tc {
            self.on_received_tc(tc)?;
        }

        let tc = match self.timeout_vote_collector.collect(&origin, &timeout_vote) {
            Ok(Some(tc)) => tc,
            Ok(None) => return Ok(()),
            Err(error) => {
                debug!("Dropping timeout vote from {:?}: {:?}", origin, error);
                return Ok(());
            }
        };

        self.counters.tcs_formed += 1;
        Event::publish(
            &self.event_publisher,
            Event::CollectTc(CollectTcEvent {
                timestamp: SystemTime::now(),
                timeout_certificate: tc.clone(),
            }),
        );
        self.vertex_store.insert_timeout_certificate(tc.clone());
        if let Some(schedule) = self.pacemaker.process_tc(&tc, self.highest_committed_view()) {
            self.on_new_view(schedule)?;
        }
        Ok(())
    }

    /// Enter the view after the one `tc` times out, if `tc` is a correct certificate of the current
    /// epoch for the current view or a later one.
    fn on_received_tc(&mut self, tc: &TimeoutCertificate) -> Result<(), DriverError> {
        if tc.epoch != self.epoch() || tc.view < self.pacemaker.current_view() {
            return Ok(());
        }
        if !tc.is_correct(self.epoch_manager.validator_set()) {
            debug!("Dropping incorrect timeout certificate for view {}", tc.view);
            return Ok(());
        }
        self.vertex_store.insert_timeout_certificate(tc.clone());
        if let Some(schedule) = self.pacemaker.process_tc(tc, self.highest_committed_view()) {
            self.on_new_view(schedule)?;
        }
        Ok(())
    }

    /// Process a quorum certificate that was formed locally (`origin` is `None`) or received inside a
    /// message from `origin`. Returns whether the epoch changed.
    fn on_qc(
        &mut self,
        origin: Option<VerifyingKey>,
        qc: QuorumCertificate,
    ) -> Result<bool, DriverError> {
        match self.add_qc(&qc)? {
            StoreUpdate::Applied(()) => (),
            StoreUpdate::EpochChanged => return Ok(true),
            StoreUpdate::Refused(VertexStoreError::MissingVertex { .. }) => match origin {
                // Wait for the proposal, so that the next proposal can extend the certified vertex.
                None => {
                    self.pending_qc = Some(qc);
                    return Ok(false);
                }
                Some(origin) => {
                    if let Some(committed) = qc.committed() {
                        let committed = committed.ledger_header;
                        self.sync_towards(&committed, origin);
                    }
                }
            },
            StoreUpdate::Refused(error) => {
                debug!("Dropping quorum certificate for view {}: {}", qc.view(), error);
                return Ok(false);
            }
        }

        if let Some(schedule) = self
            .pacemaker
            .process_qc(&qc, self.highest_committed_view())
        {
            self.on_new_view(schedule)?;
        }
        Ok(false)
    }

    /* ↓↓↓ Views ↓↓↓ */

    fn on_new_view(&mut self, schedule: ViewTimeoutSchedule) -> Result<(), DriverError> {
        self.timer
            .schedule(schedule.duration, TimerEvent::ViewTimeout(schedule.timeout));

        let epoch = schedule.timeout.epoch;
        let view = schedule.timeout.view;
        let leader = self.pacemaker.leader(view);
        Event::publish(
            &self.event_publisher,
            Event::StartView(StartViewEvent {
                timestamp: SystemTime::now(),
                leader,
                epoch,
                view,
            }),
        );

        // Votes for the previous view may still complete a certificate.
        let keep_from = ViewNumber::new(view.int().saturating_sub(1));
        self.vote_collector.prune_below(keep_from);
        self.timeout_vote_collector.prune_below(keep_from);

        if leader == self.me {
            self.propose(view);
        }
        Ok(())
    }

    fn propose(&mut self, view: ViewNumber) {
        let high_qc = self.vertex_store.high_qc().clone();
        if high_qc.view() >= view {
            return;
        }
        let parent = *high_qc.proposed();
        let high_tc = self
            .vertex_store
            .highest_tc()
            .filter(|tc| tc.view + 1 == view)
            .cloned();

        // Vertices after the end of an epoch only carry certificates.
        let commands = if parent.ledger_header.end_of_epoch {
            Vec::new()
        } else {
            let prepared = self.vertex_store.prepared_commands(&parent.vertex_id);
            self.engine.next_commands(view, &prepared)
        };

        let proposal = Proposal {
            vertex: Vertex::new(self.epoch(), view, high_qc, self.me.to_bytes(), commands),
            high_tc,
        };
        self.counters.proposals_sent += 1;
        Event::publish(
            &self.event_publisher,
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                proposal: proposal.clone(),
            }),
        );
        self.sender.broadcast(proposal);
    }

    fn on_view_timeout(&mut self, timeout: ScheduledTimeout) -> Result<(), DriverError> {
        let schedule = match self
            .pacemaker
            .on_local_timeout(timeout, self.highest_committed_view())
        {
            Some(schedule) => schedule,
            None => return Ok(()),
        };

        self.timer
            .schedule(schedule.duration, TimerEvent::ViewTimeout(schedule.timeout));
        if timeout.attempt == 0 {
            self.counters.timed_out_views += 1;
        }
        Event::publish(
            &self.event_publisher,
            Event::ViewTimeout(ViewTimeoutEvent {
                timestamp: SystemTime::now(),
                epoch: timeout.epoch,
                view: timeout.view,
                attempt: timeout.attempt,
                timeout: schedule.duration,
            }),
        );

        // Observers follow the epoch through proposals, but never vote.
        if !self.is_validator() {
            return Ok(());
        }

        self.safety_rules.record_timeout_vote(timeout.epoch_view());
        save_safety_rules(&mut self.kv_store, &self.safety_rules)?;

        let timeout_vote = TimeoutVote::new(
            &self.config.keypair,
            timeout.epoch,
            timeout.view,
            self.vertex_store.high_qc().clone(),
            self.vertex_store.highest_tc().cloned(),
        );
        self.counters.timeout_votes_sent += 1;
        Event::publish(
            &self.event_publisher,
            Event::TimeoutVote(TimeoutVoteEvent {
                timestamp: SystemTime::now(),
                timeout_vote: timeout_vote.clone(),
            }),
        );
        self.sender.broadcast(timeout_vote);
        Ok(())
    }

    /* ↓↓↓ Vertex store ↓↓↓ */

    fn insert_vertex(&mut self, vertex: Vertex) -> Result<StoreUpdate<BftHeader>, DriverError> {
        let validator_set = self.epoch_manager.validator_set().clone();
        let engine = &self.engine;
        let ceiling = self.config.epoch_ceiling_view;
        let result = self.vertex_store.insert_vertex(
            vertex.clone(),
            &validator_set,
            |vertex| ends_epoch(engine, ceiling, vertex),
            &mut self.safety_checker,
        );

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(VertexStoreError::Safety(violation)) => return Err(DriverError::Fatal(violation)),
            Err(error) => return Ok(StoreUpdate::Refused(error)),
        };

        if outcome.newly_inserted {
            self.vertex_store_dirty = true;
            Event::publish(
                &self.event_publisher,
                Event::InsertVertex(InsertVertexEvent {
                    timestamp: SystemTime::now(),
                    vertex,
                    header: outcome.header,
                }),
            );
        }
        if self.apply_qc_outcome(outcome.qc_outcome)? {
            return Ok(StoreUpdate::EpochChanged);
        }
        Ok(StoreUpdate::Applied(outcome.header))
    }

    fn add_qc(&mut self, qc: &QuorumCertificate) -> Result<StoreUpdate<()>, DriverError> {
        let validator_set = self.epoch_manager.validator_set().clone();
        let outcome = match self
            .vertex_store
            .add_qc(qc, &validator_set, &mut self.safety_checker)
        {
            Ok(outcome) => outcome,
            Err(VertexStoreError::Safety(violation)) => return Err(DriverError::Fatal(violation)),
            Err(error) => return Ok(StoreUpdate::Refused(error)),
        };

        if self.apply_qc_outcome(outcome)? {
            return Ok(StoreUpdate::EpochChanged);
        }
        Ok(StoreUpdate::Applied(()))
    }

    /// Hand newly committed vertices to the ledger and the execution engine, and switch epochs if the
    /// committed history now ends the epoch. Returns whether the epoch changed.
    fn apply_qc_outcome(&mut self, outcome: QcOutcome) -> Result<bool, DriverError> {
        if outcome.new_high_qc {
            self.vertex_store_dirty = true;
            Event::publish(
                &self.event_publisher,
                Event::UpdateHighQc(UpdateHighQcEvent {
                    timestamp: SystemTime::now(),
                    high_qc: self.vertex_store.high_qc().clone(),
                }),
            );
        }
        for vertex in outcome.pruned {
            Event::publish(
                &self.event_publisher,
                Event::PruneVertex(PruneVertexEvent {
                    timestamp: SystemTime::now(),
                    vertex,
                }),
            );
        }
        if outcome.committed.is_empty() {
            return Ok(false);
        }

        self.vertex_store_dirty = true;
        let mut epoch_end = None;
        for committed in outcome.committed {
            let appended = self
                .ledger
                .append(&committed.header.ledger_header, &committed.vertex.commands)?;
            for (version, command) in &appended {
                self.engine.apply(command, *version);
            }
            self.counters.vertices_committed += 1;
            self.counters.commands_committed += appended.len() as u64;
            Event::publish(
                &self.event_publisher,
                Event::CommitVertex(CommitVertexEvent {
                    timestamp: SystemTime::now(),
                    header: committed.header,
                    parent: *committed.vertex.parent(),
                }),
            );
            if epoch_end.is_none() && committed.header.ledger_header.end_of_epoch {
                epoch_end = Some(committed.header.ledger_header);
            }
        }

        if let Some(proof) = LedgerProof::from_qc(self.vertex_store.highest_committed_qc().clone()) {
            self.ledger.record_proof(proof);
        }
        let action = self.sync.on_local_commit(self.ledger.header());
        if let Some(action) = action {
            self.send_sync_request(action);
        }

        match epoch_end {
            Some(ending) => {
                self.change_epoch(ending)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-insert the speculative vertices and the highest quorum certificate of the checkpoint.
    /// Returns whether doing so changed the epoch.
    fn restore_vertex_store(
        &mut self,
        vertices: Vec<Vertex>,
        high_qc: QuorumCertificate,
    ) -> Result<bool, DriverError> {
        for vertex in vertices {
            match self.insert_vertex(vertex)? {
                StoreUpdate::Applied(_) => (),
                StoreUpdate::EpochChanged => return Ok(true),
                StoreUpdate::Refused(error) => {
                    debug!("Could not restore a speculative vertex: {}", error)
                }
            }
        }
        if high_qc.epoch == self.epoch() && high_qc.view() > self.vertex_store.high_qc().view() {
            if let StoreUpdate::EpochChanged = self.add_qc(&high_qc)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn save_vertex_store_if_dirty(&mut self) -> Result<(), DriverError> {
        if self.vertex_store_dirty {
            save_vertex_store(&mut self.kv_store, &self.vertex_store)?;
            self.vertex_store_dirty = false;
        }
        Ok(())
    }

    fn is_validator(&self) -> bool {
        self.epoch_manager.validator_set().contains(&self.me)
    }

    fn highest_committed_view(&self) -> ViewNumber {
        self.vertex_store.root().view
    }

    /* ↓↓↓ Epochs ↓↓↓ */

    /// Switch to the epoch after the one that `ending` closes, and replay the messages that were
    /// buffered for it.
    fn change_epoch(&mut self, ending: LedgerHeader) -> Result<(), DriverError> {
        let next_validator_set = self.engine.current_epoch_validator_set();
        let transition = self.epoch_manager.transition(&ending, next_validator_set)?;
        let epoch = transition.state.epoch;
        let validator_set = transition.state.validator_set;
        let genesis = transition.genesis;

        self.vertex_store
            .rebuild(genesis, QuorumCertificate::genesis(genesis));
        self.safety_checker.seed(&genesis);
        self.ledger.enter_epoch(&genesis.ledger_header);
        self.pacemaker = Pacemaker::new(self.config.pacemaker.clone(), epoch, validator_set.clone());
        self.vote_collector = VoteCollector::new(epoch, validator_set.clone());
        self.timeout_vote_collector = TimeoutVoteCollector::new(epoch, validator_set.clone());
        self.pending_qc = None;
        self.fetcher.clear();
        self.sender
            .update_validator_set((*validator_set).clone());

        self.counters.epoch_changes += 1;
        Event::publish(
            &self.event_publisher,
            Event::EpochChange(EpochChangeEvent {
                timestamp: SystemTime::now(),
                epoch,
                validator_set: validator_set.clone(),
            }),
        );

        self.checkpoint().save(&mut self.kv_store)?;
        self.vertex_store_dirty = false;

        if let Some(schedule) = self
            .pacemaker
            .enter_view(ViewNumber::new(1), ViewNumber::genesis())
        {
            self.on_new_view(schedule)?;
        }
        for (origin, message) in transition.replay {
            self.on_consensus_message(origin, message)?;
        }
        Ok(())
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            epoch: self.epoch(),
            validator_set: (**self.epoch_manager.validator_set()).clone(),
            root: *self.vertex_store.root(),
            root_qc: self.vertex_store.highest_committed_qc().clone(),
            high_qc: self.vertex_store.high_qc().clone(),
            safety_rules: self.safety_rules,
            speculative_vertices: self.vertex_store.speculative_vertices(),
        }
    }

    /* ↓↓↓ Sync ↓↓↓ */

    fn on_sync_message(
        &mut self,
        origin: VerifyingKey,
        message: SyncMessage,
    ) -> Result<(), DriverError> {
        match message {
            SyncMessage::SyncRequest(request) => {
                self.on_sync_request(origin, request);
                Ok(())
            }
            SyncMessage::SyncResponse(response) => self.on_sync_response(origin, response),
            SyncMessage::GetVerticesRequest(request) => {
                self.on_get_vertices_request(origin, request);
                Ok(())
            }
            SyncMessage::GetVerticesResponse(response) => {
                self.on_get_vertices_response(response)
            }
        }
    }

    /// Start or redirect ledger sync towards `target`, asking `origin` first.
    fn sync_towards(&mut self, target: &LedgerHeader, origin: VerifyingKey) {
        let mut peers = Vec::new();
        if origin != self.me {
            peers.push(origin);
        }
        peers.extend(
            self.epoch_manager
                .validator_set()
                .validators()
                .filter(|validator| **validator != origin && **validator != self.me)
                .copied(),
        );
        let action = self
            .sync
            .on_higher_proof_seen(target, &peers, self.ledger.header());
        if let Some(action) = action {
            self.send_sync_request(action);
        }
    }

    fn send_sync_request(&mut self, action: SyncRequestAction) {
        self.counters.sync_requests_sent += 1;
        Event::publish(
            &self.event_publisher,
            Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                peer: action.peer,
                target: action.request.target,
            }),
        );
        self.timer.schedule(
            action.timeout,
            TimerEvent::SyncTimeout(action.request.request_id),
        );
        self.sender.send(action.peer, action.request);
    }

    fn on_sync_timeout(&mut self, request_id: RequestId) {
        if self.sync.outstanding_request() == Some(request_id) {
            self.counters.sync_requests_timed_out += 1;
        }
        let action = self.sync.on_timeout(request_id, self.ledger.header());
        if let Some(action) = action {
            self.send_sync_request(action);
        }
    }

    fn on_sync_request(&mut self, origin: VerifyingKey, request: SyncRequest) {
        let response = respond_to_sync_request(&self.ledger, &request);
        Event::publish(
            &self.event_publisher,
            Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                start: request.start,
                served: response.is_some(),
            }),
        );
        if let Some(response) = response {
            self.counters.sync_requests_served += 1;
            self.sender.send(origin, response);
        }
    }

    fn on_sync_response(
        &mut self,
        origin: VerifyingKey,
        response: SyncResponse,
    ) -> Result<(), DriverError> {
        let epoch_manager = &self.epoch_manager;
        let outcome = self.sync.on_response(
            &origin,
            response,
            |epoch| epoch_manager.validator_set_of(epoch),
            self.ledger.header(),
        );

        match outcome {
            SyncResponseOutcome::Apply(verified) => self.apply_sync(origin, verified),
            SyncResponseOutcome::Stale => Ok(()),
            SyncResponseOutcome::Rejected { reason, retry } => {
                self.counters.sync_responses_rejected += 1;
                Event::publish(
                    &self.event_publisher,
                    Event::RejectSyncResponse(RejectSyncResponseEvent {
                        timestamp: SystemTime::now(),
                        peer: origin,
                        reason,
                    }),
                );
                if let Some(retry) = retry {
                    self.send_sync_request(retry);
                }
                Ok(())
            }
        }
    }

    /// Append a verified batch to the ledger, and move the vertex store past it.
    fn apply_sync(&mut self, origin: VerifyingKey, verified: VerifiedSync) -> Result<(), DriverError> {
        let terminal = *verified.terminal();
        let appended = self.ledger.append(&terminal, &verified.commands)?;
        for (version, command) in &appended {
            self.engine.apply(command, *version);
        }
        self.counters.commands_committed += appended.len() as u64;
        self.counters.sync_requests_succeeded += 1;
        self.ledger.record_proof(verified.proof.clone());
        Event::publish(
            &self.event_publisher,
            Event::EndSync(EndSyncEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                commands_synced: appended.len() as u64,
                header: *self.ledger.header(),
            }),
        );

        let committed = *verified.proof.committed();
        if committed.epoch() == self.epoch()
            && committed.epoch_view() > self.vertex_store.root().epoch_view()
        {
            self.safety_checker.seed(&committed);
            self.fetcher.clear();
            if committed.ledger_header.end_of_epoch {
                self.change_epoch(committed.ledger_header)?;
            } else {
                let qc = verified.proof.qc().clone();
                self.vertex_store.rebuild(committed, qc.clone());
                self.vertex_store_dirty = true;
                self.pending_qc = None;
                if let Some(schedule) = self
                    .pacemaker
                    .process_qc(&qc, self.highest_committed_view())
                {
                    self.on_new_view(schedule)?;
                }
            }
        }

        let action = self.sync.on_local_commit(self.ledger.header());
        if let Some(action) = action {
            self.send_sync_request(action);
        }
        Ok(())
    }

    /* ↓↓↓ Vertex fetching ↓↓↓ */

    fn on_missing_parent(
        &mut self,
        origin: VerifyingKey,
        proposal: Proposal,
        parent: CryptoHash,
        parent_view: ViewNumber,
    ) {
        // The certificate was verified before the parent was looked up.
        if let Some(committed) = proposal.vertex.qc.committed() {
            let committed = committed.ledger_header;
            if committed.epoch_view() > self.ledger.header().epoch_view() {
                self.sync_towards(&committed, origin);
                return;
            }
        }

        let request = self.fetcher.on_missing_parent(
            parent,
            parent_view,
            self.vertex_store.root().view,
            origin,
            proposal,
        );
        self.counters.vertex_requests_sent += 1;
        self.sender.send(origin, request);
    }

    fn on_get_vertices_request(&mut self, origin: VerifyingKey, request: GetVerticesRequest) {
        let count = request.count.min(MAX_VERTICES_PER_REQUEST) as usize;
        let vertices = self.vertex_store.chain_to(&request.vertex_id, count);
        if !vertices.is_empty() {
            self.sender.send(origin, GetVerticesResponse { vertices });
        }
    }

    fn on_get_vertices_response(&mut self, response: GetVerticesResponse) -> Result<(), DriverError> {
        let mut unblocked = Vec::new();
        for vertex in response.into_insertion_order() {
            let vertex_id = vertex.id();
            let qc = vertex.qc.clone();
            match self.insert_vertex(vertex)? {
                StoreUpdate::Applied(_) => {
                    // The fetched chain may certify views this replica has not entered yet.
                    if let Some(schedule) =
                        self.pacemaker.process_qc(&qc, self.highest_committed_view())
                    {
                        self.on_new_view(schedule)?;
                    }
                    unblocked.extend(self.fetcher.take_unblocked(&vertex_id));
                }
                StoreUpdate::EpochChanged => return Ok(()),
                StoreUpdate::Refused(error) => debug!("Dropping fetched vertex: {}", error),
            }
        }
        for (origin, proposal) in unblocked {
            self.on_consensus_message(origin, ConsensusMessage::Proposal(proposal))?;
        }
        Ok(())
    }
}

/// The result of an update of the vertex store that the driver can carry on from.
enum StoreUpdate<T> {
    Applied(T),
    /// The update committed the end of the epoch, and the driver moved to the next one.
    EpochChanged,
    Refused(VertexStoreError),
}

fn ends_epoch<E: ExecutionEngine>(
    engine: &E,
    ceiling: Option<ViewNumber>,
    vertex: &Vertex,
) -> bool {
    vertex
        .commands
        .iter()
        .any(|command| engine.ends_epoch(command))
        || ceiling.is_some_and(|ceiling| vertex.view >= ceiling)
}

/// A condition the driver cannot continue from.
#[derive(Debug)]
pub enum DriverError {
    /// Committing would fork the agreed history.
    Fatal(SafetyViolation),
    Persistence(PersistenceError),
    Ledger(LedgerError),
    Epoch(EpochError),
    /// The key-value store holds no checkpoint.
    Uninitialized,
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Fatal(violation) => write!(f, "safety violation: {}", violation),
            DriverError::Persistence(error) => write!(f, "persistence error: {}", error),
            DriverError::Ledger(error) => write!(f, "ledger error: {}", error),
            DriverError::Epoch(error) => write!(f, "epoch error: {:?}", error),
            DriverError::Uninitialized => write!(f, "the key-value store was never initialized"),
        }
    }
}

impl From<SafetyViolation> for DriverError {
    fn from(value: SafetyViolation) -> Self {
        DriverError::Fatal(value)
    }
}

impl From<PersistenceError> for DriverError {
    fn from(value: PersistenceError) -> Self {
        DriverError::Persistence(value)
    }
}

impl From<LedgerError> for DriverError {
    fn from(value: LedgerError) -> Self {
        DriverError::Ledger(value)
    }
}

impl From<EpochError> for DriverError {
    fn from(value: EpochError) -> Self {
        DriverError::Epoch(value)
    }
}
