/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a replica.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [`ReplicaSpec`],
//! - The function to [start](ReplicaSpec::start) a [`Replica`] given its specification,
//! - The function to [initialize](Replica::initialize) the replica's key-value store,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Threads
//!
//! A running replica consists of four threads that communicate through channels:
//! 1. The **poller** turns messages received by the [`Network`] into [`DriverEvent`]s.
//! 2. The **timer** turns due view and sync timers into [`DriverEvent`]s.
//! 3. The **driver** consumes the single queue of [`DriverEvent`]s and runs the
//!    [`ConsensusDriver`]. Every piece of consensus state is owned by this thread.
//! 4. The **event bus**, started only if some event handler is registered or `log_events` is set,
//!    runs the handlers of the [events](crate::events) that the driver publishes.
//!
//! If the driver returns an error, most importantly a safety violation, the driver thread logs it at
//! the `error` level and halts. The other threads keep running until the [`Replica`] is dropped.
//!
//! ## Starting a replica
//!
//! Here is an example that demonstrates how to build and start running a replica using the builder
//! pattern:
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .engine(engine)
//!     .network(network)
//!     .kv_store(kv_store)
//!     .configuration(configuration)
//!     .on_commit_vertex(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a replica:
//! - `.engine(...)`
//! - `.network(...)`
//! - `.kv_store(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_insert_vertex(...)`
//! - `.on_commit_vertex(...)`
//! - `.on_prune_vertex(...)`
//! - `.on_update_high_qc(...)`
//! - `.on_epoch_change(...)`
//! - `.on_propose(...)`
//! - `.on_vote(...)`
//! - `.on_timeout_vote(...)`
//! - `.on_receive_proposal(...)`
//! - `.on_receive_vote(...)`
//! - `.on_receive_timeout_vote(...)`
//! - `.on_start_view(...)`
//! - `.on_view_timeout(...)`
//! - `.on_collect_qc(...)`
//! - `.on_collect_tc(...)`
//! - `.on_start_sync(...)`
//! - `.on_end_sync(...)`
//! - `.on_reject_sync_response(...)`
//! - `.on_receive_sync_request(...)`
//!
//! The replica's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .base_timeout(Duration::from_millis(500))
//!     .timeout_rate(1.2)
//!     .max_timeout_exponent(6)
//!     .sync_request_timeout(Duration::from_secs(2))
//!     .safety_history_limit(10_000)
//!     .future_message_buffer_capacity(1024)
//!     .vertex_fetch_capacity(64)
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use ed25519_dalek::SigningKey;
use log::error;
use typed_builder::TypedBuilder;

use crate::{
    driver::{ConsensusDriver, DriverConfiguration, DriverError, DriverEvent},
    event_bus::*,
    events::*,
    ledger::ExecutionEngine,
    metrics::SystemCounters,
    networking::{receiving::start_polling, Network},
    pacemaker::types::PacemakerConfig,
    persistence::{Checkpoint, KVStore, PersistenceError},
    timers::ThreadTimer,
    types::{
        certificates::BftHeader, crypto_primitives::Keypair, data_types::ViewNumber,
        ledger_header::LedgerHeader, validator_set::ValidatorSet,
    },
};

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](ed25519_dalek::SigningKey).
/// 2. The timing of views: the base timeout, the rate at which timeouts grow with every view that
///    does not commit, and the cap on that growth. See [`PacemakerConfig`].
/// 3. The sync request timeout, after which an unanswered sync request is sent to another peer.
/// 4. The number of committed views that the local safety checker remembers.
/// 5. The capacity of the buffer of messages from future epochs. Messages that do not fit are
///    dropped.
/// 6. The number of proposals that may wait for their missing ancestors at once.
/// 7. The optional epoch ceiling view: a vertex at this view or above ends its epoch, even if none of
///    its commands does.
/// 8. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// The replica logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.base_timeout(...)`
    - `.timeout_rate(...)`
    - `.max_timeout_exponent(...)`
    - `.sync_request_timeout(...)`
    - `.safety_history_limit(...)`
    - `.future_message_buffer_capacity(...)`
    - `.vertex_fetch_capacity(...)`
    - `.log_events(...)`

    Optional:
    - `.epoch_ceiling_view(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign messages. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the timeout of a view that directly follows a commit. Required."))]
    pub base_timeout: Duration,
    #[builder(setter(
        doc = "Set the factor by which the timeout grows with every view without a commit. Required."
    ))]
    pub timeout_rate: f64,
    #[builder(setter(doc = "Set the maximum number of times the timeout grows. Required."))]
    pub max_timeout_exponent: u32,
    #[builder(setter(
        doc = "Set the duration after which an unanswered sync request is retried with another peer. Required."
    ))]
    pub sync_request_timeout: Duration,
    #[builder(setter(
        doc = "Set the number of committed views that the local safety checker remembers. Required."
    ))]
    pub safety_history_limit: usize,
    #[builder(setter(
        doc = "Set the maximum number of buffered messages from future epochs. Required."
    ))]
    pub future_message_buffer_capacity: usize,
    #[builder(setter(
        doc = "Set the maximum number of proposals waiting for missing ancestors. Required."
    ))]
    pub vertex_fetch_capacity: usize,
    #[builder(
        default,
        setter(
            strip_option,
            doc = "Set the view at which every epoch ends at the latest. Optional."
        )
    )]
    pub epoch_ceiling_view: Option<ViewNumber>,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl From<Configuration> for DriverConfiguration {
    fn from(configuration: Configuration) -> Self {
        DriverConfiguration {
            keypair: Keypair::new(configuration.me),
            pacemaker: PacemakerConfig {
                base_timeout: configuration.base_timeout,
                timeout_rate: configuration.timeout_rate,
                max_timeout_exponent: configuration.max_timeout_exponent,
            },
            sync_request_timeout: configuration.sync_request_timeout,
            safety_history_limit: configuration.safety_history_limit,
            future_message_buffer_capacity: configuration.future_message_buffer_capacity,
            vertex_fetch_capacity: configuration.vertex_fetch_capacity,
            epoch_ceiling_view: configuration.epoch_ceiling_view,
            // Responses to requests sent before a restart must not match new requests.
            first_sync_request_id: rand::random(),
        }
    }
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.engine(...)`
    - `.network(...)`
    - `.kv_store(...)`
    - `.configuration(...)`

    Optional:
    - `.on_insert_vertex(...)`
    - `.on_commit_vertex(...)`
    - `.on_prune_vertex(...)`
    - `.on_update_high_qc(...)`
    - `.on_epoch_change(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_timeout_vote(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_vote(...)`
    - `.on_receive_timeout_vote(...)`
    - `.on_start_view(...)`
    - `.on_view_timeout(...)`
    - `.on_collect_qc(...)`
    - `.on_collect_tc(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
    - `.on_reject_sync_response(...)`
    - `.on_receive_sync_request(...)`
"))]
pub struct ReplicaSpec<K: KVStore, E: ExecutionEngine, N: Network + 'static> {
    // Required parameters
    #[builder(setter(
        doc = "Set the execution engine that applies committed commands. The argument must implement the [ExecutionEngine](crate::ledger::ExecutionEngine) trait. Required."
    ))]
    engine: E,
    #[builder(setter(
        doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."
    ))]
    network: N,
    #[builder(setter(
        doc = "Set the implementation of the replica's Key-Value store. The argument must implement the [KVStore](crate::persistence::KVStore) trait. Required."
    ))]
    kv_store: K,
    #[builder(setter(
        doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."
    ))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&InsertVertexEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertVertexEvent>),
    doc = "Register a handler closure to be invoked after a vertex is inserted into the vertex store. Optional."))]
    on_insert_vertex: Option<HandlerPtr<InsertVertexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitVertexEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitVertexEvent>),
    doc = "Register a handler closure to be invoked after a vertex is committed. Optional."))]
    on_commit_vertex: Option<HandlerPtr<CommitVertexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneVertexEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PruneVertexEvent>),
    doc = "Register a handler closure to be invoked after a vertex that conflicts with a committed one is discarded. Optional."))]
    on_prune_vertex: Option<HandlerPtr<PruneVertexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateHighQcEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateHighQcEvent>),
    doc = "Register a handler closure to be invoked after the replica updates its highest QC. Optional."))]
    on_update_high_qc: Option<HandlerPtr<UpdateHighQcEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EpochChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EpochChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica moves to a new epoch. Optional."))]
    on_epoch_change: Option<HandlerPtr<EpochChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a vote. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a timeout vote. Optional."))]
    on_timeout_vote: Option<HandlerPtr<TimeoutVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveTimeoutVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveTimeoutVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a timeout vote. Optional."))]
    on_receive_timeout_vote: Option<HandlerPtr<ReceiveTimeoutVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartViewEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new view. Optional."))]
    on_start_view: Option<HandlerPtr<StartViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ViewTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ViewTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the replica's view times out. Optional."))]
    on_view_timeout: Option<HandlerPtr<ViewTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectQcEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectQcEvent>),
    doc = "Register a handler closure to be invoked after the replica collects a new quorum certificate. Optional."))]
    on_collect_qc: Option<HandlerPtr<CollectQcEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectTcEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectTcEvent>),
    doc = "Register a handler closure to be invoked after the replica collects a new timeout certificate. Optional."))]
    on_collect_tc: Option<HandlerPtr<CollectTcEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a sync request. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica applies a verified sync response. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectSyncResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectSyncResponseEvent>),
    doc = "Register a handler closure to be invoked after the replica rejects a sync response. Optional."))]
    on_reject_sync_response: Option<HandlerPtr<RejectSyncResponseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSyncRequestEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a sync request from a peer. Optional."))]
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
}

impl<K: KVStore, E: ExecutionEngine, N: Network + 'static> ReplicaSpec<K, E, N> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    ///
    /// Fails if the key-value store was never [initialized](Replica::initialize), or if its
    /// checkpoint cannot be read.
    pub fn start(self) -> Result<Replica<K>, DriverError> {
        let log_events = self.configuration.log_events;
        let driver_config = DriverConfiguration::from(self.configuration);

        let mut event_handlers = EventHandlers::new(log_events);
        event_handlers.insert_vertex_handlers.extend(self.on_insert_vertex);
        event_handlers.commit_vertex_handlers.extend(self.on_commit_vertex);
        event_handlers.prune_vertex_handlers.extend(self.on_prune_vertex);
        event_handlers.update_high_qc_handlers.extend(self.on_update_high_qc);
        event_handlers.epoch_change_handlers.extend(self.on_epoch_change);
        event_handlers.propose_handlers.extend(self.on_propose);
        event_handlers.vote_handlers.extend(self.on_vote);
        event_handlers.timeout_vote_handlers.extend(self.on_timeout_vote);
        event_handlers.receive_proposal_handlers.extend(self.on_receive_proposal);
        event_handlers.receive_vote_handlers.extend(self.on_receive_vote);
        event_handlers
            .receive_timeout_vote_handlers
            .extend(self.on_receive_timeout_vote);
        event_handlers.start_view_handlers.extend(self.on_start_view);
        event_handlers.view_timeout_handlers.extend(self.on_view_timeout);
        event_handlers.collect_qc_handlers.extend(self.on_collect_qc);
        event_handlers.collect_tc_handlers.extend(self.on_collect_tc);
        event_handlers.start_sync_handlers.extend(self.on_start_sync);
        event_handlers.end_sync_handlers.extend(self.on_end_sync);
        event_handlers
            .reject_sync_response_handlers
            .extend(self.on_reject_sync_response);
        event_handlers
            .receive_sync_request_handlers
            .extend(self.on_receive_sync_request);

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (event_queue, events) = mpsc::channel();
        let (timer, timer_thread) = ThreadTimer::start(event_queue.clone());
        let mut driver = ConsensusDriver::new(
            driver_config,
            self.network.clone(),
            self.kv_store.clone(),
            self.engine,
            timer,
            event_publisher,
        )?;
        driver.start()?;
        for event in driver.take_loopback() {
            // The receiver is owned by this function until the driver thread starts.
            let _ = event_queue.send(event);
        }
        let counters = Arc::new(Mutex::new(driver.counters().clone()));

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(self.network, event_queue.clone(), poller_shutdown_receiver);

        let (driver_shutdown, driver_shutdown_receiver) = mpsc::channel();
        let driver_thread = start_driver(
            driver,
            events,
            event_queue,
            driver_shutdown_receiver,
            counters.clone(),
        );

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Replica {
            kv_store: self.kv_store,
            counters,
            poller: Some(poller),
            poller_shutdown,
            driver: Some(driver_thread),
            driver_shutdown,
            timer: Some(timer_thread),
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// Spawn the driver thread, which handles the events of `events` one at a time.
///
/// Messages that the driver addresses to itself are put back on the queue through `event_queue`, so
/// that they interleave with messages from peers and with timers.
fn start_driver<N, K, E>(
    mut driver: ConsensusDriver<N, K, E, ThreadTimer>,
    events: Receiver<DriverEvent>,
    event_queue: Sender<DriverEvent>,
    shutdown_signal: Receiver<()>,
    counters: Arc<Mutex<SystemCounters>>,
) -> JoinHandle<()>
where
    N: Network + 'static,
    K: KVStore,
    E: ExecutionEngine,
{
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        let event = match events.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        if let Err(err) = driver.handle(event) {
            error!("Halting the replica: {}", err);
            return;
        }
        for event in driver.take_loopback() {
            let _ = event_queue.send(event);
        }

        if let Ok(mut snapshot) = counters.lock() {
            *snapshot = driver.counters().clone();
        }
    })
}

/// A handle to the background threads of a replica. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct Replica<K: KVStore> {
    kv_store: K,
    counters: Arc<Mutex<SystemCounters>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    driver: Option<JoinHandle<()>>,
    driver_shutdown: Sender<()>,
    timer: Option<JoinHandle<()>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Replica<K> {
    /// Initializes the replica's key-value store with the checkpoint of a replica that starts in the
    /// epoch that `genesis` begins, governed by `validator_set`.
    ///
    /// Every replica of a deployment must be initialized with the same arguments.
    pub fn initialize(
        mut kv_store: K,
        validator_set: ValidatorSet,
        genesis: LedgerHeader,
    ) -> Result<(), PersistenceError> {
        Checkpoint::genesis(validator_set, BftHeader::genesis(genesis)).save(&mut kv_store)
    }

    /// Read the latest persisted checkpoint of the replica.
    pub fn checkpoint(&self) -> Result<Option<Checkpoint>, PersistenceError> {
        Checkpoint::load(&self.kv_store)
    }

    /// A snapshot of the replica's counters, as of the last event the driver handled.
    pub fn counters(&self) -> SystemCounters {
        match self.counters.lock() {
            Ok(counters) => counters.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether the driver thread is still handling events. It stops after a fatal error.
    pub fn is_running(&self) -> bool {
        self.driver
            .as_ref()
            .is_some_and(|driver| !driver.is_finished())
    }
}

impl<K: KVStore> Drop for Replica<K> {
    fn drop(&mut self) {
        // The driver thread goes first. Dropping it drops the last timer handle, which stops the
        // timer thread.
        let _ = self.driver_shutdown.send(());
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}
