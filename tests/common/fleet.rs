/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`Fleet`], a deterministic, single-threaded simulation of a set of replicas.
//!
//! Every replica is a bare [`ConsensusDriver`], fed one [`DriverEvent`] at a time from a single queue
//! ordered by virtual time. Messages sent through a replica's [`OutboxNetwork`] are delivered after a
//! random delay, and may be dropped or duplicated according to the fleet's [`NetworkConditions`].
//! Timers fire at virtual deadlines. Given the same seed, a run is fully reproducible.
//!
//! The fleet feeds every [`CommitVertexEvent`](ledger_consensus::events::CommitVertexEvent) of every
//! replica to a shared [`SafetyChecker`], and panics as soon as two replicas commit conflicting
//! vertices.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        mpsc::{self, Receiver},
        Arc, Mutex,
    },
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};

use ledger_consensus::{
    driver::{ConsensusDriver, DriverConfiguration, DriverEvent},
    events::Event,
    pacemaker::types::PacemakerConfig,
    replica::Replica,
    safety::SafetyChecker,
    timers::{Timer, TimerEvent},
    types::{
        crypto_primitives::{Keypair, SigningKey, VerifyingKey},
        data_types::{Command, CryptoHash, EpochNumber, Power, StateVersion, ViewNumber},
        ledger_header::LedgerHeader,
        validator_set::ValidatorSet,
    },
};

use super::{
    counter_engine::{CounterCommand, CounterEngine},
    logging::log_with_context,
    mem_db::MemDB,
    network::OutboxNetwork,
};

pub(crate) type SimDriver = ConsensusDriver<OutboxNetwork, MemDB, CounterEngine, QueueTimer>;

/// A [`Timer`] that only records what it is asked to schedule. The fleet moves the requests into its
/// own queue.
#[derive(Clone, Default)]
pub(crate) struct QueueTimer(Arc<Mutex<Vec<(Duration, TimerEvent)>>>);

impl QueueTimer {
    fn drain(&self) -> Vec<(Duration, TimerEvent)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl Timer for QueueTimer {
    fn schedule(&mut self, after: Duration, event: TimerEvent) {
        self.0.lock().unwrap().push((after, event))
    }
}

/// How the simulated network treats every message.
#[derive(Clone, Copy, Debug)]
pub(crate) struct NetworkConditions {
    pub(crate) min_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) drop_rate: f64,
    pub(crate) duplicate_rate: f64,
}

impl NetworkConditions {
    pub(crate) fn reliable() -> NetworkConditions {
        NetworkConditions {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            drop_rate: 0.0,
            duplicate_rate: 0.0,
        }
    }

    pub(crate) fn lossy() -> NetworkConditions {
        NetworkConditions {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(120),
            drop_rate: 0.1,
            duplicate_rate: 0.05,
        }
    }
}

/// The parameters of a [`Fleet`].
pub(crate) struct FleetSpec {
    /// Number of replicas, validators or not.
    pub(crate) replicas: usize,
    /// The members of every validator set the counter engine can rotate to, as indices into the
    /// fleet. The first one governs the genesis epoch.
    pub(crate) validator_sets: Vec<Vec<usize>>,
    pub(crate) conditions: NetworkConditions,
    pub(crate) seed: u64,
    pub(crate) epoch_ceiling_view: Option<ViewNumber>,
}

impl FleetSpec {
    /// `replicas` replicas, all of them validators with equal power, on a reliable network.
    pub(crate) fn validators(replicas: usize) -> FleetSpec {
        FleetSpec {
            replicas,
            validator_sets: vec![(0..replicas).collect()],
            conditions: NetworkConditions::reliable(),
            seed: 0,
            epoch_ceiling_view: None,
        }
    }
}

struct Delivery {
    to: usize,
    incarnation: u64,
    event: DriverEvent,
}

struct SimReplica {
    signing_key: SigningKey,
    kv_store: MemDB,
    network: OutboxNetwork,
    timer: QueueTimer,
    tx_queue: Arc<Mutex<Vec<CounterCommand>>>,
    driver: Option<SimDriver>,
    events: Option<Receiver<Event>>,
    // Bumped on every start, so that the timers of a crashed incarnation never fire.
    incarnation: u64,
    connected: bool,
    commits: u64,
}

pub(crate) struct Fleet {
    now: Duration,
    sequence: u64,
    pending: BTreeMap<(Duration, u64), Delivery>,
    replicas: Vec<SimReplica>,
    validator_sets: Arc<Vec<ValidatorSet>>,
    conditions: NetworkConditions,
    epoch_ceiling_view: Option<ViewNumber>,
    rng: StdRng,
    oracle: SafetyChecker,
}

impl Fleet {
    /// Create the fleet and initialize every replica's key-value store with the genesis epoch. No
    /// replica runs until it is [started](Self::start).
    pub(crate) fn new(spec: FleetSpec) -> Fleet {
        let signing_keys: Vec<SigningKey> = (0..spec.replicas)
            .map(|index| SigningKey::from_bytes(&[index as u8 + 1; 32]))
            .collect();
        let validator_sets: Vec<ValidatorSet> = spec
            .validator_sets
            .iter()
            .map(|members| {
                ValidatorSet::new(
                    members
                        .iter()
                        .map(|index| (signing_keys[*index].verifying_key(), Power::new(1))),
                )
                .unwrap()
            })
            .collect();

        let replicas = signing_keys
            .into_iter()
            .map(|signing_key| {
                let kv_store = MemDB::new();
                Replica::initialize(
                    kv_store.clone(),
                    validator_sets[0].clone(),
                    LedgerHeader::genesis(EpochNumber::new(0), CryptoHash::default()),
                )
                .unwrap();
                SimReplica {
                    signing_key,
                    kv_store,
                    network: OutboxNetwork::default(),
                    timer: QueueTimer::default(),
                    tx_queue: Arc::new(Mutex::new(Vec::new())),
                    driver: None,
                    events: None,
                    incarnation: 0,
                    connected: true,
                    commits: 0,
                }
            })
            .collect();

        Fleet {
            now: Duration::ZERO,
            sequence: 0,
            pending: BTreeMap::new(),
            replicas,
            validator_sets: Arc::new(validator_sets),
            conditions: spec.conditions,
            epoch_ceiling_view: spec.epoch_ceiling_view,
            rng: StdRng::seed_from_u64(spec.seed),
            oracle: SafetyChecker::new(1_000_000),
        }
    }

    pub(crate) fn start_all(&mut self) {
        for index in 0..self.replicas.len() {
            self.start(index)
        }
    }

    /// Start replica `index` from whatever its key-value store holds.
    pub(crate) fn start(&mut self, index: usize) {
        let replica = &mut self.replicas[index];
        assert!(replica.driver.is_none(), "replica {} is already running", index);

        let (publisher, subscriber) = mpsc::channel();
        let config = DriverConfiguration {
            keypair: Keypair::new(replica.signing_key.clone()),
            pacemaker: PacemakerConfig {
                base_timeout: Duration::from_millis(800),
                timeout_rate: 1.5,
                max_timeout_exponent: 4,
            },
            sync_request_timeout: Duration::from_millis(600),
            safety_history_limit: 10_000,
            future_message_buffer_capacity: 256,
            vertex_fetch_capacity: 32,
            epoch_ceiling_view: self.epoch_ceiling_view,
            first_sync_request_id: (index as u64) << 32 | replica.incarnation << 24,
        };
        let engine = CounterEngine::new(
            replica.signing_key.verifying_key().to_bytes(),
            self.validator_sets.clone(),
            replica.tx_queue.clone(),
        );
        let mut driver = ConsensusDriver::new(
            config,
            replica.network.clone(),
            replica.kv_store.clone(),
            engine,
            replica.timer.clone(),
            Some(publisher),
        )
        .unwrap();

        replica.incarnation += 1;
        driver.start().unwrap();
        replica.driver = Some(driver);
        replica.events = Some(subscriber);
        log_with_context(
            Some(&replica.signing_key.verifying_key()),
            &format!("Started replica {} at {:?}", index, self.now),
        );
        self.flush(index);
    }

    /// Stop replica `index` abruptly. Everything it has not persisted is lost.
    pub(crate) fn crash(&mut self, index: usize) {
        let replica = &mut self.replicas[index];
        replica.driver = None;
        replica.events = None;
        replica.network.drain();
        replica.timer.drain();
        log_with_context(
            Some(&replica.signing_key.verifying_key()),
            &format!("Crashed replica {} at {:?}", index, self.now),
        );
    }

    /// Cut replica `index` off the network. Messages in flight to or from it are lost.
    pub(crate) fn disconnect(&mut self, index: usize) {
        self.replicas[index].connected = false;
    }

    pub(crate) fn reconnect(&mut self, index: usize) {
        self.replicas[index].connected = true;
    }

    /// Queue `command` for replica `index` to propose whenever it leads, until it applies it.
    pub(crate) fn submit(&mut self, index: usize, command: CounterCommand) {
        self.replicas[index].tx_queue.lock().unwrap().push(command)
    }

    pub(crate) fn now(&self) -> Duration {
        self.now
    }

    pub(crate) fn len(&self) -> usize {
        self.replicas.len()
    }

    pub(crate) fn verifying_key(&self, index: usize) -> VerifyingKey {
        self.replicas[index].signing_key.verifying_key()
    }

    pub(crate) fn driver(&self, index: usize) -> &SimDriver {
        self.replicas[index]
            .driver
            .as_ref()
            .unwrap_or_else(|| panic!("replica {} is not running", index))
    }

    pub(crate) fn is_running(&self, index: usize) -> bool {
        self.replicas[index].driver.is_some()
    }

    pub(crate) fn state_version(&self, index: usize) -> StateVersion {
        self.driver(index).ledger().state_version()
    }

    pub(crate) fn epoch(&self, index: usize) -> EpochNumber {
        self.driver(index).epoch()
    }

    /// Number of vertices replica `index` committed through consensus, over all incarnations.
    pub(crate) fn commits(&self, index: usize) -> u64 {
        self.replicas[index].commits
    }

    pub(crate) fn oracle(&self) -> &SafetyChecker {
        &self.oracle
    }

    /// Advance virtual time by `duration`, handling every event that falls due.
    pub(crate) fn run_for(&mut self, duration: Duration) {
        let deadline = self.now + duration;
        while self.step(deadline) {}
        self.now = deadline;
    }

    /// Advance virtual time until `condition` holds, for at most `limit`. Returns whether it held.
    pub(crate) fn run_until(&mut self, limit: Duration, condition: impl Fn(&Fleet) -> bool) -> bool {
        let deadline = self.now + limit;
        loop {
            if condition(self) {
                return true;
            }
            if !self.step(deadline) {
                self.now = deadline;
                return condition(self);
            }
        }
    }

    /// Check that the ledgers of all running replicas hold the same command at every state version
    /// they share, and the same header whenever they are at the same state version.
    pub(crate) fn assert_ledgers_consistent(&self) {
        let running: Vec<usize> = (0..self.len()).filter(|index| self.is_running(*index)).collect();
        let histories: Vec<HashMap<StateVersion, &Command>> = running
            .iter()
            .map(|index| {
                self.driver(*index)
                    .engine()
                    .applied()
                    .iter()
                    .map(|(version, command)| (*version, command))
                    .collect()
            })
            .collect();

        for (position, index) in running.iter().enumerate() {
            for (other_position, other) in running.iter().enumerate().skip(position + 1) {
                for (version, command) in &histories[position] {
                    if let Some(other_command) = histories[other_position].get(version) {
                        assert_eq!(
                            command, other_command,
                            "replicas {} and {} applied different commands at {:?}",
                            index, other, version
                        );
                    }
                }

                let header = self.driver(*index).ledger().header();
                let other_header = self.driver(*other).ledger().header();
                if header.state_version == other_header.state_version {
                    assert!(
                        header.same_state(other_header),
                        "replicas {} and {} reached {:?} with different accumulators",
                        index,
                        other,
                        header.state_version
                    );
                }
            }
        }
    }

    // Handle the next event due at or before `deadline`. Returns false if there is none.
    fn step(&mut self, deadline: Duration) -> bool {
        let key = match self.pending.keys().next() {
            Some(key) if key.0 <= deadline => *key,
            _ => return false,
        };
        let delivery = match self.pending.remove(&key) {
            Some(delivery) => delivery,
            None => return false,
        };
        self.now = key.0;

        let replica = &mut self.replicas[delivery.to];
        if replica.incarnation != delivery.incarnation {
            return true;
        }
        if matches!(delivery.event, DriverEvent::Message { .. }) && !replica.connected {
            return true;
        }
        let driver = match replica.driver.as_mut() {
            Some(driver) => driver,
            None => return true,
        };
        if let Err(error) = driver.handle(delivery.event) {
            panic!("replica {} halted: {}", delivery.to, error);
        }
        self.flush(delivery.to);
        true
    }

    // Move everything replica `index` produced while handling an event into the fleet.
    fn flush(&mut self, index: usize) {
        let loopback = match self.replicas[index].driver.as_mut() {
            Some(driver) => driver.take_loopback(),
            None => return,
        };
        for event in loopback {
            self.schedule(index, Duration::ZERO, event);
        }

        for (after, event) in self.replicas[index].timer.drain() {
            self.schedule(index, after, event.into());
        }

        let origin = self.replicas[index].signing_key.verifying_key();
        for (to, message) in self.replicas[index].network.drain() {
            if !self.replicas[index].connected {
                continue;
            }
            let recipients: Vec<usize> = match to {
                None => (0..self.len()).filter(|other| *other != index).collect(),
                Some(peer) => (0..self.len())
                    .filter(|other| *other != index && self.verifying_key(*other) == peer)
                    .collect(),
            };
            for recipient in recipients {
                if self.rng.gen_bool(self.conditions.drop_rate) {
                    continue;
                }
                let copies = if self.rng.gen_bool(self.conditions.duplicate_rate) {
                    2
                } else {
                    1
                };
                for _ in 0..copies {
                    let delay = self.random_delay();
                    self.schedule(
                        recipient,
                        delay,
                        DriverEvent::Message {
                            origin,
                            message: message.clone(),
                        },
                    );
                }
            }
        }

        let events: Vec<Event> = match &self.replicas[index].events {
            Some(events) => events.try_iter().collect(),
            None => Vec::new(),
        };
        for event in events {
            if let Event::CommitVertex(commit) = event {
                if let Err(violation) = self.oracle.check_commit(&commit.header, &commit.parent) {
                    panic!("replica {} committed a conflicting vertex: {}", index, violation);
                }
                self.replicas[index].commits += 1;
            }
        }
    }

    fn schedule(&mut self, to: usize, after: Duration, event: DriverEvent) {
        let incarnation = self.replicas[to].incarnation;
        self.pending.insert(
            (self.now + after, self.sequence),
            Delivery {
                to,
                incarnation,
                event,
            },
        );
        self.sequence += 1;
    }

    fn random_delay(&mut self) -> Duration {
        let min = self.conditions.min_delay.as_millis() as u64;
        let max = self.conditions.max_delay.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(min, max + 1))
    }
}
