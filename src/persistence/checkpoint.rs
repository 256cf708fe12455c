/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state a replica needs to resume after a restart without ever voting twice in the same view.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    safety::SafetyRules,
    types::{
        certificates::{BftHeader, QuorumCertificate},
        data_types::EpochNumber,
        validator_set::{ValidatorSet, ValidatorSetBytes, ValidatorSetError},
        vertex::Vertex,
    },
    vertex_store::VertexStore,
};

use super::{
    pluggables::{KVGet, KVStore, WriteBatch},
    variables,
};

/// A snapshot of everything a replica persists.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub epoch: EpochNumber,
    pub validator_set: ValidatorSet,
    pub root: BftHeader,
    pub root_qc: QuorumCertificate,
    pub high_qc: QuorumCertificate,
    pub safety_rules: SafetyRules,
    pub speculative_vertices: Vec<Vertex>,
}

impl Checkpoint {
    /// The checkpoint of a replica that has not done anything yet in the epoch starting at `genesis`.
    pub fn genesis(validator_set: ValidatorSet, genesis: BftHeader) -> Checkpoint {
        Checkpoint {
            epoch: genesis.epoch(),
            validator_set,
            root: genesis,
            root_qc: QuorumCertificate::genesis(genesis),
            high_qc: QuorumCertificate::genesis(genesis),
            safety_rules: SafetyRules::new(),
            speculative_vertices: Vec::new(),
        }
    }

    /// Read the checkpoint out of `kv_store`. Returns `None` if the store was never initialized.
    pub fn load<K: KVGet>(kv_store: &K) -> Result<Option<Checkpoint>, PersistenceError> {
        let epoch: EpochNumber = match read(kv_store, Key::Epoch)? {
            Some(epoch) => epoch,
            None => return Ok(None),
        };
        let validator_set_bytes: ValidatorSetBytes = expect(kv_store, Key::ValidatorSet)?;
        let validator_set = ValidatorSet::try_from(validator_set_bytes)
            .map_err(|source| PersistenceError::InvalidValidatorSet { source })?;

        Ok(Some(Checkpoint {
            epoch,
            validator_set,
            root: expect(kv_store, Key::Root)?,
            root_qc: expect(kv_store, Key::RootQc)?,
            high_qc: expect(kv_store, Key::HighQc)?,
            safety_rules: expect(kv_store, Key::SafetyRules)?,
            speculative_vertices: read(kv_store, Key::SpeculativeVertices)?.unwrap_or_default(),
        }))
    }

    /// Overwrite the whole checkpoint in `kv_store`.
    pub fn save<K: KVStore>(&self, kv_store: &mut K) -> Result<(), PersistenceError> {
        let mut wb = K::WriteBatch::new();
        write(&mut wb, Key::Epoch, &self.epoch)?;
        write(
            &mut wb,
            Key::ValidatorSet,
            &ValidatorSetBytes::from(&self.validator_set),
        )?;
        write(&mut wb, Key::SafetyRules, &self.safety_rules)?;
        write_vertex_store_parts(
            &mut wb,
            &self.root,
            &self.root_qc,
            &self.high_qc,
            &self.speculative_vertices,
        )?;
        kv_store.write(wb);
        Ok(())
    }
}

/// Persist `safety_rules`. Called before every vote and timeout vote leaves the replica.
pub fn save_safety_rules<K: KVStore>(
    kv_store: &mut K,
    safety_rules: &SafetyRules,
) -> Result<(), PersistenceError> {
    let mut wb = K::WriteBatch::new();
    write(&mut wb, Key::SafetyRules, safety_rules)?;
    kv_store.write(wb);
    Ok(())
}

/// Persist the root, the certificates, and the speculative vertices of `vertex_store`.
pub fn save_vertex_store<K: KVStore>(
    kv_store: &mut K,
    vertex_store: &VertexStore,
) -> Result<(), PersistenceError> {
    let mut wb = K::WriteBatch::new();
    write_vertex_store_parts(
        &mut wb,
        vertex_store.root(),
        vertex_store.highest_committed_qc(),
        vertex_store.high_qc(),
        &vertex_store.speculative_vertices(),
    )?;
    kv_store.write(wb);
    Ok(())
}

fn write_vertex_store_parts<W: WriteBatch>(
    wb: &mut W,
    root: &BftHeader,
    root_qc: &QuorumCertificate,
    high_qc: &QuorumCertificate,
    speculative_vertices: &[Vertex],
) -> Result<(), PersistenceError> {
    write(wb, Key::Root, root)?;
    write(wb, Key::RootQc, root_qc)?;
    write(wb, Key::HighQc, high_qc)?;
    write(wb, Key::SpeculativeVertices, speculative_vertices)
}

fn write<W: WriteBatch, T: BorshSerialize + ?Sized>(
    wb: &mut W,
    key: Key,
    value: &T,
) -> Result<(), PersistenceError> {
    let bytes = value
        .try_to_vec()
        .map_err(|source| PersistenceError::SerializeValueError { key, source })?;
    wb.set(key.bytes(), &bytes);
    Ok(())
}

fn read<K: KVGet, T: BorshDeserialize>(
    kv_store: &K,
    key: Key,
) -> Result<Option<T>, PersistenceError> {
    match kv_store.get(key.bytes()) {
        Some(bytes) => T::deserialize(&mut bytes.as_slice())
            .map(Some)
            .map_err(|source| PersistenceError::DeserializeValueError { key, source }),
        None => Ok(None),
    }
}

fn expect<K: KVGet, T: BorshDeserialize>(kv_store: &K, key: Key) -> Result<T, PersistenceError> {
    read(kv_store, key)?.ok_or(PersistenceError::ValueExpectedButNotFound { key })
}

/// The checkpoint variables. See [`variables`](super::variables).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Epoch,
    ValidatorSet,
    Root,
    RootQc,
    HighQc,
    SafetyRules,
    SpeculativeVertices,
}

impl Key {
    fn bytes(&self) -> &'static [u8] {
        match self {
            Key::Epoch => &variables::EPOCH,
            Key::ValidatorSet => &variables::VALIDATOR_SET,
            Key::Root => &variables::ROOT,
            Key::RootQc => &variables::ROOT_QC,
            Key::HighQc => &variables::HIGH_QC,
            Key::SafetyRules => &variables::SAFETY_RULES,
            Key::SpeculativeVertices => &variables::SPECULATIVE_VERTICES,
        }
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Key::Epoch => write!(f, "Epoch"),
            Key::ValidatorSet => write!(f, "Validator Set"),
            Key::Root => write!(f, "Root"),
            Key::RootQc => write!(f, "Root QC"),
            Key::HighQc => write!(f, "Highest QC"),
            Key::SafetyRules => write!(f, "Safety Rules"),
            Key::SpeculativeVertices => write!(f, "Speculative Vertices"),
        }
    }
}

/// Error when reading or writing the checkpoint. This may be caused by:
/// 1. A value that does not deserialize (e.g., because the store was written by an incompatible
///    version),
/// 2. A value that is missing although the checkpoint was initialized,
/// 3. A persisted validator set that is not valid.
#[derive(Debug)]
pub enum PersistenceError {
    SerializeValueError {
        key: Key,
        source: std::io::Error,
    },
    DeserializeValueError {
        key: Key,
        source: std::io::Error,
    },
    ValueExpectedButNotFound {
        key: Key,
    },
    InvalidValidatorSet {
        source: ValidatorSetError,
    },
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::SerializeValueError { key, source } => {
                write!(f, "failed to serialize {}: {}", key, source)
            }
            PersistenceError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize {}: {}", key, source)
            }
            PersistenceError::ValueExpectedButNotFound { key } => {
                write!(f, "{} not found in the checkpoint", key)
            }
            PersistenceError::InvalidValidatorSet { source } => {
                write!(f, "persisted validator set is invalid: {}", source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ed25519_dalek::SigningKey;

    use crate::types::{
        data_types::{CryptoHash, EpochView, Power, ViewNumber},
        ledger_header::LedgerHeader,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct MapStore(HashMap<Vec<u8>, Vec<u8>>);

    struct MapWriteBatch(Vec<(Vec<u8>, Option<Vec<u8>>)>);

    impl KVGet for MapStore {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.0.get(key).cloned()
        }
    }

    impl KVStore for MapStore {
        type WriteBatch = MapWriteBatch;

        fn write(&mut self, wb: Self::WriteBatch) {
            for (key, value) in wb.0 {
                match value {
                    Some(value) => self.0.insert(key, value),
                    None => self.0.remove(&key),
                };
            }
        }

        fn clear(&mut self) {
            self.0.clear()
        }
    }

    impl WriteBatch for MapWriteBatch {
        fn new() -> Self {
            MapWriteBatch(Vec::new())
        }

        fn set(&mut self, key: &[u8], value: &[u8]) {
            self.0.push((key.to_vec(), Some(value.to_vec())))
        }

        fn delete(&mut self, key: &[u8]) {
            self.0.push((key.to_vec(), None))
        }
    }

    fn genesis_checkpoint() -> Checkpoint {
        let validator_set = ValidatorSet::new(
            (1..=3u8).map(|i| (SigningKey::from_bytes(&[i; 32]).verifying_key(), Power::new(i as u64))),
        )
        .unwrap();
        let genesis = BftHeader::genesis(LedgerHeader::genesis(
            EpochNumber::new(0),
            CryptoHash::default(),
        ));
        Checkpoint::genesis(validator_set, genesis)
    }

    #[test]
    fn uninitialized_store_has_no_checkpoint() {
        assert!(Checkpoint::load(&MapStore::default()).unwrap().is_none());
    }

    #[test]
    fn checkpoint_survives_a_save_and_load() {
        let mut store = MapStore::default();
        let mut checkpoint = genesis_checkpoint();
        checkpoint.save(&mut store).unwrap();
        assert_eq!(Checkpoint::load(&store).unwrap(), Some(checkpoint.clone()));

        checkpoint
            .safety_rules
            .record_timeout_vote(EpochView::new(EpochNumber::new(0), ViewNumber::new(10)));
        save_safety_rules(&mut store, &checkpoint.safety_rules).unwrap();
        let loaded = Checkpoint::load(&store).unwrap().unwrap();
        assert_eq!(
            loaded.safety_rules.last_voted(),
            Some(EpochView::new(EpochNumber::new(0), ViewNumber::new(10)))
        );
    }

    #[test]
    fn missing_variable_is_reported() {
        let mut store = MapStore::default();
        genesis_checkpoint().save(&mut store).unwrap();
        let mut wb = MapWriteBatch::new();
        wb.delete(&variables::HIGH_QC);
        store.write(wb);

        assert!(matches!(
            Checkpoint::load(&store),
            Err(PersistenceError::ValueExpectedButNotFound { key: Key::HighQc })
        ));
    }
}
