/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The weighted roster of validators that vote in one epoch.

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    slice,
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::VerifyingKey,
    data_types::{Power, TotalPower, VerifyingKeyBytes},
};

/// Stores the identities of validators and their voting powers.
///
/// A `ValidatorSet` is never empty and never contains a validator with zero power: both are checked
/// by [`new`](Self::new), the only way to construct one. Once constructed, a `ValidatorSet` is not
/// mutated. Epoch changes replace it wholesale.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their
/// `VerifyingKey`s, and avails the methods [`validators`](ValidatorSet::validators),
/// [`validators_and_powers`](ValidatorSet::validators_and_powers), and
/// [`position`](ValidatorSet::position) that users can use to get them in this order. Signature sets
/// inside certificates are positional with respect to this ordering.
#[derive(Clone, PartialEq, Debug)]
pub struct ValidatorSet {
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKey>,
    powers: HashMap<VerifyingKey, Power>,
}

impl ValidatorSet {
    /// Create a validator set out of `members`.
    pub fn new(
        members: impl IntoIterator<Item = (VerifyingKey, Power)>,
    ) -> Result<ValidatorSet, ValidatorSetError> {
        let mut validator_set = ValidatorSet {
            validators: Vec::new(),
            powers: HashMap::new(),
        };

        for (validator, power) in members {
            if power.int() == 0 {
                return Err(ValidatorSetError::ZeroPower { validator });
            }
            if validator_set.contains(&validator) {
                return Err(ValidatorSetError::DuplicateValidator { validator });
            }
            validator_set.put(&validator, power);
        }

        if validator_set.is_empty() {
            return Err(ValidatorSetError::Empty);
        }

        Ok(validator_set)
    }

    // Put a `validator` with the specified `power` into the validator set, placing them in a position that
    // preserves the ordering of validators.
    fn put(&mut self, validator: &VerifyingKey, power: Power) {
        let validator_bytes = validator.to_bytes();
        if let Err(insert_pos) = self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            self.validators.insert(insert_pos, *validator);
        }
        self.powers.insert(*validator, power);
    }

    /// Get the power of the specified `validator` inside the validator set.
    pub fn power(&self, validator: &VerifyingKey) -> Option<Power> {
        self.powers.get(validator).copied()
    }

    /// Get the sum of the powers of all of the validators inside the validator set.
    pub fn total_power(&self) -> TotalPower {
        let mut total_power = TotalPower::new(0);
        for power in self.powers.values() {
            total_power += *power
        }
        total_power
    }

    /// Check whether the validator set contains `validator`.
    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.powers.contains_key(validator)
    }

    /// Get an iterator through validators' verifying keys which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }

    /// Get a vector containing each validator and its power, in ascending order of the validators' verifying keys.
    pub fn validators_and_powers(&self) -> Vec<(VerifyingKey, Power)> {
        self.validators
            .iter()
            .filter_map(|v| self.power(v).map(|power| (*v, power)))
            .collect()
    }

    /// Get the number of validators in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty. Always `false` for a constructed `ValidatorSet`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the index of the given `validator` in the sorted order of `VerifyingKey`s in the validator set,
    /// if it is actually in the validator set.
    pub fn position(&self, validator: &VerifyingKey) -> Option<usize> {
        let validator_bytes = validator.to_bytes();
        self.validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            .ok()
    }

    /// Compute the total power that a certificate must match or exceed (`>=`) in order to count as a quorum
    /// under the validator set.
    ///
    /// This is the smallest power strictly greater than two thirds of the total power, i.e.,
    /// `⌊2P/3⌋ + 1`.
    pub fn quorum(&self) -> TotalPower {
        TotalPower::new(self.total_power().int().saturating_mul(2) / 3 + 1)
    }
}

/// Reasons why a list of members does not make a valid [`ValidatorSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatorSetError {
    Empty,
    ZeroPower { validator: VerifyingKey },
    DuplicateValidator { validator: VerifyingKey },
    InvalidVerifyingKey { key: VerifyingKeyBytes },
}

impl Display for ValidatorSetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorSetError::Empty => write!(f, "validator set is empty"),
            ValidatorSetError::ZeroPower { validator } => {
                write!(f, "validator {:?} has zero power", validator.to_bytes())
            }
            ValidatorSetError::DuplicateValidator { validator } => {
                write!(f, "validator {:?} appears twice", validator.to_bytes())
            }
            ValidatorSetError::InvalidVerifyingKey { key } => {
                write!(f, "{:?} is not a valid verifying key", key)
            }
        }
    }
}

/// Intermediate representation of [`ValidatorSet`] for safe serialization and deserialization.
///
/// To serialize an instance of `ValidatorSet`, convert it a `ValidatorSetBytes` using the former type's
/// implementation of `From<&ValidatorSet>`, then, serialize the `ValidatorSetBytes` using Borsh.
/// Reverse the steps to deserialize a `ValidatorSet`.
///
/// This type exists because [`ed25519_dalek::VerifyingKey`] does not implement the Borsh traits.
/// Instances of this type are not guaranteed to contain valid Ed25519 verifying keys or a valid roster,
/// and therefore conversion from this type into `ValidatorSet` using `TryFrom` is fallible.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorSetBytes(Vec<(VerifyingKeyBytes, Power)>);

impl TryFrom<ValidatorSetBytes> for ValidatorSet {
    type Error = ValidatorSetError;

    fn try_from(value: ValidatorSetBytes) -> Result<Self, Self::Error> {
        let members = value
            .0
            .iter()
            .map(|(key_bytes, power)| {
                VerifyingKey::from_bytes(key_bytes)
                    .map(|key| (key, *power))
                    .map_err(|_| ValidatorSetError::InvalidVerifyingKey { key: *key_bytes })
            })
            .collect::<Result<Vec<_>, _>>()?;
        ValidatorSet::new(members)
    }
}

impl From<&ValidatorSet> for ValidatorSetBytes {
    fn from(validator_set: &ValidatorSet) -> Self {
        ValidatorSetBytes(
            validator_set
                .validators_and_powers()
                .into_iter()
                .map(|(validator, power)| (validator.to_bytes(), power))
                .collect(),
        )
    }
}
