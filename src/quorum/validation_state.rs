/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The quorum accumulator shared by vote collection and certificate checking.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use crate::types::{
    certificates::{SignatureSet, TimestampedSignature},
    crypto_primitives::{self, VerifyingKey},
    data_types::{CryptoHash, SignatureBytes, Timestamp, TotalPower},
    validator_set::ValidatorSet,
};

/// Accumulates signatures of the validators of one [`ValidatorSet`] until their combined power reaches
/// the set's [quorum](ValidatorSet::quorum).
///
/// Each validator contributes at most once: later signatures from a validator that already
/// contributed are ignored without being verified. The final completeness of a `ValidationState`
/// depends only on the set of validators that contributed, not on the order their signatures arrived
/// in.
#[derive(Clone)]
pub struct ValidationState {
    validator_set: Arc<ValidatorSet>,
    signatures: SignatureSet,
    power: TotalPower,
}

impl ValidationState {
    pub fn new(validator_set: Arc<ValidatorSet>) -> ValidationState {
        let signatures = SignatureSet::new(validator_set.len());
        ValidationState {
            validator_set,
            signatures,
            power: TotalPower::new(0),
        }
    }

    /// Add `validator`'s `signature` over `subject_hash`, and return whether the accumulated power is
    /// now a quorum.
    ///
    /// A second signature from the same validator is a no-op that returns the current completeness.
    /// Signatures from validators outside the validator set, and signatures that fail to verify, are
    /// not counted and are reported as errors.
    pub fn add_signature(
        &mut self,
        validator: &VerifyingKey,
        subject_hash: &CryptoHash,
        timestamp: Timestamp,
        signature: SignatureBytes,
    ) -> Result<bool, ValidationError> {
        let position = self
            .validator_set
            .position(validator)
            .ok_or(ValidationError::UnknownValidator {
                validator: *validator,
            })?;
        let power = self
            .validator_set
            .power(validator)
            .ok_or(ValidationError::UnknownValidator {
                validator: *validator,
            })?;

        if self.signatures.get(position).is_some() {
            return Ok(self.is_complete());
        }

        if !crypto_primitives::verify(validator, subject_hash, &signature) {
            return Err(ValidationError::InvalidSignature {
                validator: *validator,
            });
        }

        self.signatures.set(
            position,
            TimestampedSignature {
                timestamp,
                signature,
            },
        );
        self.power += power;

        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.power >= self.validator_set.quorum()
    }

    /// Combined power of the validators that contributed so far.
    pub fn power(&self) -> TotalPower {
        self.power
    }

    pub fn signature_set(&self) -> SignatureSet {
        self.signatures.clone()
    }

    pub fn validator_set(&self) -> &Arc<ValidatorSet> {
        &self.validator_set
    }
}

/// Why a signature was not counted by [`ValidationState::add_signature`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    UnknownValidator { validator: VerifyingKey },
    InvalidSignature { validator: VerifyingKey },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UnknownValidator { validator } => write!(
                f,
                "{:?} is not a member of the validator set",
                validator.to_bytes()
            ),
            ValidationError::InvalidSignature { validator } => {
                write!(f, "invalid signature from {:?}", validator.to_bytes())
            }
        }
    }
}
