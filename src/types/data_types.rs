/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, Sub},
    time::SystemTime,
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use borsh::{BorshDeserialize, BorshSerialize};

/// Number that identifies a validator-set generation.
///
/// Epochs start at 0 for the genesis validator set and increase by 1 at every epoch change.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct EpochNumber(u64);

impl EpochNumber {
    /// Create a new `EpochNumber` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `EpochNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the epoch that follows this one.
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Display for EpochNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Number of a round of the consensus protocol inside an epoch.
///
/// View 0 of every epoch belongs to the epoch's genesis vertex, which is never proposed.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    /// Create a new `ViewNumber` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `ViewNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The view of every epoch's genesis vertex.
    pub const fn genesis() -> Self {
        Self(0)
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for ViewNumber {
    type Output = ViewNumber;
    fn add(self, rhs: u64) -> Self::Output {
        ViewNumber(self.0.saturating_add(rhs))
    }
}

impl AddAssign<u64> for ViewNumber {
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self.0.saturating_add(rhs)
    }
}

impl Sub<ViewNumber> for ViewNumber {
    type Output = u64;
    fn sub(self, rhs: ViewNumber) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// An `(epoch, view)` pair, totally ordered lexicographically.
///
/// This is the key under which committed vertices are recorded, and the unit in which "has this replica
/// already voted?" is remembered across epochs.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct EpochView {
    pub epoch: EpochNumber,
    pub view: ViewNumber,
}

impl EpochView {
    pub const fn new(epoch: EpochNumber, view: ViewNumber) -> Self {
        Self { epoch, view }
    }
}

impl Display for EpochView {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.epoch, self.view)
    }
}

/// Number of commands committed to the ledger so far.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct StateVersion(u64);

impl StateVersion {
    /// Create a new `StateVersion` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `StateVersion`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for StateVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for StateVersion {
    type Output = StateVersion;
    fn add(self, rhs: u64) -> Self::Output {
        StateVersion(self.0.saturating_add(rhs))
    }
}

impl Sub<StateVersion> for StateVersion {
    type Output = u64;
    fn sub(self, rhs: StateVersion) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// 32-byte cryptographic hash.
///
/// Every `CryptoHash` produced by this crate is a SHA256 hash, see
/// [`crypto_primitives`](super::crypto_primitives).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Ed25519 digital signature.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({})", STANDARD_NO_PAD.encode(self.0))
    }
}

/// Bytes of an Ed25519 verifying key, used wherever a key must be serialized.
pub type VerifyingKeyBytes = [u8; 32];

/// Voting power of a single validator.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Power(u64);

impl Power {
    /// Create a new `Power` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Power`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the voting powers of some validators.
///
/// Kept as a `u128` so that summing any number of `u64` powers cannot overflow.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize,
)]
pub struct TotalPower(u128);

impl TotalPower {
    /// Create a new `TotalPower` with an `int` inner value.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalPower`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Power> for TotalPower {
    fn add_assign(&mut self, rhs: Power) {
        self.0 += rhs.0 as u128
    }
}

impl Display for TotalPower {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Milliseconds since the Unix Epoch, attached to votes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new `Timestamp` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Timestamp`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The current wall-clock time. Clocks set before the Unix Epoch read as 0.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }
}

/// Identifier of an outstanding sync request.
///
/// A fresh identifier is used for every retry, so that responses to abandoned requests can be told
/// apart from responses to the live one.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct RequestId(u64);

impl RequestId {
    /// Create a new `RequestId` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `RequestId`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// An opaque command, as understood by the [execution engine](crate::ledger::ExecutionEngine).
#[derive(Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Command(Vec<u8>);

impl Command {
    /// Create a new `Command` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the bytes of this `Command`.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", STANDARD_NO_PAD.encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_views_order_lexicographically() {
        let early = EpochView::new(EpochNumber::new(1), ViewNumber::new(100));
        let late = EpochView::new(EpochNumber::new(2), ViewNumber::new(1));
        assert!(early < late);
        assert!(
            EpochView::new(EpochNumber::new(2), ViewNumber::new(0))
                < EpochView::new(EpochNumber::new(2), ViewNumber::new(1))
        );
    }

    #[test]
    fn counters_saturate_instead_of_overflowing() {
        assert_eq!(ViewNumber::new(u64::MAX) + 1, ViewNumber::new(u64::MAX));
        let mut view = ViewNumber::new(u64::MAX - 1);
        view += 5;
        assert_eq!(view, ViewNumber::new(u64::MAX));
        assert_eq!(EpochNumber::new(u64::MAX).next(), EpochNumber::new(u64::MAX));
        assert_eq!(StateVersion::new(u64::MAX) + 1, StateVersion::new(u64::MAX));
    }
}
