/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or integers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// View number. Starts at 0 and increases by 1 in every round of consensus.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    /// Create a new `ViewNumber` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the initial `ViewNumber`, which is 0.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` of this `ViewNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Add<u64> for ViewNumber {
    type Output = ViewNumber;

    fn add(self, rhs: u64) -> Self::Output {
        ViewNumber(self.0.add(rhs))
    }
}

impl Sub<ViewNumber> for ViewNumber {
    type Output = u64;

    fn sub(self, rhs: ViewNumber) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Number that identifies an epoch. Consecutive epochs have consecutive counters.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct EpochCounter(u64);

impl EpochCounter {
    /// Create a new `EpochCounter` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` of this `EpochCounter`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the counter of the epoch that immediately follows this one.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the counter of the epoch that immediately precedes this one, if there is one.
    pub const fn prev(&self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(int) => Some(Self(int)),
            None => None,
        }
    }
}

impl Display for EpochCounter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// 32-byte identifier of a node participating in the network.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct NodeID([u8; 32]);

impl NodeID {
    /// Create a new `NodeID` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `NodeID`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for NodeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&first_seven_base64_chars(&self.0))
    }
}

impl Debug for NodeID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "NodeID({})", self)
    }
}

/// Weight of a specific committee member's votes in consensus decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Weight(u64);

impl Weight {
    /// Create a new `Weight` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Weight`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the [`Weight`]s of all members of a committee.
///
/// The inner type is `u128` so that summing up many large `Weight`s cannot overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct TotalWeight(u128);

impl TotalWeight {
    /// Create a new `TotalWeight` wrapping `int`.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalWeight`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Weight> for TotalWeight {
    fn add_assign(&mut self, rhs: Weight) {
        self.0.add_assign(rhs.0 as u128)
    }
}

impl Display for TotalWeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// 32-byte cryptographic hash. Within this crate, always a SHA256 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
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
        f.write_str(&first_seven_base64_chars(&self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoHash({})", self)
    }
}

/// Unpredictable bytes that an epoch's setup phase produces, used to seed leader selection.
#[derive(Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct RandomSource(Vec<u8>);

impl RandomSource {
    /// Create a new `RandomSource` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner bytes of this `RandomSource`.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for RandomSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "RandomSource({})", first_seven_base64_chars(&self.0))
    }
}

/// Get a more readable representation of a byte sequence by base64-encoding it and taking the first 7
/// characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}
