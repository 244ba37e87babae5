/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about committee members and their voting weights.

use std::slice;

pub use ed25519_dalek::VerifyingKey;

use super::data_types::{NodeID, TotalWeight, Weight};

/// A single participant of the network as seen by consensus: its identifier, the weight of its votes,
/// and the key it signs votes with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub node_id: NodeID,
    pub weight: Weight,
    pub staking_key: VerifyingKey,
    /// Ejected nodes keep their place in the epoch setup but may not vote.
    pub ejected: bool,
}

impl Identity {
    /// Create a new, non-ejected `Identity`.
    pub fn new(node_id: NodeID, weight: Weight, staking_key: VerifyingKey) -> Self {
        Self {
            node_id,
            weight,
            staking_key,
            ejected: false,
        }
    }

    /// Check whether this identity is allowed to vote in consensus, i.e., it has non-zero weight and
    /// has not been ejected.
    pub fn is_voting_member(&self) -> bool {
        self.weight.int() > 0 && !self.ejected
    }
}

/// An ordered list of [`Identity`]s.
///
/// ## Ordering of identities
///
/// `IdentityList` internally maintains its identities in ascending order of their [`NodeID`]s. This is
/// the canonical order: leader selection indexes into it, so every replica must see the same order for
/// the same set of identities.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityList {
    identities: Vec<Identity>,
}

impl IdentityList {
    /// Create an `IdentityList` from `identities` in any order. If the same `NodeID` appears more than
    /// once, the identity that appears last is kept.
    pub fn new(identities: Vec<Identity>) -> Self {
        let mut list = Self {
            identities: Vec::with_capacity(identities.len()),
        };
        for identity in identities {
            list.put(identity);
        }
        list
    }

    /// Put an `identity` into the list at the position that preserves the
    /// [ordering of identities](Self#ordering-of-identities), replacing any identity with the same
    /// `NodeID`.
    pub fn put(&mut self, identity: Identity) {
        match self
            .identities
            .binary_search_by(|i| i.node_id.cmp(&identity.node_id))
        {
            Ok(pos) => self.identities[pos] = identity,
            Err(pos) => self.identities.insert(pos, identity),
        }
    }

    /// Get the identity with the given `node_id`, if it is in the list.
    pub fn by_node_id(&self, node_id: &NodeID) -> Option<&Identity> {
        self.position(node_id).map(|pos| &self.identities[pos])
    }

    /// Get the index of `node_id` in the [sorted order](Self#ordering-of-identities) of the list.
    pub fn position(&self, node_id: &NodeID) -> Option<usize> {
        self.identities
            .binary_search_by(|i| i.node_id.cmp(node_id))
            .ok()
    }

    /// Get the identity at position `index`.
    pub fn get(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    /// Get the sum of the weights of all identities in the list.
    pub fn total_weight(&self) -> TotalWeight {
        let mut total_weight = TotalWeight::new(0);
        for identity in &self.identities {
            total_weight += identity.weight
        }
        total_weight
    }

    /// Get a new list containing only the identities that are allowed to vote in consensus.
    pub fn voting_members(&self) -> IdentityList {
        IdentityList {
            identities: self
                .identities
                .iter()
                .filter(|i| i.is_voting_member())
                .cloned()
                .collect(),
        }
    }

    /// Iterate through the identities in ascending order of their `NodeID`s.
    pub fn iter(&self) -> slice::Iter<Identity> {
        self.identities.iter()
    }

    /// Get the `NodeID`s of the identities in ascending order.
    pub fn node_ids(&self) -> Vec<NodeID> {
        self.identities.iter().map(|i| i.node_id).collect()
    }

    /// Get the number of identities in the list.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Check whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
