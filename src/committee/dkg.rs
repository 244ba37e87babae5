/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Epoch-scoped results of distributed key generation.
//!
//! The random beacon signature scheme itself is out of this crate's scope, so keys are carried as opaque
//! byte strings.

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

use crate::types::data_types::NodeID;

/// Source that replicas use to find the random beacon key shares of an epoch's DKG participants.
pub trait DKG: Send + Sync {
    /// Number of DKG participants.
    fn size(&self) -> usize;

    /// The group public key produced by the DKG.
    fn group_key(&self) -> &[u8];

    /// Index of `node_id` among the DKG participants.
    fn index(&self, node_id: &NodeID) -> Result<usize, DKGError>;

    /// Public key share of `node_id`.
    fn key_share(&self, node_id: &NodeID) -> Result<&[u8], DKGError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DKGError {
    NotParticipant { node_id: NodeID },
}

impl Display for DKGError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DKGError::NotParticipant { node_id } => {
                write!(f, "node {} is not a DKG participant", node_id)
            }
        }
    }
}

impl std::error::Error for DKGError {}

/// In-memory [`DKG`] built from the epoch commit data.
#[derive(Clone, Debug)]
pub struct StaticDKG {
    group_key: Vec<u8>,
    participants: HashMap<NodeID, (usize, Vec<u8>)>,
}

impl StaticDKG {
    /// Create a `StaticDKG`. The participant at position `i` of `key_shares` gets DKG index `i`.
    pub fn new(group_key: Vec<u8>, key_shares: Vec<(NodeID, Vec<u8>)>) -> Self {
        let participants = key_shares
            .into_iter()
            .enumerate()
            .map(|(index, (node_id, share))| (node_id, (index, share)))
            .collect();
        Self {
            group_key,
            participants,
        }
    }
}

impl DKG for StaticDKG {
    fn size(&self) -> usize {
        self.participants.len()
    }

    fn group_key(&self) -> &[u8] {
        &self.group_key
    }

    fn index(&self, node_id: &NodeID) -> Result<usize, DKGError> {
        self.participants
            .get(node_id)
            .map(|(index, _)| *index)
            .ok_or(DKGError::NotParticipant { node_id: *node_id })
    }

    fn key_share(&self, node_id: &NodeID) -> Result<&[u8], DKGError> {
        self.participants
            .get(node_id)
            .map(|(_, share)| share.as_slice())
            .ok_or(DKGError::NotParticipant { node_id: *node_id })
    }
}
