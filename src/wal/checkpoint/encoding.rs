/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Binary encoding of checkpoint nodes, trie root records, and footers.
//!
//! All integers are big-endian. Nodes reference their children by *node index*, where index 0 means
//! "no child".
//!
//! ```text
//! Leaf:      | 0u8 | depth: u16 | path: 32 | hash: 32 | key len: u32 | key | value len: u32 | value |
//! Interior:  | 1u8 | depth: u16 | left index: u64 | right index: u64 | hash: 32 |
//! Trie root: | root index: u64 | register count: u64 | root hash: 32 |
//! Footer:    | node count: u64 | trie count: u16 |
//! ```

use std::io::{self, Write};

use crate::{
    ledger::trie::{Node, NodeKind, Path, Payload},
    types::data_types::CryptoHash,
};

use super::CheckpointError;

pub const LEAF_NODE_TYPE: u8 = 0;
pub const INTERIOR_NODE_TYPE: u8 = 1;

pub const TRIE_ROOT_RECORD_SIZE: usize = 8 + 8 + 32;
pub const FOOTER_SIZE: usize = 8 + 2;
pub const NODE_COUNT_TRAILER_SIZE: usize = 8;

/// Write `node`, whose children have indices `left_index` and `right_index`.
pub fn encode_node<W: Write>(
    node: &Node,
    left_index: u64,
    right_index: u64,
    writer: &mut W,
) -> io::Result<()> {
    match node.kind() {
        NodeKind::Leaf { path, payload } => {
            writer.write_all(&[LEAF_NODE_TYPE])?;
            writer.write_all(&node.depth().to_be_bytes())?;
            writer.write_all(&path.bytes())?;
            writer.write_all(&node.hash().bytes())?;
            write_bytes(payload.key(), writer)?;
            write_bytes(payload.value(), writer)
        }
        NodeKind::Interior { .. } => {
            writer.write_all(&[INTERIOR_NODE_TYPE])?;
            writer.write_all(&node.depth().to_be_bytes())?;
            writer.write_all(&left_index.to_be_bytes())?;
            writer.write_all(&right_index.to_be_bytes())?;
            writer.write_all(&node.hash().bytes())
        }
    }
}

fn write_bytes<W: Write>(bytes: &[u8], writer: &mut W) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload field too large"))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(bytes)
}

/// A node as read from a checkpoint file, with children still referenced by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedNode {
    Leaf {
        depth: u16,
        path: Path,
        hash: CryptoHash,
        payload: Payload,
    },
    Interior {
        depth: u16,
        left_index: u64,
        right_index: u64,
        hash: CryptoHash,
    },
}

/// Reads encoded values from the front of a byte slice.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
    file: &'a str,
}

impl<'a> Decoder<'a> {
    /// Decode `bytes`, which come from the checkpoint file named `file`.
    pub fn new(bytes: &'a [u8], file: &'a str) -> Self {
        Self {
            bytes,
            offset: 0,
            file,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offset == self.bytes.len()
    }

    pub fn decode_node(&mut self) -> Result<EncodedNode, CheckpointError> {
        let node_type = self.take_array::<1>()?[0];
        let depth = u16::from_be_bytes(self.take_array()?);
        match node_type {
            LEAF_NODE_TYPE => {
                let path = Path::new(self.take_array()?);
                let hash = CryptoHash::new(self.take_array()?);
                let key = self.take_bytes()?;
                let value = self.take_bytes()?;
                Ok(EncodedNode::Leaf {
                    depth,
                    path,
                    hash,
                    payload: Payload::new(key, value),
                })
            }
            INTERIOR_NODE_TYPE => Ok(EncodedNode::Interior {
                depth,
                left_index: u64::from_be_bytes(self.take_array()?),
                right_index: u64::from_be_bytes(self.take_array()?),
                hash: CryptoHash::new(self.take_array()?),
            }),
            other => Err(self.corrupted(format!("unknown node type {}", other))),
        }
    }

    /// Decode a trie root record: `(root index, register count, root hash)`.
    pub fn decode_trie_root(&mut self) -> Result<(u64, u64, CryptoHash), CheckpointError> {
        Ok((
            u64::from_be_bytes(self.take_array()?),
            u64::from_be_bytes(self.take_array()?),
            CryptoHash::new(self.take_array()?),
        ))
    }

    fn take_bytes(&mut self) -> Result<Vec<u8>, CheckpointError> {
        let len = u32::from_be_bytes(self.take_array()?) as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CheckpointError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CheckpointError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| self.corrupted(format!("unexpected end of data at byte {}", self.offset)))?;
        let bytes: &'a [u8] = self.bytes;
        let taken = &bytes[self.offset..end];
        self.offset = end;
        Ok(taken)
    }

    fn corrupted(&self, reason: String) -> CheckpointError {
        CheckpointError::Corrupted {
            file: self.file.to_string(),
            reason,
        }
    }
}

pub fn encode_trie_root<W: Write>(
    root_index: u64,
    reg_count: u64,
    root_hash: CryptoHash,
    writer: &mut W,
) -> io::Result<()> {
    writer.write_all(&root_index.to_be_bytes())?;
    writer.write_all(&reg_count.to_be_bytes())?;
    writer.write_all(&root_hash.bytes())
}

/// Encode the footer of the top-level file. `total_node_count` counts the reserved nil index, so the
/// footer stores `total_node_count - 1`, the number of nodes actually written.
pub fn encode_footer(total_node_count: u64, trie_count: u16) -> [u8; FOOTER_SIZE] {
    let mut footer = [0u8; FOOTER_SIZE];
    footer[..8].copy_from_slice(&total_node_count.saturating_sub(1).to_be_bytes());
    footer[8..].copy_from_slice(&trie_count.to_be_bytes());
    footer
}

/// Decode a footer into `(node count, trie count)`.
pub fn decode_footer(footer: &[u8; FOOTER_SIZE]) -> (u64, u16) {
    let mut node_count = [0u8; 8];
    node_count.copy_from_slice(&footer[..8]);
    let mut trie_count = [0u8; 2];
    trie_count.copy_from_slice(&footer[8..]);
    (u64::from_be_bytes(node_count), u16::from_be_bytes(trie_count))
}
