/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reconstruction of tries from the files written by the [serializer](super::serializer).
//!
//! Every node is rebuilt with a fresh node id and re-hashed, and the result is compared with the
//! hash stored next to it, so a checkpoint that reads back successfully holds exactly the tries that
//! were written.

use std::{fs, path::Path, sync::Arc};

use crate::ledger::trie::{Node, Trie, PATH_BITS};

use super::{
    encoding::{
        decode_footer, Decoder, EncodedNode, FOOTER_SIZE, NODE_COUNT_TRAILER_SIZE,
        TRIE_ROOT_RECORD_SIZE,
    },
    serializer::{partition_file_name, SUBTRIE_COUNT, TOP_TRIES_FILE_NAME},
    CheckpointError,
};

/// Read the tries stored in the checkpoint directory `dir`, in the order they were written.
pub fn read_checkpoint(dir: &Path) -> Result<Vec<Trie>, CheckpointError> {
    // nodes[i] has global index i + 1.
    let mut nodes: Vec<Arc<Node>> = Vec::new();

    for index in 0..SUBTRIE_COUNT {
        let file_name = partition_file_name(index);
        let bytes = read_file(dir, &file_name)?;
        if bytes.len() < NODE_COUNT_TRAILER_SIZE {
            return Err(corrupted(&file_name, "missing node count"));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - NODE_COUNT_TRAILER_SIZE);
        let mut node_count = [0u8; NODE_COUNT_TRAILER_SIZE];
        node_count.copy_from_slice(trailer);
        let node_count = u64::from_be_bytes(node_count);

        let offset = nodes.len() as u64;
        read_nodes(body, &file_name, offset, &mut nodes)?;
        if nodes.len() as u64 - offset != node_count {
            return Err(corrupted(
                &file_name,
                &format!(
                    "holds {} nodes, trailer says {}",
                    nodes.len() as u64 - offset,
                    node_count
                ),
            ));
        }
    }

    let bytes = read_file(dir, TOP_TRIES_FILE_NAME)?;
    if bytes.len() < FOOTER_SIZE {
        return Err(corrupted(TOP_TRIES_FILE_NAME, "missing footer"));
    }
    let mut footer = [0u8; FOOTER_SIZE];
    footer.copy_from_slice(&bytes[bytes.len() - FOOTER_SIZE..]);
    let (node_count, trie_count) = decode_footer(&footer);

    let roots_len = trie_count as usize * TRIE_ROOT_RECORD_SIZE;
    let nodes_end = (bytes.len() - FOOTER_SIZE)
        .checked_sub(roots_len)
        .ok_or_else(|| corrupted(TOP_TRIES_FILE_NAME, "too short for its trie root records"))?;

    // Top-level nodes reference children by global index.
    read_nodes(&bytes[..nodes_end], TOP_TRIES_FILE_NAME, 0, &mut nodes)?;
    if nodes.len() as u64 != node_count {
        return Err(corrupted(
            TOP_TRIES_FILE_NAME,
            &format!(
                "checkpoint holds {} nodes, footer says {}",
                nodes.len(),
                node_count
            ),
        ));
    }

    let mut decoder = Decoder::new(
        &bytes[nodes_end..bytes.len() - FOOTER_SIZE],
        TOP_TRIES_FILE_NAME,
    );
    let mut tries = Vec::with_capacity(trie_count as usize);
    for _ in 0..trie_count {
        let (root_index, reg_count, root_hash) = decoder.decode_trie_root()?;
        let root = resolve(root_index, 0, &nodes, TOP_TRIES_FILE_NAME)?;
        let trie = Trie::from_root(root, reg_count);
        if trie.root_hash() != root_hash {
            return Err(CheckpointError::HashMismatch {
                file: TOP_TRIES_FILE_NAME.to_string(),
                index: root_index,
            });
        }
        tries.push(trie);
    }

    Ok(tries)
}

fn read_file(dir: &Path, file_name: &str) -> Result<Vec<u8>, CheckpointError> {
    let path = dir.join(file_name);
    fs::read(&path).map_err(CheckpointError::io(format!("read {}", path.display())))
}

/// Decode every node in `bytes`, appending them to `nodes`. Child indices in `bytes` are relative to
/// `offset`.
fn read_nodes(
    bytes: &[u8],
    file_name: &str,
    offset: u64,
    nodes: &mut Vec<Arc<Node>>,
) -> Result<(), CheckpointError> {
    let mut decoder = Decoder::new(bytes, file_name);
    while !decoder.is_empty() {
        let index = nodes.len() as u64 + 1;
        let (node, stored_hash) = match decoder.decode_node()? {
            EncodedNode::Leaf {
                depth,
                path,
                hash,
                payload,
            } => {
                check_depth(depth, file_name)?;
                (Node::new_leaf(depth, path, payload), hash)
            }
            EncodedNode::Interior {
                depth,
                left_index,
                right_index,
                hash,
            } => {
                check_depth(depth, file_name)?;
                let left = resolve(left_index, offset, nodes, file_name)?;
                let right = resolve(right_index, offset, nodes, file_name)?;
                (Node::new_interior(depth, left, right), hash)
            }
        };
        if node.hash() != stored_hash {
            return Err(CheckpointError::HashMismatch {
                file: file_name.to_string(),
                index,
            });
        }
        nodes.push(Arc::new(node));
    }
    Ok(())
}

/// Get the already decoded node that `index` (relative to `offset`) refers to. Index 0 is no node.
fn resolve(
    index: u64,
    offset: u64,
    nodes: &[Arc<Node>],
    file_name: &str,
) -> Result<Option<Arc<Node>>, CheckpointError> {
    if index == 0 {
        return Ok(None);
    }
    let global_index = index + offset;
    nodes
        .get((global_index - 1) as usize)
        .cloned()
        .map(Some)
        .ok_or_else(|| {
            corrupted(
                file_name,
                &format!("reference to node {} before it was written", global_index),
            )
        })
}

fn check_depth(depth: u16, file_name: &str) -> Result<(), CheckpointError> {
    if depth > PATH_BITS {
        return Err(corrupted(file_name, &format!("node depth {} out of range", depth)));
    }
    Ok(())
}

fn corrupted(file_name: &str, reason: &str) -> CheckpointError {
    CheckpointError::Corrupted {
        file: file_name.to_string(),
        reason: reason.to_string(),
    }
}
