/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Concurrent serialization of a set of tries into checkpoint files.
//!
//! ## Partitioning
//!
//! The nodes of every trie at depth [`SUBTRIE_LEVEL`] split it into [`SUBTRIE_COUNT`] subtries, one per
//! 4-bit path prefix. Subtrie `i` of *every* trie is serialized by the same task into partition file
//! `i`, so subtries shared between tries are visited, and written, once. The partition tasks run in
//! parallel, one thread each.
//!
//! ## Node indices
//!
//! Within a file, nodes are written in post-order, so a node's children always come before it. Every
//! written node gets the next index, starting at 1 (0 means "no child"). Each partition numbers its
//! nodes from 1, and ends with its node count as a u64. Global indices are assigned by concatenating
//! the partitions in file order: a node with local index `l` in partition `i` has global index
//! `l + (node count of partitions 0..i)`.
//!
//! The nodes above [`SUBTRIE_LEVEL`] are then written to [`TOP_TRIES_FILE_NAME`], with global indices
//! continuing after the last partition node, followed by one root record per trie and the footer.
//!
//! Nodes are deduplicated by their [`id`](crate::ledger::trie::Node::id), so a node shared by several
//! tries is written once and referenced by index everywhere else.

use std::{
    collections::HashMap,
    io::{self, Write},
    path::Path,
    sync::Arc,
    thread,
};

use crate::{
    ledger::trie::{Node, NodeKind, Trie},
    wal::sync_rename::SyncRenameFile,
};

use super::{
    encoding::{encode_footer, encode_node, encode_trie_root},
    CheckpointError,
};

/// Depth at which tries are split into partitions.
pub const SUBTRIE_LEVEL: u16 = 4;

/// Number of partitions, and so of partition files.
pub const SUBTRIE_COUNT: usize = 1 << SUBTRIE_LEVEL;

/// Name of the file holding the top-level nodes, the trie root records, and the footer.
pub const TOP_TRIES_FILE_NAME: &str = "17";

pub fn partition_file_name(index: usize) -> String {
    index.to_string()
}

struct PartitionResult {
    // Node id -> local index, for every subtrie root in the partition.
    roots: HashMap<u64, u64>,
    node_count: u64,
}

/// Serialize `tries` into checkpoint files in `dir`. Any file that already exists in `dir` makes the
/// whole operation fail.
pub fn store_checkpoint_concurrently(tries: &[Trie], dir: &Path) -> Result<(), CheckpointError> {
    let trie_count = u16::try_from(tries.len())
        .map_err(|_| CheckpointError::TooManyTries { count: tries.len() })?;

    let subtrie_roots = create_subtrie_roots(tries);
    let partitions = store_subtries_concurrently(&subtrie_roots, dir)?;

    // Merge the partitions' subtrie roots into one global index space.
    let mut visited: HashMap<u64, u64> = HashMap::new();
    let mut offset = 0;
    for partition in &partitions {
        for (node_id, local_index) in &partition.roots {
            visited.insert(*node_id, local_index + offset);
        }
        offset += partition.node_count;
    }

    let top_file_error = CheckpointError::io(format!("write {}", TOP_TRIES_FILE_NAME));
    let mut writer = SyncRenameFile::create(dir, TOP_TRIES_FILE_NAME).map_err(&top_file_error)?;

    // The partition roots are already in `visited`, so this only writes the nodes above them.
    let mut next_index = offset + 1;
    for trie in tries {
        store_unique_nodes(trie.root(), &mut visited, &mut next_index, &mut writer)
            .map_err(&top_file_error)?;
    }

    for trie in tries {
        let root_index = match trie.root() {
            None => 0,
            Some(root) => *visited
                .get(&root.id())
                .ok_or(CheckpointError::MissingRoot {
                    root_hash: trie.root_hash(),
                })?,
        };
        encode_trie_root(root_index, trie.reg_count(), trie.root_hash(), &mut writer)
            .map_err(&top_file_error)?;
    }

    writer
        .write_all(&encode_footer(next_index, trie_count))
        .map_err(&top_file_error)?;
    writer.finish().map_err(&top_file_error)
}

/// Get the nodes at [`SUBTRIE_LEVEL`] of every trie: `roots[i][t]` is the root of subtrie `i` of
/// `tries[t]`. Leaves above the level are not in any subtrie.
fn create_subtrie_roots(tries: &[Trie]) -> Vec<Vec<Option<Arc<Node>>>> {
    let mut roots = vec![Vec::with_capacity(tries.len()); SUBTRIE_COUNT];
    for trie in tries {
        for (index, subtrie_root) in nodes_at_level(trie.root(), SUBTRIE_LEVEL)
            .into_iter()
            .enumerate()
        {
            roots[index].push(subtrie_root);
        }
    }
    roots
}

/// Get the `2^level` nodes at `level` below `root`, in left-to-right order, with `None` where a
/// position is empty or below a leaf.
fn nodes_at_level(root: Option<&Arc<Node>>, level: u16) -> Vec<Option<Arc<Node>>> {
    let mut nodes = vec![root.cloned()];
    for _ in 0..level {
        let mut next = Vec::with_capacity(nodes.len() * 2);
        for node in &nodes {
            match node.as_deref().map(Node::kind) {
                Some(NodeKind::Interior { left, right }) => {
                    next.push(left.clone());
                    next.push(right.clone());
                }
                _ => {
                    next.push(None);
                    next.push(None);
                }
            }
        }
        nodes = next;
    }
    nodes
}

fn store_subtries_concurrently(
    subtrie_roots: &[Vec<Option<Arc<Node>>>],
    dir: &Path,
) -> Result<Vec<PartitionResult>, CheckpointError> {
    thread::scope(|scope| {
        let handles: Vec<_> = subtrie_roots
            .iter()
            .enumerate()
            .map(|(index, roots)| scope.spawn(move || store_subtrie(index, roots, dir)))
            .collect();

        // Join every task before returning, even after a failure.
        let results: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();

        results
            .into_iter()
            .enumerate()
            .map(|(index, result)| match result {
                Ok(Ok(partition)) => Ok(partition),
                Ok(Err(err)) => Err(CheckpointError::Partition {
                    index,
                    source: Box::new(err),
                }),
                Err(_) => Err(CheckpointError::PartitionPanicked { index }),
            })
            .collect()
    })
}

fn store_subtrie(
    index: usize,
    roots: &[Option<Arc<Node>>],
    dir: &Path,
) -> Result<PartitionResult, CheckpointError> {
    let file_name = partition_file_name(index);
    let file_error = CheckpointError::io(format!("write {}", file_name));
    let mut writer = SyncRenameFile::create(dir, &file_name).map_err(&file_error)?;

    let mut visited = HashMap::new();
    let mut partition_roots = HashMap::new();
    let mut next_index = 1;
    for root in roots.iter().flatten() {
        let root_index = store_unique_nodes(Some(root), &mut visited, &mut next_index, &mut writer)
            .map_err(&file_error)?;
        partition_roots.insert(root.id(), root_index);
    }

    let node_count = next_index - 1;
    writer
        .write_all(&node_count.to_be_bytes())
        .map_err(&file_error)?;
    writer.finish().map_err(&file_error)?;

    Ok(PartitionResult {
        roots: partition_roots,
        node_count,
    })
}

/// Write every node under `node` that is not in `visited`, children first, and return the index of
/// `node` (0 for `None`).
fn store_unique_nodes<W: Write>(
    node: Option<&Arc<Node>>,
    visited: &mut HashMap<u64, u64>,
    next_index: &mut u64,
    writer: &mut W,
) -> io::Result<u64> {
    let node = match node {
        None => return Ok(0),
        Some(node) => node,
    };
    if let Some(index) = visited.get(&node.id()) {
        return Ok(*index);
    }

    let (left_index, right_index) = match node.kind() {
        NodeKind::Leaf { .. } => (0, 0),
        NodeKind::Interior { left, right } => (
            store_unique_nodes(left.as_ref(), visited, next_index, writer)?,
            store_unique_nodes(right.as_ref(), visited, next_index, writer)?,
        ),
    };
    encode_node(node, left_index, right_index, writer)?;

    let index = *next_index;
    *next_index += 1;
    visited.insert(node.id(), index);
    Ok(index)
}
