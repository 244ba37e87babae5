/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of checkpoints written to and read back from disk.

mod common;

use std::{collections::HashSet, fs, sync::Arc};

use common::logging::setup_logger;
use hotstuff_ledger::{
    ledger::{
        forest::Forest,
        trie::{Node, Path, Trie},
        trie_update::TrieUpdate,
    },
    wal::{
        checkpoint::{
            encoding::{decode_footer, FOOTER_SIZE},
            serializer::TOP_TRIES_FILE_NAME,
            CheckpointError,
        },
        checkpointer::checkpoint_dir_name,
        CheckpointStore, Checkpointer,
    },
};
use log::LevelFilter;

/// Build `count` tries, each writing a batch of keys on top of the one before it, so that consecutive
/// tries share most of their nodes.
fn build_tries(count: usize, keys_per_trie: usize) -> Vec<Trie> {
    let mut forest = Forest::new(count + 1);
    let mut state = Trie::empty().root_hash();
    for i in 0..count {
        let entries = (0..keys_per_trie)
            .map(|k| {
                (
                    format!("account/{}", (i * 31 + k) % 500).into_bytes(),
                    format!("balance {} {}", i, k).into_bytes(),
                )
            })
            .collect();
        state = forest
            .update(&TrieUpdate::from_entries(state, entries))
            .unwrap();
    }
    forest.get_tries()
}

fn collect_node_ids(node: Option<&Arc<Node>>, ids: &mut HashSet<u64>) {
    if let Some(node) = node {
        if ids.insert(node.id()) {
            collect_node_ids(node.left(), ids);
            collect_node_ids(node.right(), ids);
        }
    }
}

#[test]
fn stored_checkpoint_loads_the_same_tries() {
    setup_logger(LevelFilter::Debug);

    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Checkpointer::new(dir.path().to_path_buf());
    let tries = build_tries(20, 40);

    checkpointer.store_checkpoint(3, &tries).unwrap();
    assert_eq!(checkpointer.checkpoints().unwrap(), vec![3]);
    assert_eq!(checkpointer.latest_checkpoint().unwrap(), Some(3));

    let loaded = checkpointer.load_checkpoint(3).unwrap();
    assert_eq!(loaded.len(), tries.len());
    for (original, loaded) in tries.iter().zip(&loaded) {
        assert_eq!(original.root_hash(), loaded.root_hash());
        assert_eq!(original.reg_count(), loaded.reg_count());
    }

    let latest = loaded.last().unwrap();
    for k in 0..40 {
        let key = format!("account/{}", (19 * 31 + k) % 500).into_bytes();
        let payload = latest.get(&Path::from_key(&key)).unwrap();
        assert_eq!(payload.value(), format!("balance 19 {}", k).as_bytes());
    }
}

#[test]
fn shared_nodes_are_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Checkpointer::new(dir.path().to_path_buf());
    let tries = build_tries(10, 30);
    checkpointer.store_checkpoint(1, &tries).unwrap();

    let mut ids = HashSet::new();
    for trie in &tries {
        collect_node_ids(trie.root(), &mut ids);
    }

    let top = fs::read(
        dir.path()
            .join(checkpoint_dir_name(1))
            .join(TOP_TRIES_FILE_NAME),
    )
    .unwrap();
    let mut footer = [0u8; FOOTER_SIZE];
    footer.copy_from_slice(&top[top.len() - FOOTER_SIZE..]);
    let (node_count, trie_count) = decode_footer(&footer);
    assert_eq!(node_count, ids.len() as u64);
    assert_eq!(trie_count as usize, tries.len());
}

#[test]
fn empty_tries_can_be_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Checkpointer::new(dir.path().to_path_buf());
    checkpointer.store_checkpoint(0, &[Trie::empty()]).unwrap();

    let loaded = checkpointer.load_checkpoint(0).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].root_hash(), Trie::empty().root_hash());
}

#[test]
fn removed_checkpoints_cannot_be_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let checkpointer = Checkpointer::new(dir.path().to_path_buf());
    let tries = build_tries(2, 5);
    checkpointer.store_checkpoint(4, &tries).unwrap();
    checkpointer.store_checkpoint(8, &tries).unwrap();

    checkpointer.remove_checkpoint(4).unwrap();
    assert_eq!(checkpointer.checkpoints().unwrap(), vec![8]);
    assert!(matches!(
        checkpointer.load_checkpoint(4),
        Err(CheckpointError::NotFound { checkpoint: 4 })
    ));
    assert!(matches!(
        checkpointer.remove_checkpoint(4),
        Err(CheckpointError::NotFound { checkpoint: 4 })
    ));
}
