/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistent, copy-on-write binary Merkle trie.
//!
//! ## Structure
//!
//! Every key is mapped to a 256-bit [`Path`], the SHA256 hash of the key. A trie stores each
//! registered path in a leaf at the *shallowest* depth where no other registered path shares the
//! leaf's prefix, so the shape of a trie depends only on the set of paths it holds, never on the
//! order they were inserted in. Interior nodes always have at least one child.
//!
//! ## Sharing
//!
//! Nodes are never mutated. [`Trie::update`] returns a new trie that shares every unchanged subtree
//! with the old one (as the same `Arc<Node>`), so the many tries kept by a ledger typically share most
//! of their nodes. Every node is assigned a process-unique [`id`](Node::id) when it is constructed.
//! Code that needs node identity (e.g., checkpoint deduplication) keys on this id, never on addresses.
//!
//! ## Hashing
//!
//! - Leaf: `SHA256(0x00 || path || encoded payload)`.
//! - Interior: `SHA256(0x01 || left hash || right hash)`, where a missing child hashes to [`EMPTY_HASH`].
//!
//! Hashes do not cover depth, so a leaf that is pushed down by an insertion keeps its hash.

use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use crate::types::data_types::{first_seven_base64_chars, CryptoHash};

/// Number of bits in a [`Path`], and so the maximum depth of a leaf.
pub const PATH_BITS: u16 = 256;

/// Root hash of the empty trie, and the hash of a missing child.
pub const EMPTY_HASH: CryptoHash = CryptoHash::new([0u8; 32]);

const LEAF_DOMAIN: u8 = 0;
const INTERIOR_DOMAIN: u8 = 1;

// 0 is never assigned, so it can stand for "no node".
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Position of a register in the trie: the SHA256 hash of its key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct Path([u8; 32]);

impl Path {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the path of `key`.
    pub fn from_key(key: &[u8]) -> Self {
        Self(Sha256::digest(key).into())
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Get the bit at `depth`, counting from the most significant bit of the first byte. `true` means
    /// "go right".
    pub fn bit(&self, depth: u16) -> bool {
        let byte = self.0[(depth / 8) as usize];
        (byte >> (7 - depth % 8)) & 1 == 1
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&first_seven_base64_chars(&self.0))
    }
}

impl Debug for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self)
    }
}

/// A key-value pair stored in a leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Payload {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Payload {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// A node of a [`Trie`].
pub struct Node {
    id: u64,
    depth: u16,
    hash: CryptoHash,
    kind: NodeKind,
}

pub enum NodeKind {
    Leaf {
        path: Path,
        payload: Payload,
    },
    Interior {
        left: Option<Arc<Node>>,
        right: Option<Arc<Node>>,
    },
}

impl Node {
    /// Create a leaf at `depth` holding `payload` at `path`.
    pub fn new_leaf(depth: u16, path: Path, payload: Payload) -> Self {
        let hash = leaf_hash(&path, &payload);
        Self {
            id: next_node_id(),
            depth,
            hash,
            kind: NodeKind::Leaf { path, payload },
        }
    }

    /// Create an interior node at `depth` with the given children.
    pub fn new_interior(depth: u16, left: Option<Arc<Node>>, right: Option<Arc<Node>>) -> Self {
        let hash = interior_hash(child_hash(&left), child_hash(&right));
        Self {
            id: next_node_id(),
            depth,
            hash,
            kind: NodeKind::Interior { left, right },
        }
    }

    /// Process-unique identifier assigned when this node was constructed.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Distance of this node from the root of its trie.
    pub fn depth(&self) -> u16 {
        self.depth
    }

    pub fn hash(&self) -> CryptoHash {
        self.hash
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    pub fn left(&self) -> Option<&Arc<Node>> {
        match &self.kind {
            NodeKind::Interior { left, .. } => left.as_ref(),
            NodeKind::Leaf { .. } => None,
        }
    }

    pub fn right(&self) -> Option<&Arc<Node>> {
        match &self.kind {
            NodeKind::Interior { right, .. } => right.as_ref(),
            NodeKind::Leaf { .. } => None,
        }
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Leaf { path, .. } => f
                .debug_struct("Leaf")
                .field("id", &self.id)
                .field("depth", &self.depth)
                .field("path", path)
                .finish(),
            NodeKind::Interior { .. } => f
                .debug_struct("Interior")
                .field("id", &self.id)
                .field("depth", &self.depth)
                .field("hash", &self.hash)
                .finish(),
        }
    }
}

/// An immutable snapshot of ledger state. Cloning a `Trie` is cheap.
#[derive(Clone, Default)]
pub struct Trie {
    root: Option<Arc<Node>>,
    reg_count: u64,
}

impl Trie {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a trie from its root node and the number of registers (leaves) under it.
    pub fn from_root(root: Option<Arc<Node>>, reg_count: u64) -> Self {
        Self { root, reg_count }
    }

    pub fn root(&self) -> Option<&Arc<Node>> {
        self.root.as_ref()
    }

    pub fn root_hash(&self) -> CryptoHash {
        child_hash(&self.root)
    }

    /// Number of registers stored in this trie.
    pub fn reg_count(&self) -> u64 {
        self.reg_count
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Get the payload registered at `path`, if any.
    pub fn get(&self, path: &Path) -> Option<&Payload> {
        let mut node = self.root.as_ref()?;
        loop {
            match &node.kind {
                NodeKind::Leaf {
                    path: leaf_path,
                    payload,
                } => return (leaf_path == path).then_some(payload),
                NodeKind::Interior { left, right } => {
                    node = if path.bit(node.depth) { right } else { left }.as_ref()?;
                }
            }
        }
    }

    /// Create a new trie that registers every `payloads[i]` at `paths[i]`. If a path appears more
    /// than once, the last payload given for it wins. `self` is left unchanged.
    pub fn update(&self, paths: &[Path], payloads: &[Payload]) -> Result<Trie, TrieError> {
        if paths.len() != payloads.len() {
            return Err(TrieError::MismatchedLengths {
                paths: paths.len(),
                payloads: payloads.len(),
            });
        }
        if paths.is_empty() {
            return Ok(self.clone());
        }

        // Stable sort keeps the input order among equal paths, so the last write is last.
        let mut updates: Vec<(Path, &Payload)> = paths.iter().copied().zip(payloads).collect();
        updates.sort_by(|a, b| a.0.cmp(&b.0));
        let mut deduped: Vec<(Path, &Payload)> = Vec::with_capacity(updates.len());
        for update in updates {
            match deduped.last_mut() {
                Some(last) if last.0 == update.0 => *last = update,
                _ => deduped.push(update),
            }
        }

        let mut added = 0;
        let root = update_node(self.root.as_ref(), 0, &deduped, &mut added);
        Ok(Trie {
            root,
            reg_count: self.reg_count + added,
        })
    }
}

impl Debug for Trie {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trie")
            .field("root_hash", &self.root_hash())
            .field("reg_count", &self.reg_count)
            .finish()
    }
}

/// Apply sorted, deduplicated `updates` to the subtree rooted at `node`, which sits at `depth`.
/// Unchanged subtrees are returned as the same `Arc`.
fn update_node(
    node: Option<&Arc<Node>>,
    depth: u16,
    updates: &[(Path, &Payload)],
    added: &mut u64,
) -> Option<Arc<Node>> {
    if updates.is_empty() {
        return node.cloned();
    }

    match node.map(|node| (node, &node.kind)) {
        None => {
            if let [(path, payload)] = updates {
                *added += 1;
                return Some(Arc::new(Node::new_leaf(depth, *path, (*payload).clone())));
            }
            let (left_updates, right_updates) = split_at_bit(updates, depth);
            let left = update_node(None, depth + 1, left_updates, added);
            let right = update_node(None, depth + 1, right_updates, added);
            Some(Arc::new(Node::new_interior(depth, left, right)))
        }

        Some((leaf, NodeKind::Leaf { path, payload })) => {
            if let [(update_path, update_payload)] = updates {
                if update_path == path {
                    if *update_payload == payload {
                        return Some(Arc::clone(leaf));
                    }
                    return Some(Arc::new(Node::new_leaf(
                        depth,
                        *path,
                        (*update_payload).clone(),
                    )));
                }
            }

            // Push the existing leaf one level down, next to the updates on its side.
            let moved = Arc::new(Node::new_leaf(depth + 1, *path, payload.clone()));
            let (left_updates, right_updates) = split_at_bit(updates, depth);
            let (left, right) = if path.bit(depth) {
                (
                    update_node(None, depth + 1, left_updates, added),
                    update_node(Some(&moved), depth + 1, right_updates, added),
                )
            } else {
                (
                    update_node(Some(&moved), depth + 1, left_updates, added),
                    update_node(None, depth + 1, right_updates, added),
                )
            };
            Some(Arc::new(Node::new_interior(depth, left, right)))
        }

        Some((interior, NodeKind::Interior { left, right })) => {
            let (left_updates, right_updates) = split_at_bit(updates, depth);
            let new_left = update_node(left.as_ref(), depth + 1, left_updates, added);
            let new_right = update_node(right.as_ref(), depth + 1, right_updates, added);
            if same_node(left, &new_left) && same_node(right, &new_right) {
                Some(Arc::clone(interior))
            } else {
                Some(Arc::new(Node::new_interior(depth, new_left, new_right)))
            }
        }
    }
}

// `updates` is sorted by path, so the ones going left form a prefix.
fn split_at_bit<'a, 'b>(
    updates: &'a [(Path, &'b Payload)],
    depth: u16,
) -> (&'a [(Path, &'b Payload)], &'a [(Path, &'b Payload)]) {
    let split = updates.partition_point(|(path, _)| !path.bit(depth));
    updates.split_at(split)
}

fn same_node(a: &Option<Arc<Node>>, b: &Option<Arc<Node>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn next_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

fn child_hash(child: &Option<Arc<Node>>) -> CryptoHash {
    child.as_ref().map_or(EMPTY_HASH, |node| node.hash)
}

fn leaf_hash(path: &Path, payload: &Payload) -> CryptoHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_DOMAIN]);
    hasher.update(path.0);
    hasher.update((payload.key.len() as u32).to_be_bytes());
    hasher.update(&payload.key);
    hasher.update((payload.value.len() as u32).to_be_bytes());
    hasher.update(&payload.value);
    CryptoHash::new(hasher.finalize().into())
}

fn interior_hash(left: CryptoHash, right: CryptoHash) -> CryptoHash {
    let mut hasher = Sha256::new();
    hasher.update([INTERIOR_DOMAIN]);
    hasher.update(left.bytes());
    hasher.update(right.bytes());
    CryptoHash::new(hasher.finalize().into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieError {
    MismatchedLengths { paths: usize, payloads: usize },
}

impl Display for TrieError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrieError::MismatchedLengths { paths, payloads } => write!(
                f,
                "trie update has {} paths but {} payloads",
                paths, payloads
            ),
        }
    }
}

impl std::error::Error for TrieError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(range: std::ops::Range<u32>, value: u8) -> (Vec<Path>, Vec<Payload>) {
        range
            .map(|i| {
                let key = i.to_be_bytes().to_vec();
                (Path::from_key(&key), Payload::new(key, vec![value]))
            })
            .unzip()
    }

    #[test]
    fn root_hash_does_not_depend_on_insertion_order() {
        let (paths, payloads) = entries(0..64, 1);

        let all_at_once = Trie::empty().update(&paths, &payloads).unwrap();

        let mut one_by_one = Trie::empty();
        for (path, payload) in paths.iter().zip(&payloads).rev() {
            one_by_one = one_by_one
                .update(&[*path], &[payload.clone()])
                .unwrap();
        }

        assert_eq!(all_at_once.root_hash(), one_by_one.root_hash());
        assert_eq!(all_at_once.reg_count(), 64);
        assert_eq!(one_by_one.reg_count(), 64);
    }

    #[test]
    fn update_leaves_the_old_trie_unchanged_and_shares_untouched_subtrees() {
        let (paths, payloads) = entries(0..32, 1);
        let old = Trie::empty().update(&paths, &payloads).unwrap();

        let new = old
            .update(&[paths[0]], &[Payload::new(payloads[0].key().to_vec(), vec![2])])
            .unwrap();

        assert_eq!(old.get(&paths[0]).unwrap().value(), &[1]);
        assert_eq!(new.get(&paths[0]).unwrap().value(), &[2]);
        assert_ne!(old.root_hash(), new.root_hash());
        assert_eq!(new.reg_count(), 32);

        // The child of the root on the side not containing `paths[0]` is shared.
        let (old_root, new_root) = (old.root().unwrap(), new.root().unwrap());
        let (old_other, new_other) = if paths[0].bit(0) {
            (old_root.left(), new_root.left())
        } else {
            (old_root.right(), new_root.right())
        };
        assert!(Arc::ptr_eq(old_other.unwrap(), new_other.unwrap()));
    }

    #[test]
    fn writing_the_same_payload_returns_the_same_root() {
        let (paths, payloads) = entries(0..8, 1);
        let trie = Trie::empty().update(&paths, &payloads).unwrap();
        let same = trie.update(&paths[2..3], &payloads[2..3]).unwrap();
        assert!(Arc::ptr_eq(trie.root().unwrap(), same.root().unwrap()));
    }

    #[test]
    fn last_write_wins_within_one_update() {
        let path = Path::from_key(b"k");
        let trie = Trie::empty()
            .update(
                &[path, path],
                &[
                    Payload::new(b"k".to_vec(), b"first".to_vec()),
                    Payload::new(b"k".to_vec(), b"second".to_vec()),
                ],
            )
            .unwrap();
        assert_eq!(trie.get(&path).unwrap().value(), b"second");
        assert_eq!(trie.reg_count(), 1);
    }

    #[test]
    fn missing_paths_are_not_found() {
        let (paths, payloads) = entries(0..16, 1);
        let trie = Trie::empty().update(&paths, &payloads).unwrap();
        assert!(trie.get(&Path::from_key(b"absent")).is_none());
        assert!(Trie::empty().get(&paths[0]).is_none());
        assert_eq!(Trie::empty().root_hash(), EMPTY_HASH);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let (paths, payloads) = entries(0..2, 1);
        assert_eq!(
            Trie::empty().update(&paths, &payloads[..1]).unwrap_err(),
            TrieError::MismatchedLengths {
                paths: 2,
                payloads: 1
            }
        );
    }
}
