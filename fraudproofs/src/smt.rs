// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use crate::Error;
use eyre::{bail, ensure, Result};
use fraudutil::{crypto, Bytes32};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::OnceLock};

/// Depth of the state tree: one level per key bit.
pub const TREE_DEPTH: usize = 256;

/// Storage seam for tree nodes and leaf values. The in-memory [`MemStore`]
/// backs tests and light deployments; a durable backend implements the same
/// two calls. An empty stored value is equivalent to an absent entry.
pub trait TreeStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemStore(HashMap<Vec<u8>, Vec<u8>>);

impl TreeStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.0.get(key).cloned())
    }

    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.0.insert(key, value);
        Ok(())
    }
}

/// Hashes for the all-empty subtree at each height. `defaults()[0]` labels an
/// empty leaf; `defaults()[h + 1] = H(0x01 ∥ d[h] ∥ d[h])`.
fn defaults() -> &'static Vec<Bytes32> {
    static DEFAULTS: OnceLock<Vec<Bytes32>> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        let mut ladder = vec![Bytes32::default(); TREE_DEPTH + 1];
        for h in 0..TREE_DEPTH {
            ladder[h + 1] = crypto::hash_node(ladder[h], ladder[h]);
        }
        ladder
    })
}

/// Bit `i` of a key, MSB-first: bit 0 is the high bit of byte 0.
fn key_bit(key: &Bytes32, i: usize) -> bool {
    (key[i / 8] >> (7 - (i % 8))) & 1 == 1
}

/// Label of the leaf holding `value` at `key`; the default label when empty.
fn leaf_label(key: &Bytes32, value: &[u8]) -> Bytes32 {
    if value.is_empty() {
        return defaults()[0];
    }
    let mut preimage = Vec::with_capacity(32 + value.len());
    preimage.extend_from_slice(key.as_ref());
    preimage.extend_from_slice(value);
    crypto::hash_leaf(&preimage)
}

/// Folds a leaf label up to the root along `key`, pulling the sibling for
/// each height from `sibling_at`.
fn fold_path(key: &Bytes32, leaf: Bytes32, mut sibling_at: impl FnMut(usize) -> Bytes32) -> Bytes32 {
    let mut current = leaf;
    for height in 0..TREE_DEPTH {
        let sibling = sibling_at(height);
        current = if key_bit(key, TREE_DEPTH - 1 - height) {
            crypto::hash_node(sibling, current)
        } else {
            crypto::hash_node(current, sibling)
        };
    }
    current
}

// Nodes are stored by position: a u16 height tag followed by the key prefix
// that addresses the node (full key at height 0, empty at the root). Leaf
// values live under a separate "v:" keyspace.

fn node_store_key(key: &Bytes32, height: usize) -> Vec<u8> {
    let prefix_bits = TREE_DEPTH - height;
    let prefix_len = prefix_bits.div_ceil(8);

    let mut out = Vec::with_capacity(2 + prefix_len);
    out.extend_from_slice(&(height as u16).to_be_bytes());

    let mut prefix = [0u8; 32];
    prefix[..prefix_len].copy_from_slice(&key[..prefix_len]);
    let spare = prefix_bits % 8;
    if spare != 0 {
        prefix[prefix_len - 1] &= 0xFFu8 << (8 - spare);
    }
    out.extend_from_slice(&prefix[..prefix_len]);
    out
}

/// Position of the sibling adjacent to `key`'s path at the given height: the
/// same prefix with the branching bit flipped.
fn sibling_store_key(key: &Bytes32, height: usize) -> Vec<u8> {
    let mut flipped = *key;
    let bit = TREE_DEPTH - 1 - height;
    flipped[bit / 8] ^= 1 << (7 - (bit % 8));
    node_store_key(&flipped, height)
}

fn value_store_key(key: &Bytes32) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 32);
    out.extend_from_slice(b"v:");
    out.extend_from_slice(key.as_ref());
    out
}

/// Sparse Merkle tree over the full 256-bit keyspace. Only populated paths
/// are materialized in the store; everything else hashes to the default
/// ladder. Leaves are `H(0x00 ∥ key ∥ value)`, nodes `H(0x01 ∥ l ∥ r)`.
#[derive(Debug, Clone)]
pub struct SparseMerkleTree<S: TreeStore = MemStore> {
    store: S,
    root: Bytes32,
}

impl SparseMerkleTree<MemStore> {
    pub fn new() -> Self {
        Self::with_store(MemStore::default())
    }
}

impl Default for SparseMerkleTree<MemStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TreeStore> SparseMerkleTree<S> {
    pub fn with_store(store: S) -> Self {
        SparseMerkleTree {
            store,
            root: defaults()[TREE_DEPTH],
        }
    }

    pub fn root(&self) -> Bytes32 {
        self.root
    }

    /// Current value at `key`, or `None` when the key is absent.
    pub fn get(&self, key: &Bytes32) -> Result<Option<Vec<u8>>> {
        Ok(self
            .store
            .get(&value_store_key(key))?
            .filter(|v| !v.is_empty()))
    }

    /// Writes `value` at `key` and returns the new root. An empty `value`
    /// deletes the entry, collapsing the leaf back to its default label.
    pub fn update(&mut self, key: &Bytes32, value: &[u8]) -> Result<Bytes32> {
        let siblings = self.path_siblings(key)?;

        self.store.insert(value_store_key(key), value.to_vec())?;

        let mut current = leaf_label(key, value);
        self.store
            .insert(node_store_key(key, 0), current.to_vec())?;
        for (height, sibling) in siblings.iter().enumerate() {
            current = if key_bit(key, TREE_DEPTH - 1 - height) {
                crypto::hash_node(sibling, current)
            } else {
                crypto::hash_node(current, sibling)
            };
            self.store
                .insert(node_store_key(key, height + 1), current.to_vec())?;
        }

        self.root = current;
        Ok(self.root)
    }

    /// Compact inclusion/absence proof for `key` against the current root.
    pub fn prove_compact(&self, key: &Bytes32) -> Result<CompactProof> {
        let leaf_hash = match self.store.get(&node_store_key(key, 0))? {
            Some(raw) => Bytes32::try_from(raw).map_err(|_| eyre::eyre!("corrupt leaf node"))?,
            None => defaults()[0],
        };

        let mut bitmap = Bytes32::default();
        let mut side_nodes = Vec::new();
        for (height, sibling) in self.path_siblings(key)?.into_iter().enumerate() {
            if sibling != defaults()[height] {
                bitmap[height / 8] |= 1 << (height % 8);
                side_nodes.push(sibling);
            }
        }

        Ok(CompactProof {
            leaf_hash,
            bitmap,
            side_nodes,
        })
    }

    /// Sibling labels along `key`'s path, bottom-up.
    fn path_siblings(&self, key: &Bytes32) -> Result<Vec<Bytes32>> {
        let mut siblings = Vec::with_capacity(TREE_DEPTH);
        for height in 0..TREE_DEPTH {
            let sibling = match self.store.get(&sibling_store_key(key, height))? {
                Some(raw) => {
                    Bytes32::try_from(raw).map_err(|_| eyre::eyre!("corrupt tree node"))?
                }
                None => defaults()[height],
            };
            siblings.push(sibling);
        }
        Ok(siblings)
    }
}

/// Transportable Merkle path for one key. The default siblings of the sparse
/// path are elided: `bitmap` bit `h` marks a materialized sibling at height
/// `h`, stored bottom-up in `side_nodes`. `leaf_hash` is the label of the
/// proven leaf, which lets a verifier re-root the path after a write without
/// holding the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactProof {
    pub(crate) leaf_hash: Bytes32,
    pub(crate) bitmap: Bytes32,
    pub(crate) side_nodes: Vec<Bytes32>,
}

impl CompactProof {
    /// Checks that `key` holds `value` under `root` (an empty `value` checks
    /// absence).
    pub fn verify(&self, root: Bytes32, key: &Bytes32, value: &[u8]) -> bool {
        if !self.shape_ok() || leaf_label(key, value) != self.leaf_hash {
            return false;
        }
        self.fold(key, self.leaf_hash) == root
    }

    /// Recomputes the root after writing `value` at `key`, given only this
    /// proof. Fails when the proof's pre-state leaf does not fold to `root`.
    pub fn update_root(&self, root: Bytes32, key: &Bytes32, value: &[u8]) -> Result<Bytes32> {
        ensure!(self.shape_ok(), "side node count disagrees with bitmap");
        if self.fold(key, self.leaf_hash) != root {
            bail!("proof does not match root {root}");
        }
        Ok(self.fold(key, leaf_label(key, value)))
    }

    fn shape_ok(&self) -> bool {
        let expected: u32 = self.bitmap.iter().map(|b| b.count_ones()).sum();
        self.side_nodes.len() == expected as usize
    }

    fn fold(&self, key: &Bytes32, leaf: Bytes32) -> Bytes32 {
        let mut taken = 0;
        fold_path(key, leaf, |height| {
            if self.bitmap[height / 8] & (1 << (height % 8)) != 0 {
                let node = self.side_nodes[taken];
                taken += 1;
                node
            } else {
                defaults()[height]
            }
        })
    }

    /// Wire form: `leaf_hash ∥ bitmap ∥ side_nodes`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + 32 * self.side_nodes.len());
        out.extend_from_slice(self.leaf_hash.as_ref());
        out.extend_from_slice(self.bitmap.as_ref());
        for node in &self.side_nodes {
            out.extend_from_slice(node.as_ref());
        }
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<CompactProof, Error> {
        if buf.len() < 64 || (buf.len() - 64) % 32 != 0 {
            return Error::decode("compact proof: bad length");
        }
        let leaf_hash = Bytes32::try_from(&buf[..32]).expect("32-byte slice");
        let bitmap = Bytes32::try_from(&buf[32..64]).expect("32-byte slice");
        let side_nodes: Vec<Bytes32> = buf[64..]
            .chunks_exact(32)
            .map(|raw| Bytes32::try_from(raw).expect("32-byte slice"))
            .collect();

        let expected: u32 = bitmap.iter().map(|b| b.count_ones()).sum();
        if side_nodes.len() != expected as usize {
            return Error::decode("compact proof: side node count disagrees with bitmap");
        }
        Ok(CompactProof {
            leaf_hash,
            bitmap,
            side_nodes,
        })
    }
}
