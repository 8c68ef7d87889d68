// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use fraudutil::{crypto, Bytes32};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const MAX_DEPTH: usize = 64;

/// `zero_hashes()[h]` labels an all-empty subtree of height `h`: zero bytes
/// at the leaf layer, then pairwise node hashes up the ladder.
fn zero_hashes() -> &'static Vec<Bytes32> {
    static ZEROS: OnceLock<Vec<Bytes32>> = OnceLock::new();
    ZEROS.get_or_init(|| {
        let mut ladder = vec![Bytes32::default(); MAX_DEPTH];
        for h in 0..MAX_DEPTH - 1 {
            ladder[h + 1] = crypto::hash_node(ladder[h], ladder[h]);
        }
        ladder
    })
}

/// A Merkle tree over leaf hashes, built layer by layer up to a single root.
///
/// Layers are padded with the zero-hash ladder, so the tree behaves as if it
/// were provisioned to the next power of two. Proofs are bottom-up sibling
/// paths; [`verify_proof`] checks one against a root knowing only the leaf
/// count. The tree holds hashes, never the committed data itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Merkle {
    layers: Vec<Vec<Bytes32>>,
}

impl Merkle {
    pub fn new(leaves: Vec<Bytes32>) -> Merkle {
        if leaves.is_empty() {
            return Merkle::default();
        }
        let mut layers = vec![leaves];
        while layers.last().expect("non-empty layers").len() > 1 {
            let layer = layers.last().expect("non-empty layers");
            let empty = zero_hashes()[layers.len() - 1];
            let next = layer
                .chunks(2)
                .map(|pair| crypto::hash_node(pair[0], pair.get(1).unwrap_or(&empty)))
                .collect();
            layers.push(next);
        }
        Merkle { layers }
    }

    pub fn root(&self) -> Bytes32 {
        match self.layers.last() {
            Some(layer) => layer[0],
            None => Bytes32::default(),
        }
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.layers.first().map(|l| l.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sibling path for the leaf at `idx`, bottom-up. `None` when out of
    /// range.
    pub fn prove(&self, mut idx: usize) -> Option<Vec<Bytes32>> {
        if idx >= self.len() {
            return None;
        }
        let mut proof = Vec::with_capacity(self.layers.len() - 1);
        for (h, layer) in self.layers.iter().enumerate() {
            if h == self.layers.len() - 1 {
                break;
            }
            let counterpart = idx ^ 1;
            proof.push(layer.get(counterpart).copied().unwrap_or(zero_hashes()[h]));
            idx >>= 1;
        }
        Some(proof)
    }
}

/// Depth of a tree holding `num_leaves` leaves, i.e. the length of every
/// sibling path in it.
pub fn proof_depth(num_leaves: u64) -> usize {
    if num_leaves <= 1 {
        0
    } else {
        ((num_leaves - 1).ilog2() + 1) as usize
    }
}

/// Checks a bottom-up sibling path for `leaf` sitting at `index` in a tree of
/// `num_leaves` leaves.
pub fn verify_proof(
    root: Bytes32,
    leaf: Bytes32,
    index: u64,
    num_leaves: u64,
    proof: &[Bytes32],
) -> bool {
    if num_leaves == 0 || index >= num_leaves || proof.len() != proof_depth(num_leaves) {
        return false;
    }
    let mut label = leaf;
    let mut idx = index;
    for sibling in proof {
        label = if idx & 1 == 1 {
            crypto::hash_node(sibling, label)
        } else {
            crypto::hash_node(label, sibling)
        };
        idx >>= 1;
    }
    label == root
}
