// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use crate::{
    block::{state_failure, Block},
    fraud::FraudProof,
    smt::{MemStore, SparseMerkleTree, TreeStore},
    Error,
};
use fraudutil::Bytes32;

/// An append-only list of accepted blocks and the state tree they produced.
/// The chain owns its tree exclusively; the first append executes against
/// the empty-tree root.
#[derive(Debug)]
pub struct Blockchain<S: TreeStore = MemStore> {
    blocks: Vec<Block>,
    state: SparseMerkleTree<S>,
}

impl Blockchain<MemStore> {
    pub fn new() -> Self {
        Self::with_store(MemStore::default())
    }
}

impl Default for Blockchain<MemStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TreeStore> Blockchain<S> {
    pub fn with_store(store: S) -> Self {
        Blockchain {
            blocks: Vec::new(),
            state: SparseMerkleTree::with_store(store),
        }
    }

    /// Validates `block` at the current tip and appends it when it checks
    /// clean. A returned fraud proof means the block was refused and the
    /// tip is unchanged; fraudulent blocks are an expected protocol
    /// outcome, not an error.
    pub fn append(&mut self, block: Block) -> Result<Option<FraudProof>, Error> {
        if let Some(fp) = block.check_block(&mut self.state)? {
            return Ok(Some(fp));
        }
        for tx in block.transactions() {
            for (key, value) in tx.writes() {
                self.state.update(key, value).map_err(state_failure)?;
            }
        }
        if self.state.root() != block.state_root() {
            return Error::malformed_block("chain state diverged from the appended block");
        }
        self.blocks.push(block);
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Root of the chain's state tree: the tip's state root, or the
    /// empty-tree root before any block landed.
    pub fn state_root(&self) -> Bytes32 {
        self.state.root()
    }
}
