// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use crate::{
    fraud::{self, FraudProof},
    merkle::Merkle,
    smt::{SparseMerkleTree, TreeStore},
    transaction::Transaction,
    Error, CHUNK_SIZE,
};
use fraudutil::{crypto, Bytes32};

/// A block: an ordered transaction list, the state root claimed after each
/// transaction, and the two header commitments derived from them.
///
/// `data_root` commits to the chunked interleaving of the pre-block root,
/// the transactions, and the intermediate roots; `state_root` is the last
/// intermediate root. The chunk tree is a derived cache, recomputable from
/// the other fields, and is never transmitted.
#[derive(Debug, Clone)]
pub struct Block {
    data_root: Bytes32,
    state_root: Bytes32,
    prev_state_root: Bytes32,
    transactions: Vec<Transaction>,
    inter_state_roots: Vec<Bytes32>,
    data_tree: Merkle,
}

impl Block {
    /// Builds a block by executing `transactions` in order against
    /// `state_tree`, which must sit at the pre-block root and is left at the
    /// block's final state root. Writes are applied blindly; each
    /// transaction's `old_data` claims are the producer's responsibility and
    /// are not checked here.
    pub fn new<S: TreeStore>(
        transactions: Vec<Transaction>,
        state_tree: &mut SparseMerkleTree<S>,
    ) -> Result<Block, Error> {
        if transactions.is_empty() {
            return Error::malformed_block("empty transaction list");
        }
        let prev_state_root = state_tree.root();
        let mut inter_state_roots = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            for (key, value) in tx.writes() {
                state_tree.update(key, value).map_err(state_failure)?;
            }
            inter_state_roots.push(state_tree.root());
        }
        Self::from_parts(prev_state_root, transactions, inter_state_roots)
    }

    /// Assembles a block from already-known parts, rebuilding the chunk tree
    /// and the header commitments. This is how a receiver reconstitutes a
    /// block it did not produce.
    pub fn from_parts(
        prev_state_root: Bytes32,
        transactions: Vec<Transaction>,
        inter_state_roots: Vec<Bytes32>,
    ) -> Result<Block, Error> {
        if transactions.is_empty() {
            return Error::malformed_block("empty transaction list");
        }
        if transactions.len() != inter_state_roots.len() {
            return Error::malformed_block(format!(
                "{} transactions but {} intermediate state roots",
                transactions.len(),
                inter_state_roots.len(),
            ));
        }
        let state_root = *inter_state_roots.last().expect("non-empty roots");
        let chunks = chunk_stream(&build_stream(
            prev_state_root,
            &transactions,
            &inter_state_roots,
        ));
        let data_tree = Merkle::new(chunks.iter().map(crypto::hash_leaf).collect());
        Ok(Block {
            data_root: data_tree.root(),
            state_root,
            prev_state_root,
            transactions,
            inter_state_roots,
            data_tree,
        })
    }

    pub fn data_root(&self) -> Bytes32 {
        self.data_root
    }

    pub fn state_root(&self) -> Bytes32 {
        self.state_root
    }

    pub fn prev_state_root(&self) -> Bytes32 {
        self.prev_state_root
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn inter_state_roots(&self) -> &[Bytes32] {
        &self.inter_state_roots
    }

    /// Re-executes the block against `state_tree` (positioned at the
    /// pre-block root) and reports the first invalid state transition as a
    /// fraud proof. `Ok(None)` means every claimed root checked out;
    /// `Err(_)` means the block is structurally unacceptable and no proof is
    /// warranted. The tree is always restored to the pre-block root before
    /// returning; admission advances state separately.
    pub fn check_block<S: TreeStore>(
        &self,
        state_tree: &mut SparseMerkleTree<S>,
    ) -> Result<Option<FraudProof>, Error> {
        if self.transactions.is_empty() {
            return Error::malformed_block("empty transaction list");
        }
        if self.transactions.len() != self.inter_state_roots.len() {
            return Error::malformed_block("intermediate state root count mismatch");
        }
        if self.state_root != *self.inter_state_roots.last().expect("non-empty roots") {
            return Error::malformed_block("state root is not the last intermediate root");
        }
        let chunks = chunk_stream(&build_stream(
            self.prev_state_root,
            &self.transactions,
            &self.inter_state_roots,
        ));
        let data_tree = Merkle::new(chunks.iter().map(crypto::hash_leaf).collect());
        if data_tree.root() != self.data_root {
            return Error::malformed_block("data root does not commit to the block contents");
        }

        let mut journal: Vec<(Bytes32, Vec<u8>)> = Vec::new();
        let mut fraud = None;
        for (i, tx) in self.transactions.iter().enumerate() {
            let prev_root = state_tree.root();
            let checkpoint = journal.len();
            for (key, value) in tx.writes() {
                let old = state_tree.get(key).map_err(state_failure)?.unwrap_or_default();
                journal.push((*key, old));
                state_tree.update(key, value).map_err(state_failure)?;
            }
            if state_tree.root() != self.inter_state_roots[i] {
                rollback(state_tree, journal.split_off(checkpoint))?;
                fraud = Some(self.build_fraud_proof(i, prev_root, state_tree, &chunks, &data_tree)?);
                break;
            }
        }
        rollback(state_tree, journal)?;
        Ok(fraud)
    }

    /// Checks a fraud proof against this block's header commitments alone.
    pub fn verify_fraud_proof(&self, fp: &FraudProof) -> bool {
        fraud::verify_fraud_proof(fp, self.data_root, &self.inter_state_roots)
    }

    /// Witnesses transaction `i` against `prev_root`. `state_tree` must sit
    /// at `prev_root`; `chunks` and `data_tree` are the block's recomputed
    /// chunk commitment.
    fn build_fraud_proof<S: TreeStore>(
        &self,
        i: usize,
        prev_root: Bytes32,
        state_tree: &SparseMerkleTree<S>,
        chunks: &[Vec<u8>],
        data_tree: &Merkle,
    ) -> Result<FraudProof, Error> {
        debug_assert_eq!(state_tree.root(), prev_root);
        let tx = &self.transactions[i];

        // One proof per touched key, writes first, all against prev_root.
        // The recorded values are what the tree actually holds (empty for an
        // absent key), so the proofs and values authenticate together.
        let mut proof_state = Vec::with_capacity(tx.write_keys().len() + tx.read_keys().len());
        let witnessed = |keys: &[Bytes32]| -> Result<Vec<Vec<u8>>, Error> {
            keys.iter()
                .map(|key| {
                    state_tree
                        .get(key)
                        .map(Option::unwrap_or_default)
                        .map_err(state_failure)
                })
                .collect()
        };
        let old_data = witnessed(tx.write_keys())?;
        let read_data = witnessed(tx.read_keys())?;
        for key in tx.write_keys().iter().chain(tx.read_keys()) {
            proof_state.push(state_tree.prove_compact(key).map_err(state_failure)?);
        }

        let (start, end) = self.accused_byte_range(i);
        let (lo, hi) = (start / CHUNK_SIZE, (end - 1) / CHUNK_SIZE);
        let mut chunk_copies = Vec::with_capacity(hi - lo + 1);
        let mut proof_chunks = Vec::with_capacity(hi - lo + 1);
        let mut chunks_indexes = Vec::with_capacity(hi - lo + 1);
        for idx in lo..=hi {
            chunk_copies.push(chunks[idx].clone());
            proof_chunks.push(data_tree.prove(idx).expect("chunk index within data tree"));
            chunks_indexes.push(idx as u64);
        }

        Ok(FraudProof {
            write_keys: tx.write_keys().to_vec(),
            old_data,
            read_keys: tx.read_keys().to_vec(),
            read_data,
            proof_state,
            chunks: chunk_copies,
            proof_chunks,
            chunks_indexes,
            num_of_leaves: data_tree.len() as u64,
        })
    }

    /// Byte range of `enc(r_{i-1}) ∥ enc(t_i) ∥ enc(r_i)` within the chunk
    /// stream; `r_{-1}` is the pre-block root at the head of the stream.
    fn accused_byte_range(&self, i: usize) -> (usize, usize) {
        let mut tx_start = 32;
        for tx in &self.transactions[..i] {
            tx_start += tx.serialized_len() + 32;
        }
        let tx_len = self.transactions[i].serialized_len();
        (tx_start - 32, tx_start + tx_len + 32)
    }
}

/// The interleaved encoding the data tree commits to:
/// pre-block root, then each transaction followed by its post-state root.
fn build_stream(
    prev_state_root: Bytes32,
    transactions: &[Transaction],
    inter_state_roots: &[Bytes32],
) -> Vec<u8> {
    let payload: usize = transactions.iter().map(|tx| tx.serialized_len() + 32).sum();
    let mut stream = Vec::with_capacity(32 + payload);
    stream.extend_from_slice(prev_state_root.as_ref());
    for (tx, root) in transactions.iter().zip(inter_state_roots) {
        stream.extend_from_slice(&tx.serialize());
        stream.extend_from_slice(root.as_ref());
    }
    stream
}

/// Fixed-size chunks of the stream, the last one zero-padded.
fn chunk_stream(stream: &[u8]) -> Vec<Vec<u8>> {
    stream
        .chunks(CHUNK_SIZE)
        .map(|c| {
            let mut chunk = c.to_vec();
            chunk.resize(CHUNK_SIZE, 0);
            chunk
        })
        .collect()
}

/// Undoes journaled writes, newest first, returning the tree to the root it
/// had before they were applied.
fn rollback<S: TreeStore>(
    state_tree: &mut SparseMerkleTree<S>,
    journal: Vec<(Bytes32, Vec<u8>)>,
) -> Result<(), Error> {
    for (key, old) in journal.into_iter().rev() {
        state_tree.update(&key, &old).map_err(state_failure)?;
    }
    Ok(())
}

pub(crate) fn state_failure(err: eyre::Report) -> Error {
    Error::MalformedBlock(format!("state tree failure: {err}"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{smt::SparseMerkleTree, testing};

    #[test]
    fn empty_block_is_rejected() {
        let mut tree = SparseMerkleTree::new();
        let err = Block::new(Vec::new(), &mut tree).expect_err("should reject no transactions");
        assert!(matches!(err, Error::MalformedBlock(_)));
    }

    #[test]
    fn mismatched_root_count_is_rejected() {
        let txs = vec![testing::good_transaction(), testing::good_transaction()];
        let err = Block::from_parts(Bytes32::default(), txs, vec![Bytes32::default()])
            .expect_err("should reject missing roots");
        assert!(matches!(err, Error::MalformedBlock(_)));
    }

    #[test]
    fn block_lifecycle_at_protocol_scale() {
        // A 1 MB block of average-sized transactions, as produced on the
        // honest path, then the same block with a corrupted first
        // intermediate root.
        let block = testing::good_block(1_000_000);
        assert_eq!(block.transactions().len(), 4444);
        assert_eq!(block.state_root(), *block.inter_state_roots().last().unwrap());

        let empty_root = SparseMerkleTree::new().root();
        let mut tree = SparseMerkleTree::new();
        let outcome = block.check_block(&mut tree).expect("block is well-formed");
        assert!(outcome.is_none(), "honest block should check clean");
        assert_eq!(tree.root(), empty_root, "check must restore the tree");

        let bad = testing::corrupt_inter_states(&block);
        assert_eq!(bad.state_root(), block.state_root());
        assert_ne!(bad.data_root(), block.data_root());

        let fp = bad
            .check_block(&mut tree)
            .expect("corrupt block is still well-formed")
            .expect("corrupt root must yield a fraud proof");
        assert_eq!(tree.root(), empty_root, "check must restore the tree");
        assert!(bad.verify_fraud_proof(&fp));

        // An honest block rejects a proof minted for the corrupted one.
        assert!(!block.verify_fraud_proof(&fp));

        assert!(!bad.verify_fraud_proof(&testing::corrupt_fraud_chunks(&fp)));
        assert!(!bad.verify_fraud_proof(&testing::corrupt_fraud_state(&fp)));
    }

    #[test]
    fn mid_block_fraud_is_witnessed_and_tamper_proof() {
        let block = testing::good_block(64 * testing::TX_FOOTPRINT);
        let accused = 20;
        let bad = testing::corrupt_inter_state_at(&block, accused);

        let mut tree = SparseMerkleTree::new();
        let fp = bad
            .check_block(&mut tree)
            .expect("well-formed")
            .expect("fraud proof");
        assert!(bad.verify_fraud_proof(&fp));
        // The accused key was written by an earlier transaction, so the
        // witnessed pre-value is real data, not an absence.
        assert_eq!(fp.old_data[0], vec![2u8; 49]);

        let tamper = |mutate: &dyn Fn(&mut crate::FraudProof)| {
            let mut copy = fp.clone();
            mutate(&mut copy);
            assert!(!bad.verify_fraud_proof(&copy), "tampered proof must fail");
        };
        tamper(&|fp| fp.chunks[0][0] ^= 1);
        tamper(&|fp| fp.proof_chunks[0][0][0] ^= 1);
        tamper(&|fp| fp.write_keys[0][0] ^= 1);
        tamper(&|fp| fp.old_data[0][0] ^= 1);
        tamper(&|fp| fp.read_keys[0][0] ^= 1);
        tamper(&|fp| fp.read_data[0] = vec![9]);
        tamper(&|fp| fp.proof_state[0].leaf_hash[0] ^= 1);
        // The write key is the tree's only populated leaf here, so its own
        // proof elides every sibling; the read key's proof carries one.
        tamper(&|fp| fp.proof_state[1].side_nodes[0][0] ^= 1);
        tamper(&|fp| fp.chunks_indexes[0] += 1);
        tamper(&|fp| fp.num_of_leaves *= 2);
    }

    #[test]
    fn every_accused_position_yields_a_sound_proof() {
        let block = testing::good_block(8 * testing::TX_FOOTPRINT);
        for accused in 0..block.transactions().len() {
            let bad = testing::corrupt_inter_state_at(&block, accused);
            let mut tree = SparseMerkleTree::new();
            let fp = bad
                .check_block(&mut tree)
                .expect("well-formed")
                .expect("fraud proof");
            assert!(bad.verify_fraud_proof(&fp), "accused index {accused}");
        }
    }
}
