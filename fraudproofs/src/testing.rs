// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use crate::{block::Block, fraud::FraudProof, smt::SparseMerkleTree, transaction::Transaction};
use fraudutil::{crypto, Bytes32};
use rand::RngCore;

/// Average transaction footprint in bytes; a 1 MB block holds 4,444 of them.
pub const TX_FOOTPRINT: usize = 225;

type TransactionInput = (
    Vec<Bytes32>,
    Vec<Vec<u8>>,
    Vec<Vec<u8>>,
    Vec<Bytes32>,
    Vec<Vec<u8>>,
    Vec<u8>,
);

/// One fixed write (key `0x01…`, new value `0x02…`, claimed old value
/// `0x03…`) plus one random read key with a claimed value of `0x05…`.
pub fn transaction_input() -> TransactionInput {
    let mut read_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut read_key);
    (
        vec![Bytes32::from([1; 32])],
        vec![vec![2; 49]],
        vec![vec![3; 49]],
        vec![Bytes32::from(read_key)],
        vec![vec![5; 49]],
        Vec::new(),
    )
}

pub fn good_transaction() -> Transaction {
    let (write_keys, new_data, old_data, read_keys, read_data, arbitrary) = transaction_input();
    Transaction::new(write_keys, new_data, old_data, read_keys, read_data, arbitrary)
        .expect("fixture transaction is well-formed")
}

/// Enough transactions to fill `block_size` bytes.
pub fn block_transactions(block_size: usize) -> Vec<Transaction> {
    (0..block_size / TX_FOOTPRINT)
        .map(|_| good_transaction())
        .collect()
}

/// Builds a block of `block_size` bytes of transactions over a fresh empty
/// state tree. Checkers start from their own empty tree.
pub fn good_block(block_size: usize) -> Block {
    let mut tree = SparseMerkleTree::new();
    Block::new(block_transactions(block_size), &mut tree).expect("fixture block is well-formed")
}

/// Replaces the first intermediate state root with an unrelated digest and
/// reassembles the block (data tree rebuilt, state root recomputed).
pub fn corrupt_inter_states(block: &Block) -> Block {
    corrupt_inter_state_at(block, 0)
}

pub fn corrupt_inter_state_at(block: &Block, index: usize) -> Block {
    let mut roots = block.inter_state_roots().to_vec();
    roots[index] = Bytes32::from(crypto::sha512_256(b"random"));
    Block::from_parts(block.prev_state_root(), block.transactions().to_vec(), roots)
        .expect("reassembled block is structurally sound")
}

/// Swaps the first chunk's Merkle path for garbage.
pub fn corrupt_fraud_chunks(fp: &FraudProof) -> FraudProof {
    let mut copy = fp.clone();
    let h = Bytes32::from(crypto::sha512_256(b"random"));
    copy.proof_chunks[0] = vec![h, h];
    copy
}

/// Swaps the first accused write key for a fresh digest.
pub fn corrupt_fraud_state(fp: &FraudProof) -> FraudProof {
    let mut copy = fp.clone();
    copy.write_keys[0] = Bytes32::from(crypto::sha512_256(b"random"));
    copy
}
