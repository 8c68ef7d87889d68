// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use criterion::{criterion_group, criterion_main, Criterion};
use fraudproofs::{Block, SparseMerkleTree, Transaction};
use fraudutil::{crypto, Bytes32};
use rand::RngCore;

fn sample_transaction(rng: &mut impl RngCore) -> Transaction {
    let mut read_key = [0u8; 32];
    rng.fill_bytes(&mut read_key);
    Transaction::new(
        vec![Bytes32::from([1; 32])],
        vec![vec![2; 49]],
        vec![vec![3; 49]],
        vec![Bytes32::from(read_key)],
        vec![vec![5; 49]],
        Vec::new(),
    )
    .expect("bench transaction is well-formed")
}

/// A block with a corrupted first intermediate root, so every check yields a
/// fraud proof.
fn corrupted_block(num_txs: usize) -> Block {
    let mut rng = rand::thread_rng();
    let txs = (0..num_txs).map(|_| sample_transaction(&mut rng)).collect();
    let mut tree = SparseMerkleTree::new();
    let block = Block::new(txs, &mut tree).expect("bench block is well-formed");

    let mut roots = block.inter_state_roots().to_vec();
    roots[0] = Bytes32::from(crypto::sha512_256(b"random"));
    Block::from_parts(block.prev_state_root(), block.transactions().to_vec(), roots)
        .expect("rebuilt block is structurally sound")
}

fn fraud_benchmark(c: &mut Criterion) {
    let block = corrupted_block(444);
    let mut tree = SparseMerkleTree::new();

    let mut group = c.benchmark_group("fraud");
    group.sample_size(10);
    group.bench_function("generate_proof", |b| {
        b.iter(|| {
            block
                .check_block(&mut tree)
                .expect("well-formed")
                .expect("fraud proof")
        })
    });

    let fp = block
        .check_block(&mut tree)
        .expect("well-formed")
        .expect("fraud proof");
    group.bench_function("verify_proof", |b| {
        b.iter(|| assert!(block.verify_fraud_proof(&fp)))
    });
    group.finish();
}

criterion_group!(benches, fraud_benchmark);
criterion_main!(benches);
