// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use crate::{
    merkle,
    smt::CompactProof,
    transaction::{put_bytes, put_seq, read_data_seq, read_key_seq, Reader, Transaction},
    Error, CHUNK_SIZE,
};
use fraudutil::{crypto, Bytes32};
use serde::{Deserialize, Serialize};

/// A self-contained witness that one transaction's claimed post-state root
/// disagrees with honest re-execution.
///
/// `chunks` carry the authenticated encoding of the accused transaction
/// bracketed by its pre- and post-state roots; `proof_chunks` tie each chunk
/// to the header's data root. `old_data` and `read_data` are the values the
/// state tree *actually held* at the pre-transaction root (empty bytes mark
/// an absent key), each witnessed by the matching entry of `proof_state`,
/// writes first, then reads. Verification needs nothing beyond this proof
/// and the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudProof {
    pub(crate) write_keys: Vec<Bytes32>,
    pub(crate) old_data: Vec<Vec<u8>>,
    pub(crate) read_keys: Vec<Bytes32>,
    pub(crate) read_data: Vec<Vec<u8>>,
    pub(crate) proof_state: Vec<CompactProof>,
    pub(crate) chunks: Vec<Vec<u8>>,
    pub(crate) proof_chunks: Vec<Vec<Bytes32>>,
    pub(crate) chunks_indexes: Vec<u64>,
    pub(crate) num_of_leaves: u64,
}

impl FraudProof {
    pub fn write_keys(&self) -> &[Bytes32] {
        &self.write_keys
    }

    pub fn read_keys(&self) -> &[Bytes32] {
        &self.read_keys
    }

    pub fn chunks_indexes(&self) -> &[u64] {
        &self.chunks_indexes
    }

    pub fn num_of_leaves(&self) -> u64 {
        self.num_of_leaves
    }

    /// Encodes the proof with the same framing as transactions: each field
    /// in declaration order, sequences as a `u32` count of length-prefixed
    /// elements.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_seq(&mut out, self.write_keys.iter().map(|k| k.as_ref()));
        put_seq(&mut out, self.old_data.iter().map(|d| d.as_slice()));
        put_seq(&mut out, self.read_keys.iter().map(|k| k.as_ref()));
        put_seq(&mut out, self.read_data.iter().map(|d| d.as_slice()));

        let proofs: Vec<Vec<u8>> = self.proof_state.iter().map(CompactProof::to_bytes).collect();
        put_seq(&mut out, proofs.iter().map(|p| p.as_slice()));
        put_seq(&mut out, self.chunks.iter().map(|c| c.as_slice()));

        let paths: Vec<Vec<u8>> = self
            .proof_chunks
            .iter()
            .map(|path| {
                let mut flat = Vec::with_capacity(32 * path.len());
                for node in path {
                    flat.extend_from_slice(node.as_ref());
                }
                flat
            })
            .collect();
        put_seq(&mut out, paths.iter().map(|p| p.as_slice()));

        let indexes: Vec<[u8; 8]> = self.chunks_indexes.iter().map(|i| i.to_be_bytes()).collect();
        put_seq(&mut out, indexes.iter().map(|i| i.as_slice()));
        put_bytes(&mut out, &self.num_of_leaves.to_be_bytes());
        out
    }

    pub fn deserialize(buf: &[u8]) -> Result<FraudProof, Error> {
        let mut r = Reader::new(buf);
        let write_keys = read_key_seq(&mut r, "fraud proof write keys")?;
        let old_data = read_data_seq(&mut r, "fraud proof old data")?;
        let read_keys = read_key_seq(&mut r, "fraud proof read keys")?;
        let read_data = read_data_seq(&mut r, "fraud proof read data")?;

        let count = r.count("fraud proof state proofs")?;
        let mut proof_state = Vec::with_capacity(count);
        for _ in 0..count {
            proof_state.push(CompactProof::from_bytes(&r.vec("fraud proof state proofs")?)?);
        }

        let count = r.count("fraud proof chunks")?;
        let mut chunks = Vec::with_capacity(count);
        for _ in 0..count {
            chunks.push(r.vec("fraud proof chunks")?);
        }

        let count = r.count("fraud proof chunk paths")?;
        let mut proof_chunks = Vec::with_capacity(count);
        for _ in 0..count {
            let flat = r.vec("fraud proof chunk paths")?;
            if flat.len() % 32 != 0 {
                return Error::decode("fraud proof chunk paths: ragged sibling path");
            }
            proof_chunks.push(
                flat.chunks_exact(32)
                    .map(|raw| Bytes32::try_from(raw).expect("32-byte slice"))
                    .collect(),
            );
        }

        let count = r.count("fraud proof chunk indexes")?;
        let mut chunks_indexes = Vec::with_capacity(count);
        for _ in 0..count {
            let raw = r.vec("fraud proof chunk indexes")?;
            if raw.len() != 8 {
                return Error::decode("fraud proof chunk indexes: expected 8 bytes");
            }
            chunks_indexes.push(u64::from_be_bytes(raw.try_into().expect("8-byte vec")));
        }

        let raw = r.vec("fraud proof leaf count")?;
        if raw.len() != 8 {
            return Error::decode("fraud proof leaf count: expected 8 bytes");
        }
        let num_of_leaves = u64::from_be_bytes(raw.try_into().expect("8-byte vec"));

        if r.pos() != buf.len() {
            return Error::decode("fraud proof: trailing bytes after payload");
        }
        Ok(FraudProof {
            write_keys,
            old_data,
            read_keys,
            read_data,
            proof_state,
            chunks,
            proof_chunks,
            chunks_indexes,
            num_of_leaves,
        })
    }
}

/// Stateless fraud-proof verification: `true` means the proof demonstrates
/// that the block committing to `data_root` and `inter_state_roots` claims
/// an impossible state transition. Total; never errors.
pub fn verify_fraud_proof(
    fp: &FraudProof,
    data_root: Bytes32,
    inter_state_roots: &[Bytes32],
) -> bool {
    if !shape_ok(fp) {
        return false;
    }

    // Every carried chunk must sit in the data tree where the proof says.
    for ((chunk, path), &index) in fp.chunks.iter().zip(&fp.proof_chunks).zip(&fp.chunks_indexes) {
        if !merkle::verify_proof(
            data_root,
            crypto::hash_leaf(chunk),
            index,
            fp.num_of_leaves,
            path,
        ) {
            return false;
        }
    }

    // Reassemble the covered stream and pull out the accused transition.
    let data = fp.chunks.concat();
    let Some((prev_root, tx, post_root)) = locate_accused_region(fp, &data) else {
        return false;
    };

    // The transition must be one the header commits to. The pre-block root
    // of the first transition needs no anchor: it is part of the chunked
    // stream and therefore already authenticated against the data root.
    let mut anchored = false;
    for (i, root) in inter_state_roots.iter().enumerate() {
        if *root == post_root && (i == 0 || inter_state_roots[i - 1] == prev_root) {
            anchored = true;
            break;
        }
    }
    if !anchored {
        return false;
    }

    // Authenticate the witnessed pre-state, writes then reads.
    let writes = fp.write_keys.iter().zip(&fp.old_data);
    let reads = fp.read_keys.iter().zip(&fp.read_data);
    for (j, (key, value)) in writes.chain(reads).enumerate() {
        if !fp.proof_state[j].verify(prev_root, key, value) {
            return false;
        }
    }

    // Replay the writes against the witnessed pre-state. The post-values
    // come from the chunk-authenticated transaction, not from the proof.
    let mut current = prev_root;
    for (j, (key, value)) in fp.write_keys.iter().zip(tx.new_data()).enumerate() {
        match fp.proof_state[j].update_root(current, key, value) {
            Ok(root) => current = root,
            Err(_) => return false,
        }
    }

    // The proof stands exactly when honest replay lands somewhere else.
    current != post_root
}

fn shape_ok(fp: &FraudProof) -> bool {
    fp.write_keys.len() == fp.old_data.len()
        && fp.read_keys.len() == fp.read_data.len()
        && fp.proof_state.len() == fp.write_keys.len() + fp.read_keys.len()
        && !fp.chunks.is_empty()
        && fp.chunks.len() == fp.proof_chunks.len()
        && fp.chunks.len() == fp.chunks_indexes.len()
        && fp.chunks.iter().all(|c| c.len() == CHUNK_SIZE)
        && fp.chunks_indexes.windows(2).all(|w| w[1] == w[0] + 1)
        && fp
            .chunks_indexes
            .last()
            .map(|last| *last < fp.num_of_leaves)
            .unwrap_or(false)
}

/// Finds `prev_root ∥ transaction ∥ post_root` in the reassembled chunk
/// bytes. The region starts somewhere inside the first carried chunk; the
/// proof does not say where, so every candidate offset is tried until one
/// decodes to a transaction whose key sets match the proof's.
fn locate_accused_region(fp: &FraudProof, data: &[u8]) -> Option<(Bytes32, Transaction, Bytes32)> {
    for start in 0..CHUNK_SIZE.min(data.len()) {
        let Some(rest) = data.get(start + 32..) else {
            break;
        };
        let Ok((tx, used)) = Transaction::decode_prefix(rest) else {
            continue;
        };
        let Some(raw_post) = data.get(start + 32 + used..start + 64 + used) else {
            continue;
        };
        if tx.write_keys() == fp.write_keys.as_slice() && tx.read_keys() == fp.read_keys.as_slice()
        {
            let prev_root = Bytes32::try_from(&data[start..start + 32]).expect("32-byte slice");
            let post_root = Bytes32::try_from(raw_post).expect("32-byte slice");
            return Some((prev_root, tx, post_root));
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{smt::SparseMerkleTree, testing};

    fn sample_proof() -> (crate::Block, FraudProof) {
        let block = testing::good_block(16 * testing::TX_FOOTPRINT);
        let bad = testing::corrupt_inter_states(&block);
        let mut tree = SparseMerkleTree::new();
        let fp = bad
            .check_block(&mut tree)
            .expect("well-formed")
            .expect("fraud proof");
        (bad, fp)
    }

    #[test]
    fn wire_roundtrip_preserves_validity() {
        let (bad, fp) = sample_proof();
        let buf = fp.serialize();

        let decoded = FraudProof::deserialize(&buf).expect("decode failed");
        assert_eq!(decoded, fp);
        assert_eq!(decoded.serialize(), buf);
        assert!(bad.verify_fraud_proof(&decoded));
    }

    #[test]
    fn truncation_and_trailer_are_rejected() {
        let (_, fp) = sample_proof();
        let buf = fp.serialize();

        for cut in [0, 4, buf.len() / 2, buf.len() - 1] {
            let err = FraudProof::deserialize(&buf[..cut]).expect_err("should reject truncation");
            assert!(matches!(err, Error::Decode(_)), "cut at {cut}");
        }

        let mut extended = buf;
        extended.push(0);
        let err = FraudProof::deserialize(&extended).expect_err("should reject trailer");
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn serde_roundtrip() {
        let (_, fp) = sample_proof();
        let bytes = bincode::serialize(&fp).unwrap();
        let decoded: FraudProof = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, fp);
    }

    #[test]
    fn proof_against_foreign_roots_is_rejected() {
        let (bad, fp) = sample_proof();
        let foreign: Vec<_> = bad
            .inter_state_roots()
            .iter()
            .map(|_| Bytes32::from(crypto::sha512_256(b"other chain")))
            .collect();
        assert!(!verify_fraud_proof(&fp, bad.data_root(), &foreign));
    }

    #[test]
    fn shape_violations_are_rejected() {
        let (bad, fp) = sample_proof();

        let mut extra_state = fp.clone();
        extra_state.proof_state.push(extra_state.proof_state[0].clone());
        assert!(!bad.verify_fraud_proof(&extra_state));

        let mut short_chunk = fp.clone();
        short_chunk.chunks[0].pop();
        assert!(!bad.verify_fraud_proof(&short_chunk));

        let mut no_chunks = fp;
        no_chunks.chunks.clear();
        no_chunks.proof_chunks.clear();
        no_chunks.chunks_indexes.clear();
        assert!(!bad.verify_fraud_proof(&no_chunks));
    }
}
