// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

pub mod block;
pub mod chain;
pub mod fraud;
pub mod merkle;
pub mod smt;
pub mod transaction;

#[cfg(test)]
pub mod testing;

pub use block::Block;
pub use chain::Blockchain;
pub use fraud::{verify_fraud_proof, FraudProof};
pub use smt::{CompactProof, MemStore, SparseMerkleTree, TreeStore};
pub use transaction::Transaction;

use thiserror::Error as ThisError;

/// Width of a data-tree leaf in bytes. Sized so that a typical transaction
/// plus two state roots spans one or two chunks. Changing it changes every
/// data root.
pub const CHUNK_SIZE: usize = 256;

/// The protocol-surface failures a caller can tell apart.
///
/// A fraudulent block is not an error: `check_block` and `append` report
/// fraud through their `Ok` value.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),
    #[error("malformed block: {0}")]
    MalformedBlock(String),
    #[error("failed to decode {0}")]
    Decode(String),
}

impl Error {
    pub fn malformed_transaction<T, S: AsRef<str>>(message: S) -> Result<T, Error> {
        Err(Self::MalformedTransaction(message.as_ref().to_string()))
    }

    pub fn malformed_block<T, S: AsRef<str>>(message: S) -> Result<T, Error> {
        Err(Self::MalformedBlock(message.as_ref().to_string()))
    }

    pub fn decode<T, S: AsRef<str>>(message: S) -> Result<T, Error> {
        Err(Self::Decode(message.as_ref().to_string()))
    }
}
