// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use crate::Bytes32;
use sha2::{Digest, Sha512_256};

/// Domain separator for leaf hashes in both the data tree and the state tree.
pub const LEAF_PREFIX: u8 = 0x00;
/// Domain separator for internal node hashes.
pub const NODE_PREFIX: u8 = 0x01;

pub fn sha512_256(preimage: &[u8]) -> [u8; 32] {
    let mut hasher = Sha512_256::new();
    hasher.update(preimage);
    hasher.finalize().into()
}

/// Hashes leaf content under the leaf domain.
pub fn hash_leaf(data: impl AsRef<[u8]>) -> Bytes32 {
    let mut h = Sha512_256::new();
    h.update([LEAF_PREFIX]);
    h.update(data);
    h.finalize().into()
}

/// Hashes a pair of child labels under the internal-node domain.
pub fn hash_node(a: impl AsRef<[u8]>, b: impl AsRef<[u8]>) -> Bytes32 {
    let mut h = Sha512_256::new();
    h.update([NODE_PREFIX]);
    h.update(a);
    h.update(b);
    h.finalize().into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_is_32_bytes_and_deterministic() {
        let a = sha512_256(b"random");
        let b = sha512_256(b"random");
        assert_eq!(a, b);
        assert_ne!(a, sha512_256(b"randoM"));
    }

    #[test]
    fn domains_are_separated() {
        let payload = [7u8; 64];
        assert_ne!(hash_leaf(payload), hash_node(&payload[..32], &payload[32..]));
    }
}
