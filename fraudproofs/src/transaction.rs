// Copyright 2022-2024, Offchain Labs, Inc.
// For license information, see https://github.com/OffchainLabs/nitro/blob/master/LICENSE

use crate::Error;
use fraudutil::Bytes32;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An immutable record of state writes, declared reads, and an opaque payload.
///
/// `new_data` and `old_data` parallel `write_keys`; `read_data` parallels
/// `read_keys`. The parallel lengths are checked at construction and the
/// record never changes afterwards. `old_data` and `read_data` are the
/// *producer's* claims about pre-state: they are carried into fraud proofs
/// but never enforced when a block is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    write_keys: Vec<Bytes32>,
    new_data: Vec<Vec<u8>>,
    old_data: Vec<Vec<u8>>,
    read_keys: Vec<Bytes32>,
    read_data: Vec<Vec<u8>>,
    arbitrary: Vec<u8>,
}

impl Transaction {
    pub fn new(
        write_keys: Vec<Bytes32>,
        new_data: Vec<Vec<u8>>,
        old_data: Vec<Vec<u8>>,
        read_keys: Vec<Bytes32>,
        read_data: Vec<Vec<u8>>,
        arbitrary: Vec<u8>,
    ) -> Result<Transaction, Error> {
        if write_keys.len() != new_data.len() || write_keys.len() != old_data.len() {
            return Error::malformed_transaction("write key, new data, and old data counts differ");
        }
        if read_keys.len() != read_data.len() {
            return Error::malformed_transaction("read key and read data counts differ");
        }
        let mut seen = HashSet::new();
        for key in &write_keys {
            if !seen.insert(key) {
                return Error::malformed_transaction(format!("duplicate write key {key}"));
            }
        }
        let values = new_data.iter().chain(&old_data).chain(&read_data);
        if values.chain([&arbitrary]).any(|v| v.len() > u32::MAX as usize) {
            return Error::malformed_transaction("field exceeds the u32 wire limit");
        }
        Ok(Transaction {
            write_keys,
            new_data,
            old_data,
            read_keys,
            read_data,
            arbitrary,
        })
    }

    pub fn write_keys(&self) -> &[Bytes32] {
        &self.write_keys
    }

    pub fn new_data(&self) -> &[Vec<u8>] {
        &self.new_data
    }

    pub fn old_data(&self) -> &[Vec<u8>] {
        &self.old_data
    }

    pub fn read_keys(&self) -> &[Bytes32] {
        &self.read_keys
    }

    pub fn read_data(&self) -> &[Vec<u8>] {
        &self.read_data
    }

    pub fn arbitrary(&self) -> &[u8] {
        &self.arbitrary
    }

    /// The writes in application order.
    pub fn writes(&self) -> impl Iterator<Item = (&Bytes32, &[u8])> {
        self.write_keys
            .iter()
            .zip(self.new_data.iter().map(|d| d.as_slice()))
    }

    /// Encodes the transaction into its deterministic wire form: every
    /// sequence is a big-endian `u32` count followed by `u32`-length-prefixed
    /// elements, in field order, ending with the length-prefixed payload.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        put_seq(&mut out, self.write_keys.iter().map(|k| k.as_ref()));
        put_seq(&mut out, self.new_data.iter().map(|d| d.as_slice()));
        put_seq(&mut out, self.old_data.iter().map(|d| d.as_slice()));
        put_seq(&mut out, self.read_keys.iter().map(|k| k.as_ref()));
        put_seq(&mut out, self.read_data.iter().map(|d| d.as_slice()));
        put_bytes(&mut out, &self.arbitrary);
        out
    }

    /// Byte length of [`Transaction::serialize`] without encoding.
    pub fn serialized_len(&self) -> usize {
        let data = |d: &[Vec<u8>]| 4 + d.iter().map(|v| 4 + v.len()).sum::<usize>();
        let keys = |k: &[Bytes32]| 4 + k.len() * (4 + 32);
        keys(&self.write_keys)
            + data(&self.new_data)
            + data(&self.old_data)
            + keys(&self.read_keys)
            + data(&self.read_data)
            + 4
            + self.arbitrary.len()
    }

    /// Decodes a transaction occupying the entire buffer.
    pub fn deserialize(buf: &[u8]) -> Result<Transaction, Error> {
        let (tx, consumed) = Self::decode_prefix(buf)?;
        if consumed != buf.len() {
            return Error::decode("transaction: trailing bytes after payload");
        }
        Ok(tx)
    }

    /// Decodes a transaction from the front of `buf`, returning the number of
    /// bytes consumed. Trailing bytes are left untouched.
    pub(crate) fn decode_prefix(buf: &[u8]) -> Result<(Transaction, usize), Error> {
        let mut r = Reader::new(buf);
        let write_keys = read_key_seq(&mut r, "write keys")?;
        let new_data = read_data_seq(&mut r, "new data")?;
        let old_data = read_data_seq(&mut r, "old data")?;
        let read_keys = read_key_seq(&mut r, "read keys")?;
        let read_data = read_data_seq(&mut r, "read data")?;
        let arbitrary = r.vec("arbitrary payload")?;
        let consumed = r.pos();
        let tx = Transaction::new(
            write_keys, new_data, old_data, read_keys, read_data, arbitrary,
        )?;
        Ok((tx, consumed))
    }
}

pub(crate) fn put_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

pub(crate) fn put_seq<'a, I>(out: &mut Vec<u8>, items: I)
where
    I: ExactSizeIterator<Item = &'a [u8]>,
{
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        put_bytes(out, item);
    }
}

pub(crate) fn read_data_seq(r: &mut Reader, what: &str) -> Result<Vec<Vec<u8>>, Error> {
    let count = r.count(what)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(r.vec(what)?);
    }
    Ok(items)
}

pub(crate) fn read_key_seq(r: &mut Reader, what: &str) -> Result<Vec<Bytes32>, Error> {
    let count = r.count(what)?;
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        keys.push(r.digest(what)?);
    }
    Ok(keys)
}

/// Bounds-checked big-endian reader over a borrowed buffer. Every failure is
/// an [`Error::Decode`] naming the field being read.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8], Error> {
        let end = match self.pos.checked_add(len) {
            Some(end) if end <= self.buf.len() => end,
            _ => return Error::decode(format!("{what}: input truncated")),
        };
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32, Error> {
        let raw = self.bytes(4, what)?;
        Ok(u32::from_be_bytes(raw.try_into().expect("4-byte slice")))
    }

    pub(crate) fn u64(&mut self, what: &str) -> Result<u64, Error> {
        let raw = self.bytes(8, what)?;
        Ok(u64::from_be_bytes(raw.try_into().expect("8-byte slice")))
    }

    /// Reads an element count, bounding it by the bytes that could possibly
    /// back it so a corrupt length field cannot trigger a huge allocation.
    pub(crate) fn count(&mut self, what: &str) -> Result<usize, Error> {
        let count = self.u32(what)? as usize;
        if count > self.remaining() / 4 {
            return Error::decode(format!("{what}: count exceeds input"));
        }
        Ok(count)
    }

    pub(crate) fn vec(&mut self, what: &str) -> Result<Vec<u8>, Error> {
        let len = self.u32(what)? as usize;
        Ok(self.bytes(len, what)?.to_vec())
    }

    pub(crate) fn digest(&mut self, what: &str) -> Result<Bytes32, Error> {
        let len = self.u32(what)? as usize;
        if len != 32 {
            return Error::decode(format!("{what}: expected a 32-byte digest, got {len} bytes"));
        }
        let raw = self.bytes(32, what)?;
        Ok(Bytes32::try_from(raw).expect("32-byte slice"))
    }
}
