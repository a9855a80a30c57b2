// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use super::{BlockHeader, Error};

/// Digest of a tipset key, derived from the canonically ordered block CIDs.
/// Used as the primary identity of a tipset across the index database, the
/// branch graph and the interpreter memo.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TipsetHash([u8; 32]);

impl TipsetHash {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidTipset(format!("bad tipset hash length {}", bytes.len())))?;
        Ok(TipsetHash(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl AsRef<[u8]> for TipsetHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TipsetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TipsetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TipsetHash({self})")
    }
}

/// Computes the blake2b-256 digest over the byte forms of the given CIDs,
/// in the order given. The order must be the canonical block order of the
/// tipset for hashes to be comparable.
pub fn tipset_hash(cids: &[Cid]) -> TipsetHash {
    let mut hasher = blake2b_simd::Params::new().hash_length(32).to_state();
    for cid in cids {
        hasher.update(&cid.to_bytes());
    }
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    TipsetHash(out)
}

/// An ordered set of block CIDs identifying a tipset, together with the
/// digest derived from it. The digest is always recomputed from the CIDs, so
/// a key deserialized from the wire carries a trustworthy hash.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TipsetKey {
    cids: Vec<Cid>,
    hash: TipsetHash,
}

impl TipsetKey {
    /// Builds a key from canonically ordered block CIDs, deriving the hash.
    pub fn new(cids: Vec<Cid>) -> Self {
        let hash = tipset_hash(&cids);
        Self { cids, hash }
    }

    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }

    pub fn hash(&self) -> TipsetHash {
        self.hash
    }
}

impl Default for TipsetKey {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Serialize for TipsetKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.cids.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TipsetKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let cids: Vec<Cid> = Deserialize::deserialize(deserializer)?;
        Ok(TipsetKey::new(cids))
    }
}

impl fmt::Display for TipsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}; {} blk}}", self.hash, self.cids.len())
    }
}

impl fmt::Debug for TipsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TipsetKey({self})")
    }
}

/// An immutable set of blocks mined at the same height over the same parent
/// set. Blocks are kept sorted by CID byte order, which makes the key and its
/// hash a pure function of the member set.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Tipset {
    blocks: Vec<BlockHeader>,
    key: TipsetKey,
}

impl Tipset {
    /// Builds a tipset from a collection of headers, validating that all of
    /// them share the same epoch, parent set and weight, and that their CIDs
    /// are distinct.
    pub fn new(headers: Vec<BlockHeader>) -> Result<Self, Error> {
        if headers.is_empty() {
            return Err(Error::NoBlocks);
        }

        for h in headers.iter().skip(1) {
            if h.parents() != headers[0].parents() {
                return Err(Error::InvalidTipset("parent keys are not equal".to_string()));
            }
            if h.epoch() != headers[0].epoch() {
                return Err(Error::InvalidTipset("epochs are not equal".to_string()));
            }
            if h.weight() != headers[0].weight() {
                return Err(Error::InvalidTipset("weights are not equal".to_string()));
            }
        }

        let mut sorted = headers;
        sorted.sort_by_key(|h| h.cid().to_bytes());
        sorted.dedup_by(|a, b| a.cid() == b.cid());

        let cids: Vec<Cid> = sorted.iter().map(|h| *h.cid()).collect();

        Ok(Self {
            blocks: sorted,
            key: TipsetKey::new(cids),
        })
    }

    /// Epoch (height) of the tipset.
    pub fn epoch(&self) -> u64 {
        self.blocks[0].epoch()
    }

    /// Alias for [`Tipset::epoch`]; the index database speaks in heights.
    pub fn height(&self) -> u64 {
        self.epoch()
    }

    pub fn blocks(&self) -> &[BlockHeader] {
        &self.blocks
    }

    pub fn key(&self) -> &TipsetKey {
        &self.key
    }

    pub fn cids(&self) -> &[Cid] {
        self.key.cids()
    }

    /// Key of the parent tipset all member blocks were mined over.
    pub fn parents(&self) -> &TipsetKey {
        self.blocks[0].parents()
    }

    /// Aggregate chain weight of the tipset.
    pub fn weight(&self) -> &BigInt {
        self.blocks[0].weight()
    }
}
