// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::OnceCell;

use cid::Cid;
use derive_builder::Builder;
use multihash::Multihash;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use super::tipset::TipsetKey;

const DAG_CBOR: u64 = 0x71;
const BLAKE2B_256: u64 = 0xb220;

/// Header of a block.
///
/// The header carries only the fields the synchronization core consumes;
/// consensus payloads (tickets, proofs, signatures) live with the external
/// validator. The CID is derived from the dag-cbor form and cached on first
/// use.
///
/// Usage:
/// ```
/// use taiga::blocks::{BlockHeader, TipsetKey};
/// use num_bigint::BigInt;
///
/// BlockHeader::builder()
///     .parents(TipsetKey::default())
///     .weight(BigInt::from(0u8))
///     .epoch(0)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug, Default, Builder, Serialize, Deserialize)]
#[builder(name = "BlockHeaderBuilder")]
pub struct BlockHeader {
    /// The set of parents this block was based on. Typically one, but can be
    /// several in the case where there were multiple winning ticket-holders
    /// for an epoch.
    #[builder(default)]
    parents: TipsetKey,

    /// The aggregate chain weight of the parent set.
    #[builder(default)]
    weight: BigInt,

    /// The period in which the block was generated.
    #[builder(default)]
    epoch: u64,

    /// CID of the merkle links for the block's bls and secp messages.
    #[builder(default)]
    messages: Option<Cid>,

    /// CID of the parent state root after calculating the parent tipset.
    #[builder(default)]
    state_root: Option<Cid>,

    /// Block creation time, in seconds since the Unix epoch.
    #[builder(default)]
    timestamp: u64,

    #[builder(setter(skip), default)]
    #[serde(skip)]
    cached_cid: OnceCell<Cid>,
}

impl BlockHeader {
    pub fn builder() -> BlockHeaderBuilder {
        BlockHeaderBuilder::default()
    }

    pub fn parents(&self) -> &TipsetKey {
        &self.parents
    }

    pub fn weight(&self) -> &BigInt {
        &self.weight
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn messages(&self) -> Option<&Cid> {
        self.messages.as_ref()
    }

    pub fn state_root(&self) -> Option<&Cid> {
        self.state_root.as_ref()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// CID of the header, computed from its dag-cbor form on first call.
    pub fn cid(&self) -> &Cid {
        self.cached_cid.get_or_init(|| {
            let bytes = serde_ipld_dagcbor::to_vec(self)
                .expect("header serialization cannot fail");
            let digest = blake2b_simd::Params::new()
                .hash_length(32)
                .hash(&bytes);
            let mh = Multihash::wrap(BLAKE2B_256, digest.as_bytes())
                .expect("blake2b-256 digest fits a multihash");
            Cid::new_v1(DAG_CBOR, mh)
        })
    }
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.cid() == other.cid()
    }
}

impl Eq for BlockHeader {}
