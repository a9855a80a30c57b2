// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{Error, PeerId};
use crate::blocks::{TipsetHash, TipsetKey};
use crate::chain::chain_db::TipsetPtr;

/// Called when all tipset subobjects are available, or the tipset appeared
/// to be bad.
pub type OnTipsetLoaded = Box<dyn Fn(TipsetHash, Result<TipsetPtr, Error>)>;

/// Asynchronously fetches a tipset and its blocks from a peer.
///
/// Implementations live with the network layer. Completion is always
/// reported through the callback registered via `init`, never synchronously
/// from `load_tipset_async`; the hash identifies which request completed.
pub trait TipsetLoader {
    fn init(&self, callback: OnTipsetLoaded);

    /// Begins synchronizing the tipset's subobjects from the network.
    /// `probable_depth` hints how far below the local head the tipset sits.
    fn load_tipset_async(
        &self,
        key: &TipsetKey,
        peer: Option<&PeerId>,
        probable_depth: u64,
    ) -> Result<(), Error>;
}
