// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Shared fixtures: deterministic header chains, a scripted tipset loader
//! and a counting interpreter.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::{HashMap, HashSet};
use multihash::Multihash;
use num_bigint::BigInt;

use taiga::blocks::{BlockHeader, Tipset, TipsetHash, TipsetKey};
use taiga::chain::chain_db::TipsetPtr;
use taiga::chain::{ChainDb, IndexDb};
use taiga::chain_sync::{Error, OnTipsetLoaded, PeerId, TipsetLoader};
use taiga::db::{MemoryDB, Store};
use taiga::interpreter::{Error as InterpreterError, Interpreter, InterpreterResult};

pub fn peer_id(n: u64) -> PeerId {
    let mh = Multihash::wrap(0x00, &n.to_be_bytes()).unwrap();
    PeerId::from_multihash(mh).unwrap()
}

pub fn dummy_cid(n: u64) -> cid::Cid {
    let mh = Multihash::wrap(0x00, &n.to_be_bytes()).unwrap();
    cid::Cid::new_v1(0x71, mh)
}

/// Linear chain of single-block tipsets, heights `0..len`, with weight equal
/// to height.
pub fn make_chain(len: u64) -> Vec<TipsetPtr> {
    let mut out: Vec<TipsetPtr> = Vec::with_capacity(len as usize);
    let mut parents = TipsetKey::default();
    for epoch in 0..len {
        let header = BlockHeader::builder()
            .parents(parents.clone())
            .weight(BigInt::from(epoch))
            .epoch(epoch)
            .timestamp(epoch)
            .build()
            .unwrap();
        let tipset = Tipset::new(vec![header]).unwrap();
        parents = tipset.key().clone();
        out.push(Rc::new(tipset));
    }
    out
}

/// Fresh chain store over in-memory engines, bootstrapped with `chain[0]` as
/// genesis and `chain[1..local_len]` already stored.
pub fn setup_chain_db(chain: &[TipsetPtr], local_len: usize) -> (Rc<ChainDb>, Rc<MemoryDB>) {
    let kv = Rc::new(MemoryDB::default());
    let db = ChainDb::new(kv.clone(), IndexDb::open_in_memory().unwrap());
    db.init(Some(chain[0].clone()), true).unwrap();
    db.start().unwrap();
    for ts in &chain[1..local_len] {
        db.store_tipset(ts.clone(), &ts.parents().clone()).unwrap();
    }
    (Rc::new(db), kv)
}

/// Scripted loader: records every request; the test pumps deliveries with
/// [`StubLoader::deliver_next`].
#[derive(Default)]
pub struct StubLoader {
    callback: RefCell<Option<OnTipsetLoaded>>,
    requests: RefCell<Vec<(TipsetKey, Option<PeerId>, u64)>>,
    tipsets: RefCell<HashMap<TipsetHash, TipsetPtr>>,
    failing: RefCell<HashSet<TipsetHash>>,
}

impl StubLoader {
    pub fn script(&self, chain: &[TipsetPtr]) {
        let mut tipsets = self.tipsets.borrow_mut();
        for ts in chain {
            tipsets.insert(ts.key().hash(), ts.clone());
        }
    }

    pub fn fail_on(&self, hash: TipsetHash) {
        self.failing.borrow_mut().insert(hash);
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn first_request(&self) -> Option<TipsetKey> {
        self.requests.borrow().first().map(|(k, _, _)| k.clone())
    }

    /// Answers the oldest outstanding request. Returns false when none are
    /// pending.
    pub fn deliver_next(&self) -> bool {
        let request = {
            let mut requests = self.requests.borrow_mut();
            if requests.is_empty() {
                return false;
            }
            requests.remove(0)
        };
        let (key, _, _) = request;
        let hash = key.hash();
        let response = if self.failing.borrow().contains(&hash) {
            Err(Error::Internal("peer failed to deliver tipset".to_string()))
        } else {
            match self.tipsets.borrow().get(&hash) {
                Some(ts) => Ok(ts.clone()),
                None => Err(Error::Internal("tipset not scripted".to_string())),
            }
        };
        let callback = self.callback.borrow();
        if let Some(cb) = callback.as_ref() {
            cb(hash, response);
        }
        true
    }
}

impl TipsetLoader for StubLoader {
    fn init(&self, callback: OnTipsetLoaded) {
        *self.callback.borrow_mut() = Some(callback);
    }

    fn load_tipset_async(
        &self,
        key: &TipsetKey,
        peer: Option<&PeerId>,
        probable_depth: u64,
    ) -> Result<(), Error> {
        self.requests
            .borrow_mut()
            .push((key.clone(), peer.copied(), probable_depth));
        Ok(())
    }
}

/// Interpreter stub: counts invocations, records visited heights, optionally
/// fails at a given height.
#[derive(Default)]
pub struct StubInterpreter {
    pub calls: Cell<usize>,
    pub heights: RefCell<Vec<u64>>,
    pub fail_at: Cell<Option<u64>>,
}

impl Interpreter for StubInterpreter {
    fn interpret(
        &self,
        _ipld: &dyn Store,
        tipset: &Tipset,
    ) -> Result<InterpreterResult, InterpreterError> {
        self.calls.set(self.calls.get() + 1);
        self.heights.borrow_mut().push(tipset.height());
        if self.fail_at.get() == Some(tipset.height()) {
            return Err(InterpreterError::Other(
                "state transition failed".to_string(),
            ));
        }
        Ok(InterpreterResult {
            state_root: dummy_cid(tipset.height()),
            message_receipts: dummy_cid(tipset.height() + 1_000_000),
        })
    }
}
