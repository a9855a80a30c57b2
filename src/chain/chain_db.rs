// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::{Cell, RefCell};
use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;
use tracing::{debug, warn};

use super::graph::{Graph, SplitPlan, NO_BRANCH};
use super::head_signal::HeadSignal;
use super::index::{BlockKind, IndexDb, SyncState};
use super::{BranchId, BranchInfo, Error, Height, GENESIS_BRANCH};
use crate::blocks::{BlockHeader, Tipset, TipsetHash, TipsetKey};
use crate::db::Store;

/// Shared, immutable tipset. The graph, the store and the sync jobs all hold
/// references to the same object.
pub type TipsetPtr = Rc<Tipset>;

/// Walk callback; returning `Ok(false)` stops the walk early.
pub type WalkCallback<'a> = dyn FnMut(TipsetPtr) -> Result<bool, Error> + 'a;

const TIPSET_CACHE_SIZE: usize = 1000;

/// Facade unifying the index database with the tipset/block content store.
///
/// All operations are synchronous and run on the scheduler thread. Structural
/// changes to the index happen inside a single transaction; the in-memory
/// graph is replaced only after the transaction commits.
pub struct ChainDb {
    kv: Rc<dyn Store>,
    index: RefCell<IndexDb>,
    tipset_cache: RefCell<LruCache<TipsetHash, TipsetPtr>>,
    genesis: RefCell<Option<TipsetPtr>>,
    head_signal: HeadSignal,
    started: Cell<bool>,
}

impl ChainDb {
    pub fn new(kv: Rc<dyn Store>, index: IndexDb) -> Self {
        let cap = NonZeroUsize::new(TIPSET_CACHE_SIZE).expect("nonzero cache size");
        Self {
            kv,
            index: RefCell::new(index),
            tipset_cache: RefCell::new(LruCache::new(cap)),
            genesis: RefCell::new(None),
            head_signal: HeadSignal::default(),
            started: Cell::new(false),
        }
    }

    /// Bootstraps the store. With `creating_new_db` the index must be empty
    /// and `genesis` supplied; otherwise the genesis tipset is recovered from
    /// the index and, when `genesis` is also given, checked against it.
    pub fn init(&self, genesis: Option<TipsetPtr>, creating_new_db: bool) -> Result<(), Error> {
        if creating_new_db {
            let genesis = genesis.ok_or(Error::NoGenesisBlock)?;
            if genesis.height() != 0 {
                return Err(Error::BadTipset("genesis tipset must have height 0".into()));
            }
            {
                let index = &mut *self.index.borrow_mut();
                if !index.graph().is_empty() {
                    return Err(Error::DataIntegrity(
                        "creating a new db over existing chain data".into(),
                    ));
                }
                let mut g = index.graph().clone();
                let tx = index.transaction()?;
                self.persist_tipset_rows(index, &genesis, GENESIS_BRANCH, SyncState::BlockSynced)?;
                g.new_branch(BranchInfo {
                    id: GENESIS_BRANCH,
                    top: genesis.key().hash(),
                    top_height: 0,
                    bottom: genesis.key().hash(),
                    bottom_height: 0,
                    parent: NO_BRANCH,
                    forks: Default::default(),
                })?;
                tx.commit()?;
                *index.graph_mut() = g;
            }
            *self.genesis.borrow_mut() = Some(genesis);
        } else {
            let stored = {
                let index = self.index.borrow();
                index
                    .graph()
                    .roots()
                    .into_iter()
                    .find(|b| b.bottom_height == 0)
                    .map(|b| b.bottom)
                    .ok_or(Error::NoGenesisBlock)?
            };
            let tipset = self.load_tipset_content(&stored)?;
            if let Some(expected) = genesis {
                if expected.key() != tipset.key() {
                    return Err(Error::GenesisMismatch);
                }
            }
            *self.genesis.borrow_mut() = Some(tipset);
        }
        Ok(())
    }

    /// Marks the store ready for sync traffic. Head-change subscribers attach
    /// through [`ChainDb::head_signal`].
    pub fn start(&self) -> Result<(), Error> {
        self.state_is_consistent()?;
        self.started.set(true);
        Ok(())
    }

    pub fn head_signal(&self) -> &HeadSignal {
        &self.head_signal
    }

    fn state_is_consistent(&self) -> Result<(), Error> {
        if self.genesis.borrow().is_none() {
            return Err(Error::StoreNotInitialized);
        }
        Ok(())
    }

    pub fn genesis_tipset(&self) -> Result<TipsetPtr, Error> {
        self.genesis
            .borrow()
            .clone()
            .ok_or(Error::StoreNotInitialized)
    }

    fn genesis_hash(&self) -> Result<TipsetHash, Error> {
        Ok(self.genesis_tipset()?.key().hash())
    }

    pub fn tipset_is_stored(&self, hash: &TipsetHash) -> Result<bool, Error> {
        self.state_is_consistent()?;
        Ok(self.index.borrow().tipset_exists(hash)?)
    }

    /// Loads a tipset by hash, via the cache. The genesis tipset is
    /// special-cased because it is pinned in memory.
    pub fn get_tipset_by_hash(&self, hash: &TipsetHash) -> Result<TipsetPtr, Error> {
        self.state_is_consistent()?;
        let genesis = self.genesis_tipset()?;
        if *hash == genesis.key().hash() {
            return Ok(genesis);
        }
        if let Some(ts) = self.tipset_cache.borrow_mut().get(hash) {
            return Ok(ts.clone());
        }
        let tipset = self.load_tipset_content(hash)?;
        self.tipset_cache
            .borrow_mut()
            .put(*hash, tipset.clone());
        Ok(tipset)
    }

    pub fn get_tipset_by_key(&self, key: &TipsetKey) -> Result<TipsetPtr, Error> {
        self.get_tipset_by_hash(&key.hash())
    }

    pub fn get_tipset_by_height(&self, height: Height) -> Result<TipsetPtr, Error> {
        self.state_is_consistent()?;
        let hash = {
            let index = self.index.borrow();
            let branch = index.graph().find_by_height(height)?;
            index.get_tipset_at(branch, height)?
        };
        self.get_tipset_by_hash(&hash)
    }

    /// Adopts the chain containing `head` as current, enabling height lookups
    /// and forward walks over it.
    pub fn set_current_head(&self, head: &TipsetHash) -> Result<(), Error> {
        self.state_is_consistent()?;
        let index = &mut *self.index.borrow_mut();
        let info = index.get_tipset_info(head)?;
        index.graph_mut().switch_to_head(info.branch)?;
        Ok(())
    }

    /// Reports each fully synced head to `cb`.
    pub fn heads(&self, cb: &mut dyn FnMut(TipsetHash)) -> Result<(), Error> {
        self.state_is_consistent()?;
        let genesis = self.genesis_hash()?;
        let tops: Vec<TipsetHash> = {
            let index = self.index.borrow();
            let g = index.graph();
            g.heads()
                .into_iter()
                .filter(|b| {
                    g.root_of(b.id)
                        .map(|r| r.bottom == genesis)
                        .unwrap_or(false)
                })
                .map(|b| b.top)
                .collect()
        };
        for top in tops {
            cb(top);
        }
        Ok(())
    }

    /// Heaviest fully synced head tipset.
    pub fn heaviest_head(&self) -> Result<TipsetPtr, Error> {
        let mut tops = Vec::new();
        self.heads(&mut |top| tops.push(top))?;
        let mut heaviest: Option<TipsetPtr> = None;
        for top in tops {
            let tipset = self.get_tipset_by_hash(&top)?;
            let replace = match &heaviest {
                None => true,
                Some(current) => tipset.weight() > current.weight(),
            };
            if replace {
                heaviest = Some(tipset);
            }
        }
        heaviest.ok_or(Error::NoHeaviestTipset)
    }

    /// Advances a tipset's per-entity sync state (e.g. to `Interpreted` or
    /// `Bad`); downgrades are ignored.
    pub fn set_tipset_sync_state(
        &self,
        hash: &TipsetHash,
        state: SyncState,
    ) -> Result<SyncState, Error> {
        self.state_is_consistent()?;
        let index = self.index.borrow();
        let tx = index.transaction()?;
        let state = index.set_tipset_sync_state(hash, state)?;
        tx.commit()?;
        Ok(state)
    }

    pub fn get_tipset_sync_state(&self, hash: &TipsetHash) -> Result<SyncState, Error> {
        self.state_is_consistent()?;
        Ok(self.index.borrow().get_tipset_sync_state(hash)?)
    }

    /// Walks the current chain from `from_height` up to `to_height`
    /// (inclusive), visiting stored tipsets in height order.
    pub fn walk_forward(
        &self,
        from_height: Height,
        to_height: Height,
        cb: &mut WalkCallback<'_>,
    ) -> Result<(), Error> {
        self.state_is_consistent()?;
        let mut from = from_height;
        while from <= to_height {
            let batch = {
                let index = self.index.borrow();
                let branch = match index.graph().find_by_height(from) {
                    Ok(b) => b,
                    Err(super::graph::Error::BranchNotFound) => break,
                    Err(e) => return Err(e.into()),
                };
                let top = index.graph().get(branch)?.top_height.min(to_height);
                let rows = index.tipsets_in_range(branch, from, top)?;
                from = top + 1;
                rows
            };
            for (hash, _) in batch {
                let tipset = self.get_tipset_by_hash(&hash)?;
                if !cb(tipset)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Walks parent links from `from` down to `to_height` (inclusive).
    pub fn walk_backward(
        &self,
        from: &TipsetHash,
        to_height: Height,
        cb: &mut WalkCallback<'_>,
    ) -> Result<(), Error> {
        self.state_is_consistent()?;
        let mut hash = *from;
        loop {
            let tipset = self.get_tipset_by_hash(&hash)?;
            let height = tipset.height();
            let parent = tipset.parents().hash();
            if !cb(tipset)? {
                break;
            }
            if height <= to_height {
                break;
            }
            hash = parent;
        }
        Ok(())
    }

    /// Deepest stored-but-unsynced tipset on the subchain containing `key`,
    /// or `None` when that subchain is rooted at genesis.
    pub fn get_unsynced_bottom(&self, key: &TipsetKey) -> Result<Option<TipsetPtr>, Error> {
        self.state_is_consistent()?;
        let genesis = self.genesis_hash()?;
        let bottom = {
            let index = self.index.borrow();
            let info = index.get_tipset_info(&key.hash())?;
            let root = index.graph().root_of(info.branch)?;
            if root.bottom == genesis {
                None
            } else {
                Some(root.bottom)
            }
        };
        match bottom {
            None => Ok(None),
            Some(hash) => Ok(Some(self.get_tipset_by_hash(&hash)?)),
        }
    }

    /// Stores a tipset arriving from the network, indexing it against its
    /// parent key. Returns the new deepest unsynced tipset of its subchain,
    /// or `None` once the subchain connects all the way to genesis.
    pub fn store_tipset(
        &self,
        tipset: TipsetPtr,
        parent: &TipsetKey,
    ) -> Result<Option<TipsetPtr>, Error> {
        self.state_is_consistent()?;
        if !self.started.get() {
            return Err(Error::StoreNotInitialized);
        }

        let hash = tipset.key().hash();
        let genesis = self.genesis_hash()?;

        if self.tipset_is_stored(&hash)? {
            // seen before; a previously orphaned subchain may have become
            // linkable in the meantime
            self.link_orphans(&hash)?;
            return self.get_unsynced_bottom(tipset.key());
        }

        if tipset.height() == 0 {
            return Err(Error::BadTipset("a second genesis tipset".into()));
        }
        if tipset.height() == 1 && parent.hash() != genesis {
            return Err(Error::BadTipset("height 1 tipset not rooted at genesis".into()));
        }
        if tipset.parents().hash() != parent.hash() {
            return Err(Error::BadTipset("parent key mismatch".into()));
        }

        let mut events: Vec<(Option<TipsetHash>, TipsetHash)> = Vec::new();
        let assigned;
        {
            let index = &mut *self.index.borrow_mut();
            let mut g = index.graph().clone();
            let tx = index.transaction()?;

            assigned = self.place_tipset(index, &mut g, &tipset, parent, &mut events)?;
            Self::link_cascade(index, &mut g, genesis, assigned, &mut events)?;

            tx.commit()?;
            *index.graph_mut() = g;
        }

        self.tipset_cache
            .borrow_mut()
            .put(hash, tipset.clone());

        for (removed, added) in events {
            self.head_signal.emit(removed, added);
        }

        self.get_unsynced_bottom(tipset.key())
    }

    /// Decides where the tipset lands (the `applyTipset` variants), writes
    /// its rows and records the graph edits on the scratch graph.
    fn place_tipset(
        &self,
        index: &IndexDb,
        g: &mut Graph,
        tipset: &Tipset,
        parent: &TipsetKey,
        events: &mut Vec<(Option<TipsetHash>, TipsetHash)>,
    ) -> Result<BranchId, Error> {
        let hash = tipset.key().hash();
        let height = tipset.height();
        let genesis = self.genesis_hash()?;

        let parent_stored = index.tipset_exists(&parent.hash())?;
        if parent_stored {
            let pinfo = index.get_tipset_info(&parent.hash())?;
            if pinfo.height >= height {
                return Err(Error::BadTipset("parent height above tipset height".into()));
            }
        }

        // a stored successor whose branch is an unsynced root adopts this
        // tipset at its bottom
        let successor_branch = index
            .successors_of(&hash)?
            .into_iter()
            .find_map(|s| {
                let info = index.get_tipset_info(&s).ok()?;
                let b = g.get(info.branch).ok()?;
                (b.bottom == s && b.parent == NO_BRANCH).then_some(b.id)
            });

        let assigned = match successor_branch {
            Some(s) => {
                self.persist_tipset_rows(index, tipset, s, SyncState::HeaderSynced)?;
                index.insert_link(&parent.hash(), &hash)?;
                g.update_bottom(s, hash, height)?;
                s
            }
            None if parent_stored => {
                let pinfo = index.get_tipset_info(&parent.hash())?;
                let pb = g.get(pinfo.branch)?.clone();
                let parent_is_head = pb.top == parent.hash() && pb.forks.is_empty();
                if parent_is_head {
                    self.persist_tipset_rows(index, tipset, pb.id, SyncState::HeaderSynced)?;
                    index.insert_link(&parent.hash(), &hash)?;
                    g.append_to_head(pb.id, hash, height)?;
                    if g.root_of(pb.id)?.bottom == genesis {
                        events.push((Some(parent.hash()), hash));
                    }
                    pb.id
                } else {
                    // fork: the tipset opens a new branch above the parent
                    let id = index.new_branch_id();
                    self.persist_tipset_rows(index, tipset, id, SyncState::HeaderSynced)?;
                    index.insert_link(&parent.hash(), &hash)?;
                    g.new_branch(BranchInfo {
                        id,
                        top: hash,
                        top_height: height,
                        bottom: hash,
                        bottom_height: height,
                        parent: NO_BRANCH,
                        forks: Default::default(),
                    })?;
                    Self::link_root_to_parent(index, g, id, &pinfo, events, genesis)?;
                    id
                }
            }
            None => {
                // unknown branch point: a fresh unsynced root
                let id = index.new_branch_id();
                self.persist_tipset_rows(index, tipset, id, SyncState::HeaderSynced)?;
                index.insert_link(&parent.hash(), &hash)?;
                g.new_branch(BranchInfo {
                    id,
                    top: hash,
                    top_height: height,
                    bottom: hash,
                    bottom_height: height,
                    parent: NO_BRANCH,
                    forks: Default::default(),
                })?;
                debug!("tipset {} opens unsynced branch {}", hash, id);
                id
            }
        };

        Ok(assigned)
    }

    /// Repeatedly links the root of `branch`'s subchain onto stored parents
    /// until the subchain is rooted at genesis or its bottom's parent is not
    /// stored yet.
    fn link_cascade(
        index: &IndexDb,
        g: &mut Graph,
        genesis: TipsetHash,
        branch: BranchId,
        events: &mut Vec<(Option<TipsetHash>, TipsetHash)>,
    ) -> Result<(), Error> {
        loop {
            let root = g.root_of(branch)?.clone();
            if root.bottom == genesis {
                break;
            }
            let Some(parent_hash) = index.parent_of(&root.bottom)? else {
                break;
            };
            if !index.tipset_exists(&parent_hash)? {
                break;
            }
            let pinfo = index.get_tipset_info(&parent_hash)?;
            Self::link_root_to_parent(index, g, root.id, &pinfo, events, genesis)?;
        }
        Ok(())
    }

    /// Links root branch `root` onto the stored parent described by `pinfo`:
    /// head tops are absorbed, branch tops gain a fork, mid-branch parents
    /// force a split. Rows and the scratch graph are kept in lockstep.
    fn link_root_to_parent(
        index: &IndexDb,
        g: &mut Graph,
        root: BranchId,
        pinfo: &super::index::TipsetInfo,
        events: &mut Vec<(Option<TipsetHash>, TipsetHash)>,
        genesis: TipsetHash,
    ) -> Result<(), Error> {
        let pb = g.get(pinfo.branch)?.clone();
        let parent_is_top = pb.top == pinfo.hash;
        let parent_is_head = parent_is_top && pb.forks.is_empty();

        if parent_is_head {
            // the subchain continues the head: the successor absorbs the base
            index.merge_branch_to_head(root, pb.id)?;
            g.link_to_head(pb.id, root)?;
        } else if parent_is_top {
            g.link_branches(pb.id, root, pinfo.hash, pinfo.height, None)?;
        } else {
            let child = index.new_branch_id();
            let (ub_hash, ub_height) = index.next_in_branch(pinfo.branch, pinfo.height)?;
            index.split_branch(pinfo.branch, pinfo.height, child)?;
            g.link_branches(
                pb.id,
                root,
                pinfo.hash,
                pinfo.height,
                Some(SplitPlan {
                    child_id: child,
                    upper_bottom: ub_hash,
                    upper_bottom_height: ub_height,
                }),
            )?;
        }

        // the linked subchain's heads become reachable; announce the root's
        // own head when it is one
        let linked = g.get(root)?;
        if linked.forks.is_empty() && g.root_of(root)?.bottom == genesis {
            let removed = parent_is_head.then_some(pb.top);
            events.push((removed, linked.top));
        }
        Ok(())
    }

    /// Writes the content and index rows of one tipset: headers to the KV
    /// store, block rows, the tipset row, membership rows. Link rows are the
    /// caller's concern.
    fn persist_tipset_rows(
        &self,
        index: &IndexDb,
        tipset: &Tipset,
        branch: BranchId,
        state: SyncState,
    ) -> Result<(), Error> {
        let hash = tipset.key().hash();
        for header in tipset.blocks() {
            let bytes = serde_ipld_dagcbor::to_vec(header)
                .map_err(|e| Error::Store(e.to_string()))?;
            self.kv.write(&header.cid().to_bytes(), &bytes)?;
            index.insert_block(header.cid(), header.messages(), BlockKind::Header, state)?;
        }
        index.insert_tipset(&hash, state, branch, tipset.weight(), tipset.height())?;
        for (seq, cid) in tipset.cids().iter().enumerate() {
            index.insert_tipset_block(&hash, cid, seq)?;
        }
        index.update_tipset_sync_state(&hash)?;
        Ok(())
    }

    /// Re-runs the link cascade for the subchain containing `hash`; used when
    /// an already-stored tipset is delivered again after its surroundings
    /// changed.
    fn link_orphans(&self, hash: &TipsetHash) -> Result<(), Error> {
        let genesis = self.genesis_hash()?;
        let mut events = Vec::new();
        {
            let index = &mut *self.index.borrow_mut();
            let branch = index.get_tipset_info(hash)?.branch;
            let mut g = index.graph().clone();
            let tx = index.transaction()?;
            Self::link_cascade(index, &mut g, genesis, branch, &mut events)?;
            tx.commit()?;
            *index.graph_mut() = g;
        }
        for (removed, added) in events {
            self.head_signal.emit(removed, added);
        }
        Ok(())
    }

    fn load_tipset_content(&self, hash: &TipsetHash) -> Result<TipsetPtr, Error> {
        let cids = self.index.borrow().get_tipset_cids(hash)?;
        let mut headers: Vec<BlockHeader> = Vec::with_capacity(cids.len());
        for cid in &cids {
            let bytes = self
                .kv
                .read(&cid.to_bytes())?
                .ok_or_else(|| Error::DataIntegrity(format!("missing header content {cid}")))?;
            let header: BlockHeader = serde_ipld_dagcbor::from_slice(&bytes)
                .map_err(|e| Error::DataIntegrity(e.to_string()))?;
            headers.push(header);
        }
        let tipset = Tipset::new(headers)?;
        if tipset.key().hash() != *hash {
            warn!("stored tipset {} rehashes to {}", hash, tipset.key().hash());
            return Err(Error::DataIntegrity("tipset hash mismatch".into()));
        }
        Ok(Rc::new(tipset))
    }
}
