// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::HashMap;
use num_bigint::BigInt;
use tracing::{debug, warn};

use super::interpreter_job::{InterpreterJob, JobResult};
use super::scheduler::{Handle, Scheduler};
use super::tipset_loader::TipsetLoader;
use super::{BadTipsetCache, Error, PeerId, SyncConfig};
use crate::blocks::{TipsetHash, TipsetKey};
use crate::chain::chain_db::TipsetPtr;
use crate::chain::{ChainDb, SyncState};
use crate::db::Store;
use crate::interpreter::Interpreter;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncStatusCode {
    #[default]
    Idle,
    InProgress,
    SyncedToGenesis,
    Interrupted,
    BadBlocks,
    InternalError,
}

/// Progress and outcome of one sync session. Delivered to the supervisor's
/// callback when the session reaches a terminal state.
#[derive(Debug, Default)]
pub struct SyncStatus {
    pub code: SyncStatusCode,
    pub error: Option<Error>,
    pub peer: Option<PeerId>,
    pub head: Option<TipsetKey>,
    /// Deepest tipset persisted so far on this session's subchain.
    pub last_loaded: Option<TipsetHash>,
    /// Hash the loader is expected to deliver next; anything else is stale.
    pub next: Option<TipsetHash>,
    /// Tipsets persisted during this session.
    pub total: u64,
}

type SyncCallback = Box<dyn Fn(SyncStatus)>;

/// One-shot backward walk from a peer-advertised head down to known chain.
///
/// At most one tipset load is outstanding at a time; deliveries whose hash
/// does not match `status.next` are dropped. The terminal callback is always
/// deferred through the scheduler to prevent re-entrancy.
pub struct SyncJob {
    scheduler: Scheduler,
    tipset_loader: Rc<dyn TipsetLoader>,
    chain_db: Rc<ChainDb>,
    callback: SyncCallback,
    active: Cell<bool>,
    status: RefCell<SyncStatus>,
    cb_handle: RefCell<Handle>,
}

impl SyncJob {
    pub fn new(
        scheduler: Scheduler,
        tipset_loader: Rc<dyn TipsetLoader>,
        chain_db: Rc<ChainDb>,
        callback: SyncCallback,
    ) -> Rc<Self> {
        Rc::new(Self {
            scheduler,
            tipset_loader,
            chain_db,
            callback,
            active: Cell::new(false),
            status: RefCell::new(SyncStatus::default()),
            cb_handle: RefCell::new(Handle::default()),
        })
    }

    pub fn start(self: &Rc<Self>, peer: PeerId, head: TipsetKey, probable_depth: u64) {
        if self.active.get() {
            warn!("sync job is already active");
            return;
        }
        self.active.set(true);
        {
            let mut status = self.status.borrow_mut();
            status.code = SyncStatusCode::InProgress;
            status.peer = Some(peer);
            status.head = Some(head.clone());
        }

        let stored = match self.chain_db.tipset_is_stored(&head.hash()) {
            Ok(stored) => stored,
            Err(e) => return self.internal_error(e.into()),
        };

        if !stored {
            // not indexed, loading...
            self.status.borrow_mut().next = Some(head.hash());
            let peer = self.status.borrow().peer.clone();
            if let Err(e) = self
                .tipset_loader
                .load_tipset_async(&head, peer.as_ref(), probable_depth)
            {
                self.internal_error(e);
            }
            return;
        }

        match self.chain_db.get_unsynced_bottom(&head) {
            Ok(maybe_next) => self.next_target(maybe_next),
            Err(e) => self.internal_error(e.into()),
        }
    }

    /// Synchronously deactivates the job; any scheduled terminal callback is
    /// cancelled and the status reset.
    pub fn cancel(&self) {
        if self.active.get() {
            std::mem::take(&mut *self.status.borrow_mut());
            self.cb_handle.borrow().cancel();
            self.active.set(false);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn status_code(&self) -> SyncStatusCode {
        self.status.borrow().code
    }

    /// Head this session is syncing toward, when one is set.
    pub fn head_hash(&self) -> Option<TipsetHash> {
        self.status.borrow().head.as_ref().map(|k| k.hash())
    }

    pub fn on_tipset_loaded(self: &Rc<Self>, hash: TipsetHash, result: Result<TipsetPtr, Error>) {
        {
            let status = self.status.borrow();
            if status.code != SyncStatusCode::InProgress || status.next != Some(hash) {
                // dont need this tipset
                return;
            }
        }

        match result {
            Err(e) => self.internal_error(e),
            Ok(tipset) => {
                let parent = tipset.parents().clone();
                match self.chain_db.store_tipset(tipset, &parent) {
                    Ok(maybe_next) => self.next_target(maybe_next),
                    Err(crate::chain::Error::BadTipset(reason)) => self.bad_blocks(reason),
                    Err(e) => self.internal_error(e.into()),
                }
            }
        }
    }

    fn next_target(self: &Rc<Self>, last_loaded: Option<TipsetPtr>) {
        let request = {
            let mut status = self.status.borrow_mut();
            match last_loaded {
                None => {
                    status.next = None;
                    status.code = SyncStatusCode::SyncedToGenesis;
                    None
                }
                Some(bottom) => {
                    status.last_loaded = Some(bottom.key().hash());
                    status.total += 1;
                    let next_key = bottom.parents().clone();
                    status.next = Some(next_key.hash());
                    Some((next_key, bottom.height().saturating_sub(1)))
                }
            }
        };

        match request {
            None => self.schedule_callback(),
            Some((next_key, probable_depth)) => {
                let peer = self.status.borrow().peer.clone();
                if let Err(e) =
                    self.tipset_loader
                        .load_tipset_async(&next_key, peer.as_ref(), probable_depth)
                {
                    self.internal_error(e);
                }
            }
        }
    }

    fn internal_error(self: &Rc<Self>, e: Error) {
        let mut status = self.status.borrow_mut();
        status.error = Some(e);
        status.code = SyncStatusCode::InternalError;
        drop(status);
        self.schedule_callback();
    }

    fn bad_blocks(self: &Rc<Self>, reason: String) {
        let mut status = self.status.borrow_mut();
        status.error = Some(Error::BadBlocks(reason));
        status.code = SyncStatusCode::BadBlocks;
        drop(status);
        self.schedule_callback();
    }

    fn schedule_callback(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        *self.cb_handle.borrow_mut() = self.scheduler.schedule(move || {
            if let Some(job) = weak.upgrade() {
                let status = std::mem::take(&mut *job.status.borrow_mut());
                job.active.set(false);
                (job.callback)(status);
            }
        });
    }
}

struct Target {
    head_tipset: TipsetKey,
    weight: BigInt,
    height: u64,
}

type ResultCallback = Box<dyn Fn(&JobResult)>;

/// Multi-target supervisor: queues peer-advertised heads, runs one
/// [`SyncJob`] at a time, and hands fully downloaded heads to the
/// [`InterpreterJob`].
pub struct Syncer {
    scheduler: Scheduler,
    tipset_loader: Rc<dyn TipsetLoader>,
    chain_db: Rc<ChainDb>,
    interpreter_job: Rc<InterpreterJob>,
    callback: ResultCallback,
    bad_tipsets: BadTipsetCache,

    pending_targets: RefCell<HashMap<PeerId, Target>>,

    /// max weight of the local node
    current_weight: RefCell<BigInt>,
    /// height of the local node
    current_height: Cell<u64>,
    /// height of the last tipset seen from the network, used to derive the
    /// probable depth hint
    probable_height: Cell<u64>,
    last_good_peer: RefCell<Option<PeerId>>,

    // one job at the moment, they could be parallel
    current_job: RefCell<Option<Rc<SyncJob>>>,
    started: Cell<bool>,
}

impl Syncer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Scheduler,
        tipset_loader: Rc<dyn TipsetLoader>,
        chain_db: Rc<ChainDb>,
        kv_store: Rc<dyn Store>,
        ipld: Rc<dyn Store>,
        interpreter: Rc<dyn Interpreter>,
        config: SyncConfig,
        callback: ResultCallback,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak: &std::rc::Weak<Syncer>| {
            let on_result = {
                let weak = weak.clone();
                Box::new(move |result: &JobResult| {
                    if let Some(syncer) = weak.upgrade() {
                        syncer.on_interpreter_result(result);
                    }
                })
            };
            let interpreter_job = InterpreterJob::new(
                kv_store,
                ipld,
                interpreter,
                scheduler.clone(),
                chain_db.clone(),
                config.interpreter_batch,
                on_result,
            );
            let cap = std::num::NonZeroUsize::new(config.bad_tipset_cache_size.max(1))
                .expect("nonzero");
            Syncer {
                scheduler,
                tipset_loader,
                chain_db,
                interpreter_job,
                callback,
                bad_tipsets: BadTipsetCache::new(cap),
                pending_targets: RefCell::new(HashMap::default()),
                current_weight: RefCell::new(BigInt::from(0)),
                current_height: Cell::new(0),
                probable_height: Cell::new(0),
                last_good_peer: RefCell::new(None),
                current_job: RefCell::new(None),
                started: Cell::new(false),
            }
        })
    }

    /// Registers the loader callback on first call, then picks the best
    /// pending target if no job is running.
    pub fn start(self: &Rc<Self>) {
        if !self.started.get() {
            self.started.set(true);
            let weak = Rc::downgrade(self);
            self.tipset_loader.init(Box::new(move |hash, result| {
                if let Some(syncer) = weak.upgrade() {
                    syncer.on_tipset_loaded(hash, result);
                }
            }));
        }

        if !self.is_active() {
            if let Some((peer, target)) = self.choose_next_target() {
                self.start_job(peer, target.head_tipset, target.height);
            }
        }
    }

    /// Admits a peer-advertised head. Rejected when both weight and height
    /// are below the local chain, or the head is known bad. Without a peer,
    /// the last good peer is reused. A head already being synced is a no-op.
    pub fn new_target(
        self: &Rc<Self>,
        peer: Option<PeerId>,
        head_tipset: TipsetKey,
        weight: BigInt,
        height: u64,
    ) {
        if let Some(reason) = self.bad_tipsets.peek(&head_tipset.hash()) {
            warn!("ignoring bad head {}: {}", head_tipset.hash(), reason);
            return;
        }
        if weight < *self.current_weight.borrow() && height < self.current_height.get() {
            // not a sync target
            return;
        }

        let peer = match peer.or_else(|| self.last_good_peer.borrow().clone()) {
            Some(peer) => peer,
            None => return,
        };

        if self.is_active() {
            if let Some(job) = &*self.current_job.borrow() {
                if job.head_hash() == Some(head_tipset.hash()) {
                    debug!("head {} is already being synced", head_tipset.hash());
                    return;
                }
            }
        }

        if self.started.get() && !self.is_active() {
            self.start_job(peer, head_tipset, height);
        } else {
            self.pending_targets.borrow_mut().insert(
                peer,
                Target {
                    head_tipset,
                    weight,
                    height,
                },
            );
        }
    }

    pub fn exclude_peer(&self, peer: &PeerId) {
        self.pending_targets.borrow_mut().remove(peer);
    }

    /// Updates the local chain floor and drops pending targets below it.
    pub fn set_current_weight_and_height(&self, weight: BigInt, height: u64) {
        *self.current_weight.borrow_mut() = weight.clone();
        self.current_height.set(height);
        self.pending_targets
            .borrow_mut()
            .retain(|_, t| !(t.weight <= weight && t.height <= height));
    }

    pub fn is_active(&self) -> bool {
        self.started.get()
            && self
                .current_job
                .borrow()
                .as_ref()
                .map(|job| job.is_active())
                .unwrap_or(false)
    }

    /// Among pending targets, the strictly heaviest wins; ties break toward
    /// greater height. When every pending target is at or below the local
    /// floor, all of them are discarded.
    fn choose_next_target(&self) -> Option<(PeerId, Target)> {
        let chosen = {
            let pending = self.pending_targets.borrow();
            if pending.is_empty() {
                return None;
            }
            let mut max_weight = self.current_weight.borrow().clone();
            let mut max_height = self.current_height.get();
            let mut chosen: Option<PeerId> = None;
            for (peer, target) in pending.iter() {
                if target.weight > max_weight {
                    max_weight = target.weight.clone();
                    max_height = target.height;
                    chosen = Some(*peer);
                } else if target.weight == max_weight && target.height > max_height {
                    max_height = target.height;
                    chosen = Some(*peer);
                }
            }
            chosen
        };

        match chosen {
            Some(peer) => {
                let target = self.pending_targets.borrow_mut().remove(&peer)?;
                Some((peer, target))
            }
            None => {
                // all targets are obsolete, forget them
                self.pending_targets.borrow_mut().clear();
                None
            }
        }
    }

    fn start_job(self: &Rc<Self>, peer: PeerId, head_tipset: TipsetKey, height: u64) {
        debug_assert!(self.started.get());

        if self.current_job.borrow().is_none() {
            let weak = Rc::downgrade(self);
            let job = SyncJob::new(
                self.scheduler.clone(),
                self.tipset_loader.clone(),
                self.chain_db.clone(),
                Box::new(move |status| {
                    if let Some(syncer) = weak.upgrade() {
                        syncer.on_sync_job_finished(status);
                    }
                }),
            );
            *self.current_job.borrow_mut() = Some(job);
        }

        let job = self.current_job.borrow().clone().expect("created above");
        debug_assert!(!job.is_active());

        let probable_height = self.probable_height.get();
        let probable_depth = if height > probable_height {
            height - probable_height
        } else {
            height
        };

        job.start(peer, head_tipset, probable_depth);
    }

    fn on_tipset_loaded(self: &Rc<Self>, hash: TipsetHash, result: Result<TipsetPtr, Error>) {
        if self.is_active() {
            if let Ok(tipset) = &result {
                self.probable_height.set(tipset.height());
            }
            let job = self.current_job.borrow().clone();
            if let Some(job) = job {
                job.on_tipset_loaded(hash, result);
            }
        }
    }

    fn on_sync_job_finished(self: &Rc<Self>, status: SyncStatus) {
        match status.code {
            SyncStatusCode::SyncedToGenesis => {
                *self.last_good_peer.borrow_mut() = status.peer;
                if let Some(head) = &status.head {
                    if let Err(e) = self.interpreter_job.start(head) {
                        warn!("cannot start interpreter job: {}", e);
                    }
                }
            }
            code => {
                warn!(
                    ?code,
                    error = ?status.error,
                    peer = ?status.peer,
                    "sync job finished without reaching genesis"
                );
                if code == SyncStatusCode::BadBlocks {
                    if let Some(head) = &status.head {
                        let reason = status
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "bad blocks".to_string());
                        self.bad_tipsets.put(head.hash(), reason);
                    }
                }
            }
        }
        // drain pending targets
        self.start();
    }

    fn on_interpreter_result(self: &Rc<Self>, result: &JobResult) {
        match &result.result {
            Ok(_) => {
                if let Some(head) = &result.head {
                    self.set_current_weight_and_height(head.weight().clone(), head.height());
                }
            }
            Err(e) => {
                if let Some(failed) = result.failed {
                    warn!("marking tipset {} bad: {}", failed, e);
                    self.bad_tipsets.put(failed, e.to_string());
                    if let Err(e) = self
                        .chain_db
                        .set_tipset_sync_state(&failed, SyncState::Bad)
                    {
                        warn!("cannot mark tipset bad in index: {}", e);
                    }
                }
            }
        }
        (self.callback)(result);
        self.start();
    }
}
