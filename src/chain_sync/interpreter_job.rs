// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use super::scheduler::{Handle, Scheduler};
use super::Error;
use crate::chain::chain_db::TipsetPtr;
use crate::chain::{ChainDb, Height, SyncState};
use crate::blocks::{TipsetHash, TipsetKey};
use crate::db::Store;
use crate::interpreter::{self, CachedInterpreter, Interpreter, InterpreterResult};

/// Terminal report of one interpretation run.
#[derive(Debug)]
pub struct JobResult {
    /// The head the job was started on.
    pub head: Option<TipsetPtr>,
    /// The last tipset whose interpretation succeeded.
    pub last_interpreted: Option<TipsetPtr>,
    /// The tipset on which interpretation failed, when it did.
    pub failed: Option<TipsetHash>,
    pub result: Result<InterpreterResult, interpreter::Error>,
}

impl Default for JobResult {
    fn default() -> Self {
        Self {
            head: None,
            last_interpreted: None,
            failed: None,
            result: Err(interpreter::Error::TipsetMarkedBad),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub current_height: Height,
    pub target_height: Height,
}

type Callback = Box<dyn Fn(&JobResult)>;

/// Brings interpreted-state height from the highest already-interpreted
/// ancestor of a head up to that head, one tipset at a time. Each step is
/// rescheduled through the cooperative scheduler so interpretation does not
/// monopolize the thread; results are memoized by tipset identity.
pub struct InterpreterJob {
    kv: Rc<dyn Store>,
    ipld: Rc<dyn Store>,
    interpreter: CachedInterpreter,
    scheduler: Scheduler,
    chain_db: Rc<ChainDb>,
    callback: Callback,
    active: Cell<bool>,
    status: Cell<Status>,
    result: RefCell<JobResult>,
    next_steps: RefCell<VecDeque<TipsetPtr>>,
    cb_handle: RefCell<Handle>,
    batch: u64,
}

impl InterpreterJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Rc<dyn Store>,
        ipld: Rc<dyn Store>,
        inner: Rc<dyn Interpreter>,
        scheduler: Scheduler,
        chain_db: Rc<ChainDb>,
        batch: usize,
        callback: Callback,
    ) -> Rc<Self> {
        Rc::new(Self {
            interpreter: CachedInterpreter::new(inner, kv.clone()),
            kv,
            ipld,
            scheduler,
            chain_db,
            callback,
            active: Cell::new(false),
            status: Cell::new(Status::default()),
            result: RefCell::new(JobResult::default()),
            next_steps: RefCell::new(VecDeque::new()),
            cb_handle: RefCell::new(Handle::default()),
            batch: batch as u64,
        })
    }

    /// Starts (or restarts) interpretation toward `head`. When the head is
    /// already memoized, the terminal callback fires with the cached result
    /// and the interpreter is never invoked.
    pub fn start(self: &Rc<Self>, head: &TipsetKey) -> Result<(), Error> {
        if self.active.get() {
            let st = self.status.get();
            warn!(
                "current job ({} -> {}) is still active, cancelling it",
                st.current_height, st.target_height
            );
            self.cancel();
        }

        let head_ts = self.chain_db.get_tipset_by_key(head)?;
        let target = head_ts.height();
        *self.result.borrow_mut() = JobResult {
            head: Some(head_ts.clone()),
            ..Default::default()
        };
        self.status.set(Status {
            current_height: 0,
            target_height: target,
        });

        // maybe already interpreted
        if let Some(saved) = interpreter::saved_result(&*self.kv, &head_ts)? {
            let mut result = self.result.borrow_mut();
            result.result = Ok(saved);
            result.last_interpreted = Some(head_ts.clone());
            drop(result);
            self.status.set(Status {
                current_height: target,
                target_height: target,
            });
            self.schedule_result();
            return Ok(());
        }

        // set current head to enable moving forward
        self.chain_db.set_current_head(&head_ts.key().hash())?;

        // find the highest interpreted tipset in the chain
        let mut current = 0;
        let kv = self.kv.clone();
        self.chain_db
            .walk_backward(&head_ts.key().hash(), 0, &mut |tipset| {
                match interpreter::saved_result(&*kv, &tipset) {
                    Err(e) => Err(crate::chain::Error::Store(e.to_string())),
                    Ok(Some(_)) => {
                        current = tipset.height();
                        Ok(false)
                    }
                    Ok(None) => Ok(true),
                }
            })?;

        self.status.set(Status {
            current_height: current,
            target_height: target,
        });
        info!("starting {} -> {}", current, target);
        self.active.set(true);
        self.schedule_step();
        Ok(())
    }

    /// Returns the last status and clears all. Synchronous: no in-flight step
    /// can observe post-cancel state.
    pub fn cancel(&self) -> Status {
        self.active.set(false);
        self.cb_handle.borrow().cancel();
        self.next_steps.borrow_mut().clear();
        let status = self.status.get();
        self.status.set(Status::default());
        status
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    fn schedule_result(self: &Rc<Self>) {
        self.active.set(false);
        self.next_steps.borrow_mut().clear();
        let weak = Rc::downgrade(self);
        *self.cb_handle.borrow_mut() = self.scheduler.schedule(move || {
            if let Some(job) = weak.upgrade() {
                let result = std::mem::take(&mut *job.result.borrow_mut());
                (job.callback)(&result);
            }
        });
    }

    fn schedule_step(self: &Rc<Self>) {
        if !self.active.get() {
            return;
        }
        let weak = Rc::downgrade(self);
        *self.cb_handle.borrow_mut() = self.scheduler.schedule(move || {
            if let Some(job) = weak.upgrade() {
                job.next_step();
            }
        });
    }

    fn next_step(self: &Rc<Self>) {
        if !self.active.get() {
            return;
        }
        self.fill_next_steps();
        let next = self.next_steps.borrow_mut().pop_front();
        let Some(tipset) = next else {
            self.schedule_result();
            return;
        };

        let mut st = self.status.get();
        st.current_height = tipset.height();
        self.status.set(st);
        debug!("interpreting {}/{}", st.current_height, st.target_height);

        match self.interpreter.interpret(&*self.ipld, &tipset) {
            Ok(res) => {
                if let Err(e) = self
                    .chain_db
                    .set_tipset_sync_state(&tipset.key().hash(), SyncState::Interpreted)
                {
                    warn!("cannot advance sync state: {}", e);
                }
                let mut result = self.result.borrow_mut();
                result.result = Ok(res);
                result.last_interpreted = Some(tipset);
                drop(result);
                if st.current_height == st.target_height {
                    self.schedule_result();
                } else {
                    self.schedule_step();
                }
            }
            Err(e) => {
                error!(
                    "interpretation stopped at height {}: {}",
                    st.current_height, e
                );
                let mut result = self.result.borrow_mut();
                result.failed = Some(tipset.key().hash());
                result.result = Err(e);
                drop(result);
                self.active.set(false);
                self.schedule_result();
            }
        }
    }

    /// Refills the pending batch from the current chain, up to `batch`
    /// tipsets ahead of the current height.
    fn fill_next_steps(&self) {
        if !self.next_steps.borrow().is_empty() {
            return;
        }
        let st = self.status.get();
        let diff = st.target_height.saturating_sub(st.current_height);
        if diff == 0 {
            return;
        }
        let to = st.current_height + diff.min(self.batch);
        let walked = self
            .chain_db
            .walk_forward(st.current_height + 1, to, &mut |tipset| {
                if tipset.height() <= st.target_height {
                    self.next_steps.borrow_mut().push_back(tipset);
                }
                Ok(true)
            });
        if let Err(e) = walked {
            error!(
                "failed to load tipsets starting from height {}: {}",
                st.current_height + 1,
                e
            );
            self.result.borrow_mut().result = Err(interpreter::Error::Other(e.to_string()));
            self.next_steps.borrow_mut().clear();
        } else {
            debug!(
                "scheduled {} tipsets starting from height {}",
                self.next_steps.borrow().len(),
                st.current_height + 1
            );
        }
    }
}
