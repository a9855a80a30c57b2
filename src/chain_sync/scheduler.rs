// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use ahash::HashSet;

type Task = Box<dyn FnOnce()>;

#[derive(Default)]
struct Inner {
    queue: VecDeque<(u64, Task)>,
    cancelled: HashSet<u64>,
    next_id: u64,
}

/// Single-threaded cooperative event queue. Components defer work (and in
/// particular their terminal callbacks, to break caller re-entrancy) through
/// [`Scheduler::schedule`]; the host loop drains it with
/// [`Scheduler::run_pending`].
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Rc<RefCell<Inner>>,
}

/// Cancellable reference to a scheduled task. A default handle is inert;
/// `cancel` is idempotent.
#[derive(Default)]
pub struct Handle {
    id: u64,
    inner: Weak<RefCell<Inner>>,
}

impl Handle {
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().cancelled.insert(self.id);
        }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, f: F) -> Handle
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.queue.push_back((id, Box::new(f)));
        Handle {
            id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Runs the next non-cancelled task, if any. The task executes outside
    /// the internal borrow, so it may schedule or cancel freely.
    pub fn run_one(&self) -> bool {
        loop {
            let task = {
                let mut inner = self.inner.borrow_mut();
                match inner.queue.pop_front() {
                    None => return false,
                    Some((id, task)) => {
                        if inner.cancelled.remove(&id) {
                            continue;
                        }
                        task
                    }
                }
            };
            task();
            return true;
        }
    }

    /// Drains the queue, including tasks scheduled while draining. Returns
    /// the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    pub fn is_idle(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn runs_in_order() {
        let s = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            s.schedule(move || log.borrow_mut().push(i));
        }
        assert_eq!(s.run_pending(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let s = Scheduler::new();
        let hits = Rc::new(Cell::new(0));
        let h = {
            let hits = hits.clone();
            s.schedule(move || hits.set(hits.get() + 1))
        };
        h.cancel();
        h.cancel();
        assert_eq!(s.run_pending(), 0);
        assert_eq!(hits.get(), 0);

        // inert default handle
        Handle::default().cancel();
    }

    #[test]
    fn tasks_may_reschedule() {
        let s = Scheduler::new();
        let hits = Rc::new(Cell::new(0));
        {
            let s2 = s.clone();
            let hits = hits.clone();
            s.schedule(move || {
                let hits = hits.clone();
                s2.schedule(move || hits.set(hits.get() + 1));
            });
        }
        assert_eq!(s.run_pending(), 2);
        assert_eq!(hits.get(), 1);
    }
}
