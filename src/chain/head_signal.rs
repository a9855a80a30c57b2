// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::blocks::TipsetHash;

/// Heads configuration changed callback. If both values are present then
/// `added` replaces `removed`.
pub type HeadCallback = dyn Fn(Option<TipsetHash>, TipsetHash);

/// Keeps a head subscription alive. Dropping the token (or calling
/// [`Subscription::cancel`]) detaches the subscriber; the signal itself only
/// holds weak references.
pub struct Subscription {
    cb: Option<Rc<HeadCallback>>,
}

impl Subscription {
    pub fn cancel(&mut self) {
        drop(self.cb.take());
    }
}

/// Broadcast of head changes with weak subscriptions. Single-threaded;
/// emission happens on the scheduler thread only.
#[derive(Default)]
pub struct HeadSignal {
    subscribers: RefCell<Vec<Weak<HeadCallback>>>,
}

impl HeadSignal {
    pub fn subscribe<F>(&self, cb: F) -> Subscription
    where
        F: Fn(Option<TipsetHash>, TipsetHash) + 'static,
    {
        let rc: Rc<HeadCallback> = Rc::new(cb);
        self.subscribers.borrow_mut().push(Rc::downgrade(&rc));
        Subscription { cb: Some(rc) }
    }

    /// Notifies live subscribers and prunes dead ones. Subscribers are
    /// invoked outside the internal borrow, so they may re-subscribe.
    pub fn emit(&self, removed: Option<TipsetHash>, added: TipsetHash) {
        let live: Vec<Rc<HeadCallback>> = {
            let mut subs = self.subscribers.borrow_mut();
            subs.retain(|w| w.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        for cb in live {
            cb(removed, added);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn emits_to_live_subscribers_only() {
        let signal = HeadSignal::default();
        let count = Rc::new(Cell::new(0));

        let c = count.clone();
        let sub = signal.subscribe(move |_, _| c.set(c.get() + 1));
        let c = count.clone();
        let mut cancelled = signal.subscribe(move |_, _| c.set(c.get() + 10));
        cancelled.cancel();

        signal.emit(None, TipsetHash::default());
        assert_eq!(count.get(), 1);

        drop(sub);
        signal.emit(None, TipsetHash::default());
        assert_eq!(count.get(), 1);
    }
}
