// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! End-to-end sessions over the cooperative scheduler: a scripted loader
//! plays the network, a counting interpreter plays the VM.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use num_bigint::BigInt;

use common::{make_chain, peer_id, setup_chain_db, StubInterpreter, StubLoader};
use taiga::chain_sync::interpreter_job::{InterpreterJob, JobResult};
use taiga::chain_sync::{
    Scheduler, SyncConfig, SyncJob, SyncStatus, SyncStatusCode, Syncer, TipsetLoader,
};
use taiga::db::MemoryDB;
use taiga::interpreter;

/// Pumps loader deliveries and scheduler tasks until both are quiet.
fn drive(loader: &StubLoader, scheduler: &Scheduler) {
    loop {
        let delivered = loader.deliver_next();
        let ran = scheduler.run_pending();
        if !delivered && ran == 0 {
            break;
        }
    }
}

struct Rig {
    scheduler: Scheduler,
    loader: Rc<StubLoader>,
    interpreter: Rc<StubInterpreter>,
    syncer: Rc<Syncer>,
    results: Rc<RefCell<Vec<(u64, bool)>>>,
}

/// Full syncer over a local chain of `local_len` tipsets out of `chain`.
/// Tipsets `0..memoized_len` have interpreter results pre-saved.
fn rig(chain: &[Rc<taiga::blocks::Tipset>], local_len: usize, memoized_len: usize) -> Rig {
    let (chain_db, ipld) = setup_chain_db(chain, local_len);
    let kv = Rc::new(MemoryDB::default());
    for ts in &chain[..memoized_len] {
        interpreter::save_result(
            &*kv,
            ts,
            &interpreter::InterpreterResult {
                state_root: common::dummy_cid(ts.height()),
                message_receipts: common::dummy_cid(ts.height() + 1_000_000),
            },
        )
        .unwrap();
    }

    let scheduler = Scheduler::new();
    let loader = Rc::new(StubLoader::default());
    let interpreter = Rc::new(StubInterpreter::default());
    let results: Rc<RefCell<Vec<(u64, bool)>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = results.clone();
    let syncer = Syncer::new(
        scheduler.clone(),
        loader.clone(),
        chain_db,
        kv,
        ipld,
        interpreter.clone(),
        SyncConfig::default(),
        Box::new(move |result: &JobResult| {
            let height = result.head.as_ref().map(|h| h.height()).unwrap_or(0);
            sink.borrow_mut().push((height, result.result.is_ok()));
        }),
    );

    Rig {
        scheduler,
        loader,
        interpreter,
        syncer,
        results,
    }
}

#[test]
fn linear_catch_up() {
    // local height 100, peer advertises head at height 150
    let chain = make_chain(151);
    let rig = rig(&chain, 101, 101);
    rig.loader.script(&chain);

    rig.syncer.start();
    rig.syncer.new_target(
        Some(peer_id(1)),
        chain[150].key().clone(),
        BigInt::from(150),
        150,
    );
    drive(&rig.loader, &rig.scheduler);

    // interpreter visited exactly 101..=150 in order
    assert_eq!(
        *rig.interpreter.heights.borrow(),
        (101..=150).collect::<Vec<u64>>()
    );
    assert_eq!(*rig.results.borrow(), vec![(150, true)]);
}

#[test]
fn fork_rejection_prefers_weight() {
    // two competing heads: A (h=200, w=200) and B (h=199, w=210); the syncer
    // must start with B
    let chain = make_chain(201);
    let head_a = chain[200].key().clone();
    let head_b = chain[199].key().clone();
    let base = make_chain(2);
    let rig = rig(&base, 1, 1);

    rig.syncer
        .new_target(Some(peer_id(1)), head_a, BigInt::from(200), 200);
    rig.syncer
        .new_target(Some(peer_id(2)), head_b.clone(), BigInt::from(210), 199);
    rig.syncer.start();

    assert_eq!(rig.loader.request_count(), 1);
    assert_eq!(
        rig.loader.first_request().unwrap().hash(),
        head_b.hash(),
        "the heavier target must be chosen despite its lower height"
    );
}

#[test]
fn mid_sync_peer_failure() {
    // walking 150 -> 100, the loader fails at tipset 120
    let chain = make_chain(151);
    let (chain_db, _ipld) = setup_chain_db(&chain, 101);
    let scheduler = Scheduler::new();
    let loader = Rc::new(StubLoader::default());
    loader.script(&chain);
    loader.fail_on(chain[120].key().hash());

    let statuses: Rc<RefCell<Vec<SyncStatus>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = statuses.clone();
    let job = SyncJob::new(
        scheduler.clone(),
        loader.clone(),
        chain_db,
        Box::new(move |status| sink.borrow_mut().push(status)),
    );
    // route loader deliveries straight to the job
    {
        let job = job.clone();
        loader.init(Box::new(move |hash, result| {
            job.on_tipset_loaded(hash, result);
        }));
    }

    job.start(peer_id(1), chain[150].key().clone(), 50);
    drive(&loader, &scheduler);

    let statuses = statuses.borrow();
    assert_eq!(statuses.len(), 1);
    let status = &statuses[0];
    assert_eq!(status.code, SyncStatusCode::InternalError);
    assert!(status.error.is_some());
    assert_eq!(
        status.last_loaded,
        Some(chain[121].key().hash()),
        "deepest persisted tipset must be 121"
    );
    assert!(!job.is_active());
}

#[test]
fn interpreter_memoization_short_circuits() {
    let chain = make_chain(11);
    let (chain_db, ipld) = setup_chain_db(&chain, 11);
    let scheduler = Scheduler::new();
    let kv = Rc::new(MemoryDB::default());
    let stub = Rc::new(StubInterpreter::default());
    let callbacks = Rc::new(Cell::new(0usize));

    let sink = callbacks.clone();
    let job = InterpreterJob::new(
        kv,
        ipld,
        stub.clone(),
        scheduler.clone(),
        chain_db,
        SyncConfig::default().interpreter_batch,
        Box::new(move |result: &JobResult| {
            assert!(result.result.is_ok());
            sink.set(sink.get() + 1);
        }),
    );

    job.start(chain[10].key()).unwrap();
    scheduler.run_pending();
    assert_eq!(callbacks.get(), 1);
    let first_run_calls = stub.calls.get();
    assert_eq!(first_run_calls, 10, "heights 1..=10 interpreted");

    // second run on the same head: exactly one scheduled callback with the
    // cached result, and zero interpret invocations
    job.start(chain[10].key()).unwrap();
    scheduler.run_pending();
    assert_eq!(callbacks.get(), 2);
    assert_eq!(stub.calls.get(), first_run_calls);
}

#[test]
fn stale_tipset_delivery_is_dropped() {
    let chain = make_chain(6);
    let (chain_db, _ipld) = setup_chain_db(&chain, 3);
    let scheduler = Scheduler::new();
    let loader = Rc::new(StubLoader::default());

    let fired = Rc::new(Cell::new(0usize));
    let sink = fired.clone();
    let job = SyncJob::new(
        scheduler.clone(),
        loader.clone(),
        chain_db,
        Box::new(move |_| sink.set(sink.get() + 1)),
    );

    job.start(peer_id(1), chain[5].key().clone(), 3);
    assert_eq!(job.status_code(), SyncStatusCode::InProgress);

    // delivery for an unrelated hash: job state unchanged, no callbacks
    job.on_tipset_loaded(chain[4].key().hash(), Ok(chain[4].clone()));
    assert_eq!(job.status_code(), SyncStatusCode::InProgress);
    assert!(job.is_active());
    assert_eq!(scheduler.run_pending(), 0);
    assert_eq!(fired.get(), 0);
}

#[test]
fn failed_interpretation_reports_and_marks() {
    let chain = make_chain(21);
    let rig = rig(&chain, 11, 11);
    rig.loader.script(&chain);
    rig.interpreter.fail_at.set(Some(15));

    rig.syncer.start();
    rig.syncer.new_target(
        Some(peer_id(3)),
        chain[20].key().clone(),
        BigInt::from(20),
        20,
    );
    drive(&rig.loader, &rig.scheduler);

    assert_eq!(*rig.results.borrow(), vec![(20, false)]);
    assert_eq!(
        *rig.interpreter.heights.borrow(),
        (11..=15).collect::<Vec<u64>>(),
        "interpretation stops at the failing tipset"
    );

    // the failed tipset now carries the bad mark: advertising it as a head
    // is ignored outright
    let before = rig.loader.request_count();
    rig.syncer.new_target(
        Some(peer_id(4)),
        chain[15].key().clone(),
        BigInt::from(999),
        999,
    );
    assert_eq!(rig.loader.request_count(), before);
}
