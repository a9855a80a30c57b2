// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Branch-aware chain synchronization core for a Filecoin-compatible node.
//!
//! The crate maintains a persistent, forked view of the chain (the branch
//! graph and its SQLite-backed index), drives it toward the heaviest head
//! advertised by peers (`chain_sync`), and replays adopted tipsets through a
//! deterministic interpreter, memoizing results by tipset identity.
//!
//! Everything runs on a single-threaded cooperative scheduler; components
//! share ownership through `Rc` and suspend by returning to the event loop.

pub mod blocks;
pub mod chain;
pub mod chain_sync;
pub mod db;
pub mod interpreter;
