// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sync orchestration: a single backward-walking [`SyncJob`] supervised by
//! the [`Syncer`], and the forward-replaying [`InterpreterJob`]. Everything
//! runs cooperatively on the [`Scheduler`] thread.

mod bad_tipset_cache;
mod config;
mod errors;
pub mod interpreter_job;
mod scheduler;
mod sync_job;
mod tipset_loader;

pub use bad_tipset_cache::BadTipsetCache;
pub use config::SyncConfig;
pub use errors::Error;
pub use interpreter_job::InterpreterJob;
pub use scheduler::{Handle, Scheduler};
pub use sync_job::{SyncJob, SyncStatus, SyncStatusCode, Syncer};
pub use tipset_loader::{OnTipsetLoaded, TipsetLoader};

/// Identity of a peer advertising chain heads.
pub type PeerId = libp2p::PeerId;
