// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The job was cancelled before reaching a terminal state
    #[error("sync interrupted")]
    Interrupted,
    /// The peer delivered blocks that failed validation or storage checks
    #[error("bad blocks: {0}")]
    BadBlocks(String),
    /// No peer available to request tipsets from
    #[error("no peers to sync with")]
    NoPeers,
    /// Failure inside the sync machinery itself
    #[error("sync internal error: {0}")]
    Internal(String),
    /// Error originating from the chain store facade
    #[error(transparent)]
    Chain(#[from] crate::chain::Error),
    /// Error originating from the interpreter
    #[error(transparent)]
    Interpreter(#[from] crate::interpreter::Error),
}
