// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

use super::{graph, index};

/// Chain store error
#[derive(Debug, Error)]
pub enum Error {
    /// Store used before a successful `init`
    #[error("chain store is not initialized")]
    StoreNotInitialized,
    /// No genesis tipset available where one is required
    #[error("no genesis block")]
    NoGenesisBlock,
    /// Persisted genesis does not match the configured one
    #[error("genesis mismatch")]
    GenesisMismatch,
    /// No heaviest tipset could be determined
    #[error("no heaviest tipset")]
    NoHeaviestTipset,
    /// Tipset violates a storage precondition
    #[error("bad tipset: {0}")]
    BadTipset(String),
    /// Persistent state disagrees with itself
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
    /// Error originating from the branch graph
    #[error(transparent)]
    Graph(#[from] graph::Error),
    /// Error originating from the index database
    #[error(transparent)]
    Index(#[from] index::Error),
    /// Error originating from the content store
    #[error("{0}")]
    Store(String),
    /// Error originating constructing blockchain structures
    #[error(transparent)]
    Blocks(#[from] crate::blocks::Error),
}

impl From<crate::db::Error> for Error {
    fn from(e: crate::db::Error) -> Error {
        Error::Store(e.to_string())
    }
}
