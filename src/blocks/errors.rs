// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Blockchain structure error
#[derive(Debug, PartialEq, Eq, Error)]
pub enum Error {
    /// Tipset contains no blocks
    #[error("No blocks for tipset")]
    NoBlocks,
    /// Tipset invariant violated across member headers
    #[error("Invalid tipset: {0}")]
    InvalidTipset(String),
    /// Error originating from CID construction
    #[error("Invalid CID: {0}")]
    InvalidCid(String),
}

impl From<cid::Error> for Error {
    fn from(e: cid::Error) -> Error {
        Error::InvalidCid(e.to_string())
    }
}
