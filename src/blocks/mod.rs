// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;
pub mod header;
pub mod tipset;

pub use errors::Error;
pub use header::BlockHeader;
pub use tipset::{Tipset, TipsetHash, TipsetKey};
