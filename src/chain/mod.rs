// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod chain_db;
mod errors;
pub mod graph;
pub mod head_signal;
pub mod index;

pub use chain_db::ChainDb;
pub use errors::Error;
pub use graph::{BranchId, BranchInfo, Graph, Height, GENESIS_BRANCH, NO_BRANCH};
pub use head_signal::{HeadSignal, Subscription};
pub use index::{IndexDb, SyncState, TipsetInfo};
