// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};

const INTERPRETER_BATCH: usize = 100;
const BAD_TIPSET_CACHE_SIZE: usize = 1 << 15;

/// Config available for the sync subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How many tipsets an interpreter job queries per batch refill.
    pub interpreter_batch: usize,
    /// Capacity of the bad-tipset cache.
    pub bad_tipset_cache_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interpreter_batch: INTERPRETER_BATCH,
            bad_tipset_cache_size: BAD_TIPSET_CACHE_SIZE,
        }
    }
}
