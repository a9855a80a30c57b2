// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;
mod memory;

pub use errors::Error;
pub use memory::MemoryDB;

/// Store interface used as a KV store implementation.
///
/// Persistent engines are provided by the host; the crate ships [`MemoryDB`]
/// for tests and light embedding. Stores are shared as trait objects on the
/// scheduler thread, so keys and values are plain byte slices.
pub trait Store {
    /// Read single value from data store and return `None` if key doesn't exist.
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Write a single value to the data store.
    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), Error>;

    /// Delete value at key.
    fn delete(&self, key: &[u8]) -> Result<(), Error>;

    /// Returns `Ok(true)` if key exists in store.
    fn exists(&self, key: &[u8]) -> Result<bool, Error>;

    /// Read slice of keys and return a vector of optional values.
    fn bulk_read(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, Error> {
        keys.iter().map(|k| self.read(k)).collect()
    }

    /// Write slice of KV pairs.
    fn bulk_write(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<(), Error> {
        if keys.len() != values.len() {
            return Err(Error::InvalidBulkLen);
        }
        keys.iter()
            .zip(values.iter())
            .try_for_each(|(k, v)| self.write(k, v))
    }

    /// Bulk delete keys from the data store.
    fn bulk_delete(&self, keys: &[Vec<u8>]) -> Result<(), Error> {
        keys.iter().try_for_each(|k| self.delete(k))
    }
}
