// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;

use ahash::HashMap;

use super::{Error, Store};

/// An in-memory `HashMap` store. Interior mutability only; the crate runs on
/// a single cooperative thread, so no locking is involved.
#[derive(Debug, Default)]
pub struct MemoryDB {
    db: RefCell<HashMap<Vec<u8>, Vec<u8>>>,
}

impl Store for MemoryDB {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.db.borrow().get(key).cloned())
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.db.borrow_mut().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.db.borrow_mut().remove(key);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, Error> {
        Ok(self.db.borrow().contains_key(key))
    }
}
