// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Deterministic state-transition interface and its result memo.
//!
//! The interpreter itself is external; this module defines the seam the
//! sync core calls through and the key-value memo that makes replays cheap.

use std::rc::Rc;

use cid::Cid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blocks::Tipset;
use crate::db::Store;

const RESULT_KEY_PREFIX: &[u8] = b"interpreted/";

#[derive(Debug, Error)]
pub enum Error {
    /// The tipset (or an ancestor) was found defective during a previous
    /// interpretation; recognized by the syncer to short-circuit the subchain.
    #[error("tipset is marked as bad")]
    TipsetMarkedBad,
    #[error("interpreter kv error: {0}")]
    Store(String),
    #[error("interpreter encoding error: {0}")]
    Encoding(String),
    /// Opaque failure inside the state transition, bubbled through.
    #[error("interpreter error: {0}")]
    Other(String),
}

impl From<crate::db::Error> for Error {
    fn from(e: crate::db::Error) -> Error {
        Error::Store(e.to_string())
    }
}

/// Outcome of applying one tipset to world state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterResult {
    pub state_root: Cid,
    pub message_receipts: Cid,
}

/// Deterministic replay of the state transitions a tipset induces.
pub trait Interpreter {
    fn interpret(&self, ipld: &dyn Store, tipset: &Tipset) -> Result<InterpreterResult, Error>;
}

fn result_key(tipset: &Tipset) -> Vec<u8> {
    let hash = tipset.key().hash();
    let mut key = Vec::with_capacity(RESULT_KEY_PREFIX.len() + hash.as_bytes().len());
    key.extend_from_slice(RESULT_KEY_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Fetches a previously memoized result for the tipset, if any.
pub fn saved_result(kv: &dyn Store, tipset: &Tipset) -> Result<Option<InterpreterResult>, Error> {
    match kv.read(&result_key(tipset))? {
        None => Ok(None),
        Some(bytes) => serde_ipld_dagcbor::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Encoding(e.to_string())),
    }
}

/// Memoizes a result under the tipset's identity.
pub fn save_result(
    kv: &dyn Store,
    tipset: &Tipset,
    result: &InterpreterResult,
) -> Result<(), Error> {
    let bytes =
        serde_ipld_dagcbor::to_vec(result).map_err(|e| Error::Encoding(e.to_string()))?;
    kv.write(&result_key(tipset), &bytes)?;
    Ok(())
}

/// Wraps an interpreter with the result memo: probe before, persist after.
pub struct CachedInterpreter {
    inner: Rc<dyn Interpreter>,
    kv: Rc<dyn Store>,
}

impl CachedInterpreter {
    pub fn new(inner: Rc<dyn Interpreter>, kv: Rc<dyn Store>) -> Self {
        Self { inner, kv }
    }
}

impl Interpreter for CachedInterpreter {
    fn interpret(&self, ipld: &dyn Store, tipset: &Tipset) -> Result<InterpreterResult, Error> {
        if let Some(saved) = saved_result(&*self.kv, tipset)? {
            return Ok(saved);
        }
        let result = self.inner.interpret(ipld, tipset)?;
        save_result(&*self.kv, tipset, &result)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::header::tests::{dummy_cid, header_at};
    use crate::blocks::TipsetKey;
    use crate::db::MemoryDB;
    use std::cell::Cell;

    struct Counting {
        calls: Cell<usize>,
    }

    impl Interpreter for Counting {
        fn interpret(&self, _: &dyn Store, _: &Tipset) -> Result<InterpreterResult, Error> {
            self.calls.set(self.calls.get() + 1);
            Ok(InterpreterResult {
                state_root: dummy_cid(1),
                message_receipts: dummy_cid(2),
            })
        }
    }

    #[test]
    fn cached_interpreter_memoizes() {
        let kv = Rc::new(MemoryDB::default());
        let inner = Rc::new(Counting {
            calls: Cell::new(0),
        });
        let cached = CachedInterpreter::new(inner.clone(), kv.clone());
        let ts = Tipset::new(vec![header_at(1, &TipsetKey::default(), 1, 1)]).unwrap();
        let ipld = MemoryDB::default();

        assert!(saved_result(&*kv, &ts).unwrap().is_none());
        let first = cached.interpret(&ipld, &ts).unwrap();
        let second = cached.interpret(&ipld, &ts).unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.get(), 1);
        assert_eq!(saved_result(&*kv, &ts).unwrap(), Some(first));
    }
}
