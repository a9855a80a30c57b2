// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;
use std::path::Path;

use cid::Cid;
use num_bigint::BigInt;
use num_enum::TryFromPrimitive;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use super::graph::{self, BranchId, BranchInfo, Graph, Height, NO_BRANCH};
use crate::blocks::TipsetHash;

/// Per-entity synchronization progress. Stored as an integer column;
/// transitions are monotonic, except `Bad` which is terminal.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default, TryFromPrimitive,
)]
#[repr(i64)]
pub enum SyncState {
    #[default]
    Unknown = 0,
    Unsynced = 1,
    HeaderSynced = 2,
    BlockSynced = 3,
    Interpreted = 4,
    Bad = 5,
}

impl SyncState {
    /// Whether a stored state may be replaced by `next`.
    pub fn can_advance_to(self, next: SyncState) -> bool {
        if self == SyncState::Bad {
            return false;
        }
        next == SyncState::Bad || next > self
    }
}

/// Role of a `blocks` row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(i64)]
pub enum BlockKind {
    Header = 0,
    SecpMessage = 1,
    BlsMessage = 2,
}

/// Indexed facts about a stored tipset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TipsetInfo {
    pub hash: TipsetHash,
    pub sync_state: SyncState,
    pub branch: BranchId,
    pub weight: BigInt,
    pub height: Height,
    /// Parent link, when one was recorded.
    pub parent_hash: Option<TipsetHash>,
    /// Branch of the parent tipset, `NO_BRANCH` when the parent is unknown.
    pub parent_branch: BranchId,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("indexdb: cannot open db: {0}")]
    CannotCreate(String),
    #[error("indexdb: tipset not found")]
    TipsetNotFound,
    #[error("indexdb: invalid argument: {0}")]
    InvalidArgument(String),
    #[error("indexdb: query execute error: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("indexdb: decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Graph(#[from] graph::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tipsets (
    hash BLOB PRIMARY KEY,
    sync_state INTEGER NOT NULL,
    branch INTEGER NOT NULL,
    weight TEXT NOT NULL,
    height INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS tipsets_branch_height ON tipsets (branch, height);
CREATE TABLE IF NOT EXISTS blocks (
    cid BLOB PRIMARY KEY,
    msg_cid BLOB,
    type INTEGER NOT NULL,
    sync_state INTEGER NOT NULL,
    ref_count INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS tipset_blocks (
    tipset_hash BLOB NOT NULL,
    cid BLOB NOT NULL,
    seq INTEGER NOT NULL,
    PRIMARY KEY (tipset_hash, seq)
);
CREATE INDEX IF NOT EXISTS tipset_blocks_cid ON tipset_blocks (cid);
CREATE TABLE IF NOT EXISTS links (
    left BLOB NOT NULL,
    right BLOB NOT NULL,
    PRIMARY KEY (left, right)
);
CREATE INDEX IF NOT EXISTS links_right ON links (right);
";

/// RAII transaction over the index connection. Rolls back on drop unless
/// committed. Every structural mutation of the index runs inside one of
/// these, opened by the caller; the index itself never auto-commits.
pub struct Tx<'a> {
    conn: &'a Connection,
    done: bool,
}

impl<'a> Tx<'a> {
    fn new(conn: &'a Connection) -> Result<Self, Error> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self { conn, done: false })
    }

    pub fn commit(mut self) -> Result<(), Error> {
        self.conn.execute_batch("COMMIT")?;
        self.done = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), Error> {
        self.conn.execute_batch("ROLLBACK")?;
        self.done = true;
        Ok(())
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// Durable, transactional store of the branch skeleton and per-entity sync
/// state. Owns the in-memory [`Graph`], rebuilt from rows at open.
pub struct IndexDb {
    conn: Connection,
    graph: Graph,
    // Cell so fresh ids can be handed out while a transaction guard borrows
    // the connection.
    branch_counter: std::cell::Cell<BranchId>,
}

impl IndexDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(|e| Error::CannotCreate(e.to_string()))?;
        Self::setup(conn)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(|e| Error::CannotCreate(e.to_string()))?;
        Self::setup(conn)
    }

    fn setup(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::CannotCreate(e.to_string()))?;
        let mut db = Self {
            conn,
            graph: Graph::default(),
            branch_counter: std::cell::Cell::new(NO_BRANCH),
        };
        db.load_graph()?;
        Ok(db)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Allocates a branch id never used before.
    pub fn new_branch_id(&self) -> BranchId {
        self.branch_counter.set(self.branch_counter.get() + 1);
        self.branch_counter.get()
    }

    pub fn transaction(&self) -> Result<Tx<'_>, Error> {
        Tx::new(&self.conn)
    }

    /// Rebuilds the in-memory graph from the tipset rows. Branch extents come
    /// from per-branch MIN/MAX heights; parentage is resolved through the
    /// links of each branch's bottom tipset.
    pub fn load_graph(&mut self) -> Result<(), Error> {
        let mut branches: BTreeMap<BranchId, BranchInfo> = BTreeMap::new();

        {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT branch, MIN(height), hash FROM tipsets GROUP BY branch")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)? as BranchId,
                    row.get::<_, i64>(1)? as Height,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?;
            for row in rows {
                let (branch, height, hash) = row?;
                let info = branches.entry(branch).or_default();
                info.id = branch;
                info.bottom = decode_hash(&hash)?;
                info.bottom_height = height;
            }
        }

        if branches.is_empty() {
            // new db here
            self.graph.clear();
            self.branch_counter.set(NO_BRANCH);
            return Ok(());
        }

        {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT branch, MAX(height), hash FROM tipsets GROUP BY branch")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)? as BranchId,
                    row.get::<_, i64>(1)? as Height,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?;
            for row in rows {
                let (branch, height, hash) = row?;
                let info = branches.get_mut(&branch).ok_or_else(|| {
                    Error::Decode("branch extent query disagreement".to_string())
                })?;
                info.top = decode_hash(&hash)?;
                info.top_height = height;
            }
        }

        for info in branches.values_mut() {
            info.parent = match self.stored_parent_of(&info.bottom)? {
                Some((_, parent_branch)) => parent_branch,
                None => NO_BRANCH,
            };
        }

        self.graph.load(branches)?;
        self.branch_counter.set(self.graph.last_branch_id());
        Ok(())
    }

    pub fn tipset_exists(&self, hash: &TipsetHash) -> Result<bool, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM tipsets WHERE hash = ?1")?;
        Ok(stmt.exists(params![hash.as_bytes()])?)
    }

    pub fn get_tipset_info(&self, hash: &TipsetHash) -> Result<TipsetInfo, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT sync_state, branch, weight, height FROM tipsets WHERE hash = ?1",
        )?;
        let row = stmt
            .query_row(params![hash.as_bytes()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)? as BranchId,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)? as Height,
                ))
            })
            .optional()?
            .ok_or(Error::TipsetNotFound)?;

        let (state, branch, weight, height) = row;
        let parent = self.stored_parent_of(hash)?;
        Ok(TipsetInfo {
            hash: *hash,
            sync_state: decode_state(state)?,
            branch,
            weight: decode_weight(&weight)?,
            height,
            parent_hash: self.parent_of(hash)?,
            parent_branch: parent.map(|(_, b)| b).unwrap_or(NO_BRANCH),
        })
    }

    /// Parent hash recorded in links, whether or not the parent row exists.
    pub fn parent_of(&self, hash: &TipsetHash) -> Result<Option<TipsetHash>, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT left FROM links WHERE right = ?1")?;
        let parent = stmt
            .query_row(params![hash.as_bytes()], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        parent.map(|h| decode_hash(&h)).transpose()
    }

    /// Parent hash and branch, only when the parent tipset row is stored.
    fn stored_parent_of(
        &self,
        hash: &TipsetHash,
    ) -> Result<Option<(TipsetHash, BranchId)>, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.hash, t.branch FROM links l JOIN tipsets t ON t.hash = l.left \
             WHERE l.right = ?1",
        )?;
        let row = stmt
            .query_row(params![hash.as_bytes()], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)? as BranchId))
            })
            .optional()?;
        row.map(|(h, b)| Ok((decode_hash(&h)?, b))).transpose()
    }

    /// Stored tipsets whose recorded parent is `hash`.
    pub fn successors_of(&self, hash: &TipsetHash) -> Result<Vec<TipsetHash>, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.hash FROM links l JOIN tipsets t ON t.hash = l.right WHERE l.left = ?1",
        )?;
        let rows = stmt.query_map(params![hash.as_bytes()], |row| row.get::<_, Vec<u8>>(0))?;
        rows.map(|r| decode_hash(&r?)).collect()
    }

    /// Member block CIDs in canonical order.
    pub fn get_tipset_cids(&self, hash: &TipsetHash) -> Result<Vec<Cid>, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT cid FROM tipset_blocks WHERE tipset_hash = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![hash.as_bytes()], |row| row.get::<_, Vec<u8>>(0))?;
        let cids: Vec<Cid> = rows
            .map(|r| {
                let bytes = r?;
                Cid::try_from(bytes.as_slice()).map_err(|e| Error::Decode(e.to_string()))
            })
            .collect::<Result<_, _>>()?;
        if cids.is_empty() {
            return Err(Error::TipsetNotFound);
        }
        Ok(cids)
    }

    /// Lowest tipset of a branch strictly above `height`. Heights may be
    /// sparse (null rounds), so this is not simply `height + 1`.
    pub fn next_in_branch(
        &self,
        branch: BranchId,
        height: Height,
    ) -> Result<(TipsetHash, Height), Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT hash, height FROM tipsets \
             WHERE branch = ?1 AND height > ?2 ORDER BY height LIMIT 1",
        )?;
        let row = stmt
            .query_row(params![branch as i64, height as i64], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)? as Height))
            })
            .optional()?
            .ok_or(Error::TipsetNotFound)?;
        Ok((decode_hash(&row.0)?, row.1))
    }

    pub fn get_tipset_at(&self, branch: BranchId, height: Height) -> Result<TipsetHash, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT hash FROM tipsets WHERE branch = ?1 AND height = ?2")?;
        let hash = stmt
            .query_row(params![branch as i64, height as i64], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?
            .ok_or(Error::TipsetNotFound)?;
        decode_hash(&hash)
    }

    /// Tipsets of a branch within `[from, to]`, ascending by height.
    pub fn tipsets_in_range(
        &self,
        branch: BranchId,
        from: Height,
        to: Height,
    ) -> Result<Vec<(TipsetHash, Height)>, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT hash, height FROM tipsets \
             WHERE branch = ?1 AND height BETWEEN ?2 AND ?3 ORDER BY height",
        )?;
        let rows = stmt.query_map(params![branch as i64, from as i64, to as i64], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)? as Height))
        })?;
        rows.map(|r| {
            let (hash, height) = r?;
            Ok((decode_hash(&hash)?, height))
        })
        .collect()
    }

    pub fn insert_tipset(
        &self,
        hash: &TipsetHash,
        state: SyncState,
        branch: BranchId,
        weight: &BigInt,
        height: Height,
    ) -> Result<(), Error> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO tipsets VALUES (?1, ?2, ?3, ?4, ?5)")?;
        let rows = stmt.execute(params![
            hash.as_bytes(),
            state as i64,
            branch as i64,
            weight.to_str_radix(10),
            height as i64,
        ])?;
        if rows != 1 {
            return Err(Error::InvalidArgument("tipset insert affected no row".into()));
        }
        Ok(())
    }

    /// Inserts a block row, bumping the reference count when it already
    /// exists (the same block may belong to several tipsets).
    pub fn insert_block(
        &self,
        cid: &Cid,
        msg_cid: Option<&Cid>,
        kind: BlockKind,
        state: SyncState,
    ) -> Result<(), Error> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO blocks VALUES (?1, ?2, ?3, ?4, 1) \
             ON CONFLICT(cid) DO UPDATE SET ref_count = ref_count + 1",
        )?;
        stmt.execute(params![
            cid.to_bytes(),
            msg_cid.map(|c| c.to_bytes()),
            kind as i64,
            state as i64,
        ])?;
        Ok(())
    }

    pub fn insert_tipset_block(
        &self,
        hash: &TipsetHash,
        cid: &Cid,
        seq: usize,
    ) -> Result<(), Error> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO tipset_blocks VALUES (?1, ?2, ?3)")?;
        stmt.execute(params![hash.as_bytes(), cid.to_bytes(), seq as i64])?;
        Ok(())
    }

    pub fn insert_link(&self, left: &TipsetHash, right: &TipsetHash) -> Result<(), Error> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT OR IGNORE INTO links VALUES (?1, ?2)")?;
        stmt.execute(params![left.as_bytes(), right.as_bytes()])?;
        Ok(())
    }

    pub fn get_tipset_sync_state(&self, hash: &TipsetHash) -> Result<SyncState, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT sync_state FROM tipsets WHERE hash = ?1")?;
        let state = stmt
            .query_row(params![hash.as_bytes()], |row| row.get::<_, i64>(0))
            .optional()?;
        match state {
            Some(s) => decode_state(s),
            None => Ok(SyncState::Unknown),
        }
    }

    /// Raises a tipset's sync state; downgrades are ignored, `Bad` is final.
    pub fn set_tipset_sync_state(
        &self,
        hash: &TipsetHash,
        state: SyncState,
    ) -> Result<SyncState, Error> {
        let current = self.get_tipset_sync_state(hash)?;
        if !current.can_advance_to(state) {
            return Ok(current);
        }
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE tipsets SET sync_state = ?2 WHERE hash = ?1")?;
        stmt.execute(params![hash.as_bytes(), state as i64])?;
        Ok(state)
    }

    /// Recomputes a tipset's sync state as the minimum over its member
    /// blocks and stores the (monotonic) result.
    pub fn update_tipset_sync_state(&self, hash: &TipsetHash) -> Result<SyncState, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT MIN(b.sync_state) FROM blocks b \
             JOIN tipset_blocks tb ON tb.cid = b.cid WHERE tb.tipset_hash = ?1",
        )?;
        let min = stmt
            .query_row(params![hash.as_bytes()], |row| row.get::<_, Option<i64>>(0))?;
        match min {
            Some(s) => self.set_tipset_sync_state(hash, decode_state(s)?),
            None => Ok(SyncState::Unknown),
        }
    }

    pub fn get_block_sync_state(&self, cid: &Cid) -> Result<SyncState, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT sync_state FROM blocks WHERE cid = ?1")?;
        let state = stmt
            .query_row(params![cid.to_bytes()], |row| row.get::<_, i64>(0))
            .optional()?;
        match state {
            Some(s) => decode_state(s),
            None => Ok(SyncState::Unknown),
        }
    }

    pub fn update_block_sync_state(&self, cid: &Cid, state: SyncState) -> Result<(), Error> {
        let current = self.get_block_sync_state(cid)?;
        if !current.can_advance_to(state) {
            return Ok(());
        }
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE blocks SET sync_state = ?2 WHERE cid = ?1")?;
        stmt.execute(params![cid.to_bytes(), state as i64])?;
        Ok(())
    }

    /// Root branch id of the subchain containing `branch`, together with the
    /// minimum sync state over all branches walked on the way up.
    pub fn get_branch_sync_state(&self, branch: BranchId) -> Result<(BranchId, SyncState), Error> {
        let mut min_state = SyncState::Bad;
        let mut curr = branch;
        loop {
            let info = self.graph.get(curr)?;
            let state = self.branch_min_sync_state(curr)?;
            min_state = min_state.min(state);
            if info.parent == NO_BRANCH {
                return Ok((curr, min_state));
            }
            curr = info.parent;
        }
    }

    fn branch_min_sync_state(&self, branch: BranchId) -> Result<SyncState, Error> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT MIN(sync_state) FROM tipsets WHERE branch = ?1")?;
        let min = stmt.query_row(params![branch as i64], |row| row.get::<_, Option<i64>>(0))?;
        match min {
            Some(s) => decode_state(s),
            None => Ok(SyncState::Unknown),
        }
    }

    /// Rewrites the rows of `branch` to belong to `parent` (the absorbing
    /// branch of a unique-successor merge). Row-level only: the caller
    /// performs the paired graph mutation after its transaction commits.
    pub fn merge_branch_to_head(&self, parent: BranchId, branch: BranchId) -> Result<(), Error> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE tipsets SET branch = ?1 WHERE branch = ?2")?;
        let rows = stmt.execute(params![parent as i64, branch as i64])?;
        if rows == 0 {
            return Err(Error::InvalidArgument(format!(
                "merge of empty branch {branch}"
            )));
        }
        Ok(())
    }

    /// Re-labels the rows of `branch` above `new_head_height` with
    /// `child_branch_id`. Row-level only, like `merge_branch_to_head`.
    pub fn split_branch(
        &self,
        branch: BranchId,
        new_head_height: Height,
        child_branch_id: BranchId,
    ) -> Result<(), Error> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE tipsets SET branch = ?1 WHERE branch = ?2 AND height > ?3",
        )?;
        let rows = stmt.execute(params![
            child_branch_id as i64,
            branch as i64,
            new_head_height as i64,
        ])?;
        if rows == 0 {
            return Err(Error::InvalidArgument(format!(
                "split of branch {branch} above {new_head_height} moved no rows"
            )));
        }
        Ok(())
    }

    pub fn get_roots(&self) -> Vec<BranchInfo> {
        self.graph.roots().into_iter().cloned().collect()
    }

    pub fn get_heads(&self) -> Vec<BranchInfo> {
        self.graph.heads().into_iter().cloned().collect()
    }
}

fn decode_hash(bytes: &[u8]) -> Result<TipsetHash, Error> {
    TipsetHash::from_bytes(bytes).map_err(|e| Error::Decode(e.to_string()))
}

fn decode_state(raw: i64) -> Result<SyncState, Error> {
    SyncState::try_from(raw).map_err(|_| Error::Decode(format!("bad sync state {raw}")))
}

fn decode_weight(raw: &str) -> Result<BigInt, Error> {
    BigInt::parse_bytes(raw.as_bytes(), 10)
        .ok_or_else(|| Error::Decode(format!("bad weight {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::header::tests::dummy_cid;
    use crate::blocks::tipset::tipset_hash;

    fn hash(n: u64) -> TipsetHash {
        tipset_hash(&[dummy_cid(n)])
    }

    fn insert_chain(db: &IndexDb, branch: BranchId, heights: &[Height]) {
        let tx = db.transaction().unwrap();
        for (i, &h) in heights.iter().enumerate() {
            db.insert_tipset(
                &hash(branch * 1000 + h),
                SyncState::HeaderSynced,
                branch,
                &BigInt::from(h),
                h,
            )
            .unwrap();
            if i > 0 {
                db.insert_link(&hash(branch * 1000 + heights[i - 1]), &hash(branch * 1000 + h))
                    .unwrap();
            }
        }
        tx.commit().unwrap();
    }

    #[test]
    fn tipset_row_round_trip() {
        let db = IndexDb::open_in_memory().unwrap();
        let tx = db.transaction().unwrap();
        let h = hash(1);
        db.insert_tipset(&h, SyncState::Unsynced, 1, &BigInt::from(42u32), 7)
            .unwrap();
        let c = dummy_cid(10);
        db.insert_block(&c, None, BlockKind::Header, SyncState::HeaderSynced)
            .unwrap();
        db.insert_tipset_block(&h, &c, 0).unwrap();
        tx.commit().unwrap();

        assert!(db.tipset_exists(&h).unwrap());
        let info = db.get_tipset_info(&h).unwrap();
        assert_eq!(info.height, 7);
        assert_eq!(info.weight, BigInt::from(42u32));
        assert_eq!(info.sync_state, SyncState::Unsynced);
        assert_eq!(db.get_tipset_cids(&h).unwrap(), vec![c]);
        assert_eq!(db.get_tipset_at(1, 7).unwrap(), h);
    }

    #[test]
    fn transaction_rolls_back_on_drop() {
        let db = IndexDb::open_in_memory().unwrap();
        {
            let _tx = db.transaction().unwrap();
            db.insert_tipset(&hash(1), SyncState::Unsynced, 1, &BigInt::from(1u32), 1)
                .unwrap();
        }
        assert!(!db.tipset_exists(&hash(1)).unwrap());
    }

    #[test]
    fn sync_state_is_monotonic() {
        let db = IndexDb::open_in_memory().unwrap();
        let tx = db.transaction().unwrap();
        let h = hash(2);
        db.insert_tipset(&h, SyncState::HeaderSynced, 1, &BigInt::from(1u32), 1)
            .unwrap();
        tx.commit().unwrap();

        let tx = db.transaction().unwrap();
        assert_eq!(
            db.set_tipset_sync_state(&h, SyncState::Unsynced).unwrap(),
            SyncState::HeaderSynced,
            "downgrades are ignored"
        );
        assert_eq!(
            db.set_tipset_sync_state(&h, SyncState::BlockSynced).unwrap(),
            SyncState::BlockSynced
        );
        assert_eq!(
            db.set_tipset_sync_state(&h, SyncState::Bad).unwrap(),
            SyncState::Bad
        );
        assert_eq!(
            db.set_tipset_sync_state(&h, SyncState::Interpreted).unwrap(),
            SyncState::Bad,
            "bad is terminal"
        );
        tx.commit().unwrap();
    }

    #[test]
    fn tipset_state_follows_member_blocks() {
        let db = IndexDb::open_in_memory().unwrap();
        let tx = db.transaction().unwrap();
        let h = hash(3);
        db.insert_tipset(&h, SyncState::Unsynced, 1, &BigInt::from(1u32), 1)
            .unwrap();
        let c1 = dummy_cid(31);
        let c2 = dummy_cid(32);
        db.insert_block(&c1, None, BlockKind::Header, SyncState::HeaderSynced)
            .unwrap();
        db.insert_block(&c2, None, BlockKind::Header, SyncState::BlockSynced)
            .unwrap();
        db.insert_tipset_block(&h, &c1, 0).unwrap();
        db.insert_tipset_block(&h, &c2, 1).unwrap();
        assert_eq!(
            db.update_tipset_sync_state(&h).unwrap(),
            SyncState::HeaderSynced
        );
        db.update_block_sync_state(&c1, SyncState::BlockSynced)
            .unwrap();
        assert_eq!(
            db.update_tipset_sync_state(&h).unwrap(),
            SyncState::BlockSynced
        );
        tx.commit().unwrap();
    }

    #[test]
    fn graph_reload_resolves_branch_parentage() {
        let mut db = IndexDb::open_in_memory().unwrap();
        insert_chain(&db, 1, &[0, 1, 2]);
        insert_chain(&db, 2, &[3, 4]);
        // link branch 2's bottom to branch 1's top
        let tx = db.transaction().unwrap();
        db.insert_link(&hash(1000 + 2), &hash(2000 + 3)).unwrap();
        tx.commit().unwrap();

        db.load_graph().unwrap();
        let g = db.graph();
        assert_eq!(g.get(1).unwrap().bottom_height, 0);
        assert_eq!(g.get(1).unwrap().top_height, 2);
        assert_eq!(g.get(2).unwrap().parent, 1);
        assert_eq!(g.heads().iter().map(|b| b.id).collect::<Vec<_>>(), [2]);
        assert_eq!((db.new_branch_id()), 3);
    }

    #[test]
    fn merge_and_split_rename_rows() {
        let mut db = IndexDb::open_in_memory().unwrap();
        insert_chain(&db, 1, &[0, 1, 2]);
        insert_chain(&db, 2, &[3, 4]);
        let tx = db.transaction().unwrap();
        db.insert_link(&hash(1000 + 2), &hash(2000 + 3)).unwrap();
        db.merge_branch_to_head(2, 1).unwrap();
        tx.commit().unwrap();
        db.load_graph().unwrap();
        assert_eq!(db.graph().get(2).unwrap().bottom_height, 0);
        assert!(db.graph().get(1).is_err());

        let tx = db.transaction().unwrap();
        db.split_branch(2, 2, 9).unwrap();
        tx.commit().unwrap();
        db.load_graph().unwrap();
        assert_eq!(db.graph().get(2).unwrap().top_height, 2);
        let upper = db.graph().get(9).unwrap();
        assert_eq!(upper.bottom_height, 3);
        assert_eq!(upper.parent, 2);
    }

    #[test]
    fn branch_sync_state_walks_to_root() {
        let mut db = IndexDb::open_in_memory().unwrap();
        insert_chain(&db, 1, &[0, 1]);
        insert_chain(&db, 2, &[2, 3]);
        let tx = db.transaction().unwrap();
        db.insert_link(&hash(1000 + 1), &hash(2000 + 2)).unwrap();
        db.set_tipset_sync_state(&hash(1000), SyncState::BlockSynced)
            .unwrap();
        tx.commit().unwrap();
        db.load_graph().unwrap();

        let (root, min) = db.get_branch_sync_state(2).unwrap();
        assert_eq!(root, 1);
        assert_eq!(min, SyncState::HeaderSynced);
    }
}
