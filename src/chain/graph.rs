// Copyright 2021-2026 Taiga Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{error, warn};

use crate::blocks::TipsetHash;

pub type BranchId = u64;
pub type Height = u64;

/// Sentinel for "no branch". Kept as a raw value rather than an `Option`
/// because it lives in hot height-indexed maps and database rows.
pub const NO_BRANCH: BranchId = 0;
/// Branch id assigned to the genesis tipset on first write.
pub const GENESIS_BRANCH: BranchId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("no current chain")]
    NoCurrentChain,
    #[error("branch not found")]
    BranchNotFound,
    #[error("branch is not a head")]
    BranchIsNotAHead,
    #[error("branch is not a root")]
    BranchIsNotARoot,
    #[error("branch link heights mismatch")]
    LinkHeightMismatch,
    #[error("cycle detected in branch graph")]
    CycleDetected,
    #[error("cannot load branch graph")]
    GraphLoadError,
}

/// A maximal contiguous run of tipsets with no internal forks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BranchInfo {
    pub id: BranchId,
    pub top: TipsetHash,
    pub top_height: Height,
    pub bottom: TipsetHash,
    pub bottom_height: Height,
    pub parent: BranchId,
    pub forks: BTreeSet<BranchId>,
}

/// Rename produced by a branch split: rows of `old_id` above `above_height`
/// now belong to `new_id`. The index database mirrors this in SQL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitBranch {
    pub old_id: BranchId,
    pub new_id: BranchId,
    pub above_height: Height,
}

/// Instructions for splitting a base branch while linking, supplied by the
/// caller because only the index knows the tipset just above the fork point.
#[derive(Clone, Copy, Debug)]
pub struct SplitPlan {
    pub child_id: BranchId,
    pub upper_bottom: TipsetHash,
    pub upper_bottom_height: Height,
}

/// Graph of chain branches: the in-memory skeleton of all known (possibly
/// forked) chains, rebuilt from the index database at startup. No I/O.
///
/// All mutators are total: they either fully apply or return an error and
/// leave the graph unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Graph {
    all_branches: BTreeMap<BranchId, BranchInfo>,
    roots: BTreeSet<BranchId>,
    heads: BTreeSet<BranchId>,
    /// Adopted path from a root to the current head, keyed by each branch's
    /// top height.
    current_chain: BTreeMap<Height, BranchId>,
    current_chain_bottom_height: Height,
}

impl Graph {
    pub fn is_empty(&self) -> bool {
        self.all_branches.is_empty()
    }

    pub fn roots(&self) -> Vec<&BranchInfo> {
        self.collect(&self.roots)
    }

    pub fn heads(&self) -> Vec<&BranchInfo> {
        self.collect(&self.heads)
    }

    pub fn last_branch_id(&self) -> BranchId {
        self.all_branches
            .keys()
            .next_back()
            .copied()
            .unwrap_or(NO_BRANCH)
    }

    pub fn get(&self, id: BranchId) -> Result<&BranchInfo, Error> {
        self.all_branches.get(&id).ok_or(Error::BranchNotFound)
    }

    /// Snapshot of the branch records with derived fields (forks) stripped,
    /// suitable for `load` round-trips and persistence checks.
    pub fn dump(&self) -> BTreeMap<BranchId, BranchInfo> {
        self.all_branches
            .iter()
            .map(|(id, b)| {
                let mut b = b.clone();
                b.forks.clear();
                (*id, b)
            })
            .collect()
    }

    /// Rebuilds all indices from a set of branch records. Forks are derived
    /// from parent pointers; any pre-filled forks sets in the input are
    /// ignored. Failure wipes all state.
    pub fn load(&mut self, mut all_branches: BTreeMap<BranchId, BranchInfo>) -> Result<(), Error> {
        self.clear();
        for b in all_branches.values_mut() {
            b.forks.clear();
        }

        let mut fork_edges: Vec<(BranchId, BranchId)> = Vec::new();
        let mut roots: BTreeSet<BranchId> = BTreeSet::new();

        for (&id, b) in &all_branches {
            if id != b.id || id == NO_BRANCH {
                error!("cannot load graph: inconsistent branch id {}", id);
                return Err(Error::GraphLoadError);
            }
            if b.top_height < b.bottom_height {
                error!(
                    "cannot load graph: heights inconsistent ({} and {}) for id {}",
                    b.top_height, b.bottom_height, b.id
                );
                return Err(Error::GraphLoadError);
            }
            if b.parent != NO_BRANCH {
                if b.parent == b.id {
                    error!(
                        "cannot load graph: parent and branch id are the same ({})",
                        b.id
                    );
                    return Err(Error::GraphLoadError);
                }
                let Some(parent) = all_branches.get(&b.parent) else {
                    error!(
                        "cannot load graph: parent {} not found for branch {}",
                        b.parent, b.id
                    );
                    return Err(Error::GraphLoadError);
                };
                if parent.top_height >= b.bottom_height {
                    error!(
                        "cannot load graph: parent height inconsistent ({} and {}) for id {} and parent {}",
                        b.bottom_height, parent.top_height, b.id, b.parent
                    );
                    return Err(Error::GraphLoadError);
                }
                fork_edges.push((b.parent, id));
            } else {
                roots.insert(id);
            }
        }

        for &(parent, child) in &fork_edges {
            all_branches
                .get_mut(&parent)
                .expect("validated above")
                .forks
                .insert(child);
        }

        // every branch must be reachable from a root, otherwise the records
        // contain a cycle (db inconsistency)
        let mut visited: BTreeSet<BranchId> = BTreeSet::new();
        let depth_guard = all_branches.len() + 1;
        for &root in &roots {
            let mut stack = vec![(root, 0usize)];
            while let Some((id, depth)) = stack.pop() {
                if depth >= depth_guard || !visited.insert(id) {
                    error!("cannot load graph: cycle detected");
                    return Err(Error::GraphLoadError);
                }
                for &fork in &all_branches[&id].forks {
                    stack.push((fork, depth + 1));
                }
            }
        }
        if visited.len() != all_branches.len() {
            error!("cannot load graph: unreachable branches");
            return Err(Error::GraphLoadError);
        }

        let mut heads: BTreeSet<BranchId> = BTreeSet::new();
        for b in all_branches.values() {
            if b.forks.is_empty() {
                heads.insert(b.id);
            } else if b.forks.len() == 1 {
                warn!(
                    "inconsistent # of forks (1) for branch {}, must be merged",
                    b.id
                );
            }
        }

        self.all_branches = all_branches;
        self.roots = roots;
        self.heads = heads;
        Ok(())
    }

    /// Finds the branch covering `height` on the current chain.
    pub fn find_by_height(&self, height: Height) -> Result<BranchId, Error> {
        if self.current_chain.is_empty() {
            return Err(Error::NoCurrentChain);
        }
        if height < self.current_chain_bottom_height {
            return Err(Error::BranchNotFound);
        }
        self.current_chain
            .range(height..)
            .next()
            .map(|(_, &id)| id)
            .ok_or(Error::BranchNotFound)
    }

    /// Adopts `head` as the current head and records the path from it to its
    /// root. Idempotent when `head` is already adopted.
    pub fn switch_to_head(&mut self, head: BranchId) -> Result<(), Error> {
        if self.adopted_head() == Some(head) {
            // we are already there, do nothing
            return Ok(());
        }

        if !self.heads.contains(&head) {
            error!("branch {} is not a head", head);
            return Err(Error::BranchIsNotAHead);
        }

        self.current_chain.clear();

        // a guard to catch a cycle if it appears in the graph: db inconsistency
        let mut cycle_guard = self.all_branches.len() + 1;
        let mut curr = head;
        loop {
            let b = self.all_branches.get(&curr).ok_or(Error::BranchNotFound)?;
            self.current_chain.insert(b.top_height, b.id);
            curr = b.parent;
            if curr == NO_BRANCH {
                break;
            }
            cycle_guard -= 1;
            if cycle_guard == 0 {
                self.current_chain.clear();
                error!("cycle detected");
                return Err(Error::CycleDetected);
            }
        }

        let (_, &bottom_branch) = self
            .current_chain
            .iter()
            .next()
            .expect("chain contains at least the head");
        self.current_chain_bottom_height = self.all_branches[&bottom_branch].bottom_height;

        Ok(())
    }

    /// Removes a head branch. If its parent is left with exactly one fork,
    /// the parent is absorbed into that surviving successor; the pair
    /// `(collapsed_parent_id, surviving_successor_id)` is returned so the
    /// index rows can be renamed, or `(0, 0)` when no merge occurred.
    pub fn remove_head(&mut self, head: BranchId) -> Result<(BranchId, BranchId), Error> {
        if !self.heads.contains(&head) {
            error!("branch {} is not a head", head);
            return Err(Error::BranchIsNotAHead);
        }

        let parent = self.all_branches[&head].parent;

        self.heads.remove(&head);
        self.roots.remove(&head);
        if self.adopted_head() == Some(head) {
            self.current_chain.clear();
        }
        self.all_branches.remove(&head);

        if parent == NO_BRANCH {
            return Ok((NO_BRANCH, NO_BRANCH));
        }

        let pb = self
            .all_branches
            .get_mut(&parent)
            .ok_or(Error::BranchNotFound)?;
        pb.forks.remove(&head);
        if pb.forks.is_empty() {
            // parent became a terminal branch itself
            self.heads.insert(parent);
            return Ok((NO_BRANCH, NO_BRANCH));
        }
        if pb.forks.len() != 1 {
            return Ok((NO_BRANCH, NO_BRANCH));
        }

        // merge the parent branch into its only remaining successor
        let collapsed = self
            .all_branches
            .remove(&parent)
            .expect("present just above");
        if self.current_chain.values().any(|&id| id == collapsed.id) {
            self.current_chain.clear();
        }
        self.merge(collapsed)
    }

    fn merge(&mut self, b: BranchInfo) -> Result<(BranchId, BranchId), Error> {
        let successor_id = *b.forks.iter().next().expect("exactly one fork");
        let successor = self
            .all_branches
            .get_mut(&successor_id)
            .ok_or(Error::BranchNotFound)?;
        successor.bottom = b.bottom;
        successor.bottom_height = b.bottom_height;
        successor.parent = b.parent;

        if b.parent != NO_BRANCH {
            let parent = self
                .all_branches
                .get_mut(&b.parent)
                .ok_or(Error::BranchNotFound)?;
            parent.forks.remove(&b.id);
            parent.forks.insert(successor_id);
        } else {
            self.roots.remove(&b.id);
            self.roots.insert(successor_id);
        }

        Ok((b.id, successor_id))
    }

    /// Concatenates a root branch on top of a head branch. The successor
    /// absorbs the base's extent and parent; the base is erased.
    pub fn link_to_head(&mut self, base: BranchId, successor: BranchId) -> Result<(), Error> {
        if !self.roots.contains(&successor) {
            return Err(Error::BranchIsNotARoot);
        }
        if !self.heads.contains(&base) {
            return Err(Error::BranchIsNotAHead);
        }

        let base_info = self.all_branches.get(&base).ok_or(Error::BranchNotFound)?;
        let (base_bottom, base_bottom_height, base_top_height, base_parent) = (
            base_info.bottom,
            base_info.bottom_height,
            base_info.top_height,
            base_info.parent,
        );

        let s = self
            .all_branches
            .get_mut(&successor)
            .ok_or(Error::BranchNotFound)?;
        if s.bottom_height <= base_top_height {
            return Err(Error::LinkHeightMismatch);
        }
        s.bottom = base_bottom;
        s.bottom_height = base_bottom_height;
        s.parent = base_parent;

        self.roots.remove(&successor);
        if base_parent != NO_BRANCH {
            let parent = self
                .all_branches
                .get_mut(&base_parent)
                .ok_or(Error::BranchNotFound)?;
            parent.forks.remove(&base);
            parent.forks.insert(successor);
        } else {
            self.roots.remove(&base);
            self.roots.insert(successor);
        }

        if self.adopted_head() == Some(base) {
            self.current_chain.clear();
        }

        self.heads.remove(&base);
        self.all_branches.remove(&base);

        Ok(())
    }

    /// Attaches a root branch as a fork of `base` at `parent_height`. If the
    /// fork point is below the base's top, the base is split according to
    /// `split` first (the upper half takes the new id) and the produced
    /// rename is returned for the index to mirror.
    pub fn link_branches(
        &mut self,
        base: BranchId,
        successor: BranchId,
        parent_tipset: TipsetHash,
        parent_height: Height,
        split: Option<SplitPlan>,
    ) -> Result<Option<SplitBranch>, Error> {
        if !self.roots.contains(&successor) {
            return Err(Error::BranchIsNotARoot);
        }
        let base_info = self.all_branches.get(&base).ok_or(Error::BranchNotFound)?;
        if parent_height < base_info.bottom_height || parent_height > base_info.top_height {
            return Err(Error::LinkHeightMismatch);
        }
        let s = self
            .all_branches
            .get(&successor)
            .ok_or(Error::BranchNotFound)?;
        if s.bottom_height <= parent_height {
            return Err(Error::LinkHeightMismatch);
        }

        let renamed = if parent_height == base_info.top_height {
            if base_info.top != parent_tipset {
                return Err(Error::LinkHeightMismatch);
            }
            None
        } else {
            let plan = split.ok_or(Error::LinkHeightMismatch)?;
            debug_assert!(
                plan.child_id != NO_BRANCH && !self.all_branches.contains_key(&plan.child_id)
            );
            self.split(base, parent_tipset, parent_height, &plan)?;
            Some(SplitBranch {
                old_id: base,
                new_id: plan.child_id,
                above_height: parent_height,
            })
        };

        // the fork point is now the top of `base`
        self.all_branches
            .get_mut(&successor)
            .expect("checked above")
            .parent = base;
        let base_info = self.all_branches.get_mut(&base).expect("checked above");
        base_info.forks.insert(successor);
        self.roots.remove(&successor);
        self.heads.remove(&base);

        Ok(renamed)
    }

    fn split(
        &mut self,
        base: BranchId,
        at_hash: TipsetHash,
        at_height: Height,
        plan: &SplitPlan,
    ) -> Result<(), Error> {
        let base_info = self
            .all_branches
            .get_mut(&base)
            .ok_or(Error::BranchNotFound)?;

        let upper = BranchInfo {
            id: plan.child_id,
            top: base_info.top,
            top_height: base_info.top_height,
            bottom: plan.upper_bottom,
            bottom_height: plan.upper_bottom_height,
            parent: base,
            forks: std::mem::take(&mut base_info.forks),
        };

        base_info.top = at_hash;
        base_info.top_height = at_height;
        base_info.forks.insert(plan.child_id);

        // forks above the cut now hang off the upper half
        let reparented: Vec<BranchId> = upper.forks.iter().copied().collect();
        self.all_branches.insert(plan.child_id, upper);
        for fork in reparented {
            self.all_branches
                .get_mut(&fork)
                .ok_or(Error::BranchNotFound)?
                .parent = plan.child_id;
        }

        if self.heads.remove(&base) {
            self.heads.insert(plan.child_id);
        }
        if self.current_chain.values().any(|&id| id == base) {
            self.current_chain.clear();
        }

        Ok(())
    }

    /// Extends a head's top by one tipset.
    pub fn append_to_head(
        &mut self,
        branch: BranchId,
        new_top: TipsetHash,
        new_top_height: Height,
    ) -> Result<(), Error> {
        let b = self
            .all_branches
            .get_mut(&branch)
            .ok_or(Error::BranchNotFound)?;
        if !b.forks.is_empty() {
            return Err(Error::BranchIsNotAHead);
        }
        if new_top_height <= b.top_height {
            return Err(Error::LinkHeightMismatch);
        }
        let old_top_height = b.top_height;
        b.top = new_top;
        b.top_height = new_top_height;

        if self.current_chain.get(&old_top_height) == Some(&branch) {
            self.current_chain.remove(&old_top_height);
            self.current_chain.insert(new_top_height, branch);
        }
        Ok(())
    }

    /// Extends a root branch downward while its parents are being synced.
    pub fn update_bottom(
        &mut self,
        branch: BranchId,
        new_bottom: TipsetHash,
        new_bottom_height: Height,
    ) -> Result<(), Error> {
        if !self.roots.contains(&branch) {
            return Err(Error::BranchIsNotARoot);
        }
        let b = self
            .all_branches
            .get_mut(&branch)
            .ok_or(Error::BranchNotFound)?;
        if new_bottom_height >= b.bottom_height {
            return Err(Error::LinkHeightMismatch);
        }
        b.bottom = new_bottom;
        b.bottom_height = new_bottom_height;

        if self.current_chain.values().next() == Some(&branch) {
            self.current_chain_bottom_height = new_bottom_height;
        }
        Ok(())
    }

    /// Registers a freshly created branch containing a single tipset run.
    pub fn new_branch(&mut self, info: BranchInfo) -> Result<(), Error> {
        if info.id == NO_BRANCH || self.all_branches.contains_key(&info.id) {
            return Err(Error::GraphLoadError);
        }
        if info.top_height < info.bottom_height || !info.forks.is_empty() {
            return Err(Error::GraphLoadError);
        }
        if info.parent != NO_BRANCH {
            let parent = self
                .all_branches
                .get_mut(&info.parent)
                .ok_or(Error::BranchNotFound)?;
            if parent.top_height >= info.bottom_height {
                return Err(Error::LinkHeightMismatch);
            }
            parent.forks.insert(info.id);
            self.heads.remove(&info.parent);
        } else {
            self.roots.insert(info.id);
        }
        self.heads.insert(info.id);
        self.all_branches.insert(info.id, info);
        Ok(())
    }

    /// Walks parent pointers to the root branch of `branch`.
    pub fn root_of(&self, branch: BranchId) -> Result<&BranchInfo, Error> {
        let mut cycle_guard = self.all_branches.len() + 1;
        let mut curr = branch;
        loop {
            let b = self.all_branches.get(&curr).ok_or(Error::BranchNotFound)?;
            if b.parent == NO_BRANCH {
                return Ok(b);
            }
            curr = b.parent;
            cycle_guard -= 1;
            if cycle_guard == 0 {
                error!("cycle detected");
                return Err(Error::CycleDetected);
            }
        }
    }

    /// Branch at the top of the adopted chain, if one is adopted.
    pub fn adopted_head(&self) -> Option<BranchId> {
        self.current_chain.values().next_back().copied()
    }

    pub fn clear(&mut self) {
        self.all_branches.clear();
        self.roots.clear();
        self.heads.clear();
        self.current_chain.clear();
        self.current_chain_bottom_height = 0;
    }

    fn collect(&self, ids: &BTreeSet<BranchId>) -> Vec<&BranchInfo> {
        ids.iter()
            .map(|id| &self.all_branches[id])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::tipset::tipset_hash;
    use crate::blocks::header::tests::dummy_cid;

    fn hash(n: u64) -> TipsetHash {
        tipset_hash(&[dummy_cid(n)])
    }

    fn branch(id: BranchId, bottom: Height, top: Height, parent: BranchId) -> BranchInfo {
        BranchInfo {
            id,
            top: hash(id * 1000 + top),
            top_height: top,
            bottom: hash(id * 1000 + bottom),
            bottom_height: bottom,
            parent,
            forks: BTreeSet::new(),
        }
    }

    fn graph_of(branches: Vec<BranchInfo>) -> Graph {
        let mut g = Graph::default();
        g.load(branches.into_iter().map(|b| (b.id, b)).collect())
            .unwrap();
        g
    }

    #[test]
    fn load_rejects_zero_id() {
        let mut g = Graph::default();
        let mut b = branch(1, 0, 5, 0);
        b.id = 0;
        let err = g.load([(0, b)].into()).unwrap_err();
        assert_eq!(err, Error::GraphLoadError);
        assert!(g.is_empty());
    }

    #[test]
    fn load_rejects_height_inversion() {
        let mut g = Graph::default();
        let mut b = branch(1, 0, 5, 0);
        b.bottom_height = 6;
        assert_eq!(g.load([(1, b)].into()).unwrap_err(), Error::GraphLoadError);
    }

    #[test]
    fn load_rejects_missing_parent_and_overlap() {
        let mut g = Graph::default();
        assert_eq!(
            g.load([(2, branch(2, 3, 5, 7))].into()).unwrap_err(),
            Error::GraphLoadError
        );
        // parent top overlapping child bottom
        let b1 = branch(1, 0, 5, 0);
        let b2 = branch(2, 5, 9, 1);
        assert_eq!(
            g.load([(1, b1), (2, b2)].into()).unwrap_err(),
            Error::GraphLoadError
        );
    }

    #[test]
    fn load_populates_roots_heads_and_forks() {
        let g = graph_of(vec![
            branch(1, 0, 10, 0),
            branch(2, 11, 20, 1),
            branch(3, 11, 15, 1),
        ]);
        assert_eq!(g.roots().iter().map(|b| b.id).collect::<Vec<_>>(), [1]);
        assert_eq!(
            g.heads().iter().map(|b| b.id).collect::<Vec<_>>(),
            [2, 3]
        );
        assert_eq!(
            g.get(1).unwrap().forks.iter().copied().collect::<Vec<_>>(),
            [2, 3]
        );
    }

    #[test]
    fn dump_load_round_trip() {
        let g = graph_of(vec![
            branch(1, 0, 10, 0),
            branch(2, 11, 20, 1),
            branch(3, 11, 15, 1),
            branch(4, 21, 30, 2),
        ]);
        let mut g2 = Graph::default();
        g2.load(g.dump()).unwrap();
        assert_eq!(g2, g);
    }

    #[test]
    fn randomized_forest_round_trip() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(7);
        for round in 0..20 {
            let mut branches = vec![branch(1, 0, rng.gen_range(0..5), 0)];
            let count = rng.gen_range(3..12);
            for id in 2..count {
                let parent = branches[rng.gen_range(0..branches.len())].clone();
                let bottom = parent.top_height + 1 + rng.gen_range(0..3);
                let top = bottom + rng.gen_range(0..4);
                branches.push(branch(id, bottom, top, parent.id));
            }
            let g = graph_of(branches);
            let mut reloaded = Graph::default();
            reloaded.load(g.dump()).unwrap();
            assert_eq!(reloaded, g, "round {round}");
        }
    }

    #[test]
    fn switch_to_head_builds_current_chain() {
        let mut g = graph_of(vec![
            branch(1, 0, 10, 0),
            branch(2, 11, 20, 1),
            branch(3, 21, 30, 2),
            branch(4, 11, 12, 1),
        ]);
        g.switch_to_head(3).unwrap();
        assert_eq!(g.find_by_height(5).unwrap(), 1);
        assert_eq!(g.find_by_height(11).unwrap(), 2);
        assert_eq!(g.find_by_height(20).unwrap(), 2);
        assert_eq!(g.find_by_height(30).unwrap(), 3);
        assert_eq!(g.find_by_height(31).unwrap_err(), Error::BranchNotFound);

        // idempotent re-switch
        let snapshot = g.clone();
        g.switch_to_head(3).unwrap();
        assert_eq!(g, snapshot);

        assert_eq!(g.switch_to_head(2).unwrap_err(), Error::BranchIsNotAHead);
    }

    #[test]
    fn find_by_height_without_chain() {
        let g = graph_of(vec![branch(1, 0, 10, 0)]);
        assert_eq!(g.find_by_height(5).unwrap_err(), Error::NoCurrentChain);
    }

    #[test]
    fn remove_head_without_merge() {
        let mut g = graph_of(vec![
            branch(1, 0, 10, 0),
            branch(2, 11, 20, 1),
            branch(3, 11, 15, 1),
            branch(4, 11, 12, 1),
        ]);
        assert_eq!(g.remove_head(4).unwrap(), (NO_BRANCH, NO_BRANCH));
        assert!(g.get(4).is_err());
        assert_eq!(g.get(1).unwrap().forks.len(), 2);
    }

    #[test]
    fn remove_head_collapses_single_fork_parent() {
        // B1(10..20) root, B2(21..24) above it, forked at 24 into B4(25..27)
        // and B5(25..30), with head B3(31..40) on top of B5. Removing B3
        // turns B5 into a head; removing B5 leaves B2 with the single fork
        // B4, so B2 is absorbed into B4: result (B2, B4), B4 keeps its id,
        // adopts B2's bottom (21) and B2's parent (B1).
        let mut g = graph_of(vec![
            branch(1, 10, 20, 0),
            branch(2, 21, 24, 1),
            branch(4, 25, 27, 2),
            branch(5, 25, 30, 2),
            branch(3, 31, 40, 5),
        ]);

        assert_eq!(g.remove_head(3).unwrap(), (NO_BRANCH, NO_BRANCH));
        assert!(g.heads.contains(&5));
        let (collapsed, survivor) = g.remove_head(5).unwrap();
        assert_eq!((collapsed, survivor), (2, 4));
        let b4 = g.get(4).unwrap();
        assert_eq!(b4.bottom_height, 21);
        assert_eq!(b4.parent, 1);
        assert_eq!(
            g.get(1).unwrap().forks.iter().copied().collect::<Vec<_>>(),
            [4]
        );
        assert!(g.get(2).is_err());
    }

    #[test]
    fn link_to_head_absorbs_base() {
        let mut g = graph_of(vec![branch(1, 0, 10, 0), branch(2, 15, 20, 0)]);
        g.link_to_head(1, 2).unwrap();
        let b2 = g.get(2).unwrap();
        assert_eq!(b2.bottom_height, 0);
        assert_eq!(b2.parent, NO_BRANCH);
        assert!(g.get(1).is_err(), "base must be erased");
        assert_eq!(g.roots().iter().map(|b| b.id).collect::<Vec<_>>(), [2]);
        assert_eq!(g.heads().iter().map(|b| b.id).collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn link_to_head_rejects_overlap() {
        let mut g = graph_of(vec![branch(1, 0, 10, 0), branch(2, 10, 20, 0)]);
        assert_eq!(g.link_to_head(1, 2).unwrap_err(), Error::LinkHeightMismatch);
    }

    #[test]
    fn link_branches_attaches_at_top() {
        let mut g = graph_of(vec![branch(1, 0, 10, 0), branch(2, 15, 20, 0)]);
        let top = g.get(1).unwrap().top;
        let renamed = g.link_branches(1, 2, top, 10, None).unwrap();
        assert!(renamed.is_none());
        assert_eq!(g.get(2).unwrap().parent, 1);
        assert!(!g.heads.contains(&1));
        assert!(!g.roots.contains(&2));
    }

    #[test]
    fn link_branches_splits_mid_branch() {
        let mut g = graph_of(vec![branch(1, 0, 10, 0), branch(2, 8, 20, 0)]);
        let cut_hash = hash(42);
        let upper_bottom = hash(43);
        let renamed = g
            .link_branches(
                1,
                2,
                cut_hash,
                5,
                Some(SplitPlan {
                    child_id: 7,
                    upper_bottom,
                    upper_bottom_height: 6,
                }),
            )
            .unwrap();
        assert_eq!(
            renamed,
            Some(SplitBranch {
                old_id: 1,
                new_id: 7,
                above_height: 5
            })
        );
        let lower = g.get(1).unwrap();
        assert_eq!(lower.top_height, 5);
        assert_eq!(lower.top, cut_hash);
        assert_eq!(
            lower.forks.iter().copied().collect::<Vec<_>>(),
            [2, 7]
        );
        let upper = g.get(7).unwrap();
        assert_eq!(upper.bottom_height, 6);
        assert_eq!(upper.top_height, 10);
        assert_eq!(upper.parent, 1);
        assert!(g.heads.contains(&7));
        assert_eq!(g.get(2).unwrap().parent, 1);
    }

    #[test]
    fn append_and_update_bottom() {
        let mut g = graph_of(vec![branch(1, 5, 10, 0)]);
        g.switch_to_head(1).unwrap();
        g.append_to_head(1, hash(99), 11).unwrap();
        assert_eq!(g.get(1).unwrap().top_height, 11);
        assert_eq!(g.find_by_height(11).unwrap(), 1);
        assert_eq!(
            g.append_to_head(1, hash(98), 11).unwrap_err(),
            Error::LinkHeightMismatch
        );

        g.update_bottom(1, hash(97), 2).unwrap();
        assert_eq!(g.get(1).unwrap().bottom_height, 2);
        assert_eq!(g.find_by_height(2).unwrap(), 1);
    }

    #[test]
    fn root_of_walks_parents() {
        let g = graph_of(vec![
            branch(1, 0, 10, 0),
            branch(2, 11, 20, 1),
            branch(3, 21, 30, 2),
        ]);
        assert_eq!(g.root_of(3).unwrap().id, 1);
        assert_eq!(g.root_of(1).unwrap().id, 1);
    }
}
