//! Address clustering via common-input-ownership
//!
//! A grow-only union-find over owner keys. Cluster ids are the smallest
//! member key, which keeps ids stable regardless of union order.

use crate::types::TxRecord;
use std::collections::{BTreeSet, HashMap};

/// Read access to cluster membership
pub trait ClusterView {
    /// Cluster id for `owner`; unknown owners form their own singleton cluster
    fn cluster_of(&self, owner: &str) -> String;
}

/// Every owner is its own cluster
#[derive(Debug, Default, Clone, Copy)]
pub struct Singletons;

impl ClusterView for Singletons {
    fn cluster_of(&self, owner: &str) -> String {
        owner.to_string()
    }
}

#[derive(Debug, Default, Clone)]
pub struct AddressClusters {
    // key: element, value: parent
    parent: HashMap<String, String>,
    // rank is the height of the tree
    rank: HashMap<String, u32>,
    // key: root, value: smallest member
    label: HashMap<String, String>,
}

impl AddressClusters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Ensure element exists as a singleton set
    fn make_set(&mut self, x: &str) {
        if !self.parent.contains_key(x) {
            self.parent.insert(x.to_string(), x.to_string());
            self.rank.insert(x.to_string(), 0);
            self.label.insert(x.to_string(), x.to_string());
        }
    }

    fn root(&self, x: &str) -> Option<String> {
        let mut cur = self.parent.get(x)?;
        while let Some(next) = self.parent.get(cur) {
            if next == cur {
                break;
            }
            cur = next;
        }
        Some(cur.clone())
    }

    fn find(&mut self, x: &str) -> String {
        self.make_set(x);
        let root = self.root(x).unwrap_or_else(|| x.to_string());

        // Path compression
        let mut cur = x.to_string();
        while cur != root {
            let next = self.parent[&cur].clone();
            self.parent.insert(cur, root.clone());
            cur = next;
        }
        root
    }

    /// Merge the sets holding `a` and `b`; returns true if they were distinct
    pub fn union(&mut self, a: &str, b: &str) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }

        let rank_a = self.rank[&ra];
        let rank_b = self.rank[&rb];
        let (root, child) = if rank_a >= rank_b { (ra, rb) } else { (rb, ra) };
        if rank_a == rank_b {
            *self.rank.entry(root.clone()).or_insert(0) += 1;
        }

        let child_label = self.label.remove(&child).unwrap_or_else(|| child.clone());
        let root_label = self.label.entry(root.clone()).or_insert_with(|| root.clone());
        if child_label < *root_label {
            *root_label = child_label;
        }
        self.parent.insert(child, root);
        true
    }

    /// Apply common-input-ownership: all input owners of `tx` become one cluster
    ///
    /// Callers must skip transactions classified as mixing.
    pub fn merge_inputs(&mut self, tx: &TxRecord) -> usize {
        let owners: BTreeSet<String> = tx.inputs.iter().filter_map(|i| i.owner()).collect();
        let mut owners = owners.into_iter();
        let Some(first) = owners.next() else {
            return 0;
        };
        self.make_set(&first);
        owners.filter(|owner| self.union(&first, owner)).count()
    }

    /// Number of distinct clusters among known owners
    pub fn cluster_count(&self) -> usize {
        self.parent.iter().filter(|(k, v)| k == v).count()
    }
}

impl ClusterView for AddressClusters {
    fn cluster_of(&self, owner: &str) -> String {
        match self.root(owner) {
            Some(root) => self
                .label
                .get(&root)
                .cloned()
                .unwrap_or(root),
            None => owner.to_string(),
        }
    }
}
