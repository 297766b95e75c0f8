//! Trace graph produced by a single trace run
//!
//! Nodes live in an arena (`Vec<TraceNode>`) and are referenced by index.
//! Edges follow traversal order: `source` is the node nearer the seed. Use
//! [`TraceEdge::flow`] to get money-flow orientation.

use crate::types::transaction::BlockPosition;
use crate::types::verdict::CoinJoinVerdict;
use bitcoin::{OutPoint, Txid};
use petgraph::dot::Dot;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Direction of traversal relative to the seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceDirection {
    /// Follow spending transactions (where did the funds go)
    Forward,
    /// Follow funding transactions (where did the funds come from)
    Backward,
}

impl fmt::Display for TraceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceDirection::Forward => f.write_str("forward"),
            TraceDirection::Backward => f.write_str("backward"),
        }
    }
}

/// Arena index of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// Why a node was (or was not) expanded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    /// Awaiting expansion when traversal stopped
    Frontier,
    Expanded,
    /// Natural forward leaf
    Unspent,
    /// Natural backward leaf
    Coinbase,
    DepthLimit,
    MixingBoundary { txid: Txid, confidence: f64 },
    TruncatedLowValue,
    Unresolved { reason: String },
    IntegrityViolation { reason: String },
}

/// Coarse classification of how a branch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    FullyTraced,
    BoundedByPolicy,
    BoundedByMissingData,
}

impl NodeStatus {
    pub fn completeness(&self) -> Completeness {
        match self {
            NodeStatus::Expanded | NodeStatus::Unspent | NodeStatus::Coinbase => {
                Completeness::FullyTraced
            }
            NodeStatus::Frontier
            | NodeStatus::DepthLimit
            | NodeStatus::MixingBoundary { .. }
            | NodeStatus::TruncatedLowValue => Completeness::BoundedByPolicy,
            NodeStatus::Unresolved { .. } | NodeStatus::IntegrityViolation { .. } => {
                Completeness::BoundedByMissingData
            }
        }
    }
}

/// A UTXO visited by the trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    pub id: NodeId,
    pub outpoint: OutPoint,
    pub value: u64,
    pub owner: String,
    /// Address cluster id, assigned once traversal finishes
    pub cluster: String,
    /// Estimated share (0-1) of this output's value attributable to the seed
    pub taint: f64,
    /// Hops from the seed
    pub depth: u32,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Followed spend relationship
    Spend,
    /// Spend into a node that was already in the graph; not re-expanded
    Revisit,
    /// Edge excluded by the fan-out cap; target is a low-value leaf
    TruncatedLowValue,
}

/// Spend relationship between two traced outputs via `txid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub txid: Txid,
    /// Value attributed to this edge under proportional flow
    pub value: u64,
    /// Fraction of the source's value carried by this edge
    pub share: f64,
    /// Taint at the target after this hop
    pub taint: f64,
    /// 1.0 for ordinary transactions, 1/anonymity-set when diluted through a mix
    pub confidence: f64,
    pub kind: EdgeKind,
}

impl TraceEdge {
    /// `(from, to)` in money-flow order for a graph traced in `direction`
    pub fn flow(&self, direction: TraceDirection) -> (NodeId, NodeId) {
        match direction {
            TraceDirection::Forward => (self.source, self.target),
            TraceDirection::Backward => (self.target, self.source),
        }
    }
}

/// Per-transaction facts recorded while tracing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxSummary {
    pub txid: Txid,
    pub block: Option<BlockPosition>,
    pub fee: Option<u64>,
    pub input_value: u64,
    pub output_value: u64,
    pub verdict: CoinJoinVerdict,
}

/// Which budget bounded the trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    Depth,
    Fanout,
    Time,
}

/// Resumable position left behind by a truncated trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub outpoint: OutPoint,
    pub taint: f64,
    pub depth: u32,
}

/// A seed that could not be turned into graph nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedSeed {
    pub seed: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub transactions_expanded: u64,
    pub mixing_transactions: u64,
    pub unresolved_branches: u64,
    pub integrity_violations: u64,
    pub revisits: u64,
    pub truncated_edges: u64,
}

/// Directed structure produced by one trace run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceGraph {
    pub direction: TraceDirection,
    pub seed: String,
    pub nodes: Vec<TraceNode>,
    pub edges: Vec<TraceEdge>,
    pub transactions: BTreeMap<Txid, TxSummary>,
    /// Any budget (depth, fan-out, time) bounded the result
    pub truncated: bool,
    pub budgets_hit: BTreeSet<BudgetKind>,
    /// Nodes that can be resumed: time-budget frontier and depth-limited leaves
    pub frontier: Vec<FrontierEntry>,
    pub unresolved_seeds: Vec<UnresolvedSeed>,
    pub stats: TraceStats,
}

impl TraceGraph {
    pub fn new(direction: TraceDirection, seed: impl Into<String>) -> Self {
        Self {
            direction,
            seed: seed.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            transactions: BTreeMap::new(),
            truncated: false,
            budgets_hit: BTreeSet::new(),
            frontier: Vec::new(),
            unresolved_seeds: Vec::new(),
            stats: TraceStats::default(),
        }
    }

    pub fn add_node(
        &mut self,
        outpoint: OutPoint,
        value: u64,
        owner: String,
        taint: f64,
        depth: u32,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TraceNode {
            id,
            outpoint,
            value,
            cluster: owner.clone(),
            owner,
            taint,
            depth,
            status: NodeStatus::Frontier,
        });
        id
    }

    pub fn add_edge(&mut self, edge: TraceEdge) {
        match edge.kind {
            EdgeKind::Revisit => self.stats.revisits += 1,
            EdgeKind::TruncatedLowValue => self.stats.truncated_edges += 1,
            EdgeKind::Spend => {}
        }
        self.edges.push(edge);
    }

    pub fn node(&self, id: NodeId) -> &TraceNode {
        &self.nodes[id.0]
    }

    pub fn set_status(&mut self, id: NodeId, status: NodeStatus) {
        self.nodes[id.0].status = status;
    }

    pub fn mark_budget(&mut self, budget: BudgetKind) {
        self.truncated = true;
        self.budgets_hit.insert(budget);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn seeds(&self) -> impl Iterator<Item = &TraceNode> {
        self.nodes.iter().filter(|n| n.depth == 0)
    }

    /// Edges leaving `id` in traversal order, of any kind
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &TraceEdge> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Longest path from a seed, counting only followed spend edges
    pub fn max_path_length(&self) -> u32 {
        let mut longest: HashMap<NodeId, u32> = HashMap::new();
        // Spend edges always go from depth d to d + 1, so node order by depth is topological
        let mut order: Vec<&TraceNode> = self.nodes.iter().collect();
        order.sort_by_key(|n| (n.depth, n.id));
        for node in order {
            let here = *longest.get(&node.id).unwrap_or(&0);
            for edge in self.outgoing(node.id).filter(|e| e.kind == EdgeKind::Spend) {
                let entry = longest.entry(edge.target).or_insert(0);
                *entry = (*entry).max(here + 1);
            }
        }
        longest.values().copied().max().unwrap_or(0)
    }

    /// Overall result classification: missing data dominates policy bounds
    pub fn completeness(&self) -> Completeness {
        let worst_node = self
            .nodes
            .iter()
            .map(|n| n.status.completeness())
            .max()
            .unwrap_or(Completeness::FullyTraced);
        let mut result = worst_node;
        if self.truncated {
            result = result.max(Completeness::BoundedByPolicy);
        }
        if !self.unresolved_seeds.is_empty() {
            result = Completeness::BoundedByMissingData;
        }
        result
    }

    /// Hex SHA-256 of the canonical JSON encoding
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Aggregate the UTXO-level graph into cluster nodes with summed edges
    pub fn cluster_view(&self) -> ClusterGraph {
        let mut nodes: BTreeMap<&str, ClusterNode> = BTreeMap::new();
        for node in &self.nodes {
            let entry = nodes
                .entry(node.cluster.as_str())
                .or_insert_with(|| ClusterNode {
                    cluster: node.cluster.clone(),
                    utxo_count: 0,
                    total_value: 0,
                    tainted_value: 0,
                });
            entry.utxo_count += 1;
            entry.total_value = entry.total_value.saturating_add(node.value);
            entry.tainted_value = entry
                .tainted_value
                .saturating_add((node.value as f64 * node.taint).round() as u64);
        }

        let mut edges: BTreeMap<(String, String), ClusterEdge> = BTreeMap::new();
        for edge in self.edges.iter().filter(|e| e.kind != EdgeKind::TruncatedLowValue) {
            let (from, to) = edge.flow(self.direction);
            let from = self.node(from).cluster.clone();
            let to = self.node(to).cluster.clone();
            let entry = edges
                .entry((from.clone(), to.clone()))
                .or_insert_with(|| ClusterEdge {
                    from,
                    to,
                    value: 0,
                    transfers: 0,
                });
            entry.value = entry.value.saturating_add(edge.value);
            entry.transfers += 1;
        }

        ClusterGraph {
            nodes: nodes.into_values().collect(),
            edges: edges.into_values().collect(),
        }
    }

    /// Graphviz DOT rendering in money-flow orientation
    pub fn to_dot(&self) -> String {
        let mut graph: DiGraph<String, String> = DiGraph::new();
        let indices: Vec<_> = self
            .nodes
            .iter()
            .map(|n| {
                graph.add_node(format!(
                    "{} | {} sats | taint {:.4}",
                    n.outpoint, n.value, n.taint
                ))
            })
            .collect();
        for edge in &self.edges {
            let (from, to) = edge.flow(self.direction);
            let label = match edge.kind {
                EdgeKind::Spend => format!("{} sats", edge.value),
                EdgeKind::Revisit => format!("{} sats (revisit)", edge.value),
                EdgeKind::TruncatedLowValue => "truncated-low-value".to_string(),
            };
            graph.add_edge(indices[from.0], indices[to.0], label);
        }
        format!("{}", Dot::new(&graph))
    }
}

/// Cluster-level aggregate of a trace graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGraph {
    pub nodes: Vec<ClusterNode>,
    pub edges: Vec<ClusterEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub cluster: String,
    pub utxo_count: usize,
    pub total_value: u64,
    pub tainted_value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEdge {
    pub from: String,
    pub to: String,
    pub value: u64,
    pub transfers: usize,
}
