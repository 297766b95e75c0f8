//! One breadth-first trace run
//!
//! Each level runs in two phases. The fetch phase resolves every frontier
//! node's next hop concurrently (bounded by the gateway concurrency limit).
//! The mutation phase then applies the results in level order from a single
//! writer, so the graph is identical across runs against the same ledger.

use super::propagation::{
    edge_share, edge_value, mixing_effect, pooled_taint, select_fanout, Candidate, Contribution,
    MixingEffect,
};
use super::{TraceBudget, TraceSeed, Tracer};
use crate::errors::{TraceError, TraceResult};
use crate::gateway::ChainGateway;
use crate::graph::{AddressClusters, ClusterView, SpendRegistry};
use crate::types::{
    BudgetKind, CoinJoinVerdict, EdgeKind, FrontierEntry, NodeId, NodeStatus, TraceDirection,
    TraceEdge, TraceGraph, TxRecord, TxSummary, UnresolvedSeed,
};
use bitcoin::{OutPoint, Txid};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::pin::pin;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Result of looking one hop past a frontier node
enum Hop {
    /// Forward leaf: the output has not been spent
    Unspent,
    /// Spending transaction (forward) or funding transaction (backward)
    Next(Arc<TxRecord>),
}

/// A node on the far side of a transaction
struct FarSide {
    outpoint: OutPoint,
    value: u64,
    owner: String,
}

/// How an expanded transaction split value, kept for later revisits
#[derive(Clone)]
struct ExpandedTx {
    /// Followed far-side nodes and the candidate value behind each
    targets: Vec<(NodeId, u64)>,
    pool_total: u64,
    split_total: u64,
    effect: MixingEffect,
}

pub(crate) struct TraceSession<'a, G> {
    tracer: &'a Tracer<G>,
    direction: TraceDirection,
    budget: TraceBudget,
    deadline: Instant,
    graph: TraceGraph,
    clusters: AddressClusters,
    spends: SpendRegistry,
    verdicts: HashMap<Txid, CoinJoinVerdict>,
    visited: HashMap<OutPoint, NodeId>,
    expanded: HashMap<Txid, ExpandedTx>,
}

impl<'a, G: ChainGateway> TraceSession<'a, G> {
    pub(crate) fn new(
        tracer: &'a Tracer<G>,
        direction: TraceDirection,
        budget: TraceBudget,
        seed: &TraceSeed,
    ) -> Self {
        let deadline = Instant::now() + budget.time_budget;
        Self {
            tracer,
            direction,
            budget,
            deadline,
            graph: TraceGraph::new(direction, seed.to_string()),
            clusters: AddressClusters::new(),
            spends: SpendRegistry::new(),
            verdicts: HashMap::new(),
            visited: HashMap::new(),
            expanded: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self, seed: &TraceSeed) -> TraceResult<TraceGraph> {
        let mut level = self.seed(seed).await?;
        debug!("Seeded {} trace with {} nodes", self.direction, level.len());

        while !level.is_empty() {
            level = self.step(level).await;
        }
        Ok(self.finish())
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    async fn seed(&mut self, seed: &TraceSeed) -> TraceResult<Vec<NodeId>> {
        let tracer = self.tracer;
        let builder = tracer.builder();
        let mut seeded = Vec::new();

        match seed {
            TraceSeed::OutPoint(outpoint) => {
                if let Some(id) = self.seed_output(*outpoint, 1.0, 0).await {
                    seeded.push(id);
                }
            }
            TraceSeed::Transaction(txid) => match builder.fetch_transaction(txid).await {
                Ok(tx) => {
                    for output in &tx.outputs {
                        let outpoint = tx.outpoint(output.index);
                        seeded.extend(self.add_seed(outpoint, output.value, output.owner(), 1.0, 0));
                    }
                }
                Err(e) => self.unresolved_seed(txid.to_string(), e),
            },
            TraceSeed::Address(address) => {
                let address = address.to_string();
                match builder.address_history(&address).await {
                    Ok(txids) => seeded.extend(self.seed_address_outputs(&address, &txids).await),
                    Err(e) => self.unresolved_seed(address, e),
                }
            }
            TraceSeed::Frontier(entries) => {
                if entries.is_empty() {
                    return Err(TraceError::InvalidInput(
                        "frontier seed has no entries".to_string(),
                    ));
                }
                seeded.extend(self.seed_frontier(entries).await);
            }
        }

        Ok(seeded)
    }

    async fn seed_output(&mut self, outpoint: OutPoint, taint: f64, depth: u32) -> Option<NodeId> {
        let found = self.tracer.builder().fetch_transaction(&outpoint.txid).await;
        self.seed_from(outpoint, found, taint, depth)
    }

    fn seed_from(
        &mut self,
        outpoint: OutPoint,
        found: TraceResult<Arc<TxRecord>>,
        taint: f64,
        depth: u32,
    ) -> Option<NodeId> {
        let found = found.and_then(|tx| {
            tx.output(outpoint.vout)
                .map(|o| (o.value, o.owner()))
                .ok_or_else(|| TraceError::NotFound {
                    what: format!("output {}", outpoint),
                })
        });

        match found {
            Ok((value, owner)) => self.add_seed(outpoint, value, owner, taint, depth),
            Err(e) => {
                self.unresolved_seed(outpoint.to_string(), e);
                None
            }
        }
    }

    /// Re-seed a saved frontier; entries not reached in time stay on the frontier
    async fn seed_frontier(&mut self, entries: &[FrontierEntry]) -> Vec<NodeId> {
        let tracer = self.tracer;
        let requests: Vec<(usize, Txid)> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (index, entry.outpoint.txid))
            .collect();
        let mut fetched = self
            .fetch_bounded(&requests, |txid| async move {
                tracer.builder().fetch_transaction(&txid).await
            })
            .await;

        let mut seeded = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            match fetched.remove(&index) {
                Some(found) => {
                    seeded.extend(self.seed_from(entry.outpoint, found, entry.taint, entry.depth))
                }
                None => {
                    self.graph.mark_budget(BudgetKind::Time);
                    self.graph.frontier.push(entry.clone());
                }
            }
        }
        seeded
    }

    /// Seed every output paying `address` across its history
    ///
    /// History transactions are fetched concurrently under the session
    /// deadline; any left unfetched when time runs out are reported as
    /// unresolved seeds and the trace is marked truncated.
    async fn seed_address_outputs(&mut self, address: &str, txids: &[Txid]) -> Vec<NodeId> {
        let tracer = self.tracer;
        let mut seen = HashSet::new();
        let requests: Vec<(Txid, Txid)> = txids
            .iter()
            .filter(|txid| seen.insert(**txid))
            .map(|txid| (*txid, *txid))
            .collect();
        let mut fetched = self
            .fetch_bounded(&requests, |txid| async move {
                tracer.builder().fetch_transaction(&txid).await
            })
            .await;

        let mut seeded = Vec::new();
        for (txid, _) in &requests {
            let tx = match fetched.remove(txid) {
                Some(Ok(tx)) => tx,
                Some(Err(e)) => {
                    self.unresolved_seed(txid.to_string(), e);
                    continue;
                }
                None => {
                    self.graph.mark_budget(BudgetKind::Time);
                    self.unresolved_seed(
                        txid.to_string(),
                        TraceError::Unresolved("time budget exhausted before fetch".to_string()),
                    );
                    continue;
                }
            };
            for output in tx
                .outputs
                .iter()
                .filter(|o| o.address.as_deref() == Some(address))
            {
                let outpoint = tx.outpoint(output.index);
                seeded.extend(self.add_seed(outpoint, output.value, output.owner(), 1.0, 0));
            }
        }
        seeded
    }

    fn add_seed(
        &mut self,
        outpoint: OutPoint,
        value: u64,
        owner: String,
        taint: f64,
        depth: u32,
    ) -> Option<NodeId> {
        if self.visited.contains_key(&outpoint) {
            return None;
        }
        let id = self.graph.add_node(outpoint, value, owner, taint, depth);
        self.visited.insert(outpoint, id);
        Some(id)
    }

    fn unresolved_seed(&mut self, seed: String, error: TraceError) {
        warn!("Seed {} could not be resolved: {}", seed, error);
        self.graph.unresolved_seeds.push(UnresolvedSeed {
            seed,
            reason: error.to_string(),
        });
    }

    /// Process one BFS level and return the next
    async fn step(&mut self, level: Vec<NodeId>) -> Vec<NodeId> {
        let mut batch = Vec::with_capacity(level.len());
        for id in level {
            let node = self.graph.node(id);
            if node.depth >= self.budget.max_depth {
                self.park(id, NodeStatus::DepthLimit);
                self.graph.mark_budget(BudgetKind::Depth);
            } else {
                batch.push((id, node.outpoint));
            }
        }
        if batch.is_empty() {
            return Vec::new();
        }
        if self.expired() {
            self.stop_on_time(batch.iter().map(|(id, _)| *id));
            return Vec::new();
        }

        debug!("Fetching next hop for {} {} nodes", batch.len(), self.direction);
        let mut fetched = self.fetch_level(&batch).await;

        // Group frontier nodes by the transaction they lead into, in first-seen order
        let mut groups: Vec<(Arc<TxRecord>, Vec<NodeId>)> = Vec::new();
        let mut group_of: HashMap<Txid, usize> = HashMap::new();
        for (id, _) in &batch {
            match fetched.remove(id) {
                None => {
                    self.graph.mark_budget(BudgetKind::Time);
                    self.park(*id, NodeStatus::Frontier);
                }
                Some(Ok(Hop::Unspent)) => self.graph.set_status(*id, NodeStatus::Unspent),
                Some(Ok(Hop::Next(tx)))
                    if self.direction == TraceDirection::Backward && tx.is_coinbase() =>
                {
                    self.graph.set_status(*id, NodeStatus::Coinbase);
                }
                Some(Ok(Hop::Next(tx))) => match group_of.get(&tx.txid) {
                    Some(index) => groups[*index].1.push(*id),
                    None => {
                        group_of.insert(tx.txid, groups.len());
                        groups.push((tx, vec![*id]));
                    }
                },
                Some(Err(e)) => self.fail_branch(*id, e),
            }
        }

        let mut next = Vec::new();
        for (tx, sources) in groups {
            if self.expired() {
                self.stop_on_time(sources.into_iter());
                continue;
            }
            next.extend(self.expand(&tx, &sources));
        }
        next
    }

    /// Resolve next hops concurrently; nodes missing from the result ran out of time
    async fn fetch_level(&self, batch: &[(NodeId, OutPoint)]) -> HashMap<NodeId, TraceResult<Hop>> {
        self.fetch_bounded(batch, |outpoint| self.fetch_hop(outpoint)).await
    }

    /// Run `fetch` over `requests` with bounded concurrency under the session deadline
    ///
    /// Requests not started before the deadline are skipped; in-flight ones
    /// get the drain grace period to finish. Skipped or abandoned keys are
    /// absent from the result.
    async fn fetch_bounded<K, I, T, F, Fut>(
        &self,
        requests: &[(K, I)],
        fetch: F,
    ) -> HashMap<K, TraceResult<T>>
    where
        K: Copy + Eq + Hash,
        I: Copy,
        F: Fn(I) -> Fut,
        Fut: Future<Output = TraceResult<T>>,
    {
        let deadline = self.deadline;
        let fetch = &fetch;
        let mut fetches = pin!(stream::iter(requests.iter().copied())
            .map(|(key, input)| async move {
                if Instant::now() >= deadline {
                    return (key, None);
                }
                (key, Some(fetch(input).await))
            })
            .buffered(self.tracer.concurrency()));

        let cutoff = deadline + self.tracer.drain_grace();
        let mut results = HashMap::new();
        loop {
            match timeout_at(cutoff, fetches.next()).await {
                Ok(Some((key, Some(result)))) => {
                    results.insert(key, result);
                }
                Ok(Some((_, None))) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Drain grace expired with {} of {} fetches complete",
                        results.len(),
                        requests.len()
                    );
                    break;
                }
            }
        }
        results
    }

    async fn fetch_hop(&self, outpoint: OutPoint) -> TraceResult<Hop> {
        let builder = self.tracer.builder();
        match self.direction {
            TraceDirection::Forward => match builder.fetch_spender(&outpoint).await? {
                (_, Some(tx)) => Ok(Hop::Next(tx)),
                (_, None) => Ok(Hop::Unspent),
            },
            TraceDirection::Backward => builder.fetch_resolved(&outpoint.txid).await.map(Hop::Next),
        }
    }

    /// Leave a node unexpanded and record it for resumption
    fn park(&mut self, id: NodeId, status: NodeStatus) {
        self.graph.set_status(id, status);
        let node = self.graph.node(id);
        let entry = FrontierEntry {
            outpoint: node.outpoint,
            taint: node.taint,
            depth: node.depth,
        };
        self.graph.frontier.push(entry);
    }

    fn stop_on_time(&mut self, ids: impl Iterator<Item = NodeId>) {
        self.graph.mark_budget(BudgetKind::Time);
        for id in ids {
            self.park(id, NodeStatus::Frontier);
        }
    }

    fn fail_branch(&mut self, id: NodeId, error: TraceError) {
        let outpoint = self.graph.node(id).outpoint;
        match error {
            TraceError::DataIntegrity(violation) => {
                warn!("Excluding branch at {}: {}", outpoint, violation);
                self.graph.stats.integrity_violations += 1;
                self.graph.set_status(
                    id,
                    NodeStatus::IntegrityViolation {
                        reason: violation.to_string(),
                    },
                );
            }
            other => {
                debug!("Branch at {} unresolved: {}", outpoint, other);
                self.graph.stats.unresolved_branches += 1;
                self.graph.set_status(
                    id,
                    NodeStatus::Unresolved {
                        reason: other.to_string(),
                    },
                );
            }
        }
    }

    /// Classify once per session; merge input clusters for non-mixing transactions
    fn verdict(&mut self, tx: &TxRecord) -> CoinJoinVerdict {
        if let Some(verdict) = self.verdicts.get(&tx.txid) {
            return verdict.clone();
        }

        let verdict = self.tracer.classifier().classify(tx, &self.clusters);
        if verdict.is_coinjoin {
            self.graph.stats.mixing_transactions += 1;
        } else {
            self.clusters.merge_inputs(tx);
        }

        self.graph.transactions.insert(
            tx.txid,
            TxSummary {
                txid: tx.txid,
                block: tx.block,
                fee: tx.fee(),
                input_value: tx.total_input_value().unwrap_or(0),
                output_value: tx.total_output_value(),
                verdict: verdict.clone(),
            },
        );
        self.verdicts.insert(tx.txid, verdict.clone());
        verdict
    }

    /// Expand `sources` through `tx`; returns newly created nodes to visit next
    fn expand(&mut self, tx: &TxRecord, sources: &[NodeId]) -> Vec<NodeId> {
        if let Some(prior) = self.expanded.get(&tx.txid).cloned() {
            self.revisit(tx.txid, sources, &prior);
            return Vec::new();
        }

        if let Err(violation) = self.spends.register(tx) {
            for id in sources {
                self.fail_branch(*id, violation.clone().into());
            }
            return Vec::new();
        }

        let verdict = self.verdict(tx);
        let effect = mixing_effect(&verdict, self.budget.mixing_policy);
        if effect == MixingEffect::Boundary {
            for id in sources {
                self.graph.set_status(
                    *id,
                    NodeStatus::MixingBoundary {
                        txid: tx.txid,
                        confidence: verdict.confidence,
                    },
                );
            }
            return Vec::new();
        }

        let total_in = tx
            .total_input_value()
            .unwrap_or_else(|| tx.total_output_value());
        let (pool_total, split_total) = match self.direction {
            TraceDirection::Forward => (total_in, total_in),
            TraceDirection::Backward => (tx.total_output_value(), total_in),
        };
        let far_side = self.far_side(tx);
        let candidates: Vec<Candidate> = far_side
            .iter()
            .map(|(index, far)| Candidate {
                index: *index,
                value: far.value,
            })
            .collect();

        let sources_info: Vec<(NodeId, u64, f64, u32)> = sources
            .iter()
            .map(|id| {
                let node = self.graph.node(*id);
                (*id, node.value, node.taint, node.depth)
            })
            .collect();
        let contributions: Vec<Contribution> = sources_info
            .iter()
            .map(|(_, value, taint, _)| Contribution {
                value: *value,
                taint: *taint,
            })
            .collect();
        let taint = pooled_taint(&contributions, pool_total, effect);
        let confidence = effect.confidence();
        let depth = sources_info.iter().map(|s| s.3).max().unwrap_or(0) + 1;

        let selection = select_fanout(&candidates, self.budget.max_fanout);
        if !selection.truncated.is_empty() {
            debug!(
                "{} has {} candidates, following {}",
                tx.txid,
                candidates.len(),
                selection.followed.len()
            );
            self.graph.mark_budget(BudgetKind::Fanout);
        }

        let mut created = Vec::new();
        let mut targets = Vec::with_capacity(selection.followed.len());
        for candidate in &selection.followed {
            let Some(far) = far_side.get(&candidate.index) else {
                continue;
            };
            let (target, kind) = match self.visited.get(&far.outpoint) {
                Some(existing) => (*existing, EdgeKind::Revisit),
                None => {
                    let id = self.graph.add_node(
                        far.outpoint,
                        far.value,
                        far.owner.clone(),
                        taint,
                        depth,
                    );
                    self.visited.insert(far.outpoint, id);
                    created.push(id);
                    (id, EdgeKind::Spend)
                }
            };
            targets.push((target, candidate.value));
            for (source, value, _, _) in &sources_info {
                self.graph.add_edge(TraceEdge {
                    source: *source,
                    target,
                    txid: tx.txid,
                    value: edge_value(*value, candidate.value, split_total),
                    share: edge_share(candidate.value, split_total),
                    taint,
                    confidence,
                    kind,
                });
            }
        }

        for candidate in &selection.truncated {
            let Some(far) = far_side.get(&candidate.index) else {
                continue;
            };
            let target = match self.visited.get(&far.outpoint) {
                Some(existing) => *existing,
                None => {
                    let id = self.graph.add_node(
                        far.outpoint,
                        far.value,
                        far.owner.clone(),
                        taint,
                        depth,
                    );
                    self.graph.set_status(id, NodeStatus::TruncatedLowValue);
                    self.visited.insert(far.outpoint, id);
                    id
                }
            };
            for (source, value, _, _) in &sources_info {
                self.graph.add_edge(TraceEdge {
                    source: *source,
                    target,
                    txid: tx.txid,
                    value: edge_value(*value, candidate.value, split_total),
                    share: edge_share(candidate.value, split_total),
                    taint,
                    confidence,
                    kind: EdgeKind::TruncatedLowValue,
                });
            }
        }

        for id in sources {
            self.graph.set_status(*id, NodeStatus::Expanded);
        }
        self.graph.stats.transactions_expanded += 1;
        self.expanded.insert(
            tx.txid,
            ExpandedTx {
                targets,
                pool_total,
                split_total,
                effect,
            },
        );
        created
    }

    /// Connect late arrivals at an already-expanded transaction without re-expanding it
    ///
    /// The late taint is recorded on the edges only.
    fn revisit(&mut self, txid: Txid, sources: &[NodeId], prior: &ExpandedTx) {
        for id in sources {
            let (value, taint) = {
                let node = self.graph.node(*id);
                (node.value, node.taint)
            };
            let late_taint = pooled_taint(&[Contribution { value, taint }], prior.pool_total, prior.effect);
            for (target, candidate_value) in &prior.targets {
                self.graph.add_edge(TraceEdge {
                    source: *id,
                    target: *target,
                    txid,
                    value: edge_value(value, *candidate_value, prior.split_total),
                    share: edge_share(*candidate_value, prior.split_total),
                    taint: late_taint,
                    confidence: prior.effect.confidence(),
                    kind: EdgeKind::Revisit,
                });
            }
            self.graph.set_status(*id, NodeStatus::Expanded);
        }
    }

    /// Next-hop nodes on the far side of `tx`, keyed by output or input index
    fn far_side(&self, tx: &TxRecord) -> BTreeMap<u32, FarSide> {
        match self.direction {
            TraceDirection::Forward => tx
                .outputs
                .iter()
                .filter(|o| o.value > 0)
                .map(|o| {
                    (
                        o.index,
                        FarSide {
                            outpoint: tx.outpoint(o.index),
                            value: o.value,
                            owner: o.owner(),
                        },
                    )
                })
                .collect(),
            TraceDirection::Backward => tx
                .inputs
                .iter()
                .enumerate()
                .filter(|(_, i)| !i.coinbase && i.value.unwrap_or(0) > 0)
                .map(|(index, input)| {
                    let outpoint = input.previous_output;
                    (
                        index as u32,
                        FarSide {
                            outpoint,
                            value: input.value.unwrap_or(0),
                            owner: input
                                .owner()
                                .unwrap_or_else(|| format!("outpoint:{}", outpoint)),
                        },
                    )
                })
                .collect(),
        }
    }

    fn finish(mut self) -> TraceGraph {
        for node in self.graph.nodes.iter_mut() {
            node.cluster = self.clusters.cluster_of(&node.owner);
        }

        info!(
            "{} trace of {} finished: {} nodes, {} edges, {} transactions, truncated: {}",
            self.direction,
            self.graph.seed,
            self.graph.nodes.len(),
            self.graph.edges.len(),
            self.graph.stats.transactions_expanded,
            self.graph.truncated
        );
        self.graph
    }
}
