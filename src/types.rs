//! Core data types for the forensics engine
//!
//! This module contains the ledger records consumed from the gateway and the
//! structures produced for downstream reporting:
//! - **transaction** - transactions, inputs, outputs, UTXO spend status
//! - **verdict** - CoinJoin classification results
//! - **trace** - the trace graph and its markers
//! - **timeline** - ordered fund-movement events

pub mod timeline;
pub mod trace;
pub mod transaction;
pub mod verdict;

// Re-export main types
pub use timeline::{Timeline, TimelineEvent, TimelineSummary};
pub use trace::{
    BudgetKind, ClusterEdge, ClusterGraph, ClusterNode, Completeness, EdgeKind, FrontierEntry,
    NodeId, NodeStatus, TraceDirection, TraceEdge, TraceGraph, TraceNode, TraceStats, TxSummary,
    UnresolvedSeed,
};
pub use transaction::{owner_key, BlockPosition, SpendStatus, TxInput, TxOutput, TxRecord, Utxo};
pub use verdict::{CoinJoinVerdict, MixPattern, Signal, SignalKind};
