//! Bitcoin UTXO Forensics Engine
//!
//! Tracing and classification over a read-only blockchain data gateway:
//! - **graph** - transaction graph builder with single-flight caching
//! - **classifier** - CoinJoin / mixing heuristics
//! - **tracer** - forward and backward UTXO tracing with taint propagation
//! - **timeline** - chronological fund-movement events

pub mod classifier;
pub mod cli;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod graph;
pub mod timeline;
pub mod tracer;
pub mod types;
pub mod utils;
