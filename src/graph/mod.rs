//! Transaction graph materialization
//!
//! - **builder** - fetches and validates ledger records, resolves UTXOs
//! - **cache** - single-flight memoizing cache shared across trace sessions
//! - **cluster** - common-input-ownership address clustering
//! - **spends** - per-trace double-spend registry

pub mod builder;
pub mod cache;
pub mod cluster;
pub mod spends;

pub use builder::{SpendCache, TransactionCache, TxGraphBuilder};
pub use cache::{CacheStats, SingleFlightCache};
pub use cluster::{AddressClusters, ClusterView, Singletons};
pub use spends::SpendRegistry;
