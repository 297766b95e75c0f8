use bitcoin::{OutPoint, Txid};
use thiserror::Error;

/// Application-wide error type - single point of truth
#[derive(Error, Debug)]
pub enum AppError {
    /// Blockchain data gateway operations
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Trace engine operations
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    /// File I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV export
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration issues
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation/parsing
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Errors raised by the blockchain data gateway adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The gateway has no record (pruned, invalid or never seen)
    #[error("Record not found: {what}")]
    NotFound { what: String },

    /// Network or server-side failure that may succeed on retry
    #[error("Transient failure: {operation} - {message}")]
    Transient { operation: String, message: String },

    /// A single call exceeded its deadline
    #[error("Request timeout: {timeout_ms}ms for {operation}")]
    Timeout { timeout_ms: u64, operation: String },

    /// Transient failures persisted past the retry limit
    #[error("Max retries exceeded: {operation} after {attempts} attempts ({last_error})")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        last_error: String,
    },

    /// The selected backend cannot answer this kind of query
    #[error("{backend} does not support {capability}")]
    Unsupported {
        backend: &'static str,
        capability: &'static str,
    },

    /// Response could not be decoded into ledger data
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Failed to establish a connection to the backend
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

impl GatewayError {
    /// Whether retrying the same call can plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient { .. } | GatewayError::Timeout { .. }
        )
    }
}

/// Ledger data that contradicts UTXO invariants
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrityViolation {
    #[error("transaction {txid} spends its own output")]
    SelfReference { txid: Txid },

    #[error("outpoint {outpoint} spent by both {first} and {second}")]
    DoubleSpend {
        outpoint: OutPoint,
        first: Txid,
        second: Txid,
    },

    #[error("gateway reports {claimed} spending {outpoint}, but it has no such input")]
    SpenderMismatch { outpoint: OutPoint, claimed: Txid },

    #[error("output {outpoint} does not exist")]
    OutputMissing { outpoint: OutPoint },

    #[error("transaction {txid} creates {outputs} sats from {inputs} sats of inputs")]
    ValueImbalance { txid: Txid, inputs: u64, outputs: u64 },
}

/// Errors surfaced by the graph builder and tracer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    /// Malformed seed or request; fatal before traversal begins
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Gateway has no record for this branch
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Branch data could not be obtained (retries exhausted, timeout, unsupported)
    #[error("Unresolved: {0}")]
    Unresolved(String),

    /// Gateway data violates ledger invariants
    #[error("Data integrity violation: {0}")]
    DataIntegrity(#[from] IntegrityViolation),
}

impl From<GatewayError> for TraceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { what } => TraceError::NotFound { what },
            other => TraceError::Unresolved(other.to_string()),
        }
    }
}

/// Application-wide result type - single point of truth
pub type AppResult<T> = Result<T, AppError>;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result type for builder and tracer operations
pub type TraceResult<T> = Result<T, TraceError>;

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidData(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}
