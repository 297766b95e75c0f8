//! Integration Tests
//!
//! End-to-end runs through configuration, gateway selection, tracing,
//! timeline generation and the command-line interface.

#[path = "../common/mod.rs"]
mod common;

mod cli_smoke_test;
