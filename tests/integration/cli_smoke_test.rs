//! Drive the compiled binary against a ledger snapshot

use crate::common::{op, theft_ledger};
use chain_forensics::cli::{Cli, Commands};
use chain_forensics::types::TraceGraph;
use clap::Parser;
use std::process::Command;

fn binary() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_chain-forensics"));
    command.env_remove("RUST_LOG");
    command
}

fn snapshot_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("ledger.json");
    let json = serde_json::to_string(&theft_ledger().snapshot()).unwrap();
    std::fs::write(&path, json).unwrap();
    path
}

#[test]
fn test_cli_parses_trace_arguments() {
    let cli = Cli::try_parse_from([
        "chain-forensics",
        "trace",
        "abcd:0",
        "--direction",
        "both",
        "--max-depth",
        "3",
        "--mixing-policy",
        "dilute",
        "--snapshot",
        "ledger.json",
    ])
    .unwrap();

    match cli.command {
        Commands::Trace(command) => {
            assert_eq!(command.seed.as_deref(), Some("abcd:0"));
            assert_eq!(command.budget.max_depth, Some(3));
            assert!(command.gateway.snapshot.is_some());
        }
        _ => panic!("expected trace command"),
    }
}

#[test]
fn test_cli_rejects_seed_with_resume() {
    let result = Cli::try_parse_from([
        "chain-forensics",
        "trace",
        "abcd:0",
        "--resume",
        "previous.json",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_trace_command_emits_graph_json() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = snapshot_file(&dir);

    let output = binary()
        .current_dir(dir.path())
        .args(["trace", &op(1, 0).to_string(), "--snapshot"])
        .arg(&snapshot)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let graph: TraceGraph = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(graph.nodes.len(), 6);
    assert!(graph.nodes.iter().any(|n| n.owner == "mule"));
}

#[test]
fn test_timeline_command_writes_csv() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = snapshot_file(&dir);
    let csv = dir.path().join("timeline.csv");

    let output = binary()
        .current_dir(dir.path())
        .args(["timeline", &op(2, 0).to_string(), "--format", "json", "--csv"])
        .arg(&csv)
        .arg("--snapshot")
        .arg(&snapshot)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let content = std::fs::read_to_string(&csv).unwrap();
    assert_eq!(content.lines().count(), 5);
}

#[test]
fn test_missing_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = binary()
        .current_dir(dir.path())
        .args(["classify", &crate::common::txid(2).to_string(), "--snapshot", "missing.json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}
