//! Strand development tasks.
//!
//! Usage:
//!   cargo xtask test            Run unit, integration, and doc tests
//!   cargo xtask loom [--quick]  Model-check under loom
//!   cargo xtask demo [ARGS..]   Run the demo binary

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(|s| s.as_str()) {
        Some("test") => test(),
        Some("loom") => {
            let quick = args.iter().any(|a| a == "--quick");
            loom(quick);
        }
        Some("demo") => demo(&args[1..]),
        _ => {
            eprintln!("Usage:");
            eprintln!("  cargo xtask test            Run unit, integration, and doc tests");
            eprintln!("  cargo xtask loom [--quick]  Model-check under loom");
            eprintln!("  cargo xtask demo [ARGS..]   Run the demo binary");
            std::process::exit(1);
        }
    }
}

// =============================================================================
// test
// =============================================================================

fn test() {
    let root = workspace_root();
    println!("=== Strand tests ===");
    run(Command::new("cargo").current_dir(&root).args(["test", "--workspace"]));
}

// =============================================================================
// loom
// =============================================================================

fn loom(quick: bool) {
    let root = workspace_root();
    println!("=== Loom model checks{} ===", if quick { " (bounded)" } else { "" });

    let mut cmd = Command::new("cargo");
    cmd.current_dir(&root)
        .args(["test", "-p", "strand-loom-tests", "--release"])
        .env("RUSTFLAGS", "--cfg loom")
        // Keep loom builds apart so normal builds are not invalidated.
        .env("CARGO_TARGET_DIR", root.join("target").join("loom"));
    if quick {
        cmd.env("LOOM_MAX_PREEMPTIONS", "2");
    }
    run(&mut cmd);
}

// =============================================================================
// demo
// =============================================================================

fn demo(extra: &[String]) {
    let root = workspace_root();
    run(Command::new("cargo")
        .current_dir(&root)
        .args(["run", "-p", "strand-demo", "--"])
        .args(extra));
}

// =============================================================================
// Helpers
// =============================================================================

fn workspace_root() -> PathBuf {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("xtask"));
    manifest_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run(cmd: &mut Command) {
    let status = cmd.status().unwrap_or_else(|e| {
        eprintln!("Failed to run {:?}: {}", cmd, e);
        std::process::exit(1);
    });
    if !status.success() {
        eprintln!("Command failed: {:?}", cmd);
        std::process::exit(status.code().unwrap_or(1));
    }
}
