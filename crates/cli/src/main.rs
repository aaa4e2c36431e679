//! # driftkv - interactive shell
//!
//! A REPL-style command-line interface over the driftkv storage engine.
//! Reads commands from stdin, executes them against the engine, and prints
//! results to stdout. Works interactively and scripted (pipe commands via
//! stdin); log output goes to stderr so it never mixes with command results.
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key-value pair
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! FLUSH              Force-flush the memtable to a segment
//! COMPACT            Run compaction until no merge candidates remain
//! STATS              Print engine counters
//! EXIT / QUIT        Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! DRIFT_DATA_DIR       Data directory               (default: "./data")
//! DRIFT_MEMTABLE_KB    Flush threshold in KiB       (default: 4096 = 4 MiB)
//! DRIFT_INDEX_INTERVAL Sparse index stride in bytes (default: 4096)
//! DRIFT_WAL_SYNC       fsync every WAL append       (default: "false")
//! DRIFT_COMPACT_SECS   Compactor sleep in seconds   (default: 10)
//! ```
//!
//! Log verbosity follows `RUST_LOG` (e.g. `RUST_LOG=driftkv=debug`).
//!
//! ## Example
//!
//! ```text
//! $ driftkv
//! driftkv started (dir=./data, memtable=4096KiB, wal_sync=false, compact_every=10s)
//! > SET name Alice
//! OK
//! > GET name
//! Alice
//! > EXIT
//! bye
//! ```

use anyhow::Result;
use config::EngineConfig;
use engine::Engine;
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let data_dir = env_or("DRIFT_DATA_DIR", "./data");
    let memtable_kb: usize = env_or("DRIFT_MEMTABLE_KB", "4096").parse().unwrap_or(4096);
    let index_interval: u64 = env_or("DRIFT_INDEX_INTERVAL", "4096").parse().unwrap_or(4096);
    let wal_sync: bool = env_or("DRIFT_WAL_SYNC", "false").parse().unwrap_or(false);
    let compact_secs: u64 = env_or("DRIFT_COMPACT_SECS", "10").parse().unwrap_or(10);

    let config = EngineConfig::new(&data_dir)
        .with_memtable_max_bytes(memtable_kb * 1024)
        .with_index_interval(index_interval)
        .with_wal_sync(wal_sync)
        .with_compaction_interval(Duration::from_secs(compact_secs));
    let engine = Engine::open(config)?;

    println!(
        "driftkv started (dir={}, memtable={}KiB, wal_sync={}, compact_every={}s)",
        data_dir, memtable_kb, wal_sync, compact_secs
    );
    println!("Commands: SET key value | GET key | DEL key");
    println!("          FLUSH | COMPACT | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "SET" => {
                    if let Some(k) = parts.next() {
                        let v: String = parts.collect::<Vec<&str>>().join(" ");
                        if v.is_empty() {
                            println!("ERR usage: SET key value");
                        } else {
                            match engine.set(k.as_bytes(), v.as_bytes()) {
                                Ok(()) => println!("OK"),
                                Err(e) => println!("ERR set failed: {}", e),
                            }
                        }
                    } else {
                        println!("ERR usage: SET key value");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match engine.get(k.as_bytes()) {
                            Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                            Ok(None) => println!("(nil)"),
                            Err(e) => println!("ERR read failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "DEL" => {
                    if let Some(k) = parts.next() {
                        match engine.delete(k.as_bytes()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR del failed: {}", e),
                        }
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "FLUSH" => match engine.flush() {
                    Ok(()) => println!("OK (segments={})", engine.stats().segment_count),
                    Err(e) => println!("ERR flush failed: {}", e),
                },
                "COMPACT" => match engine.compact_now() {
                    Ok(()) => println!("OK (segments={})", engine.stats().segment_count),
                    Err(e) => println!("ERR compact failed: {}", e),
                },
                "STATS" => {
                    println!("{:?}", engine);
                }
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {}", other);
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    engine.close()
}


#[cfg(test)]
mod load_test {
    use engine::{Engine, EngineConfig};

    #[test]
    fn write_load_test() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(dir.path()).with_memtable_max_bytes(64 * 1024);
        let engine = Engine::open(config).unwrap();

        for i in 0..20_000u64 {
            let key = format!("key{}", i % 1_000);
            engine.set(key.as_bytes(), &vec![b'x'; 100]).unwrap();
        }

        for i in 0..1_000u64 {
            let key = format!("key{}", i);
            assert!(engine.get(key.as_bytes()).unwrap().is_some());
        }
    }

    #[test]
    fn delete_heavy_workload() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(dir.path()).with_memtable_max_bytes(64 * 1024);
        let engine = Engine::open(config).unwrap();

        for _ in 0..10_000 {
            engine.set(b"k", b"v").unwrap();
            engine.delete(b"k").unwrap();
        }

        assert!(engine.get(b"k").unwrap().is_none());
    }
}
