//! End-to-end tests that drive the `driftkv` binary through its stdin/stdout
//! protocol, the same way a scripted user would.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::tempdir;

/// Runs the shell with the given data directory, feeds it `commands`, appends
/// an `EXIT`, and returns everything the shell printed to stdout.
fn run_cli(data_dir: &Path, commands: &str) -> String {
    let mut child = Command::new(env!("CARGO_BIN_EXE_driftkv"))
        .env("DRIFT_DATA_DIR", data_dir.to_str().unwrap())
        .env("DRIFT_MEMTABLE_KB", "1")
        .env("DRIFT_WAL_SYNC", "false")
        .env("DRIFT_COMPACT_SECS", "3600")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn driftkv");

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        stdin
            .write_all(commands.as_bytes())
            .expect("failed to write commands");
        stdin.write_all(b"EXIT\n").expect("failed to write EXIT");
    }

    let output = child.wait_with_output().expect("failed to read output");
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "sst").unwrap_or(false))
        .count()
}

#[test]
fn basic_set_get() {
    let dir = tempdir().unwrap();

    let output = run_cli(dir.path(), "SET key1 value1\nGET key1\n");

    assert!(output.contains("OK"));
    assert!(output.contains("value1"));
}

#[test]
fn multiple_keys() {
    let dir = tempdir().unwrap();

    let commands = "SET a 1\nSET b 2\nSET c 3\nGET a\nGET b\nGET c\n";
    let output = run_cli(dir.path(), commands);

    assert!(output.contains("1"));
    assert!(output.contains("2"));
    assert!(output.contains("3"));
}

#[test]
fn overwrite_key() {
    let dir = tempdir().unwrap();

    let commands = "SET mykey oldvalue\nGET mykey\nSET mykey newvalue\nGET mykey\n";
    let output = run_cli(dir.path(), commands);

    assert!(output.contains("oldvalue"));
    assert!(output.contains("newvalue"));
}

#[test]
fn delete_key_prints_nil() {
    let dir = tempdir().unwrap();

    let commands = "SET delme value\nGET delme\nDEL delme\nGET delme\n";
    let output = run_cli(dir.path(), commands);

    assert!(output.contains("value"));
    assert!(output.contains("(nil)"));
}

#[test]
fn value_keeps_embedded_spaces() {
    let dir = tempdir().unwrap();

    let commands = "SET greeting hello world again\nGET greeting\n";
    let output = run_cli(dir.path(), commands);

    assert!(output.contains("hello world again"));
}

#[test]
fn flush_writes_a_segment_file() {
    let dir = tempdir().unwrap();

    let commands = "SET a 1\nSET b 2\nFLUSH\nGET a\nGET b\n";
    let output = run_cli(dir.path(), commands);

    assert!(output.contains("OK"));
    assert!(output.contains("1"));
    assert!(output.contains("2"));
    assert!(
        count_sst_files(dir.path()) >= 1,
        "a segment file should exist after FLUSH"
    );
}

#[test]
fn auto_flush_keeps_keys_readable() {
    let dir = tempdir().unwrap();

    // the 1 KiB threshold forces several flushes along the way
    let mut commands = String::new();
    for i in 0..50 {
        commands.push_str(&format!("SET key{:03} value_with_some_data_{}\n", i, i));
    }
    for i in 0..50 {
        commands.push_str(&format!("GET key{:03}\n", i));
    }

    let output = run_cli(dir.path(), &commands);

    assert!(output.contains("value_with_some_data_0"));
    assert!(output.contains("value_with_some_data_49"));
}

#[test]
fn compact_merges_flushed_segments() {
    let dir = tempdir().unwrap();

    let mut commands = String::new();
    for batch in 0..3 {
        for i in 0..5 {
            commands.push_str(&format!("SET batch{}_key{} val{}\n", batch, i, batch * 10 + i));
        }
        commands.push_str("FLUSH\n");
    }
    commands.push_str("COMPACT\n");
    for batch in 0..3 {
        for i in 0..5 {
            commands.push_str(&format!("GET batch{}_key{}\n", batch, i));
        }
    }

    let output = run_cli(dir.path(), &commands);

    assert!(output.contains("OK (segments=1)"));
    assert!(output.contains("val0"));
    assert!(output.contains("val10"));
    assert_eq!(count_sst_files(dir.path()), 1);
}

#[test]
fn stats_prints_engine_counters() {
    let dir = tempdir().unwrap();

    let commands = "SET x 1\nSET y 2\nFLUSH\nSTATS\n";
    let output = run_cli(dir.path(), commands);

    assert!(output.contains("Engine"));
    assert!(output.contains("segment_count"));
}

#[test]
fn quit_says_bye() {
    let dir = tempdir().unwrap();

    let output = run_cli(dir.path(), "SET foo bar\nQUIT\n");

    assert!(output.contains("OK"));
    assert!(output.contains("bye"));
}

#[test]
fn unknown_command_is_reported() {
    let dir = tempdir().unwrap();

    let output = run_cli(dir.path(), "FROB a b\n");

    assert!(output.contains("unknown command: FROB"));
}

#[test]
fn persistence_across_restarts() {
    let dir = tempdir().unwrap();

    run_cli(dir.path(), "SET persist_key persist_value\nFLUSH\n");

    let output = run_cli(dir.path(), "GET persist_key\n");
    assert!(output.contains("persist_value"));
}

#[test]
fn writes_without_explicit_flush_persist() {
    let dir = tempdir().unwrap();

    run_cli(dir.path(), "SET wal_key wal_value\n");

    let output = run_cli(dir.path(), "GET wal_key\n");
    assert!(output.contains("wal_value"));
}

#[test]
fn mixed_operations_stress() {
    let dir = tempdir().unwrap();

    let mut commands = String::new();
    for i in 0..30 {
        match i % 4 {
            0 => commands.push_str(&format!("SET stress_k{} stress_v{}\n", i, i)),
            1 => commands.push_str(&format!("GET stress_k{}\n", i)),
            2 => commands.push_str(&format!("DEL stress_k{}\n", i.max(2) - 2)),
            _ => commands.push_str("FLUSH\n"),
        }
    }
    commands.push_str("COMPACT\nSTATS\n");

    let output = run_cli(dir.path(), &commands);

    assert!(output.contains("bye"), "shell should exit cleanly");
}
