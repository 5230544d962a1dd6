//! # CLI — CinderKV interactive shell
//!
//! A REPL over the storage engine. Reads commands from stdin, executes them,
//! and prints results to stdout, so it works interactively and with piped
//! scripts alike.
//!
//! ## Commands
//!
//! ```text
//! PUT key value     Insert or update a key
//! GET key           Look up a key (prints the value or "(nil)")
//! DEL key           Delete a key
//! KEYS              List all live keys in order
//! SCAN [prefix]     List key -> value pairs, optionally under a prefix
//! MERGE             Compact dead records into a fresh generation
//! STAT              Print store statistics
//! EXIT / QUIT       Close the store and leave
//! ```
//!
//! ## Configuration
//!
//! All settings come from environment variables:
//!
//! ```text
//! CINDER_DIR         store directory            (default: "data")
//! CINDER_SEGMENT_MB  segment size in MiB        (default: 1024)
//! CINDER_SYNC        fsync every write          (default: "false")
//! CINDER_BACKEND     btree | art | bptree       (default: "btree")
//! ```

use std::io::{self, BufRead, Write};

use anyhow::Result;
use engine::{Backend, Engine, Options};

mod repl;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    env_logger::init();

    let dir = env_or("CINDER_DIR", "data");
    let segment_mb: u64 = env_or("CINDER_SEGMENT_MB", "1024").parse().unwrap_or(1024);
    let sync: bool = env_or("CINDER_SYNC", "false").parse().unwrap_or(false);
    let backend = match env_or("CINDER_BACKEND", "btree").as_str() {
        "art" => Backend::Art,
        "bptree" => Backend::Bptree,
        _ => Backend::Btree,
    };

    let engine = Engine::open(Options {
        segment_size: segment_mb * 1024 * 1024,
        sync_each_write: sync,
        keydir: backend,
        ..Options::new(&dir)
    })?;

    println!(
        "CinderKV started (dir={}, segment={}MiB, sync={}, backend={:?})",
        dir, segment_mb, sync, backend
    );
    println!("Commands: PUT key value | GET key | DEL key | KEYS | SCAN [prefix]");
    println!("          MERGE | STAT | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match repl::execute(&engine, &line) {
            repl::Outcome::Reply(text) => println!("{text}"),
            repl::Outcome::Silent => {}
            repl::Outcome::Exit => break,
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    engine.close()?;
    println!("bye");
    Ok(())
}
