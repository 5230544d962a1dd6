use super::helpers::opts;
use crate::batch::key_with_seq;
use crate::{BatchOptions, Engine, EngineError, Result};
use datafile::{LogRecord, RecordKind};
use std::fs;
use std::sync::atomic::Ordering;
use tempfile::tempdir;

// --------------------- Commit visibility ---------------------

#[test]
fn nothing_visible_until_commit() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(opts(dir.path()))?;

    let batch = engine.new_batch(BatchOptions::default());
    batch.put(b"x", b"A")?;
    batch.put(b"y", b"B")?;
    assert!(matches!(engine.get(b"x"), Err(EngineError::KeyNotFound)));

    batch.commit()?;
    assert_eq!(engine.get(b"x")?, b"A");
    assert_eq!(engine.get(b"y")?, b"B");
    Ok(())
}

#[test]
fn batch_deletes_apply_on_commit() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(opts(dir.path()))?;
    engine.put(b"gone", b"soon")?;

    let batch = engine.new_batch(BatchOptions::default());
    batch.delete(b"gone")?;
    batch.put(b"kept", b"v")?;
    assert_eq!(engine.get(b"gone")?, b"soon"); // still visible pre-commit

    batch.commit()?;
    assert!(matches!(engine.get(b"gone"), Err(EngineError::KeyNotFound)));
    assert_eq!(engine.get(b"kept")?, b"v");
    Ok(())
}

#[test]
fn last_write_wins_inside_a_batch() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(opts(dir.path()))?;

    let batch = engine.new_batch(BatchOptions::default());
    batch.put(b"k", b"first")?;
    batch.put(b"k", b"second")?;
    batch.commit()?;

    assert_eq!(engine.get(b"k")?, b"second");
    assert_eq!(engine.len()?, 1);
    Ok(())
}

#[test]
fn deleting_a_key_known_only_to_the_batch_cancels_it() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(opts(dir.path()))?;

    let batch = engine.new_batch(BatchOptions::default());
    batch.put(b"temp", b"v")?;
    batch.delete(b"temp")?;
    batch.commit()?;

    assert!(matches!(engine.get(b"temp"), Err(EngineError::KeyNotFound)));
    assert_eq!(engine.len()?, 0);
    Ok(())
}

// --------------------- Limits and edge cases ---------------------

#[test]
fn empty_commit_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(opts(dir.path()))?;
    let batch = engine.new_batch(BatchOptions::default());
    batch.commit()?;
    batch.commit()?;
    Ok(())
}

#[test]
fn oversized_batch_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(opts(dir.path()))?;

    let batch = engine.new_batch(BatchOptions {
        max_batch_size: 3,
        sync_on_commit: false,
    });
    for i in 0..4u32 {
        batch.put(format!("k{i}").as_bytes(), b"v")?;
    }
    assert!(matches!(batch.commit(), Err(EngineError::BatchTooLarge)));

    // nothing leaked into the store
    assert_eq!(engine.len()?, 0);
    Ok(())
}

#[test]
fn batch_rejects_empty_keys() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(opts(dir.path()))?;
    let batch = engine.new_batch(BatchOptions::default());
    assert!(matches!(batch.put(b"", b"v"), Err(EngineError::EmptyKey)));
    assert!(matches!(batch.delete(b""), Err(EngineError::EmptyKey)));
    Ok(())
}

// --------------------- Atomicity across restart ---------------------

#[test]
fn committed_batches_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(opts(dir.path()))?;
        let batch = engine.new_batch(BatchOptions::default());
        batch.put(b"a", b"1")?;
        batch.put(b"b", b"2")?;
        batch.commit()?;
    }

    let engine = Engine::open(opts(dir.path()))?;
    assert_eq!(engine.get(b"a")?, b"1");
    assert_eq!(engine.get(b"b")?, b"2");
    Ok(())
}

#[test]
fn batch_without_commit_marker_is_discarded_on_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(opts(dir.path()))?;

        let first = engine.new_batch(BatchOptions::default());
        first.put(b"x", b"A")?;
        first.put(b"y", b"B")?;
        first.commit()?; // seq 1

        let second = engine.new_batch(BatchOptions::default());
        second.put(b"x", b"C")?;
        second.delete(b"y")?;
        second.commit()?; // seq 2
    }

    // Chop the second batch's commit marker off the segment, simulating a
    // crash between the record writes and the marker reaching disk.
    let marker_len = LogRecord {
        key: key_with_seq(b"txn_fin", 2),
        value: Vec::new(),
        kind: RecordKind::TxnFinished,
    }
    .encode()
    .len();
    let segment = dir.path().join("000000000.data");
    let data = fs::read(&segment)?;
    fs::write(&segment, &data[..data.len() - marker_len])?;

    let engine = Engine::open(opts(dir.path()))?;
    assert_eq!(engine.get(b"x")?, b"A");
    assert_eq!(engine.get(b"y")?, b"B");
    Ok(())
}

// --------------------- Sequence numbers ---------------------

#[test]
fn sequence_counter_outlives_reopens() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(opts(dir.path()))?;
        for _ in 0..3 {
            let batch = engine.new_batch(BatchOptions::default());
            batch.put(b"k", b"v")?;
            batch.commit()?;
        }
        assert_eq!(engine.seq_no.load(Ordering::SeqCst), 3);
    }

    let engine = Engine::open(opts(dir.path()))?;
    assert_eq!(engine.seq_no.load(Ordering::SeqCst), 3);

    let batch = engine.new_batch(BatchOptions::default());
    batch.put(b"k", b"v4")?;
    batch.commit()?;
    assert_eq!(engine.seq_no.load(Ordering::SeqCst), 4);
    assert_eq!(engine.get(b"k")?, b"v4");
    Ok(())
}

#[test]
fn direct_writes_use_the_reserved_sentinel() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(opts(dir.path()))?;
        engine.put(b"plain", b"write")?;
        // direct writes never advance the batch sequence
        assert_eq!(engine.seq_no.load(Ordering::SeqCst), 0);
    }

    // and recovery replays them without waiting for any marker
    let engine = Engine::open(opts(dir.path()))?;
    assert_eq!(engine.get(b"plain")?, b"write");
    assert_eq!(engine.seq_no.load(Ordering::SeqCst), 0);
    Ok(())
}
