use super::helpers::{count_segments, opts, small_segment_opts};
use crate::{Backend, Engine, EngineError, Options, Result};
use std::fs;
use std::sync::atomic::Ordering;
use tempfile::tempdir;

// --------------------- Plain reopen ---------------------

#[test]
fn state_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(opts(dir.path()))?;
        engine.put(b"apple", b"1")?;
        engine.put(b"banana", b"2")?;
        engine.delete(b"apple")?;
        assert!(matches!(engine.get(b"apple"), Err(EngineError::KeyNotFound)));
        assert_eq!(engine.get(b"banana")?, b"2");
    }

    let engine = Engine::open(opts(dir.path()))?;
    assert!(matches!(engine.get(b"apple"), Err(EngineError::KeyNotFound)));
    assert_eq!(engine.get(b"banana")?, b"2");
    assert_eq!(engine.len()?, 1);
    Ok(())
}

#[test]
fn synced_writes_survive_an_unclean_stop() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(Options {
            sync_each_write: true,
            ..opts(dir.path())
        })?;
        for i in 0..20u32 {
            engine.put(format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes())?;
        }
        engine.delete(b"k05")?;
        // dropped without close(): every acknowledged write was fsynced
        std::mem::forget(engine);
    }

    // the lock file is still held by the forgotten engine's descriptor, so
    // drop it to mimic the dead process releasing its lock
    fs::remove_file(dir.path().join(crate::FLOCK_FILE_NAME))?;

    let engine = Engine::open(opts(dir.path()))?;
    assert_eq!(engine.len()?, 19);
    assert_eq!(engine.get(b"k19")?, b"v19");
    assert!(matches!(engine.get(b"k05"), Err(EngineError::KeyNotFound)));
    Ok(())
}

#[test]
fn appends_continue_in_the_recovered_segment() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(opts(dir.path()))?;
        engine.put(b"before", b"restart")?;
    }
    {
        let engine = Engine::open(opts(dir.path()))?;
        engine.put(b"after", b"restart")?;
        assert_eq!(count_segments(dir.path()), 1);
    }

    let engine = Engine::open(opts(dir.path()))?;
    assert_eq!(engine.get(b"before")?, b"restart");
    assert_eq!(engine.get(b"after")?, b"restart");
    Ok(())
}

#[test]
fn rollover_state_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(small_segment_opts(dir.path(), 256))?;
        for i in 0..40u32 {
            engine.put(format!("k{i:02}").as_bytes(), format!("v{i:02}").as_bytes())?;
        }
    }
    let segments = count_segments(dir.path());
    assert!(segments >= 2);

    let engine = Engine::open(small_segment_opts(dir.path(), 256))?;
    assert_eq!(engine.len()?, 40);
    for i in 0..40u32 {
        assert_eq!(
            engine.get(format!("k{i:02}").as_bytes())?,
            format!("v{i:02}").into_bytes()
        );
    }
    assert_eq!(count_segments(dir.path()), segments);
    Ok(())
}

// --------------------- Corruption handling ---------------------

#[test]
fn corruption_mid_segment_fails_open_but_torn_tail_does_not() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(opts(dir.path()))?;
        for i in 0..10u32 {
            engine.put(format!("key{i}").as_bytes(), b"some value bytes")?;
        }
    }
    let segment = dir.path().join("000000000.data");
    let pristine = fs::read(&segment)?;

    // flip one byte in the middle of the segment
    let mut corrupted = pristine.clone();
    let mid = corrupted.len() / 2;
    corrupted[mid] ^= 0xff;
    fs::write(&segment, &corrupted)?;
    match Engine::open(opts(dir.path())) {
        Err(EngineError::InvalidCrc) | Err(EngineError::DirectoryCorrupted(_)) => {}
        other => panic!("expected a corruption error, got {other:?}"),
    }

    // restore, append one record, then tear its tail off
    fs::write(&segment, &pristine)?;
    {
        let engine = Engine::open(opts(dir.path()))?;
        engine.put(b"torn", b"never fully written")?;
    }
    let full = fs::read(&segment)?;
    fs::write(&segment, &full[..full.len() - 3])?;

    let engine = Engine::open(opts(dir.path()))?;
    assert!(matches!(engine.get(b"torn"), Err(EngineError::KeyNotFound)));
    assert_eq!(engine.get(b"key9")?, b"some value bytes");
    Ok(())
}

#[test]
fn unparseable_segment_name_is_a_corrupt_directory() -> Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("not-a-number.data"), b"")?;
    assert!(matches!(
        Engine::open(opts(dir.path())),
        Err(EngineError::DirectoryCorrupted(_))
    ));
    Ok(())
}

// --------------------- I/O backends at startup ---------------------

#[test]
fn mmap_and_standard_startup_agree() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = Engine::open(opts(dir.path()))?;
        for i in 0..25u32 {
            engine.put(format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes())?;
        }
    }

    for mmap in [true, false] {
        let engine = Engine::open(Options {
            mmap_at_startup: mmap,
            ..opts(dir.path())
        })?;
        assert_eq!(engine.len()?, 25);
        assert_eq!(engine.get(b"k13")?, b"v13");
        // writes work after the scan regardless of how it was read
        engine.put(b"k13", b"rewritten")?;
        assert_eq!(engine.get(b"k13")?, b"rewritten");
        drop(engine);
    }
    Ok(())
}

// --------------------- Disk-resident keydir ---------------------

#[test]
fn bptree_reopen_skips_the_data_scan() -> Result<()> {
    let dir = tempdir()?;
    let bptree_opts = Options {
        keydir: Backend::Bptree,
        ..opts(dir.path())
    };
    {
        let engine = Engine::open(bptree_opts.clone())?;
        engine.put(b"persisted", b"index")?;
        engine.delete(b"persisted")?;
        engine.put(b"kept", b"value")?;
        engine.close()?;
    }

    let engine = Engine::open(bptree_opts)?;
    assert_eq!(engine.get(b"kept")?, b"value");
    assert!(matches!(
        engine.get(b"persisted"),
        Err(EngineError::KeyNotFound)
    ));
    // appends continue at the right offset even though no scan ran
    engine.put(b"new", b"write")?;
    assert_eq!(engine.get(b"new")?, b"write");
    Ok(())
}

#[test]
fn bptree_recovers_sequence_counter_without_seq_no_file() -> Result<()> {
    let dir = tempdir()?;
    let bptree_opts = Options {
        keydir: Backend::Bptree,
        ..opts(dir.path())
    };
    {
        let engine = Engine::open(bptree_opts.clone())?;
        let batch = engine.new_batch(crate::BatchOptions::default());
        batch.put(b"a", b"1")?;
        batch.commit()?;
        let batch = engine.new_batch(crate::BatchOptions::default());
        batch.put(b"b", b"2")?;
        batch.commit()?;
        engine.close()?;
    }

    // simulate a crash that never persisted the counter
    fs::remove_file(dir.path().join(datafile::SEQ_NO_FILE_NAME))?;

    let engine = Engine::open(bptree_opts)?;
    // recovered from the record keys: the next batch must get seq 3
    assert_eq!(engine.seq_no.load(Ordering::SeqCst), 2);
    let batch = engine.new_batch(crate::BatchOptions::default());
    batch.put(b"c", b"3")?;
    batch.commit()?;
    assert_eq!(engine.seq_no.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn stale_seq_no_is_replaced_on_every_close() -> Result<()> {
    let dir = tempdir()?;
    let bptree_opts = Options {
        keydir: Backend::Bptree,
        ..opts(dir.path())
    };
    for expected in 1..=3u64 {
        let engine = Engine::open(bptree_opts.clone())?;
        let batch = engine.new_batch(crate::BatchOptions::default());
        batch.put(b"k", b"v")?;
        batch.commit()?;
        engine.close()?;
        drop(engine);

        let engine = Engine::open(bptree_opts.clone())?;
        assert_eq!(engine.seq_no.load(Ordering::SeqCst), expected);
        engine.close()?;
    }
    Ok(())
}
