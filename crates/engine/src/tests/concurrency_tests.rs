use super::helpers::opts;
use crate::{BatchOptions, Engine, EngineError, Result};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

// --------------------- Concurrent writers + reader ---------------------

#[test]
fn eight_writers_one_reader() -> Result<()> {
    const WRITERS: usize = 8;
    const KEYS_PER_WRITER: usize = 1_000;

    let dir = tempdir()?;
    let engine = Arc::new(Engine::open(opts(dir.path()))?);

    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..KEYS_PER_WRITER {
                let key = format!("w{w}-k{i:04}");
                let value = format!("w{w}-v{i:04}");
                engine
                    .put(key.as_bytes(), value.as_bytes())
                    .expect("writer must not fail");
            }
        }));
    }

    // one reader hammering keys that are known to have been written
    let reader = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for round in 0..KEYS_PER_WRITER {
                let key = format!("w0-k{:04}", round % 50);
                match engine.get(key.as_bytes()) {
                    // either not written yet or the expected value; anything
                    // else is a torn read
                    Ok(value) => {
                        assert_eq!(value, format!("w0-v{:04}", round % 50).into_bytes())
                    }
                    Err(EngineError::KeyNotFound) => {}
                    Err(other) => panic!("reader saw {other}"),
                }
            }
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(engine.len()?, WRITERS * KEYS_PER_WRITER);
    for w in 0..WRITERS {
        for i in (0..KEYS_PER_WRITER).step_by(97) {
            let key = format!("w{w}-k{i:04}");
            assert_eq!(
                engine.get(key.as_bytes())?,
                format!("w{w}-v{i:04}").into_bytes()
            );
        }
    }
    Ok(())
}

// --------------------- Concurrent batch commits ---------------------

#[test]
fn parallel_batch_commits_are_serialized() -> Result<()> {
    const COMMITTERS: usize = 4;
    const BATCHES: usize = 25;

    let dir = tempdir()?;
    let engine = Arc::new(Engine::open(opts(dir.path()))?);

    let mut handles = Vec::new();
    for c in 0..COMMITTERS {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for b in 0..BATCHES {
                let batch = engine.new_batch(BatchOptions {
                    sync_on_commit: false,
                    ..BatchOptions::default()
                });
                for i in 0..5u32 {
                    batch
                        .put(format!("c{c}-b{b:02}-k{i}").as_bytes(), b"v")
                        .unwrap();
                }
                batch.commit().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // every batch got a distinct sequence number
    assert_eq!(
        engine
            .seq_no
            .load(std::sync::atomic::Ordering::SeqCst),
        (COMMITTERS * BATCHES) as u64
    );
    assert_eq!(engine.len()?, COMMITTERS * BATCHES * 5);

    // and all of it is durable across a reopen
    drop(engine);
    let engine = Engine::open(opts(dir.path()))?;
    assert_eq!(engine.len()?, COMMITTERS * BATCHES * 5);
    Ok(())
}

// --------------------- Readers during iteration ---------------------

#[test]
fn writes_do_not_invalidate_open_iterators() -> Result<()> {
    let dir = tempdir()?;
    let engine = Arc::new(Engine::open(opts(dir.path()))?);
    for i in 0..100u32 {
        engine.put(format!("k{i:03}").as_bytes(), b"v")?;
    }

    let iter_engine = Arc::clone(&engine);
    let walker = thread::spawn(move || {
        let mut iter = iter_engine.iter(crate::IterOptions::default()).unwrap();
        let mut count = 0;
        while iter.valid() {
            // values may have moved on; missing is acceptable, torn is not
            match iter.value() {
                Ok(_) | Err(EngineError::KeyNotFound) => count += 1,
                Err(other) => panic!("iterator saw {other}"),
            }
            iter.next();
        }
        count
    });

    for i in 0..100u32 {
        engine.put(format!("k{i:03}").as_bytes(), b"v2")?;
    }
    for i in (0..100u32).step_by(3) {
        engine.delete(format!("k{i:03}").as_bytes())?;
    }

    let walked = walker.join().unwrap();
    assert_eq!(walked, 100, "snapshot iterators walk their full key set");
    Ok(())
}
