//! Integration tests exercising the public `Engine` API end to end —
//! scenarios and properties from the storage engine's contract that don't
//! fit naturally as a single module's unit tests.

use lsm_engine::{CancellationToken, Error, LSMBuilder};

fn open(segment_size: usize, capacity: usize, sparse_offset: usize, merge_threshold: usize) -> (tempfile::TempDir, lsm_engine::Engine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = LSMBuilder::new()
        .persist_data(true)
        .segment_size(segment_size)
        .sparse_offset(sparse_offset)
        .inmemory_capacity(capacity)
        .merge_threshold(merge_threshold)
        .base_path(dir.path())
        .build()
        .unwrap();
    (dir, engine)
}

#[test]
fn reopening_a_directory_recovers_flushed_segments() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    {
        let engine = LSMBuilder::new()
            .persist_data(true)
            .segment_size(100)
            .inmemory_capacity(2)
            .base_path(dir.path())
            .build()?;
        for i in 0..10 {
            engine.insert(format!("k{i:02}"), format!("v{i}"))?;
        }
        engine.close()?;
    }

    let reopened = LSMBuilder::new()
        .persist_data(true)
        .segment_size(100)
        .inmemory_capacity(2)
        .base_path(dir.path())
        .build()?;

    let cancel = CancellationToken::new();
    for i in 0..10 {
        assert_eq!(reopened.get(&format!("k{i:02}"), &cancel)?, Some(format!("v{i}")));
    }
    Ok(())
}

#[test]
fn overwrites_always_return_the_most_recent_value() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (_dir, engine) = open(10, 2, 2, 3);
    let cancel = CancellationToken::new();
    for round in 0..5 {
        engine.insert("k1".to_owned(), format!("v{round}"))?;
        assert_eq!(engine.get("k1", &cancel)?, Some(format!("v{round}")));
    }
    Ok(())
}

#[test]
fn deleted_keys_stay_absent_across_a_merge() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (_dir, engine) = open(100, 2, 2, 3);
    for i in 0..20 {
        engine.insert(format!("k{i:02}"), format!("v{i}"))?;
    }
    engine.delete("k05")?;
    engine.delete("k10")?;
    for i in 20..30 {
        engine.insert(format!("k{i:02}"), format!("v{i}"))?;
    }

    let cancel = CancellationToken::new();
    assert_eq!(engine.get("k05", &cancel)?, None);
    assert_eq!(engine.get("k10", &cancel)?, None);
    assert_eq!(engine.get("k15", &cancel)?, Some("v15".to_owned()));
    Ok(())
}

#[test]
fn absent_keys_are_reported_absent() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (_dir, engine) = open(10, 2, 2, 3);
    engine.insert("k1".to_owned(), "v1".to_owned())?;
    assert_eq!(engine.get("does-not-exist", &CancellationToken::new())?, None);
    Ok(())
}

#[test]
fn rejects_whitespace_only_keys() {
    let (_dir, engine) = open(10, 2, 2, 3);
    let result = engine.insert("   ".to_owned(), "v".to_owned());
    assert!(matches!(result, Err(Error::Validation { .. })));
}

#[test]
fn merge_shrinks_segment_count_without_losing_data() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (_dir, engine) = open(100, 2, 2, 3);
    for i in 0..30 {
        engine.insert(format!("k{i:02}"), format!("v{i}"))?;
    }
    assert!(engine.stats().segment_count < 15);

    let cancel = CancellationToken::new();
    for i in 0..30 {
        assert_eq!(engine.get(&format!("k{i:02}"), &cancel)?, Some(format!("v{i}")));
    }
    Ok(())
}

#[test]
fn non_persisted_segments_are_removed_on_close() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let engine = LSMBuilder::new()
        .persist_data(false)
        .segment_size(100)
        .inmemory_capacity(1)
        .base_path(dir.path())
        .build()?;
    engine.insert("k1".to_owned(), "v1".to_owned())?;
    engine.insert("k2".to_owned(), "v2".to_owned())?;
    engine.close()?;

    let remaining: Vec<_> = std::fs::read_dir(dir.path())?.collect();
    assert!(remaining.is_empty());
    Ok(())
}

#[test]
fn bloom_filter_never_false_negatives_many_keys() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (_dir, engine) = open(200, 50, 10, 3);
    let cancel = CancellationToken::new();
    for i in 0..500 {
        engine.insert(format!("key-{i}"), format!("value-{i}"))?;
    }
    for i in 0..500 {
        assert_eq!(engine.get(&format!("key-{i}"), &cancel)?, Some(format!("value-{i}")));
    }
    Ok(())
}

#[test]
fn cancellation_during_get_aborts_without_panicking() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (_dir, engine) = open(100, 1, 2, 100);
    engine.insert("k1".to_owned(), "v1".to_owned())?;
    engine.insert("k2".to_owned(), "v2".to_owned())?;

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(engine.get("k1", &cancel), Err(Error::Cancelled)));
    Ok(())
}
