//! Crash recovery tests for the persistent record store.
//!
//! These tests verify that:
//! - Engine state (chains, invalidations, purges) survives a restart
//! - A torn WAL tail is dropped and the intact prefix replays
//! - Compaction preserves every lineage

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::Arc;

use kyrofacts::storage::persistent::{open_store, PersistentConfig};
use kyrofacts::{
    CandidateFact, EngineConfig, FactEngine, FactFilter, MatchStrategy, Scope, StoreOptions,
};
use tempfile::tempdir;

fn config() -> Option<PersistentConfig> {
    Some(PersistentConfig {
        sync_on_write: false,
        ..PersistentConfig::default()
    })
}

// Plain-text facts only deduplicate under exact matching.
fn text_matching() -> EngineConfig {
    EngineConfig {
        default_strategy: MatchStrategy::Exact,
        ..EngineConfig::default()
    }
}

fn engine_at(path: &std::path::Path) -> FactEngine {
    let store = open_store(path, config()).unwrap();
    FactEngine::new(Arc::new(store), text_matching()).unwrap()
}

fn fact(text: &str, confidence: u8) -> CandidateFact {
    CandidateFact::builder()
        .fact(text)
        .confidence(confidence)
        .build()
        .unwrap()
}

#[test]
fn engine_state_survives_restart() {
    let dir = tempdir().unwrap();
    let scope = Scope::new("agent").unwrap();
    let (kept, dropped, erased);
    {
        let engine = engine_at(dir.path());
        kept = engine.store(fact("likes tea", 60), &scope, &StoreOptions::default()).unwrap();
        engine.store(fact("likes tea", 80), &scope, &StoreOptions::default()).unwrap();
        dropped = engine.store(fact("lives in paris", 70), &scope, &StoreOptions::default()).unwrap();
        engine.invalidate(&scope, dropped.fact.fact_id).unwrap();
        erased = engine.store(fact("secret", 70), &scope, &StoreOptions::default()).unwrap();
        engine.purge(&scope, erased.fact.fact_id).unwrap();
    }

    let engine = engine_at(dir.path());
    let history = engine.history(&scope, kept.fact.fact_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].confidence.value(), 80);
    assert!(engine.get(&scope, dropped.fact.fact_id).unwrap().is_none());
    assert!(engine.history(&scope, erased.fact.fact_id).unwrap().is_empty());

    // Identity index is rebuilt: the restatement still deduplicates.
    let again = engine.store(fact("Likes tea", 10), &scope, &StoreOptions::default()).unwrap();
    assert!(again.matched_existing);
    assert_eq!(again.fact.fact_id, kept.fact.fact_id);
}

#[test]
fn torn_tail_is_dropped_on_restart() {
    let dir = tempdir().unwrap();
    let scope = Scope::new("agent").unwrap();
    {
        let engine = engine_at(dir.path());
        for i in 0..5 {
            engine
                .store(fact(&format!("fact number {i}"), 50), &scope, &StoreOptions::default())
                .unwrap();
        }
    }

    let wal = dir.path().join("facts.wal");
    let len = fs::metadata(&wal).unwrap().len();
    let file = fs::OpenOptions::new().write(true).open(&wal).unwrap();
    file.set_len(len - 7).unwrap();
    drop(file);

    let engine = engine_at(dir.path());
    assert_eq!(engine.count(&scope, &FactFilter::new()).unwrap(), 4);
    engine
        .store(fact("after recovery", 50), &scope, &StoreOptions::default())
        .unwrap();
    drop(engine);

    let engine = engine_at(dir.path());
    assert_eq!(engine.count(&scope, &FactFilter::new()).unwrap(), 5);
}

#[test]
fn compaction_keeps_lineages() {
    let dir = tempdir().unwrap();
    let scope = Scope::new("agent").unwrap();
    let small = Some(PersistentConfig {
        sync_on_write: false,
        max_wal_size: 8 * 1024,
    });
    let first;
    {
        let store = open_store(dir.path(), small.clone()).unwrap();
        let engine = FactEngine::new(Arc::new(store), text_matching()).unwrap();
        first = engine.store(fact("counter", 0), &scope, &StoreOptions::default()).unwrap();
        for c in 1..=100u8 {
            engine.store(fact("counter", c), &scope, &StoreOptions::default()).unwrap();
        }
    }

    let store = open_store(dir.path(), small).unwrap();
    let engine = FactEngine::new(Arc::new(store), text_matching()).unwrap();
    let history = engine.history(&scope, first.fact.fact_id).unwrap();
    assert_eq!(history.len(), 101);
    assert_eq!(history.last().unwrap().confidence.value(), 100);
}

#[test]
fn directory_is_exclusive() {
    let dir = tempdir().unwrap();
    let _held = open_store(dir.path(), config()).unwrap();
    let err = open_store(dir.path(), config()).unwrap_err();
    assert!(err.is_dependency());
}
