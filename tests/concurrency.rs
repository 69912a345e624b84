//! Racing writers on one identity must converge on one current version.

use std::sync::{Arc, Barrier};
use std::thread;

use kyrofacts::{
    CandidateFact, EngineConfig, FactEngine, FactFilter, InMemoryRecordStore, Scope, StoreOptions,
};

fn alice(confidence: u8) -> CandidateFact {
    CandidateFact::builder()
        .fact("Alice works at ACME")
        .triple("alice", "works_at", "acme")
        .confidence(confidence)
        .build()
        .unwrap()
}

#[test]
fn concurrent_identical_stores_create_one_lineage() {
    for _ in 0..20 {
        let engine = FactEngine::in_memory();
        let scope = Scope::new("S").unwrap();
        let barrier = Barrier::new(5);

        let outcomes: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..5)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        engine.store(alice(90), &scope, &StoreOptions::default())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let outcomes: Vec<_> = outcomes.into_iter().map(Result::unwrap).collect();
        let lineage = outcomes[0].fact.fact_id;
        assert!(outcomes.iter().all(|o| o.fact.fact_id == lineage));
        assert_eq!(outcomes.iter().filter(|o| !o.matched_existing).count(), 1);

        let all = engine.list(&scope, &FactFilter::new().include_history(true)).unwrap();
        assert_eq!(all.len(), 1, "exactly one version of one lineage");
        assert!(all[0].is_current());
        assert_eq!(all[0].version, 1);
    }
}

#[test]
fn concurrent_revisions_keep_one_current_head() {
    let config = EngineConfig {
        max_write_attempts: 16,
        ..EngineConfig::default()
    };
    let engine = FactEngine::new(Arc::new(InMemoryRecordStore::new()), config).unwrap();
    let scope = Scope::new("S").unwrap();
    let seed = engine.store(alice(50), &scope, &StoreOptions::default()).unwrap();
    let barrier = Barrier::new(5);

    thread::scope(|s| {
        for confidence in [60u8, 70, 80, 90, 95] {
            let engine = &engine;
            let scope = &scope;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                engine
                    .store(alice(confidence), scope, &StoreOptions::default())
                    .unwrap();
            });
        }
    });

    let current = engine.list(&scope, &FactFilter::new()).unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].fact_id, seed.fact.fact_id);
    assert_eq!(current[0].confidence.value(), 95);

    let history = engine.history(&scope, seed.fact.fact_id).unwrap();
    for (i, version) in history.iter().enumerate() {
        assert_eq!(version.version as usize, i + 1);
    }
    assert_eq!(history.iter().filter(|f| f.is_current()).count(), 1);
    let confidences: Vec<u8> = history.iter().map(|f| f.confidence.value()).collect();
    assert!(confidences.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn concurrent_stores_in_different_scopes_are_independent() {
    let engine = FactEngine::in_memory();
    let scopes: Vec<Scope> = (0..4).map(|i| Scope::new(format!("tenant-{i}")).unwrap()).collect();

    thread::scope(|s| {
        for scope in &scopes {
            let engine = &engine;
            s.spawn(move || {
                for confidence in [10u8, 20, 30] {
                    engine.store(alice(confidence), scope, &StoreOptions::default()).unwrap();
                }
            });
        }
    });

    for scope in &scopes {
        let current = engine.list(scope, &FactFilter::new()).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].version, 3);
    }
}
