//! End-to-end deduplication and belief-revision scenarios.

use kyrofacts::{
    Action, CandidateFact, FactEngine, FactFilter, FactRef, MatchStrategy, Scope, StoreOptions,
};

fn scope(name: &str) -> Scope {
    Scope::new(name).unwrap()
}

fn alice_works_at_acme(confidence: u8) -> CandidateFact {
    CandidateFact::builder()
        .fact("Alice works at ACME")
        .triple("alice", "works_at", "acme")
        .confidence(confidence)
        .build()
        .unwrap()
}

#[test]
fn stronger_restatement_creates_version_two() {
    let engine = FactEngine::in_memory();
    let s = scope("S");
    let options = StoreOptions::strategy(MatchStrategy::Structural);

    let first = engine.store(alice_works_at_acme(70), &s, &options).unwrap();
    let second = engine.store(alice_works_at_acme(95), &s, &options).unwrap();

    assert_eq!(engine.count(&s, &FactFilter::new()).unwrap(), 1);
    assert_eq!(second.fact.fact_id, first.fact.fact_id);
    assert_eq!(second.fact.version, 2);
    assert_eq!(second.fact.confidence.value(), 95);
    assert_eq!(second.fact.supersedes, Some(FactRef::new(first.fact.fact_id, 1)));
    assert!(second.was_updated);
    assert!(second.matched_existing);
}

#[test]
fn weaker_restatement_is_discarded() {
    let engine = FactEngine::in_memory();
    let s = scope("S");
    let options = StoreOptions::strategy(MatchStrategy::Structural);

    let first = engine.store(alice_works_at_acme(70), &s, &options).unwrap();
    let second = engine.store(alice_works_at_acme(60), &s, &options).unwrap();

    assert!(second.matched_existing);
    assert!(!second.was_updated);
    assert_eq!(second.action, Action::None);

    let current = engine.get(&s, first.fact.fact_id).unwrap().unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.confidence.value(), 70);
    assert_eq!(engine.count(&s, &FactFilter::new().include_history(true)).unwrap(), 1);
}

#[test]
fn repeated_stores_are_idempotent() {
    let engine = FactEngine::in_memory();
    let s = scope("S");
    for strategy in [MatchStrategy::Exact, MatchStrategy::Structural] {
        let s = scope(&format!("S-{strategy}"));
        let options = StoreOptions::strategy(strategy);
        let first = engine.store(alice_works_at_acme(80), &s, &options).unwrap();
        for confidence in [80, 75, 10, 0, 80] {
            let outcome = engine.store(alice_works_at_acme(confidence), &s, &options).unwrap();
            assert_eq!(outcome.fact.fact_id, first.fact.fact_id);
            assert!(!outcome.was_updated);
        }
        let all = engine.list(&s, &FactFilter::new()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].confidence.value(), 80);
    }
    assert_eq!(engine.count(&s, &FactFilter::new()).unwrap(), 0);
}

#[test]
fn identical_facts_in_different_scopes_never_match() {
    let engine = FactEngine::in_memory();
    let options = StoreOptions::default();
    let a = engine.store(alice_works_at_acme(70), &scope("A"), &options).unwrap();
    let b = engine.store(alice_works_at_acme(90), &scope("B"), &options).unwrap();

    assert_eq!(a.action, Action::Add);
    assert_eq!(b.action, Action::Add);
    assert_ne!(a.fact.fact_id, b.fact.fact_id);
    assert_eq!(b.fact.version, 1);
    assert_eq!(engine.get(&scope("A"), a.fact.fact_id).unwrap().unwrap().confidence.value(), 70);
    assert!(engine.get(&scope("B"), a.fact.fact_id).unwrap().is_none());
}

#[test]
fn none_strategy_always_adds() {
    let engine = FactEngine::in_memory();
    let s = scope("S");
    let options = StoreOptions::strategy(MatchStrategy::None);
    for _ in 0..3 {
        let outcome = engine.store(alice_works_at_acme(50), &s, &options).unwrap();
        assert_eq!(outcome.action, Action::Add);
        assert!(!outcome.matched_existing);
    }
    assert_eq!(engine.count(&s, &FactFilter::new()).unwrap(), 3);
}

#[test]
fn exact_strategy_compares_normalized_text() {
    let engine = FactEngine::in_memory();
    let s = scope("S");
    let options = StoreOptions::strategy(MatchStrategy::Exact);
    let plain = |text: &str, confidence| {
        CandidateFact::builder().fact(text).confidence(confidence).build().unwrap()
    };

    let first = engine.store(plain("User prefers  dark mode", 40), &s, &options).unwrap();
    let second = engine.store(plain("  user PREFERS dark mode", 60), &s, &options).unwrap();
    let other = engine.store(plain("user prefers light mode", 60), &s, &options).unwrap();

    assert_eq!(second.action, Action::Update);
    assert_eq!(second.fact.fact_id, first.fact.fact_id);
    assert_eq!(second.fact.fact, "  user PREFERS dark mode");
    assert_eq!(other.action, Action::Add);
}

#[test]
fn structural_match_ignores_phrasing_but_not_object() {
    let engine = FactEngine::in_memory();
    let s = scope("S");
    let options = StoreOptions::default();

    let first = engine.store(alice_works_at_acme(60), &s, &options).unwrap();
    let rephrased = CandidateFact::builder()
        .fact("ACME is Alice's employer")
        .triple("Alice", "works_at", "ACME")
        .confidence(65)
        .build()
        .unwrap();
    let moved = CandidateFact::builder()
        .fact("Alice works at Globex")
        .triple("alice", "works_at", "globex")
        .confidence(99)
        .build()
        .unwrap();

    let second = engine.store(rephrased, &s, &options).unwrap();
    assert_eq!(second.fact.fact_id, first.fact.fact_id);
    assert_eq!(second.fact.fact, "ACME is Alice's employer");

    let third = engine.store(moved, &s, &options).unwrap();
    assert_eq!(third.action, Action::Add);
    assert_eq!(engine.by_subject(&s, "alice", &Default::default()).unwrap().len(), 2);
}

#[test]
fn plain_text_never_overwrites_a_structured_fact() {
    let engine = FactEngine::in_memory();
    let s = scope("S");
    let options = StoreOptions::default();

    let structured = engine.store(alice_works_at_acme(70), &s, &options).unwrap();
    let plain = CandidateFact::builder()
        .fact("alice works at acme")
        .confidence(90)
        .build()
        .unwrap();
    let outcome = engine.store(plain, &s, &options).unwrap();

    assert_eq!(outcome.action, Action::Add);
    assert!(!outcome.matched_existing);
    assert_ne!(outcome.fact.fact_id, structured.fact.fact_id);

    let kept = engine.get(&s, structured.fact.fact_id).unwrap().unwrap();
    assert_eq!(kept.version, 1);
    assert_eq!(kept.subject.as_deref(), Some("alice"));
    let by_subject = engine.by_subject(&s, "alice", &Default::default()).unwrap();
    assert_eq!(by_subject.len(), 1);
    assert_eq!(by_subject[0].fact_id, structured.fact.fact_id);
}

#[test]
fn explicit_update_wins_even_when_less_confident() {
    let engine = FactEngine::in_memory();
    let s = scope("S");
    let stored = engine.store(alice_works_at_acme(90), &s, &StoreOptions::default()).unwrap();
    let changes = kyrofacts::FactChanges {
        object: Some("initech".to_string()),
        fact: Some("Alice works at Initech".to_string()),
        confidence: Some(kyrofacts::Confidence::new(40).unwrap()),
        ..Default::default()
    };
    let updated = engine.update(&s, stored.fact.fact_id, changes).unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.confidence.value(), 40);

    // The old triple no longer has a current holder.
    let again = engine.store(alice_works_at_acme(10), &s, &StoreOptions::default()).unwrap();
    assert_eq!(again.action, Action::Add);
}
