//! Property-based tests for dedup idempotence and version-chain shape.

use proptest::prelude::*;

use kyrofacts::{
    CandidateFact, ConsolidateOptions, FactEngine, FactFilter, MatchStrategy, Scope, StoreOptions,
};

fn triple_fact(confidence: u8) -> CandidateFact {
    CandidateFact::builder()
        .fact("user prefers tabs")
        .triple("user", "prefers", "tabs")
        .confidence(confidence)
        .build()
        .unwrap()
}

fn arb_strategy() -> impl Strategy<Value = MatchStrategy> {
    prop_oneof![Just(MatchStrategy::Exact), Just(MatchStrategy::Structural)]
}

proptest! {
    #[test]
    fn non_increasing_restatements_keep_one_fact(
        first in 0u8..=100,
        drops in prop::collection::vec(0u8..=100, 1..12),
        strategy in arb_strategy(),
    ) {
        let engine = FactEngine::in_memory();
        let scope = Scope::new("p").unwrap();
        let options = StoreOptions::strategy(strategy);

        let original = engine.store(triple_fact(first), &scope, &options).unwrap();
        let mut ceiling = first;
        for d in drops {
            ceiling = ceiling.saturating_sub(d % 10);
            let outcome = engine.store(triple_fact(ceiling), &scope, &options).unwrap();
            prop_assert!(!outcome.was_updated);
            prop_assert!(outcome.matched_existing);
        }

        let current = engine.list(&scope, &FactFilter::new()).unwrap();
        prop_assert_eq!(current.len(), 1);
        prop_assert_eq!(current[0].fact_id, original.fact.fact_id);
        prop_assert_eq!(current[0].confidence.value(), first);
        prop_assert_eq!(current[0].version, 1);
    }

    #[test]
    fn chain_is_monotonic_and_tracks_running_max(
        confidences in prop::collection::vec(0u8..=100, 1..25),
    ) {
        let engine = FactEngine::in_memory();
        let scope = Scope::new("p").unwrap();
        let options = StoreOptions::default();

        let mut lineage = None;
        let mut expected_versions = 0u32;
        let mut best: Option<u8> = None;
        for &c in &confidences {
            let outcome = engine.store(triple_fact(c), &scope, &options).unwrap();
            if best.map_or(true, |b| c > b) {
                expected_versions += 1;
                best = Some(c);
            }
            prop_assert_eq!(*lineage.get_or_insert(outcome.fact.fact_id), outcome.fact.fact_id);
        }

        let id = lineage.unwrap();
        let history = engine.history(&scope, id).unwrap();
        prop_assert_eq!(history.len() as u32, expected_versions);
        for (i, fact) in history.iter().enumerate() {
            prop_assert_eq!(fact.version as usize, i + 1);
            prop_assert_eq!(fact.fact_id, id);
            if i > 0 {
                prop_assert_eq!(fact.supersedes, Some(history[i - 1].fact_ref()));
                prop_assert!(fact.confidence > history[i - 1].confidence);
                prop_assert!(fact.created_at >= history[i - 1].created_at);
            }
        }
        let last = history.last().unwrap();
        prop_assert!(last.is_current());
        prop_assert_eq!(history.iter().filter(|f| f.is_current()).count(), 1);
        let fetched = engine.version(&scope, id, last.version).unwrap();
        prop_assert_eq!(fetched.as_ref(), Some(last));
        prop_assert_eq!(Some(last.confidence.value()), best);
    }

    #[test]
    fn consolidation_leaves_one_fact_per_identity(
        confidences in prop::collection::vec(0u8..=100, 1..10),
    ) {
        let engine = FactEngine::in_memory();
        let scope = Scope::new("p").unwrap();
        let unmatched = StoreOptions::strategy(MatchStrategy::None);
        for &c in &confidences {
            engine.store(triple_fact(c), &scope, &unmatched).unwrap();
        }

        let report = engine.consolidate(&scope, &ConsolidateOptions::default()).unwrap();
        prop_assert_eq!(report.merged, confidences.len() - 1);
        let current = engine.list(&scope, &FactFilter::new()).unwrap();
        prop_assert_eq!(current.len(), 1);

        let sum: u32 = confidences.iter().map(|&c| u32::from(c)).sum();
        let n = confidences.len() as u32;
        let average = (2 * sum + n) / (2 * n);
        prop_assert_eq!(u32::from(current[0].confidence.value()), average);

        let again = engine.consolidate(&scope, &ConsolidateOptions::default()).unwrap();
        prop_assert!(again.is_noop());
    }
}
