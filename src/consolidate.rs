//! Batch consolidation of near-duplicates that real-time matching missed.
//!
//! Facts stored under the `none` strategy, or before a strategy change, can
//! leave several current facts for one identity. Consolidation groups them by
//! the same rule the matcher uses, keeps the most confident fact of each
//! group at the group's average confidence, and supersedes the rest.
//!
//! Members are retired before the keeper is advanced, each pointing at the
//! keeper version about to be written. A run interrupted between the two
//! leaves those pointers pending; the next run folds the pending members back
//! into the keeper's average instead of averaging the keeper twice.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::VersionChain;
use crate::confidence::Confidence;
use crate::config::MatchStrategy;
use crate::embedding::cosine_similarity;
use crate::fact::{Fact, FactId, FactRef, Scope};
use crate::matcher::{newest_first, Strategy};
use crate::storage::{RecordStore, Retirement, StorageError};

/// Options for [`FactEngine::consolidate`](crate::FactEngine::consolidate).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidateOptions {
    /// Grouping rule; defaults to the engine's default strategy.
    #[serde(default)]
    pub strategy: Option<MatchStrategy>,
    /// Similarity threshold for semantic grouping.
    #[serde(default)]
    pub threshold: Option<f32>,
    /// Recording time for averaged keepers; defaults to now.
    #[serde(default)]
    pub tx_time: Option<DateTime<Utc>>,
}

/// A group that could not be fully consolidated.
#[derive(Debug)]
pub struct GroupFailure {
    /// The fact chosen to survive.
    pub keeper: FactId,
    /// Every fact in the group, keeper first.
    pub members: Vec<FactId>,
    /// What went wrong.
    pub error: StorageError,
}

/// Outcome of a consolidation run.
#[derive(Debug, Default)]
pub struct ConsolidationReport {
    /// Duplicate groups found, counting keepers left unfinished by an earlier run.
    pub groups: usize,
    /// Facts superseded into a keeper.
    pub merged: usize,
    /// Keepers whose confidence changed to the group average.
    pub averaged: usize,
    /// Groups that failed; other groups are unaffected.
    pub failures: Vec<GroupFailure>,
}

impl ConsolidationReport {
    /// True when nothing was changed and nothing failed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.merged == 0 && self.averaged == 0 && self.failures.is_empty()
    }
}

/// Runs consolidation passes over one scope.
pub struct Consolidator<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> Consolidator<'a> {
    /// Create a consolidator over a record store.
    #[must_use]
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Consolidate every duplicate group in `scope`.
    ///
    /// # Errors
    /// Fails only if the initial scan fails; per-group failures are reported
    /// in [`ConsolidationReport::failures`].
    pub fn run(
        &self,
        scope: &Scope,
        strategy: &Strategy<'_>,
        tx_time: DateTime<Utc>,
    ) -> Result<ConsolidationReport, StorageError> {
        let mut report = ConsolidationReport::default();
        if matches!(strategy, Strategy::None) {
            return Ok(report);
        }

        let current = self.store.scan(scope, &|f| f.is_current())?;
        let mut pending = pending_merges(self.store.scan(scope, &merged_away)?);
        let groups = group_duplicates(current, &pending, strategy);
        report.groups = groups.len();

        let chain = VersionChain::new(self.store);
        for group in groups {
            let keeper = group[0].fact_id;
            let folded = pending.remove(&successor_ref(&group[0])).unwrap_or_default();
            if let Err(error) = merge_group(&chain, scope, &group, &folded, tx_time, &mut report) {
                warn!(
                    scope = %scope,
                    keeper = %keeper,
                    error = %error,
                    "consolidation group failed"
                );
                report.failures.push(GroupFailure {
                    keeper,
                    members: group.iter().map(|f| f.fact_id).collect(),
                    error,
                });
            }
        }

        info!(
            scope = %scope,
            strategy = %strategy.kind(),
            groups = report.groups,
            merged = report.merged,
            averaged = report.averaged,
            failed = report.failures.len(),
            "consolidation finished"
        );
        Ok(report)
    }
}

fn same_identity(seed: &Fact, other: &Fact, strategy: &Strategy<'_>) -> bool {
    match strategy {
        Strategy::None => false,
        Strategy::Exact | Strategy::Structural => strategy
            .identity_key(seed.text_key(), seed.triple_key())
            .is_some_and(|key| other.identity_keys().contains(&key)),
        Strategy::Semantic { threshold, .. } => match (&seed.embedding, &other.embedding) {
            (Some(a), Some(b)) => cosine_similarity(a, b) >= *threshold,
            _ => false,
        },
    }
}

/// A head retired into another lineage.
fn merged_away(fact: &Fact) -> bool {
    fact.superseded_by
        .is_some_and(|next| next.fact_id != fact.fact_id)
}

/// The version `fact` would advance to.
fn successor_ref(fact: &Fact) -> FactRef {
    FactRef::new(fact.fact_id, fact.version + 1)
}

/// Merged-away heads keyed by the keeper version they point at.
fn pending_merges(merged: Vec<Fact>) -> HashMap<FactRef, Vec<Fact>> {
    let mut pending: HashMap<FactRef, Vec<Fact>> = HashMap::new();
    for fact in merged {
        if let Some(target) = fact.superseded_by {
            pending.entry(target).or_default().push(fact);
        }
    }
    pending
}

/// Greedy grouping seeded from the most confident fact; keeper first.
///
/// A current fact that pending members point past forms a group of its own,
/// so an interrupted merge is finished.
fn group_duplicates(
    mut facts: Vec<Fact>,
    pending: &HashMap<FactRef, Vec<Fact>>,
    strategy: &Strategy<'_>,
) -> Vec<Vec<Fact>> {
    facts.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| newest_first(a, b))
    });

    let mut assigned = vec![false; facts.len()];
    let mut groups = Vec::new();
    for i in 0..facts.len() {
        if assigned[i] {
            continue;
        }
        let mut members = vec![i];
        for j in (i + 1)..facts.len() {
            if !assigned[j] && same_identity(&facts[i], &facts[j], strategy) {
                members.push(j);
            }
        }
        if members.len() > 1 {
            for &m in &members {
                assigned[m] = true;
            }
            groups.push(members.iter().map(|&m| facts[m].clone()).collect());
        }
    }

    for (i, fact) in facts.iter().enumerate() {
        if !assigned[i] && pending.contains_key(&successor_ref(fact)) {
            groups.push(vec![fact.clone()]);
        }
    }
    groups
}

fn merge_group(
    chain: &VersionChain<'_>,
    scope: &Scope,
    group: &[Fact],
    folded: &[Fact],
    tx_time: DateTime<Utc>,
    report: &mut ConsolidationReport,
) -> Result<(), StorageError> {
    let Some((keeper, rest)) = group.split_first() else {
        return Ok(());
    };
    let average = Confidence::average(group.iter().chain(folded).map(|f| f.confidence))
        .unwrap_or(keeper.confidence);

    // Folded members already point at the successor, so it must be written.
    let advance = average != keeper.confidence || !folded.is_empty();
    let target = if advance {
        successor_ref(keeper)
    } else {
        keeper.fact_ref()
    };

    for other in rest {
        chain.retire(scope, other, Retirement::SupersededBy { by: target })?;
        report.merged += 1;
    }

    if advance {
        let draft = Fact {
            confidence: average,
            created_at: tx_time,
            ..keeper.clone()
        };
        chain.advance(scope, keeper, draft)?;
        report.averaged += 1;
    }
    debug!(
        scope = %scope,
        keeper = %target,
        merged = rest.len(),
        folded = folded.len(),
        confidence = average.value(),
        "merged duplicate group"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::embedding::{Embedder, LexicalEmbedder};
    use crate::fact::CandidateFact;
    use crate::storage::{InMemoryRecordStore, WriteCondition};

    fn scope() -> Scope {
        Scope::new("space").unwrap()
    }

    fn put(store: &InMemoryRecordStore, text: &str, confidence: u8, minutes_ago: i64) -> Fact {
        let rec = CandidateFact::builder()
            .fact(text)
            .confidence(confidence)
            .build()
            .unwrap()
            .into_record(
                FactId::new(),
                scope(),
                1,
                None,
                Utc::now() - Duration::minutes(minutes_ago),
            );
        store
            .put(&scope(), rec.clone(), WriteCondition::Create { claim: None })
            .unwrap();
        rec
    }

    #[test]
    fn merges_and_averages() {
        let store = InMemoryRecordStore::new();
        let a = put(&store, "likes tea", 90, 3);
        let b = put(&store, "Likes  tea", 60, 2);
        let c = put(&store, "likes TEA", 61, 1);
        let lone = put(&store, "owns a bike", 50, 1);

        let report = Consolidator::new(&store)
            .run(&scope(), &Strategy::Exact, Utc::now())
            .unwrap();
        assert_eq!(report.groups, 1);
        assert_eq!(report.merged, 2);
        assert_eq!(report.averaged, 1);
        assert!(report.failures.is_empty());

        // (90 + 60 + 61) / 3 = 70.33
        let keeper = store.get(&scope(), a.fact_id).unwrap().unwrap();
        assert_eq!(keeper.version, 2);
        assert_eq!(keeper.confidence.value(), 70);
        for dup in [&b, &c] {
            let head = store.get(&scope(), dup.fact_id).unwrap().unwrap();
            assert_eq!(head.superseded_by, Some(keeper.fact_ref()));
        }
        assert!(store.get(&scope(), lone.fact_id).unwrap().unwrap().is_current());
    }

    #[test]
    fn second_run_is_noop() {
        let store = InMemoryRecordStore::new();
        put(&store, "likes tea", 80, 2);
        put(&store, "likes tea", 40, 1);
        let consolidator = Consolidator::new(&store);
        let first = consolidator.run(&scope(), &Strategy::Exact, Utc::now()).unwrap();
        assert_eq!(first.merged, 1);
        let second = consolidator.run(&scope(), &Strategy::Exact, Utc::now()).unwrap();
        assert_eq!(second.groups, 0);
        assert!(second.is_noop());
    }

    #[test]
    fn equal_average_keeps_keeper_version() {
        let store = InMemoryRecordStore::new();
        let a = put(&store, "likes tea", 70, 2);
        put(&store, "likes tea", 70, 1);
        let report = Consolidator::new(&store)
            .run(&scope(), &Strategy::Exact, Utc::now())
            .unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(report.averaged, 0);
        // Equal confidence keeps the more recent fact.
        let heads = store.scan(&scope(), &|f| f.is_current()).unwrap();
        assert_eq!(heads.len(), 1);
        assert_ne!(heads[0].fact_id, a.fact_id);
        assert_eq!(heads[0].version, 1);
    }

    #[test]
    fn unfinished_merge_is_folded_into_keeper() {
        let store = InMemoryRecordStore::new();
        let keeper = put(&store, "likes tea", 90, 3);
        let merged = put(&store, "likes tea", 50, 2);
        // Retired toward keeper version 2, which was never written.
        store
            .retire(
                &scope(),
                merged.fact_id,
                1,
                Retirement::SupersededBy {
                    by: FactRef::new(keeper.fact_id, 2),
                },
            )
            .unwrap();

        let consolidator = Consolidator::new(&store);
        let report = consolidator.run(&scope(), &Strategy::Exact, Utc::now()).unwrap();
        assert_eq!(report.groups, 1);
        assert_eq!(report.merged, 0);
        assert_eq!(report.averaged, 1);

        let head = store.get(&scope(), keeper.fact_id).unwrap().unwrap();
        assert_eq!(head.version, 2);
        assert_eq!(head.confidence.value(), 70);
        assert!(consolidator
            .run(&scope(), &Strategy::Exact, Utc::now())
            .unwrap()
            .is_noop());
    }

    #[test]
    fn none_strategy_groups_nothing() {
        let store = InMemoryRecordStore::new();
        put(&store, "likes tea", 80, 2);
        put(&store, "likes tea", 40, 1);
        let report = Consolidator::new(&store)
            .run(&scope(), &Strategy::None, Utc::now())
            .unwrap();
        assert_eq!(report.groups, 0);
        assert_eq!(store.scan(&scope(), &|f| f.is_current()).unwrap().len(), 2);
    }

    #[test]
    fn semantic_groups_by_embedding() {
        let store = InMemoryRecordStore::new();
        let embedder = LexicalEmbedder::default();
        for (text, confidence) in [("user drinks green tea", 80), ("User drinks green tea!", 60)] {
            let rec = CandidateFact::builder()
                .fact(text)
                .confidence(confidence)
                .embedding(embedder.embed(text).unwrap())
                .build()
                .unwrap()
                .into_record(FactId::new(), scope(), 1, None, Utc::now());
            store
                .put(&scope(), rec, WriteCondition::Create { claim: None })
                .unwrap();
        }
        put(&store, "user drinks green tea", 10, 0);

        let strategy = Strategy::Semantic {
            embedder: &embedder,
            threshold: 0.9,
        };
        let report = Consolidator::new(&store)
            .run(&scope(), &strategy, Utc::now())
            .unwrap();
        assert_eq!(report.groups, 1);
        assert_eq!(report.merged, 1);
        assert_eq!(store.scan(&scope(), &|f| f.is_current()).unwrap().len(), 2);
    }
}
