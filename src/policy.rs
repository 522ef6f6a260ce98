//! Vote tally and acceptance policy.
//!
//! A suggestion qualifies for automatic acceptance once its supporting
//! vote count is `>= threshold`. When several pending suggestions on a unit
//! qualify at the same time, the one that reached the threshold first wins:
//! the instant a suggestion "reached" the threshold is the cast time of its
//! `threshold`-th supporting vote. Vote counts beyond that do not matter.

use chrono::{DateTime, Utc};

use crate::components::ComponentVotingConfig;
use crate::model::{Suggestion, SuggestionId, VotePolarity};
use crate::store::SuggestionStore;

/// When `suggestion` first had `threshold` supporting votes, considering its
/// current votes only. `None` while it is below the threshold.
pub fn threshold_reached_at(suggestion: &Suggestion, threshold: u32) -> Option<DateTime<Utc>> {
    if threshold == 0 {
        return Some(suggestion.created_at);
    }
    let mut support: Vec<DateTime<Utc>> = suggestion
        .votes
        .iter()
        .filter(|v| v.polarity == VotePolarity::For)
        .map(|v| v.cast_at)
        .collect();
    support.sort();
    support.get(threshold as usize - 1).copied()
}

/// Pick the suggestion to promote, if any.
///
/// Returns `None` when automatic acceptance is off or no fresh suggestion
/// has reached the threshold. Stale suggestions are never picked.
pub fn select_promotion(
    store: &SuggestionStore,
    config: &ComponentVotingConfig,
) -> Option<SuggestionId> {
    if !config.voting_enabled() || !config.auto_accept_enabled() {
        return None;
    }

    store
        .list()
        .into_iter()
        .filter(|s| !s.stale)
        .filter_map(|s| {
            threshold_reached_at(s, config.threshold()).map(|reached| (reached, s.created_at, s.id))
        })
        .min()
        .map(|(_, _, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{UnitKey, Vote};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn suggestion(id: u64, created: i64, votes: &[(&str, VotePolarity, i64)]) -> Suggestion {
        Suggestion {
            id: SuggestionId(id),
            unit: UnitKey::new("demo", "ui", "de", "greeting"),
            author: "author".to_string(),
            text: format!("text {id}"),
            created_at: at(created),
            votes: votes
                .iter()
                .map(|(voter, polarity, secs)| Vote {
                    voter: voter.to_string(),
                    polarity: *polarity,
                    cast_at: at(*secs),
                })
                .collect(),
            stale: false,
        }
    }

    fn auto_accept(threshold: u32) -> ComponentVotingConfig {
        ComponentVotingConfig::new(true, true, threshold).unwrap()
    }

    use VotePolarity::{Against, For};

    // ==================== threshold_reached_at Tests ====================

    #[test]
    fn test_threshold_one_reached_by_first_vote() {
        let s = suggestion(1, 0, &[("a", For, 5)]);
        assert_eq!(threshold_reached_at(&s, 1), Some(at(5)));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let s = suggestion(1, 0, &[("a", For, 1), ("b", For, 2), ("c", For, 3)]);
        assert_eq!(threshold_reached_at(&s, 3), Some(at(3)));
        assert_eq!(threshold_reached_at(&s, 4), None);
    }

    #[test]
    fn test_against_votes_do_not_count() {
        let s = suggestion(1, 0, &[("a", For, 1), ("b", Against, 2), ("c", Against, 3)]);
        assert_eq!(threshold_reached_at(&s, 2), None);
    }

    // ==================== select_promotion Tests ====================

    #[test]
    fn test_no_promotion_without_auto_accept() {
        let mut store = SuggestionStore::new();
        store.insert(suggestion(1, 0, &[("a", For, 1)])).unwrap();
        let config = ComponentVotingConfig::new(true, false, 1).unwrap();
        assert_eq!(select_promotion(&store, &config), None);
    }

    #[test]
    fn test_below_threshold_not_promoted() {
        let mut store = SuggestionStore::new();
        store
            .insert(suggestion(1, 0, &[("a", For, 1), ("b", For, 2)]))
            .unwrap();
        assert_eq!(select_promotion(&store, &auto_accept(3)), None);
    }

    #[test]
    fn test_first_to_reach_wins_over_higher_count() {
        let mut store = SuggestionStore::new();
        // Reached 2 at t=3, ends with 4 votes
        store
            .insert(suggestion(
                1,
                0,
                &[("a", For, 1), ("b", For, 3), ("c", For, 8), ("d", For, 9)],
            ))
            .unwrap();
        // Reached 2 at t=2, ends with 2 votes
        store
            .insert(suggestion(2, 1, &[("e", For, 1), ("f", For, 2)]))
            .unwrap();

        assert_eq!(
            select_promotion(&store, &auto_accept(2)),
            Some(SuggestionId(2))
        );
    }

    #[test]
    fn test_same_reach_instant_prefers_older_suggestion() {
        let mut store = SuggestionStore::new();
        store.insert(suggestion(2, 1, &[("a", For, 5)])).unwrap();
        store.insert(suggestion(1, 0, &[("b", For, 5)])).unwrap();
        assert_eq!(
            select_promotion(&store, &auto_accept(1)),
            Some(SuggestionId(1))
        );
    }

    #[test]
    fn test_stale_suggestions_are_skipped() {
        let mut store = SuggestionStore::new();
        store.insert(suggestion(1, 0, &[("a", For, 1)])).unwrap();
        store.mark_all_stale();
        store.insert(suggestion(2, 5, &[("b", For, 6)])).unwrap();

        assert_eq!(
            select_promotion(&store, &auto_accept(1)),
            Some(SuggestionId(2))
        );
    }

    // ==================== Property Tests ====================

    proptest! {
        /// Replaying votes through the store's overwrite semantics, the
        /// supporting count equals the number of distinct voters whose latest
        /// vote is `For`.
        #[test]
        fn prop_supporting_count_is_distinct_current_supporters(
            casts in prop::collection::vec((0u8..6, any::<bool>()), 0..40)
        ) {
            let mut store = SuggestionStore::new();
            store.insert(suggestion(1, 0, &[])).unwrap();
            let mut latest: HashMap<u8, bool> = HashMap::new();

            for (i, (voter, support)) in casts.iter().enumerate() {
                let vote = Vote {
                    voter: format!("user{voter}"),
                    polarity: if *support { For } else { Against },
                    cast_at: at(i as i64),
                };
                store.replace_vote(SuggestionId(1), vote).unwrap();
                latest.insert(*voter, *support);
            }

            let expected = latest.values().filter(|s| **s).count() as u32;
            let s = store.get(SuggestionId(1)).unwrap();
            prop_assert_eq!(s.supporting_votes(), expected);
            prop_assert_eq!(s.votes.len(), latest.len());
        }

        /// The selected suggestion is never one that reached the threshold
        /// later than another fresh candidate.
        #[test]
        fn prop_selection_picks_earliest_reach(
            vote_times in prop::collection::vec(prop::collection::vec(0i64..100, 0..6), 1..5),
            threshold in 1u32..4
        ) {
            let mut store = SuggestionStore::new();
            for (i, times) in vote_times.iter().enumerate() {
                let voters: Vec<(String, i64)> = times
                    .iter()
                    .enumerate()
                    .map(|(j, t)| (format!("v{j}"), *t))
                    .collect();
                let votes: Vec<(&str, VotePolarity, i64)> =
                    voters.iter().map(|(v, t)| (v.as_str(), For, *t)).collect();
                store.insert(suggestion(i as u64 + 1, 0, &votes)).unwrap();
            }

            let config = auto_accept(threshold);
            let reach: Vec<Option<DateTime<Utc>>> = store
                .list()
                .iter()
                .map(|s| threshold_reached_at(s, threshold))
                .collect();

            match select_promotion(&store, &config) {
                None => prop_assert!(reach.iter().all(Option::is_none)),
                Some(id) => {
                    let winner = threshold_reached_at(store.get(id).unwrap(), threshold).unwrap();
                    prop_assert!(reach.iter().flatten().all(|r| winner <= *r));
                }
            }
        }
    }
}
