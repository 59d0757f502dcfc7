//! Property-based tests for election ordering and vote counting.
//!
//! Properties tested:
//! 1. Tally determinism: shuffling the votes never changes the winner.
//! 2. A strict majority always wins the tally.
//! 3. Pending events stay sorted by proof age with no duplicates.

#[cfg(test)]
mod tests {
    use {
        proptest::prelude::*,
        shardline_consensus_election::{tally_votes, ElectionState},
    };

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_tally_ignores_vote_order(
            votes in prop::collection::vec("P[0-4]", 1..20),
            seed in any::<u64>(),
        ) {
            let mut shuffled = votes.clone();
            // Deterministic Fisher-Yates driven by the seed.
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            let original = tally_votes(votes.iter().map(String::as_str));
            let reordered = tally_votes(shuffled.iter().map(String::as_str));
            prop_assert_eq!(original, reordered);
        }

        #[test]
        fn prop_strict_majority_wins(
            majority in 3usize..10,
            minority in prop::collection::vec("Q[0-9]", 0..3),
        ) {
            let mut votes: Vec<String> = vec!["P".to_string(); majority];
            votes.extend(minority);
            let result = tally_votes(votes.iter().map(String::as_str)).unwrap();
            prop_assert_eq!(result.winner, "P");
            prop_assert!(!result.tied);
        }

        #[test]
        fn prop_pending_events_sorted_and_unique(
            proofs in prop::collection::vec(1u64..1_000_000, 1..30),
        ) {
            let mut state = ElectionState::new();
            for proof in &proofs {
                state.enqueue_pending(proof.to_string());
            }

            let queued: Vec<u64> = state
                .pending_events
                .iter()
                .map(|proof| proof.parse().unwrap())
                .collect();
            let mut expected = proofs.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(queued, expected);
        }
    }
}
