//! Vote counting for a single election round.

use std::collections::BTreeMap;

/// Outcome of counting one round's votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyResult {
    /// Proof with the most votes; on a tie, the lexicographically smallest.
    pub winner: String,
    pub votes: usize,
    /// Whether another proof had as many votes as the winner.
    pub tied: bool,
}

/// Count votes and pick the winning proof.
///
/// The result depends only on the multiset of proofs, never on the order
/// votes were recorded in. Returns `None` for an empty round.
pub fn tally_votes<'a, I>(votes: I) -> Option<TallyResult>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for proof in votes {
        let count = counts.entry(proof).or_insert(0);
        *count = count.saturating_add(1);
    }

    // BTreeMap iterates in ascending key order, so the first proof reaching
    // the maximum is the smallest one.
    let mut best: Option<(&str, usize)> = None;
    let mut tied = false;
    for (proof, count) in counts {
        match best {
            Some((_, best_count)) if count < best_count => {}
            Some((_, best_count)) if count == best_count => tied = true,
            _ => {
                best = Some((proof, count));
                tied = false;
            }
        }
    }

    best.map(|(winner, votes)| TallyResult {
        winner: winner.to_string(),
        votes,
        tied,
    })
}
