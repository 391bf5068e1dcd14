//! Pairwise stage: every survivor pair judged in both presentation orders,
//! results folded into Elo ratings by a single consumer.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::elo::EloRatings;
use super::error::JudgeError;
use super::stage::{tally, StageContext};
use super::trace::TracePhase;
use super::types::{Candidate, ComparisonOutcome, RunStats};
use crate::oracle::JudgeOracle;

#[derive(Debug, Clone)]
pub struct PairwiseResult {
    pub ratings: EloRatings,
    /// Successful comparisons in schedule order.
    pub log: Vec<ComparisonOutcome>,
    pub attempted: usize,
    pub failed: usize,
}

/// One scheduled comparison: indices into the survivor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Matchup {
    pub left: usize,
    pub right: usize,
    pub left_first: bool,
}

/// For every `i < j`: `(i, j)` with `i` shown first, then with `j` first.
pub fn schedule(n: usize) -> Vec<Matchup> {
    let mut out = Vec::with_capacity(n.saturating_sub(1) * n);
    for left in 0..n {
        for right in left + 1..n {
            out.push(Matchup {
                left,
                right,
                left_first: true,
            });
            out.push(Matchup {
                left,
                right,
                left_first: false,
            });
        }
    }
    out
}

pub(crate) async fn run_pairwise<O: JudgeOracle + ?Sized>(
    stage: &StageContext<'_, O>,
    survivors: &[Candidate],
    stats: &mut RunStats,
) -> PairwiseResult {
    let config = stage.config;
    let mut ratings = EloRatings::with_players(
        config.elo_k,
        config.elo_base,
        survivors.iter().map(|c| c.display_name.clone()),
    );
    let matchups = schedule(survivors.len());
    let temperature = config.comparison_temperature;

    info!(
        chapter_id = %stage.chapter_id,
        survivors = survivors.len(),
        comparisons = matchups.len(),
        "pairwise stage started"
    );

    let mut results = stream::iter(matchups.iter().copied().enumerate().map(|(idx, m)| {
        let (first, second) = if m.left_first {
            (&survivors[m.left], &survivors[m.right])
        } else {
            (&survivors[m.right], &survivors[m.left])
        };
        let field = vec![first.clone(), second.clone()];
        async move {
            let result = stage
                .judge(&field, temperature, TracePhase::Pairwise, idx)
                .await;
            (idx, m, result)
        }
    }))
    .buffered(config.concurrency.max(1));

    let mut log = Vec::with_capacity(matchups.len());
    let mut failed = 0usize;

    while let Some((idx, m, result)) = results.next().await {
        stats.comparisons_attempted += 1;
        tally(stats, &result);
        let left = &survivors[m.left].display_name;
        let right = &survivors[m.right].display_name;
        let presented_first = if m.left_first { left } else { right };

        let winner = match &result {
            Ok(verdict) => verdict
                .table
                .winner()
                .map(|e| e.display_name.clone())
                .filter(|w| w == left || w == right),
            Err(_) => None,
        };
        let Some(winner) = winner else {
            failed += 1;
            stats.comparisons_failed += 1;
            match result {
                Err(JudgeError::Cancelled { .. }) => {
                    debug!(comparison = idx, "comparison cancelled");
                }
                Err(err) => warn!(
                    chapter_id = %stage.chapter_id,
                    comparison = idx,
                    left = %left,
                    right = %right,
                    error = %err,
                    code = err.code(),
                    "comparison failed; skipped"
                ),
                Ok(_) => warn!(
                    chapter_id = %stage.chapter_id,
                    comparison = idx,
                    "comparison produced no winner from the pair; skipped"
                ),
            }
            continue;
        };

        let outcome = ComparisonOutcome {
            left: left.clone(),
            right: right.clone(),
            presented_first: presented_first.clone(),
            winner,
        };
        let delta = ratings.update(&outcome.winner, outcome.loser());
        stats.comparisons_succeeded += 1;
        debug!(
            comparison = idx,
            winner = %outcome.winner,
            loser = %outcome.loser(),
            expected = delta.expected_winner,
            change = delta.change,
            "elo updated"
        );
        log.push(outcome);
    }

    info!(
        chapter_id = %stage.chapter_id,
        attempted = matchups.len(),
        failed,
        "pairwise stage finished"
    );

    PairwiseResult {
        ratings,
        log,
        attempted: matchups.len(),
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_covers_both_orders_of_every_pair() {
        let s = schedule(3);
        assert_eq!(s.len(), 6);
        assert_eq!(
            s[0],
            Matchup {
                left: 0,
                right: 1,
                left_first: true
            }
        );
        assert_eq!(
            s[1],
            Matchup {
                left: 0,
                right: 1,
                left_first: false
            }
        );
        assert_eq!(s[5].left, 1);
        assert_eq!(s[5].right, 2);
        assert!(schedule(1).is_empty());
        assert!(schedule(0).is_empty());
    }
}
