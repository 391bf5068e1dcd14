//! Position-bias detection over the pairwise log.
//!
//! Every pair is judged once in each presentation order. A judge free of
//! position bias names the same winner both times; a pair whose two
//! winners differ is a contradiction. The report annotates the ranking and
//! never changes it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::ComparisonOutcome;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasReport {
    /// Pairs with an outcome in both presentation orders.
    pub pairs_tested: usize,
    /// Pairs missing one or both orders (a comparison failed).
    pub pairs_incomplete: usize,
    pub contradiction_count: usize,
    /// Sorted `(a, b)` keys of contradicting pairs.
    pub contradicting_pairs: Vec<(String, String)>,
    pub contradiction_rate: f64,
    /// Comparisons won by whichever candidate was shown first.
    pub first_position_wins: usize,
    pub first_position_rate: f64,
}

#[derive(Default)]
struct PairRecord<'a> {
    /// Winner when the lexicographically smaller name was shown first.
    low_first: Option<&'a str>,
    high_first: Option<&'a str>,
}

pub fn detect(log: &[ComparisonOutcome]) -> BiasReport {
    let mut pairs: BTreeMap<(String, String), PairRecord<'_>> = BTreeMap::new();
    let mut first_position_wins = 0usize;

    for outcome in log {
        if outcome.winner == outcome.presented_first {
            first_position_wins += 1;
        }
        let key = outcome.pair_key();
        let low_shown_first = outcome.presented_first == key.0;
        let record = pairs.entry(key).or_default();
        let slot = if low_shown_first {
            &mut record.low_first
        } else {
            &mut record.high_first
        };
        // First result per order wins.
        slot.get_or_insert(outcome.winner.as_str());
    }

    let mut report = BiasReport {
        first_position_wins,
        first_position_rate: first_position_wins as f64 / log.len().max(1) as f64,
        ..BiasReport::default()
    };
    for (key, record) in pairs {
        match (record.low_first, record.high_first) {
            (Some(a), Some(b)) => {
                report.pairs_tested += 1;
                if a != b {
                    report.contradiction_count += 1;
                    report.contradicting_pairs.push(key);
                }
            }
            _ => report.pairs_incomplete += 1,
        }
    }
    report.contradiction_rate =
        report.contradiction_count as f64 / report.pairs_tested.max(1) as f64;
    report
}

impl BiasReport {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "{} of {} pairs contradicted under order swap ({:.0}%); first-shown draft won {:.0}% of comparisons",
            self.contradiction_count,
            self.pairs_tested,
            self.contradiction_rate * 100.0,
            self.first_position_rate * 100.0,
        )
    }
}
