//! Folding screening, pairwise and bias results into a [`FinalRanking`].
//!
//! Analysis and feedback are templated from the numbers; no extra judge
//! calls are made here.

use std::collections::BTreeMap;

use super::bias::BiasReport;
use super::pairwise::PairwiseResult;
use super::screening::ScreeningResult;
use super::types::{
    index_candidates, Candidate, CriterionScores, EntryStatus, FinalEntry, FinalRanking, RunStats,
};

pub struct AggregateInput<'a> {
    pub run_id: &'a str,
    pub chapter_id: &'a str,
    pub candidates: &'a [Candidate],
    pub top_k: usize,
    pub screening: ScreeningResult,
    pub pairwise: PairwiseResult,
    pub bias: BiasReport,
    pub stats: RunStats,
}

fn round_scores(scores: &CriterionScores) -> CriterionScores {
    let mut out = *scores;
    for field in CriterionScores::FIELDS {
        if let Some(v) = scores.get(field) {
            out.set(field, v.round());
        }
    }
    out
}

fn round_tenth(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn aggregate(input: AggregateInput<'_>) -> FinalRanking {
    let AggregateInput {
        run_id,
        chapter_id,
        candidates,
        top_k,
        screening,
        pairwise,
        bias,
        stats,
    } = input;
    let by_name = index_candidates(candidates);

    let mean_of = |name: &str| screening.mean_rank(name).unwrap_or(candidates.len() as f64);
    let mut entries: Vec<FinalEntry> = Vec::with_capacity(candidates.len());

    for (name, rating) in pairwise.ratings.leaderboard_by(mean_of) {
        let Some(candidate) = by_name.get(name.as_str()) else {
            continue;
        };
        let scores = screening
            .standing(&name)
            .map(|s| round_scores(&s.mean_scores))
            .unwrap_or_default();
        entries.push(FinalEntry {
            rank: entries.len() as u32 + 1,
            candidate_id: candidate.id.clone(),
            display_name: name.clone(),
            scores,
            elo_rating: Some(round_tenth(rating)),
            screening_mean_rank: mean_of(&name),
            status: EntryStatus::Survivor,
        });
    }

    for standing in screening.standings.iter().filter(|s| !s.survived) {
        let Some(candidate) = by_name.get(standing.display_name.as_str()) else {
            continue;
        };
        entries.push(FinalEntry {
            rank: entries.len() as u32 + 1,
            candidate_id: candidate.id.clone(),
            display_name: standing.display_name.clone(),
            scores: round_scores(&standing.mean_scores),
            elo_rating: None,
            screening_mean_rank: standing.mean_rank,
            status: EntryStatus::EliminatedAtScreening,
        });
    }

    let analysis = analysis_text(&entries, &pairwise, &screening, &bias);
    let feedback = feedback_texts(&entries, &screening, top_k);

    FinalRanking {
        run_id: run_id.to_string(),
        chapter_id: chapter_id.to_string(),
        entries,
        analysis,
        feedback,
        bias,
        screening_ties: screening.ties.clone(),
        discussion: screening.discussion.clone(),
        screening: screening.standings,
        comparisons: pairwise.log,
        stats,
    }
}

fn analysis_text(
    entries: &[FinalEntry],
    pairwise: &PairwiseResult,
    screening: &ScreeningResult,
    bias: &BiasReport,
) -> String {
    let Some(winner) = entries.first() else {
        return String::new();
    };
    let successful = pairwise.log.len();
    let mut text = match (winner.elo_rating, successful) {
        (Some(rating), n) if n > 0 => format!(
            "The {} draft emerges as the clear winner with an Elo rating of {:.1} after {} head-to-head comparisons. It averaged rank {:.2} across {} screening runs.",
            winner.display_name, rating, n, winner.screening_mean_rank, screening.succeeded
        ),
        _ => format!(
            "The {} draft ranks first on screening alone with a mean rank of {:.2} across {} runs; no head-to-head comparison decided the order.",
            winner.display_name, winner.screening_mean_rank, screening.succeeded
        ),
    };
    if let Some(runner_up) = entries.get(1).filter(|e| e.elo_rating.is_some()) {
        if let (Some(w), Some(r)) = (winner.elo_rating, runner_up.elo_rating) {
            text.push_str(&format!(
                " {} follows {:.1} points behind.",
                runner_up.display_name,
                w - r
            ));
        }
    }
    if bias.contradiction_count > 0 {
        text.push_str(&format!(
            " Position bias: {} of {} pairs flipped when presentation order was swapped.",
            bias.contradiction_count, bias.pairs_tested
        ));
    }
    text
}

fn feedback_texts(
    entries: &[FinalEntry],
    screening: &ScreeningResult,
    top_k: usize,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(winner) = entries.first() else {
        return out;
    };
    for entry in entries.iter().skip(1) {
        let mut text = match (entry.status, entry.elo_rating, winner.elo_rating) {
            (EntryStatus::Survivor, Some(rating), Some(top)) => format!(
                "Ranked #{} with an Elo rating of {:.1}, {:.1} points behind {}. Screening mean rank {:.2}.",
                entry.rank,
                rating,
                top - rating,
                winner.display_name,
                entry.screening_mean_rank
            ),
            (EntryStatus::Survivor, _, _) => format!(
                "Ranked #{} with a screening mean rank of {:.2}.",
                entry.rank, entry.screening_mean_rank
            ),
            (EntryStatus::EliminatedAtScreening, _, _) => format!(
                "Eliminated before the tournament with a screening mean rank of {:.2} (only the top {} advanced).",
                entry.screening_mean_rank, top_k
            ),
        };
        if let Some(notes) = screening.judge_feedback.get(&entry.display_name) {
            text.push_str(" Judge notes: ");
            text.push_str(notes.trim());
        }
        out.insert(entry.display_name.clone(), text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::bias;
    use crate::tournament::elo::EloRatings;
    use crate::tournament::types::{ComparisonOutcome, Consistency, ScreeningStanding};

    fn standing(name: &str, mean_rank: f64, survived: bool) -> ScreeningStanding {
        ScreeningStanding {
            display_name: name.to_string(),
            mean_rank,
            ranks: vec![],
            std_dev: None,
            consistency: Consistency::NotAvailable,
            mean_scores: CriterionScores {
                clarity: 8.4,
                ..CriterionScores::default()
            },
            survived,
        }
    }

    #[test]
    fn survivors_by_rating_then_eliminated_by_mean() {
        let candidates: Vec<Candidate> =
            ["A", "B", "C", "D"].iter().map(|n| Candidate::new(*n, "t")).collect();
        let screening = ScreeningResult {
            standings: vec![
                standing("B", 1.5, true),
                standing("A", 1.5, true),
                standing("C", 3.0, false),
                standing("D", 4.0, false),
            ],
            survivors: vec![candidates[1].clone(), candidates[0].clone()],
            ties: vec![vec!["B".into(), "A".into()]],
            discussion: vec!["run one".into()],
            judge_feedback: BTreeMap::from([("D".to_string(), "Too long.".to_string())]),
            run_orders: vec![],
            attempted: 2,
            succeeded: 2,
        };
        let mut ratings = EloRatings::with_players(30.0, 1000.0, ["A", "B"]);
        ratings.update("A", "B");
        ratings.update("A", "B");
        let log = vec![
            ComparisonOutcome {
                left: "B".into(),
                right: "A".into(),
                presented_first: "B".into(),
                winner: "A".into(),
            },
            ComparisonOutcome {
                left: "B".into(),
                right: "A".into(),
                presented_first: "A".into(),
                winner: "A".into(),
            },
        ];
        let bias = bias::detect(&log);
        let ranking = aggregate(AggregateInput {
            run_id: "r",
            chapter_id: "ch",
            candidates: &candidates,
            top_k: 2,
            screening,
            pairwise: PairwiseResult {
                ratings,
                log,
                attempted: 2,
                failed: 0,
            },
            bias,
            stats: RunStats::default(),
        });

        assert_eq!(ranking.order(), vec!["A", "B", "C", "D"]);
        assert!(ranking.has_unique_entries());
        let a = ranking.entry("A").expect("A");
        assert_eq!(a.status, EntryStatus::Survivor);
        assert_eq!(a.scores.clarity, 8.0);
        assert!(a.elo_rating.expect("rating") > 1000.0);
        let c = ranking.entry("C").expect("C");
        assert_eq!(c.status, EntryStatus::EliminatedAtScreening);
        assert_eq!(c.elo_rating, None);
        assert!(ranking.analysis.starts_with("The A draft emerges as the clear winner"));
        assert!(!ranking.feedback.contains_key("A"));
        assert!(ranking.feedback["C"].contains("Eliminated before the tournament"));
        assert!(ranking.feedback["D"].ends_with("Judge notes: Too long."));
        assert_eq!(ranking.bias.contradiction_count, 0);
    }
}
