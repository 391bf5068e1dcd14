//! Screening stage: repeated full-field rankings under shuffled
//! presentation orders, reduced to a shortlist by mean rank.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use super::error::{JudgeError, TournamentError};
use super::stage::{tally, StageContext};
use super::trace::TracePhase;
use super::types::{
    Candidate, Consistency, CriterionScores, RunStats, ScreeningStanding, Verdict,
};
use crate::oracle::JudgeOracle;

/// Mean ranks closer than this are reported as ties.
pub const TIE_EPSILON: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct ScreeningResult {
    /// Every candidate, best mean rank first. Equal means keep submission
    /// order.
    pub standings: Vec<ScreeningStanding>,
    /// The first `min(top_k, n)` standings, as candidates.
    pub survivors: Vec<Candidate>,
    pub ties: Vec<Vec<String>>,
    /// Analysis text of each successful run, in run order.
    pub discussion: Vec<String>,
    /// Judge feedback per display name, latest successful run wins.
    pub judge_feedback: BTreeMap<String, String>,
    /// Presentation order of every run, successful or not.
    pub run_orders: Vec<Vec<String>>,
    pub attempted: usize,
    pub succeeded: usize,
}

impl ScreeningResult {
    pub fn mean_rank(&self, display_name: &str) -> Option<f64> {
        self.standings
            .iter()
            .find(|s| s.display_name == display_name)
            .map(|s| s.mean_rank)
    }

    pub fn standing(&self, display_name: &str) -> Option<&ScreeningStanding> {
        self.standings.iter().find(|s| s.display_name == display_name)
    }
}

/// Per-candidate accumulator across runs.
#[derive(Default)]
struct Samples {
    ranks: Vec<u32>,
    score_sums: [f64; 5],
    scored_runs: u32,
}

impl Samples {
    fn add_scores(&mut self, scores: &CriterionScores) {
        for (slot, field) in self.score_sums.iter_mut().zip(CriterionScores::FIELDS) {
            *slot += scores.get(field).unwrap_or_default();
        }
        self.scored_runs += 1;
    }

    fn mean_scores(&self) -> CriterionScores {
        let mut scores = CriterionScores::default();
        if self.scored_runs == 0 {
            return scores;
        }
        for (sum, field) in self.score_sums.iter().zip(CriterionScores::FIELDS) {
            scores.set(field, sum / self.scored_runs as f64);
        }
        scores
    }
}

/// Population standard deviation; `None` below two samples.
fn std_dev(ranks: &[u32], mean: f64) -> Option<f64> {
    if ranks.len() < 2 {
        return None;
    }
    let var = ranks
        .iter()
        .map(|r| (*r as f64 - mean).powi(2))
        .sum::<f64>()
        / ranks.len() as f64;
    Some(var.sqrt())
}

/// Groups adjacent standings whose mean ranks are within [`TIE_EPSILON`].
/// Input must already be sorted by mean rank.
pub fn tie_groups(standings: &[ScreeningStanding]) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<&ScreeningStanding> = Vec::new();
    for s in standings {
        match current.first() {
            Some(head) if (s.mean_rank - head.mean_rank).abs() < TIE_EPSILON => current.push(s),
            _ => {
                if current.len() > 1 {
                    groups.push(current.iter().map(|c| c.display_name.clone()).collect());
                }
                current = vec![s];
            }
        }
    }
    if current.len() > 1 {
        groups.push(current.iter().map(|c| c.display_name.clone()).collect());
    }
    groups
}

/// Runs `config.screening_runs` full-field rankings and keeps the best
/// `config.top_k` candidates.
pub(crate) async fn screen<O: JudgeOracle + ?Sized>(
    stage: &StageContext<'_, O>,
    candidates: &[Candidate],
    rng: &mut StdRng,
    stats: &mut RunStats,
) -> Result<ScreeningResult, TournamentError> {
    let n = candidates.len();
    let runs = stage.config.screening_runs;
    let top_k = stage.config.top_k.min(n);
    let temperature = stage.config.screening_temperature;

    // Orders are fixed before any call goes out so a seed pins them
    // regardless of completion order.
    let orders: Vec<Vec<Candidate>> = (0..runs)
        .map(|_| {
            let mut field = candidates.to_vec();
            field.shuffle(rng);
            field
        })
        .collect();
    let run_orders: Vec<Vec<String>> = orders
        .iter()
        .map(|field| field.iter().map(|c| c.display_name.clone()).collect())
        .collect();

    info!(
        chapter_id = %stage.chapter_id,
        candidates = n,
        runs,
        top_k,
        "screening started"
    );

    let mut results = stream::iter(orders.into_iter().enumerate().map(|(idx, field)| async move {
        let result = stage
            .judge(&field, temperature, TracePhase::Screening, idx)
            .await;
        (idx, result)
    }))
    .buffered(stage.config.concurrency.max(1));

    let mut samples: Vec<Samples> = (0..n).map(|_| Samples::default()).collect();
    let index: BTreeMap<&str, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.display_name.as_str(), i))
        .collect();
    let mut discussion = Vec::new();
    let mut judge_feedback = BTreeMap::new();
    let mut succeeded = 0usize;

    while let Some((idx, result)) = results.next().await {
        stats.screening_runs_attempted += 1;
        tally(stats, &result);
        match result {
            Ok(verdict) => {
                succeeded += 1;
                stats.screening_runs_succeeded += 1;
                record_run(&verdict, n, &index, &mut samples);
                if !verdict.analysis_text.trim().is_empty() {
                    discussion.push(verdict.analysis_text.clone());
                }
                judge_feedback.extend(verdict.feedback_by_candidate);
                debug!(run = idx, ranked = verdict.table.len(), "screening run parsed");
            }
            Err(JudgeError::Cancelled { .. }) => {
                warn!(chapter_id = %stage.chapter_id, run = idx, "screening run cancelled");
            }
            Err(err) => {
                warn!(
                    chapter_id = %stage.chapter_id,
                    run = idx,
                    error = %err,
                    code = err.code(),
                    "screening run failed; excluded"
                );
            }
        }
    }

    if stage.cancelled() {
        return Err(TournamentError::Cancelled);
    }
    if succeeded == 0 {
        return Err(TournamentError::NoUsableScreeningRuns { attempted: runs });
    }

    let mut standings: Vec<ScreeningStanding> = candidates
        .iter()
        .zip(&samples)
        .map(|(c, s)| {
            let mean_rank = if s.ranks.is_empty() {
                n as f64
            } else {
                s.ranks.iter().map(|r| *r as f64).sum::<f64>() / s.ranks.len() as f64
            };
            let sd = std_dev(&s.ranks, mean_rank);
            ScreeningStanding {
                display_name: c.display_name.clone(),
                mean_rank,
                ranks: s.ranks.clone(),
                std_dev: sd,
                consistency: Consistency::from_std_dev(sd),
                mean_scores: s.mean_scores(),
                survived: false,
            }
        })
        .collect();
    // Stable: equal means keep submission order.
    standings.sort_by(|a, b| a.mean_rank.total_cmp(&b.mean_rank));
    for s in standings.iter_mut().take(top_k) {
        s.survived = true;
    }

    let survivors: Vec<Candidate> = standings
        .iter()
        .take(top_k)
        .filter_map(|s| index.get(s.display_name.as_str()).map(|i| candidates[*i].clone()))
        .collect();
    let ties = tie_groups(&standings);
    if !ties.is_empty() {
        debug!(ties = ?ties, "screening mean ranks tied");
    }

    info!(
        chapter_id = %stage.chapter_id,
        succeeded,
        attempted = runs,
        survivors = ?survivors.iter().map(|c| c.display_name.as_str()).collect::<Vec<_>>(),
        "screening finished"
    );

    Ok(ScreeningResult {
        standings,
        survivors,
        ties,
        discussion,
        judge_feedback,
        run_orders,
        attempted: runs,
        succeeded,
    })
}

/// Records one run's ranks. Candidates the judge left out get `n`.
fn record_run(
    verdict: &Verdict,
    n: usize,
    index: &BTreeMap<&str, usize>,
    samples: &mut [Samples],
) {
    let mut ranked = vec![false; n];
    for entry in &verdict.table.entries {
        let Some(&i) = index.get(entry.display_name.as_str()) else {
            continue;
        };
        ranked[i] = true;
        samples[i].ranks.push(entry.rank);
        samples[i].add_scores(&entry.scores);
    }
    for (i, seen) in ranked.into_iter().enumerate() {
        if !seen {
            samples[i].ranks.push(n as u32);
        }
    }
}
