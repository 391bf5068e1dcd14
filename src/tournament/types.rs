//! Data model for one chapter's tournament.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::parser::LadderStage;

/// Score assumed for any criterion the judge did not report.
pub const NEUTRAL_SCORE: f64 = 7.0;
pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;

/// Prefix the judge sees in front of every display name.
pub const DRAFT_PREFIX: &str = "DRAFT_";

// =============================================================================
// Candidates
// =============================================================================

/// One rewritten variant under evaluation. Identity is `display_name`;
/// `id` is the opaque label shown to the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub display_name: String,
    pub text: String,
    /// Kept for callers; never shown to the judge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_notes: Option<String>,
}

impl Candidate {
    pub fn new(display_name: impl Into<String>, text: impl Into<String>) -> Self {
        let display_name = display_name.into();
        Self {
            id: format!("{DRAFT_PREFIX}{display_name}"),
            display_name,
            text: text.into(),
            style_notes: None,
        }
    }

    pub fn with_style_notes(mut self, notes: impl Into<String>) -> Self {
        self.style_notes = Some(notes.into());
        self
    }
}

/// Reversible `id <-> display_name` map for one judge call's field.
#[derive(Debug, Clone, Default)]
pub struct CandidateRegistry {
    by_id: BTreeMap<String, String>,
    order: Vec<String>,
}

impl CandidateRegistry {
    pub fn new(candidates: &[Candidate]) -> Self {
        let mut by_id = BTreeMap::new();
        let mut order = Vec::with_capacity(candidates.len());
        for c in candidates {
            by_id.insert(c.id.clone(), c.display_name.clone());
            order.push(c.display_name.clone());
        }
        Self { by_id, order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    /// `(id, display_name)` pairs, sorted by id.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_id.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Display names in submission order.
    pub fn display_names(&self) -> &[String] {
        &self.order
    }
}

// =============================================================================
// Scores and ranking tables
// =============================================================================

/// Five criterion scores in `[1, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriterionScores {
    pub clarity: f64,
    pub tone: f64,
    pub plot_fidelity: f64,
    pub tone_fidelity: f64,
    pub overall: f64,
}

impl Default for CriterionScores {
    fn default() -> Self {
        Self {
            clarity: NEUTRAL_SCORE,
            tone: NEUTRAL_SCORE,
            plot_fidelity: NEUTRAL_SCORE,
            tone_fidelity: NEUTRAL_SCORE,
            overall: NEUTRAL_SCORE,
        }
    }
}

impl CriterionScores {
    pub const FIELDS: [&'static str; 5] =
        ["clarity", "tone", "plot_fidelity", "tone_fidelity", "overall"];

    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "clarity" => Some(self.clarity),
            "tone" => Some(self.tone),
            "plot_fidelity" => Some(self.plot_fidelity),
            "tone_fidelity" => Some(self.tone_fidelity),
            "overall" => Some(self.overall),
            _ => None,
        }
    }

    /// Sets a field, clamped into `[1, 10]`. Unknown fields are ignored.
    pub fn set(&mut self, field: &str, value: f64) {
        let value = clamp_score(value);
        match field {
            "clarity" => self.clarity = value,
            "tone" => self.tone = value,
            "plot_fidelity" => self.plot_fidelity = value,
            "tone_fidelity" => self.tone_fidelity = value,
            "overall" => self.overall = value,
            _ => {}
        }
    }
}

pub fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(MIN_SCORE, MAX_SCORE)
    } else {
        NEUTRAL_SCORE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub candidate_id: String,
    pub display_name: String,
    /// 1 is best.
    pub rank: u32,
    pub scores: CriterionScores,
}

/// Gaps and duplicates in a ranking. Reported, never repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDefects {
    pub duplicate_ranks: Vec<u32>,
    pub missing_ranks: Vec<u32>,
}

impl RankDefects {
    pub fn is_empty(&self) -> bool {
        self.duplicate_ranks.is_empty() && self.missing_ranks.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingTable {
    pub entries: Vec<RankEntry>,
}

impl RankingTable {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Best-ranked entry; ties resolve to the one listed first.
    pub fn winner(&self) -> Option<&RankEntry> {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(idx, e)| (e.rank, *idx))
            .map(|(_, e)| e)
    }

    pub fn rank_of(&self, display_name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.display_name == display_name)
            .map(|e| e.rank)
    }

    pub fn entry(&self, display_name: &str) -> Option<&RankEntry> {
        self.entries.iter().find(|e| e.display_name == display_name)
    }

    /// Ranks expected are `1..=len`.
    pub fn defects(&self) -> RankDefects {
        let mut seen: BTreeMap<u32, usize> = BTreeMap::new();
        for e in &self.entries {
            *seen.entry(e.rank).or_insert(0) += 1;
        }
        let duplicate_ranks = seen
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(rank, _)| *rank)
            .collect();
        let missing_ranks = (1..=self.entries.len() as u32)
            .filter(|r| !seen.contains_key(r))
            .collect();
        RankDefects {
            duplicate_ranks,
            missing_ranks,
        }
    }
}

// =============================================================================
// Verdicts
// =============================================================================

/// Bookkeeping for one ladder run, kept alongside the verdict or error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerdictDiagnostics {
    pub stages: Vec<LadderStage>,
    pub oracle_calls: u32,
    pub truncations: u32,
    pub decode_failures: u32,
    /// Raw table ids that matched no candidate.
    pub dropped_entries: Vec<String>,
    pub rank_defects: RankDefects,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    pub cached_calls: u32,
}

impl VerdictDiagnostics {
    pub(crate) fn absorb_usage(&mut self, usage: &crate::oracle::OracleUsage) {
        self.oracle_calls += 1;
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens);
        self.cost_nanodollars = self.cost_nanodollars.saturating_add(usage.cost_nanodollars);
        if usage.cached {
            self.cached_calls += 1;
        }
    }
}

/// A decoded judge reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub table: RankingTable,
    pub analysis_text: String,
    /// Keyed by display name.
    pub feedback_by_candidate: BTreeMap<String, String>,
    pub raw_response: String,
    /// Submitted candidates absent from the table.
    pub missing_candidates: Vec<String>,
    pub diagnostics: VerdictDiagnostics,
}

impl Verdict {
    pub fn is_complete(&self) -> bool {
        self.missing_candidates.is_empty()
    }
}

/// One pairwise comparison, as logged by the tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub left: String,
    pub right: String,
    /// Whichever of `left`/`right` the judge saw first.
    pub presented_first: String,
    pub winner: String,
}

impl ComparisonOutcome {
    pub fn loser(&self) -> &str {
        if self.winner == self.left {
            &self.right
        } else {
            &self.left
        }
    }

    /// Unordered pair key, lexicographically sorted.
    pub fn pair_key(&self) -> (String, String) {
        if self.left <= self.right {
            (self.left.clone(), self.right.clone())
        } else {
            (self.right.clone(), self.left.clone())
        }
    }
}

// =============================================================================
// Screening summary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    High,
    Medium,
    Low,
    NotAvailable,
}

impl Consistency {
    /// From the standard deviation of a candidate's screening ranks.
    pub fn from_std_dev(std_dev: Option<f64>) -> Self {
        match std_dev {
            Some(s) if s < 0.5 => Consistency::High,
            Some(s) if s < 1.5 => Consistency::Medium,
            Some(_) => Consistency::Low,
            None => Consistency::NotAvailable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningStanding {
    pub display_name: String,
    pub mean_rank: f64,
    pub ranks: Vec<u32>,
    pub std_dev: Option<f64>,
    pub consistency: Consistency,
    /// Mean criterion scores over runs where the candidate was scored.
    pub mean_scores: CriterionScores,
    pub survived: bool,
}

// =============================================================================
// Final output
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Survivor,
    EliminatedAtScreening,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalEntry {
    pub rank: u32,
    pub candidate_id: String,
    pub display_name: String,
    /// Screening means rounded to whole points.
    pub scores: CriterionScores,
    /// Present only for candidates that entered the pairwise stage.
    pub elo_rating: Option<f64>,
    pub screening_mean_rank: f64,
    pub status: EntryStatus,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub screening_runs_attempted: u32,
    pub screening_runs_succeeded: u32,
    pub comparisons_attempted: u32,
    pub comparisons_succeeded: u32,
    pub comparisons_failed: u32,
    pub oracle_calls: u32,
    pub cached_calls: u32,
    pub truncations: u32,
    pub parse_failures: u32,
    pub oracle_failures: u32,
    pub cancelled_calls: u32,
    pub incomplete_rankings: u32,
    pub rank_defects: u32,
    pub dropped_entries: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_nanodollars: i64,
    pub latency_ms: u64,
}

impl RunStats {
    pub(crate) fn absorb_diagnostics(&mut self, d: &VerdictDiagnostics) {
        self.oracle_calls += d.oracle_calls;
        self.cached_calls += d.cached_calls;
        self.truncations += d.truncations;
        self.dropped_entries += d.dropped_entries.len() as u32;
        if !d.rank_defects.is_empty() {
            self.rank_defects += 1;
        }
        self.input_tokens += d.input_tokens as u64;
        self.output_tokens += d.output_tokens as u64;
        self.cost_nanodollars = self.cost_nanodollars.saturating_add(d.cost_nanodollars);
    }
}

/// Result of one chapter's tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRanking {
    pub run_id: String,
    pub chapter_id: String,
    /// Survivors in rating order, then screening eliminations.
    pub entries: Vec<FinalEntry>,
    pub analysis: String,
    /// Keyed by display name.
    pub feedback: BTreeMap<String, String>,
    pub bias: super::bias::BiasReport,
    pub screening: Vec<ScreeningStanding>,
    /// Groups of candidates whose screening mean ranks are within 0.01.
    pub screening_ties: Vec<Vec<String>>,
    pub comparisons: Vec<ComparisonOutcome>,
    /// Analysis text from each successful screening run, in run order.
    pub discussion: Vec<String>,
    pub stats: RunStats,
}

impl FinalRanking {
    pub fn winner(&self) -> Option<&FinalEntry> {
        self.entries.first()
    }

    pub fn entry(&self, display_name: &str) -> Option<&FinalEntry> {
        self.entries.iter().find(|e| e.display_name == display_name)
    }

    /// Display names in final order.
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.display_name.as_str()).collect()
    }

    /// Whether downstream consumers should treat this ranking with caution.
    pub fn is_low_confidence(&self, contradiction_threshold: f64) -> bool {
        let survivors = self
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Survivor)
            .count();
        let failed = self.stats.comparisons_failed;
        let succeeded = self.stats.comparisons_succeeded;
        self.bias.contradiction_rate > contradiction_threshold
            || (survivors >= 2 && succeeded == 0)
            || failed > succeeded
    }

    /// Sanity check: every display name appears exactly once.
    pub fn has_unique_entries(&self) -> bool {
        let names: BTreeSet<&str> = self.entries.iter().map(|e| e.display_name.as_str()).collect();
        names.len() == self.entries.len()
    }
}

/// Lookup helper used by aggregation: display name -> candidate.
pub(crate) fn index_candidates(candidates: &[Candidate]) -> HashMap<&str, &Candidate> {
    candidates
        .iter()
        .map(|c| (c.display_name.as_str(), c))
        .collect()
}
