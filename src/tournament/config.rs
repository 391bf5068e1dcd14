//! Request and configuration types for a tournament run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::TournamentError;
use super::types::Candidate;

pub const DEFAULT_JUDGE_MODEL: &str = "openai/gpt-4o-mini";
pub const MAX_CONCURRENCY: usize = 32;

/// Trailing fragments that mean the judge stopped mid-rubric.
pub const DEFAULT_TRUNCATION_FRAGMENTS: &[&str] = &[
    "- Fidelity to original plot",
    "- Tone & atmosphere:",
    "- Clarity & readability:",
    "**Comments**:",
    "**DRAFT_",
    "- Fidelity to original",
    "Plot fidelity:",
    "Tone fidelity:",
    ": [",
];

/// Tunables for one chapter's tournament.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentConfig {
    /// Randomized full-field ranking runs.
    #[serde(default = "default_screening_runs")]
    pub screening_runs: usize,

    /// Survivors promoted to the pairwise stage.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_elo_k")]
    pub elo_k: f64,

    #[serde(default = "default_elo_base")]
    pub elo_base: f64,

    /// Sampling temperature for screening runs. Kept high so repeated runs
    /// actually disagree.
    #[serde(default = "default_screening_temperature")]
    pub screening_temperature: f32,

    #[serde(default = "default_comparison_temperature")]
    pub comparison_temperature: f32,

    /// Maximum judge calls in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-call deadline in milliseconds.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,

    #[serde(default = "default_judge_model")]
    pub judge_model: String,

    #[serde(default = "default_truncation_fragments")]
    pub truncation_fragments: Vec<String>,

    /// Contradiction rate above which a ranking is flagged low-confidence.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
}

fn default_screening_runs() -> usize {
    3
}

fn default_top_k() -> usize {
    4
}

fn default_elo_k() -> f64 {
    30.0
}

fn default_elo_base() -> f64 {
    1000.0
}

fn default_screening_temperature() -> f32 {
    0.8
}

fn default_comparison_temperature() -> f32 {
    0.1
}

fn default_concurrency() -> usize {
    4
}

fn default_judge_model() -> String {
    DEFAULT_JUDGE_MODEL.to_string()
}

fn default_truncation_fragments() -> Vec<String> {
    DEFAULT_TRUNCATION_FRAGMENTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_low_confidence_threshold() -> f64 {
    0.34
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            screening_runs: default_screening_runs(),
            top_k: default_top_k(),
            elo_k: default_elo_k(),
            elo_base: default_elo_base(),
            screening_temperature: default_screening_temperature(),
            comparison_temperature: default_comparison_temperature(),
            concurrency: default_concurrency(),
            call_timeout_ms: None,
            judge_model: default_judge_model(),
            truncation_fragments: default_truncation_fragments(),
            low_confidence_threshold: default_low_confidence_threshold(),
        }
    }
}

impl TournamentConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Candidate as supplied by the upstream generation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInput {
    #[serde(alias = "persona", alias = "display_name")]
    pub name: String,
    pub text: String,
    #[serde(default, alias = "voice_spec")]
    pub style_notes: Option<String>,
}

impl From<CandidateInput> for Candidate {
    fn from(input: CandidateInput) -> Self {
        let candidate = Candidate::new(input.name, input.text);
        match input.style_notes {
            Some(notes) => candidate.with_style_notes(notes),
            None => candidate,
        }
    }
}

/// One chapter to rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentRequest {
    pub chapter_id: String,
    /// Original text the candidates rewrite, used for fidelity judging.
    #[serde(default)]
    pub source_text: Option<String>,
    pub candidates: Vec<CandidateInput>,
    #[serde(default)]
    pub config: TournamentConfig,
}

impl TournamentRequest {
    pub fn new(chapter_id: impl Into<String>, candidates: Vec<CandidateInput>) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            source_text: None,
            candidates,
            config: TournamentConfig::default(),
        }
    }

    pub fn with_source(mut self, source_text: impl Into<String>) -> Self {
        self.source_text = Some(source_text.into());
        self
    }

    pub fn with_config(mut self, config: TournamentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn to_candidates(&self) -> Vec<Candidate> {
        self.candidates.iter().cloned().map(Candidate::from).collect()
    }
}

/// Several independent chapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub chapters: Vec<TournamentRequest>,
    /// Chapters ranked at once.
    #[serde(default = "default_chapter_concurrency")]
    pub chapter_concurrency: usize,
}

fn default_chapter_concurrency() -> usize {
    2
}

impl BatchRequest {
    /// The one judge model every chapter asks for. A batch shares a single
    /// oracle, so chapters naming different models are rejected.
    pub fn judge_model(&self) -> Result<&str, TournamentError> {
        let mut models: Vec<&str> = self
            .chapters
            .iter()
            .map(|c| c.config.judge_model.as_str())
            .collect();
        models.sort_unstable();
        models.dedup();
        match models.as_slice() {
            [] => Ok(DEFAULT_JUDGE_MODEL),
            [model] => Ok(model),
            _ => Err(TournamentError::InvalidRequest(format!(
                "batch chapters name different judge models: {}",
                models.join(", ")
            ))),
        }
    }
}

/// Execution settings that do not change what is ranked.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Seed for screening shuffles. `None` draws from entropy.
    pub rng_seed: Option<u64>,
    /// Whole-run deadline. Remaining calls are cancelled once it passes.
    pub deadline: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_fill_config() {
        let req: TournamentRequest = serde_json::from_str(
            r#"{"chapter_id":"ch1","candidates":[{"persona":"A","text":"a"},{"name":"B","text":"b","voice_spec":"v"}]}"#,
        )
        .expect("parse");
        assert_eq!(req.config.screening_runs, 3);
        assert_eq!(req.config.top_k, 4);
        assert_eq!(req.config.elo_k, 30.0);
        assert_eq!(req.config.truncation_fragments.len(), DEFAULT_TRUNCATION_FRAGMENTS.len());
        let candidates = req.to_candidates();
        assert_eq!(candidates[0].id, "DRAFT_A");
        assert_eq!(candidates[1].style_notes.as_deref(), Some("v"));
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let cfg: TournamentConfig = serde_json::from_str(r#"{"top_k": 2}"#).expect("parse");
        assert_eq!(cfg.top_k, 2);
        assert_eq!(cfg.screening_runs, 3);
        assert_eq!(cfg.judge_model, DEFAULT_JUDGE_MODEL);
    }

    fn chapter_with_model(id: &str, model: Option<&str>) -> serde_json::Value {
        let mut chapter = serde_json::json!({
            "chapter_id": id,
            "candidates": [{"name": "A", "text": "a"}, {"name": "B", "text": "b"}]
        });
        if let Some(model) = model {
            chapter["config"] = serde_json::json!({ "judge_model": model });
        }
        chapter
    }

    #[test]
    fn batch_judge_model_must_agree_across_chapters() {
        let shared: BatchRequest = serde_json::from_value(serde_json::json!({
            "chapters": [chapter_with_model("1", None), chapter_with_model("2", None)]
        }))
        .expect("parse");
        assert_eq!(shared.judge_model().unwrap(), DEFAULT_JUDGE_MODEL);

        let mixed: BatchRequest = serde_json::from_value(serde_json::json!({
            "chapters": [
                chapter_with_model("1", None),
                chapter_with_model("2", Some("anthropic/claude-3.5-haiku"))
            ]
        }))
        .expect("parse");
        let err = mixed.judge_model().unwrap_err();
        assert!(err.to_string().contains("anthropic/claude-3.5-haiku"), "{err}");
    }
}
