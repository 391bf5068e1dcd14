//! Turning free-form judge replies into ranking tables.
//!
//! A reply is expected to end with a fenced JSON block holding `table`,
//! `analysis` and `feedback`. Judges get this wrong in several ways: the
//! reply is cut off mid-rubric, the block is missing or malformed, ids are
//! mangled, candidates are skipped. [`VerdictLadder`] walks a fixed sequence
//! of progressively simpler prompts until one reply decodes.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::error::JudgeError;
use super::types::{
    CandidateRegistry, CriterionScores, RankEntry, RankingTable, Verdict, VerdictDiagnostics,
    DRAFT_PREFIX,
};
use crate::oracle::{estimate_output_budget, invoke_with_deadline, JudgeOracle, OracleError};
use crate::prompts::{self, RankingContext};

// =============================================================================
// Truncation
// =============================================================================

/// Detects replies that stopped before the structured block.
#[derive(Debug, Clone)]
pub struct TruncationDetector {
    fragments: Vec<String>,
}

impl TruncationDetector {
    pub fn new<S: AsRef<str>>(fragments: &[S]) -> Self {
        Self {
            fragments: fragments
                .iter()
                .map(|f| f.as_ref().trim_end().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
        }
    }

    /// Provider flag, or the reply ends on a known mid-rubric fragment.
    pub fn is_truncated(&self, text: &str, size_limit_hit: bool) -> bool {
        if size_limit_hit {
            return true;
        }
        let tail = text.trim_end();
        self.fragments.iter().any(|f| tail.ends_with(f.as_str()))
    }
}

impl Default for TruncationDetector {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_TRUNCATION_FRAGMENTS)
    }
}

// =============================================================================
// Block extraction
// =============================================================================

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("Invalid fenced JSON regex")
});

/// Fenced code blocks that look like JSON objects, last first.
fn fenced_blocks(raw: &str) -> Vec<&str> {
    let mut blocks: Vec<&str> = FENCED_JSON
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    blocks.reverse();
    blocks
}

/// Balanced-brace scan for a top-level object, honouring string literals.
/// Returns the object starting at `start` (which must index a `{`).
fn balanced_object(raw: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Unfenced objects mentioning a `table` key, last first.
fn bare_objects(raw: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut cursor = 0usize;
    while let Some(pos) = raw[cursor..].find('{') {
        let start = cursor + pos;
        match balanced_object(raw, start) {
            Some(obj) if obj.contains("\"table\"") => {
                found.push(obj);
                cursor = start + obj.len();
            }
            _ => cursor = start + 1,
        }
    }
    found.reverse();
    found
}

// =============================================================================
// Decoding
// =============================================================================

/// Lenient view of the structured block.
#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    table: Vec<Value>,
    #[serde(default)]
    analysis: Option<Value>,
    #[serde(default)]
    feedback: Option<Map<String, Value>>,
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Integers, integral floats and numeric strings; must be at least 1.
fn parse_rank(v: &Value) -> Option<u32> {
    let f = value_as_f64(v)?;
    if f.fract() != 0.0 || f < 1.0 || f > u32::MAX as f64 {
        return None;
    }
    Some(f as u32)
}

fn parse_scores(entry: &Map<String, Value>) -> CriterionScores {
    let mut scores = CriterionScores::default();
    for field in CriterionScores::FIELDS {
        if let Some(v) = entry.get(field).and_then(value_as_f64) {
            scores.set(field, v);
        }
    }
    // Older rubric: a single "faithfulness" score covering both fidelity axes.
    if let Some(f) = entry.get("faithfulness").and_then(value_as_f64) {
        if !entry.contains_key("plot_fidelity") {
            scores.set("plot_fidelity", f);
        }
        if !entry.contains_key("tone_fidelity") {
            scores.set("tone_fidelity", f);
        }
    }
    scores
}

/// Maps a judge-written id back to a display name.
///
/// Exact id, then exact display name, then a case-insensitive substring
/// match of a known id or display name inside `raw_id`. When several
/// candidates match by substring the longest match wins, so "Anne" beats
/// "Ann" for "draft_anne".
pub fn remap_candidate_id(raw_id: &str, registry: &CandidateRegistry) -> Option<String> {
    let raw = raw_id.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(name) = registry.display_name(raw) {
        return Some(name.to_string());
    }
    if let Some(name) = registry.display_names().iter().find(|n| n.as_str() == raw) {
        return Some(name.clone());
    }

    let lowered = raw.to_lowercase();
    let stripped = lowered
        .strip_prefix(&DRAFT_PREFIX.to_lowercase())
        .unwrap_or(&lowered)
        .to_string();
    let mut best: Option<(usize, &str)> = None;
    for (id, name) in registry.entries() {
        let id_l = id.to_lowercase();
        let name_l = name.to_lowercase();
        let matched = if lowered.contains(&id_l) {
            id_l.len()
        } else if !name_l.is_empty() && stripped.contains(&name_l) {
            name_l.len()
        } else {
            continue;
        };
        if best.map_or(true, |(len, _)| matched > len) {
            best = Some((matched, name));
        }
    }
    best.map(|(_, name)| name.to_string())
}

fn entry_label(entry: &Map<String, Value>) -> Option<String> {
    ["id", "persona", "name"]
        .iter()
        .filter_map(|k| entry.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn resolve_entry(entry: &Map<String, Value>, registry: &CandidateRegistry) -> Option<String> {
    ["id", "persona", "name"]
        .iter()
        .filter_map(|k| entry.get(*k).and_then(Value::as_str))
        .find_map(|label| remap_candidate_id(label, registry))
}

/// Decodes one JSON block into a verdict. The table must be non-empty and
/// its first entry must carry a usable rank.
fn decode_block(block: &str, raw: &str, registry: &CandidateRegistry) -> Result<Verdict, String> {
    let parsed: RawVerdict =
        serde_json::from_str(block).map_err(|e| format!("invalid JSON block: {e}"))?;
    if parsed.table.is_empty() {
        return Err("empty ranking table".to_string());
    }
    let first_has_rank = parsed.table[0]
        .as_object()
        .and_then(|o| o.get("rank"))
        .and_then(parse_rank)
        .is_some();
    if !first_has_rank {
        return Err("first table entry has no usable rank".to_string());
    }

    let mut entries = Vec::with_capacity(parsed.table.len());
    let mut seen: HashSet<String> = HashSet::new();
    let mut dropped = Vec::new();
    for (position, value) in parsed.table.iter().enumerate() {
        let Some(entry) = value.as_object() else {
            dropped.push(value.to_string());
            continue;
        };
        let Some(display_name) = resolve_entry(entry, registry) else {
            let label = entry_label(entry).unwrap_or_else(|| "<no id>".to_string());
            warn!(raw_id = %label, "ranking entry matches no candidate; dropped");
            dropped.push(label);
            continue;
        };
        if !seen.insert(display_name.clone()) {
            let label = entry_label(entry).unwrap_or_else(|| display_name.clone());
            warn!(candidate = %display_name, raw_id = %label, "candidate ranked twice; later entry dropped");
            dropped.push(label);
            continue;
        }
        let rank = match entry.get("rank").and_then(parse_rank) {
            Some(r) => r,
            None => {
                debug!(candidate = %display_name, position, "entry without rank; using table position");
                position as u32 + 1
            }
        };
        entries.push(RankEntry {
            candidate_id: format!("{DRAFT_PREFIX}{display_name}"),
            display_name,
            rank,
            scores: parse_scores(entry),
        });
    }

    if entries.is_empty() {
        return Err("no table entry matched a submitted candidate".to_string());
    }

    let mut feedback = BTreeMap::new();
    for (key, value) in parsed.feedback.unwrap_or_default() {
        let Some(name) = remap_candidate_id(&key, registry) else {
            continue;
        };
        let text = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        feedback.entry(name).or_insert(text);
    }

    let analysis_text = match parsed.analysis {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let table = RankingTable { entries };
    let missing_candidates: Vec<String> = registry
        .display_names()
        .iter()
        .filter(|n| !seen.contains(n.as_str()))
        .cloned()
        .collect();
    if !missing_candidates.is_empty() {
        warn!(
            ranked = table.len(),
            expected = registry.len(),
            missing = ?missing_candidates,
            "ranking incomplete"
        );
    }
    let rank_defects = table.defects();
    if !rank_defects.is_empty() {
        warn!(
            duplicates = ?rank_defects.duplicate_ranks,
            gaps = ?rank_defects.missing_ranks,
            "ranking has inconsistent ranks"
        );
    }

    Ok(Verdict {
        table,
        analysis_text,
        feedback_by_candidate: feedback,
        raw_response: raw.to_string(),
        missing_candidates,
        diagnostics: VerdictDiagnostics {
            dropped_entries: dropped,
            rank_defects,
            ..VerdictDiagnostics::default()
        },
    })
}

/// Result of looking at one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Box<Verdict>),
    Truncated,
    Unparseable(String),
}

fn decode_candidates(
    blocks: Vec<&str>,
    raw: &str,
    registry: &CandidateRegistry,
) -> Result<Verdict, String> {
    let mut last_err = "no structured block found".to_string();
    for block in blocks {
        match decode_block(block, raw, registry) {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(error = %e, "structured block failed to decode");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Parses a rubric-style reply: truncation check, then fenced block, then
/// any bare object carrying a `table`.
pub fn parse_response(
    raw: &str,
    size_limit_hit: bool,
    registry: &CandidateRegistry,
    detector: &TruncationDetector,
) -> ParseOutcome {
    if detector.is_truncated(raw, size_limit_hit) {
        return ParseOutcome::Truncated;
    }
    let mut blocks = fenced_blocks(raw);
    blocks.extend(bare_objects(raw));
    match decode_candidates(blocks, raw, registry) {
        Ok(v) => ParseOutcome::Parsed(Box::new(v)),
        Err(e) => ParseOutcome::Unparseable(e),
    }
}

/// Parses a JSON-only reply: the whole body first, then embedded objects.
pub fn parse_structured(raw: &str, registry: &CandidateRegistry) -> ParseOutcome {
    let trimmed = raw.trim();
    let mut blocks = vec![trimmed];
    blocks.extend(fenced_blocks(trimmed));
    blocks.extend(bare_objects(trimmed));
    match decode_candidates(blocks, raw, registry) {
        Ok(v) => ParseOutcome::Parsed(Box::new(v)),
        Err(e) => ParseOutcome::Unparseable(e),
    }
}

// =============================================================================
// Ladder
// =============================================================================

/// Position in the parser ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderStage {
    FullRubric,
    ShortRubric,
    StructuredOnly,
    Failed,
}

impl LadderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LadderStage::FullRubric => "full_rubric",
            LadderStage::ShortRubric => "short_rubric",
            LadderStage::StructuredOnly => "structured_only",
            LadderStage::Failed => "failed",
        }
    }

    /// Next stage given what the reply at this stage looked like.
    pub fn next(self, outcome: &ParseOutcome) -> Option<LadderStage> {
        match (self, outcome) {
            (_, ParseOutcome::Parsed(_)) | (LadderStage::Failed, _) => None,
            (LadderStage::FullRubric, ParseOutcome::Truncated) => Some(LadderStage::ShortRubric),
            (LadderStage::FullRubric | LadderStage::ShortRubric, ParseOutcome::Unparseable(_)) => {
                Some(LadderStage::StructuredOnly)
            }
            (LadderStage::ShortRubric, ParseOutcome::Truncated)
            | (LadderStage::StructuredOnly, _) => Some(LadderStage::Failed),
        }
    }
}

/// Observer for each oracle call the ladder makes. Used for traces.
pub trait LadderObserver: Send + Sync {
    fn on_call(&self, stage: LadderStage, call: &LadderCall<'_>);
}

/// One oracle call, as reported to a [`LadderObserver`].
#[derive(Debug)]
pub struct LadderCall<'a> {
    pub prompt: &'a prompts::JudgePrompt,
    pub max_output_tokens: u32,
    pub reply: Result<&'a crate::oracle::OracleReply, &'a OracleError>,
    pub outcome: Option<&'a ParseOutcome>,
}

/// Runs one ranking request through the parser ladder.
pub struct VerdictLadder<'a, O: JudgeOracle + ?Sized> {
    oracle: &'a O,
    detector: &'a TruncationDetector,
    call_timeout: Option<Duration>,
    cancel: Option<&'a AtomicBool>,
    observer: Option<&'a dyn LadderObserver>,
    escalate_truncation: bool,
    slot: prompts::CallSlot,
}

impl<'a, O: JudgeOracle + ?Sized> VerdictLadder<'a, O> {
    pub fn new(oracle: &'a O, detector: &'a TruncationDetector) -> Self {
        Self {
            oracle,
            detector,
            call_timeout: None,
            cancel: None,
            observer: None,
            escalate_truncation: true,
            slot: prompts::CallSlot::default(),
        }
    }

    /// Stamped on every prompt this ladder sends.
    pub fn slot(mut self, slot: prompts::CallSlot) -> Self {
        self.slot = slot;
        self
    }

    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn cancel_flag(mut self, flag: Option<&'a AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn observer(mut self, observer: Option<&'a dyn LadderObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// When false, a second truncation returns `VerdictTruncated` instead of
    /// `VerdictUnparseable`.
    pub fn escalate_truncation(mut self, escalate: bool) -> Self {
        self.escalate_truncation = escalate;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|f| f.load(Ordering::Relaxed))
    }

    pub async fn run(
        &self,
        ctx: &RankingContext<'_>,
        temperature: f32,
    ) -> Result<Verdict, JudgeError> {
        let registry = CandidateRegistry::new(ctx.candidates);
        let mut diag = VerdictDiagnostics::default();
        let mut stage = LadderStage::FullRubric;
        let mut last_raw = String::new();
        let mut last_reason = String::new();

        loop {
            diag.stages.push(stage);
            let prompt = match stage {
                LadderStage::FullRubric => prompts::full_rubric(ctx, temperature),
                LadderStage::ShortRubric => prompts::short_rubric(ctx, temperature),
                LadderStage::StructuredOnly => prompts::structured_only(ctx),
                LadderStage::Failed => {
                    return Err(JudgeError::VerdictUnparseable {
                        reason: last_reason,
                        raw: last_raw,
                        diagnostics: Box::new(diag),
                    });
                }
            };
            let prompt = prompt.with_slot(self.slot.clone());

            if self.cancelled() {
                return Err(JudgeError::Cancelled {
                    diagnostics: Box::new(diag),
                });
            }

            let budget = estimate_output_budget(prompt.len_chars(), ctx.candidates.len());
            let reply =
                invoke_with_deadline(self.oracle, &prompt, budget, self.call_timeout).await;
            let reply = match reply {
                Ok(reply) => reply,
                Err(err) => {
                    if let Some(obs) = self.observer {
                        obs.on_call(
                            stage,
                            &LadderCall {
                                prompt: &prompt,
                                max_output_tokens: budget,
                                reply: Err(&err),
                                outcome: None,
                            },
                        );
                    }
                    return Err(match err {
                        OracleError::Cancelled(_) => JudgeError::Cancelled {
                            diagnostics: Box::new(diag),
                        },
                        other => JudgeError::OracleUnavailable {
                            source: other,
                            diagnostics: Box::new(diag),
                        },
                    });
                }
            };
            diag.absorb_usage(&reply.usage);

            let outcome = match stage {
                LadderStage::StructuredOnly => parse_structured(&reply.text, &registry),
                _ => parse_response(
                    &reply.text,
                    reply.truncated_by_size_limit,
                    &registry,
                    self.detector,
                ),
            };
            if let Some(obs) = self.observer {
                obs.on_call(
                    stage,
                    &LadderCall {
                        prompt: &prompt,
                        max_output_tokens: budget,
                        reply: Ok(&reply),
                        outcome: Some(&outcome),
                    },
                );
            }

            match &outcome {
                ParseOutcome::Parsed(_) => {}
                ParseOutcome::Truncated => {
                    diag.truncations += 1;
                    warn!(stage = stage.as_str(), "judge reply truncated");
                    last_reason = format!("reply truncated at {}", stage.as_str());
                }
                ParseOutcome::Unparseable(reason) => {
                    diag.decode_failures += 1;
                    warn!(stage = stage.as_str(), reason = %reason, "judge reply unparseable");
                    last_reason = reason.clone();
                }
            }

            let next = stage.next(&outcome);
            match (outcome, next) {
                (ParseOutcome::Parsed(verdict), _) => {
                    let mut verdict = *verdict;
                    diag.dropped_entries = std::mem::take(&mut verdict.diagnostics.dropped_entries);
                    diag.rank_defects = std::mem::take(&mut verdict.diagnostics.rank_defects);
                    verdict.diagnostics = diag;
                    return Ok(verdict);
                }
                (ParseOutcome::Truncated, Some(LadderStage::Failed))
                    if !self.escalate_truncation =>
                {
                    return Err(JudgeError::VerdictTruncated {
                        stage: stage.as_str(),
                        diagnostics: Box::new(diag),
                    });
                }
                (_, Some(next_stage)) => {
                    last_raw = reply.text;
                    stage = next_stage;
                }
                (_, None) => {
                    return Err(JudgeError::VerdictUnparseable {
                        reason: last_reason,
                        raw: reply.text,
                        diagnostics: Box::new(diag),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::types::Candidate;

    fn registry(names: &[&str]) -> CandidateRegistry {
        let candidates: Vec<Candidate> = names.iter().map(|n| Candidate::new(*n, "t")).collect();
        CandidateRegistry::new(&candidates)
    }

    fn detector() -> TruncationDetector {
        TruncationDetector::default()
    }

    #[test]
    fn truncation_by_flag_or_fragment() {
        let d = detector();
        assert!(d.is_truncated("all good", true));
        assert!(d.is_truncated("CRITIC A: ...\n- Fidelity to original plot", false));
        assert!(d.is_truncated("scores: [", false));
        assert!(d.is_truncated("**DRAFT_   \n", false));
        assert!(!d.is_truncated("```json\n{}\n```", false));
    }

    #[test]
    fn fenced_block_decodes_with_remap() {
        let reg = registry(&["Austen", "Bronte"]);
        let raw = r#"CRITIC A: ...
```json
{"table": [
  {"rank": 1, "id": "draft_bronte", "clarity": 9, "overall": "8"},
  {"rank": 2, "id": "DRAFT_Austen", "faithfulness": 6}
], "analysis": "Bronte wins.", "feedback": {"DRAFT_Austen": "Tighten pacing."}}
```"#;
        let ParseOutcome::Parsed(v) = parse_response(raw, false, &reg, &detector()) else {
            panic!("expected parsed");
        };
        assert_eq!(v.table.winner().map(|e| e.display_name.as_str()), Some("Bronte"));
        let austen = v.table.entry("Austen").expect("austen");
        assert_eq!(austen.scores.plot_fidelity, 6.0);
        assert_eq!(austen.scores.tone_fidelity, 6.0);
        assert_eq!(austen.scores.clarity, 7.0);
        let bronte = v.table.entry("Bronte").expect("bronte");
        assert_eq!(bronte.scores.overall, 8.0);
        assert_eq!(v.feedback_by_candidate["Austen"], "Tighten pacing.");
        assert!(v.missing_candidates.is_empty());
    }

    #[test]
    fn bare_object_is_found_without_fence() {
        let reg = registry(&["A", "B"]);
        let raw = r#"Consensus reached. {"table": [{"rank": 1, "id": "DRAFT_B"}, {"rank": 2, "id": "DRAFT_A"}], "analysis": "B {clearly} better"} Thanks."#;
        let ParseOutcome::Parsed(v) = parse_response(raw, false, &reg, &detector()) else {
            panic!("expected parsed");
        };
        assert_eq!(v.table.rank_of("B"), Some(1));
        assert_eq!(v.analysis_text, "B {clearly} better");
    }

    #[test]
    fn missing_block_is_unparseable() {
        let reg = registry(&["A", "B"]);
        assert!(matches!(
            parse_response("I liked A more.", false, &reg, &detector()),
            ParseOutcome::Unparseable(_)
        ));
    }

    #[test]
    fn empty_table_and_rankless_first_entry_rejected() {
        let reg = registry(&["A", "B"]);
        assert!(matches!(
            parse_structured(r#"{"table": []}"#, &reg),
            ParseOutcome::Unparseable(_)
        ));
        assert!(matches!(
            parse_structured(r#"{"table": [{"id": "DRAFT_A"}, {"rank": 2, "id": "DRAFT_B"}]}"#, &reg),
            ParseOutcome::Unparseable(_)
        ));
    }

    #[test]
    fn omitted_and_unknown_entries_are_reported() {
        let reg = registry(&["A", "B", "C"]);
        let raw = r#"{"table": [{"rank": 1, "id": "DRAFT_C"}, {"rank": 2, "id": "DRAFT_Zed"}, {"rank": 3, "id": "DRAFT_C"}]}"#;
        let ParseOutcome::Parsed(v) = parse_structured(raw, &reg) else {
            panic!("expected parsed");
        };
        assert_eq!(v.table.len(), 1);
        assert_eq!(v.missing_candidates, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(v.diagnostics.dropped_entries.len(), 2);
    }

    #[test]
    fn rank_formats_are_lenient() {
        assert_eq!(parse_rank(&serde_json::json!(2)), Some(2));
        assert_eq!(parse_rank(&serde_json::json!(2.0)), Some(2));
        assert_eq!(parse_rank(&serde_json::json!(" 3 ")), Some(3));
        assert_eq!(parse_rank(&serde_json::json!(1.5)), None);
        assert_eq!(parse_rank(&serde_json::json!(0)), None);
        assert_eq!(parse_rank(&serde_json::json!(null)), None);
    }

    #[test]
    fn remap_prefers_longest_match() {
        let reg = registry(&["Ann", "Anne", "Bo"]);
        assert_eq!(remap_candidate_id("DRAFT_Anne", &reg).as_deref(), Some("Anne"));
        assert_eq!(remap_candidate_id("draft_anne (revised)", &reg).as_deref(), Some("Anne"));
        assert_eq!(remap_candidate_id("Ann", &reg).as_deref(), Some("Ann"));
        assert_eq!(remap_candidate_id("the bo draft", &reg).as_deref(), Some("Bo"));
        assert_eq!(remap_candidate_id("DRAFT_Zed", &reg), None);
        assert_eq!(remap_candidate_id("", &reg), None);
    }

    #[test]
    fn ladder_transitions() {
        let trunc = ParseOutcome::Truncated;
        let bad = ParseOutcome::Unparseable("x".into());
        assert_eq!(LadderStage::FullRubric.next(&trunc), Some(LadderStage::ShortRubric));
        assert_eq!(LadderStage::FullRubric.next(&bad), Some(LadderStage::StructuredOnly));
        assert_eq!(LadderStage::ShortRubric.next(&trunc), Some(LadderStage::Failed));
        assert_eq!(LadderStage::ShortRubric.next(&bad), Some(LadderStage::StructuredOnly));
        assert_eq!(LadderStage::StructuredOnly.next(&bad), Some(LadderStage::Failed));
        assert_eq!(LadderStage::Failed.next(&bad), None);
    }
}
