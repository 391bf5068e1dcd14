//! Tournament orchestration: validate, screen, compare, detect bias,
//! aggregate.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::aggregate::{aggregate, AggregateInput};
use super::bias;
use super::config::{BatchRequest, RunOptions, TournamentRequest, MAX_CONCURRENCY};
use super::error::TournamentError;
use super::pairwise::run_pairwise;
use super::parser::TruncationDetector;
use super::screening::screen;
use super::stage::StageContext;
use super::trace::{TraceRecorder, TraceSink};
use super::types::{FinalRanking, RunStats};
use crate::oracle::JudgeOracle;

/// Rejects requests no tournament can be run on.
pub fn validate(request: &TournamentRequest) -> Result<(), TournamentError> {
    let invalid = |msg: String| Err(TournamentError::InvalidRequest(msg));
    let cfg = &request.config;
    if request.candidates.len() < 2 {
        return invalid(format!(
            "need at least 2 candidates, got {}",
            request.candidates.len()
        ));
    }
    let mut seen = HashSet::new();
    for c in &request.candidates {
        if c.name.trim().is_empty() {
            return invalid("candidate with empty name".to_string());
        }
        if !seen.insert(c.name.as_str()) {
            return invalid(format!("duplicate candidate name: {}", c.name));
        }
        if c.text.trim().is_empty() {
            return invalid(format!("candidate {} has empty text", c.name));
        }
    }
    if cfg.screening_runs == 0 {
        return invalid("screening_runs must be at least 1".to_string());
    }
    if cfg.top_k == 0 {
        return invalid("top_k must be at least 1".to_string());
    }
    if cfg.concurrency == 0 || cfg.concurrency > MAX_CONCURRENCY {
        return invalid(format!(
            "concurrency must be in 1..={MAX_CONCURRENCY}, got {}",
            cfg.concurrency
        ));
    }
    if !cfg.elo_k.is_finite() || cfg.elo_k <= 0.0 {
        return invalid(format!("elo_k must be finite and positive, got {}", cfg.elo_k));
    }
    if !cfg.elo_base.is_finite() {
        return invalid("elo_base must be finite".to_string());
    }
    Ok(())
}

/// Ranks one chapter's candidates.
///
/// `cancel` aborts remaining judge calls once set. `options.deadline`
/// bounds the whole run; either way the run ends in
/// [`TournamentError::Cancelled`].
pub async fn run_tournament<O: JudgeOracle + ?Sized>(
    oracle: &O,
    request: &TournamentRequest,
    options: &RunOptions,
    trace: Option<&dyn TraceSink>,
    cancel: Option<&AtomicBool>,
) -> Result<FinalRanking, TournamentError> {
    validate(request)?;
    let run = run_validated(oracle, request, options.rng_seed, trace, cancel);
    match options.deadline {
        Some(limit) => tokio::time::timeout(limit, run).await.unwrap_or_else(|_| {
            warn!(chapter_id = %request.chapter_id, deadline = ?limit, "tournament deadline elapsed");
            Err(TournamentError::Cancelled)
        }),
        None => run.await,
    }
}

async fn run_validated<O: JudgeOracle + ?Sized>(
    oracle: &O,
    request: &TournamentRequest,
    rng_seed: Option<u64>,
    trace: Option<&dyn TraceSink>,
    cancel: Option<&AtomicBool>,
) -> Result<FinalRanking, TournamentError> {
    let started = Instant::now();
    let config = &request.config;
    let candidates = request.to_candidates();
    let run_uuid = Uuid::new_v4();
    let run_id = run_uuid.to_string();
    let local_cancel = AtomicBool::new(false);
    let cancel = cancel.unwrap_or(&local_cancel);
    let detector = TruncationDetector::new(&config.truncation_fragments);
    let recorder = trace.map(|sink| TraceRecorder::new(sink, &run_id, &request.chapter_id));
    let stage = StageContext {
        oracle,
        detector: &detector,
        config,
        run_id: run_uuid,
        chapter_id: &request.chapter_id,
        source_text: request.source_text.as_deref(),
        cancel,
        trace: recorder.as_ref(),
    };
    let mut rng = match rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut stats = RunStats::default();

    info!(
        chapter_id = %request.chapter_id,
        run_id = %run_id,
        candidates = candidates.len(),
        "tournament started"
    );

    let check = || -> Result<(), TournamentError> {
        if let Some(err) = recorder.as_ref().and_then(|r| r.take_failure()) {
            return Err(err.into());
        }
        if stage.cancelled() {
            return Err(TournamentError::Cancelled);
        }
        Ok(())
    };

    check()?;
    let screening = screen(&stage, &candidates, &mut rng, &mut stats).await?;
    check()?;
    let pairwise = run_pairwise(&stage, &screening.survivors, &mut stats).await;
    check()?;

    let bias = bias::detect(&pairwise.log);
    stats.latency_ms = started.elapsed().as_millis() as u64;

    let ranking = aggregate(AggregateInput {
        run_id: &run_id,
        chapter_id: &request.chapter_id,
        candidates: &candidates,
        top_k: config.top_k,
        screening,
        pairwise,
        bias,
        stats,
    });

    if ranking.is_low_confidence(config.low_confidence_threshold) {
        warn!(
            chapter_id = %request.chapter_id,
            contradiction_rate = ranking.bias.contradiction_rate,
            comparisons_failed = ranking.stats.comparisons_failed,
            "ranking is low confidence"
        );
    }
    info!(
        chapter_id = %request.chapter_id,
        winner = ranking.winner().map(|e| e.display_name.as_str()).unwrap_or(""),
        oracle_calls = ranking.stats.oracle_calls,
        latency_ms = ranking.stats.latency_ms,
        "tournament finished"
    );
    Ok(ranking)
}

// =============================================================================
// Batch
// =============================================================================

#[derive(Debug)]
pub struct ChapterOutcome {
    pub chapter_id: String,
    pub result: Result<FinalRanking, TournamentError>,
}

/// Serializable view of a [`ChapterOutcome`].
#[derive(Debug, Serialize)]
pub struct ChapterReport<'a> {
    pub chapter_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking: Option<&'a FinalRanking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChapterOutcome {
    pub fn report(&self) -> ChapterReport<'_> {
        match &self.result {
            Ok(ranking) => ChapterReport {
                chapter_id: &self.chapter_id,
                ranking: Some(ranking),
                error: None,
            },
            Err(err) => ChapterReport {
                chapter_id: &self.chapter_id,
                ranking: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Ranks independent chapters concurrently. A failed chapter is reported
/// in its outcome and never aborts the others. Outcomes keep request order.
pub async fn run_batch<O: JudgeOracle + ?Sized>(
    oracle: &O,
    batch: &BatchRequest,
    options: &RunOptions,
    trace: Option<&dyn TraceSink>,
) -> Vec<ChapterOutcome> {
    let width = batch.chapter_concurrency.clamp(1, MAX_CONCURRENCY);
    stream::iter(batch.chapters.iter().enumerate().map(|(idx, request)| {
        let options = RunOptions {
            rng_seed: options.rng_seed.map(|s| s.wrapping_add(idx as u64)),
            deadline: options.deadline,
        };
        async move {
            let result = run_tournament(oracle, request, &options, trace, None).await;
            if let Err(err) = &result {
                warn!(chapter_id = %request.chapter_id, error = %err, "chapter failed");
            }
            ChapterOutcome {
                chapter_id: request.chapter_id.clone(),
                result,
            }
        }
    }))
    .buffered(width)
    .collect()
    .await
}
