//! Per-run state shared by the screening and pairwise stages.

use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use super::config::TournamentConfig;
use super::error::JudgeError;
use super::parser::{LadderObserver, TruncationDetector, VerdictLadder};
use super::trace::{CallTracer, TracePhase, TraceRecorder};
use super::types::{Candidate, RunStats, Verdict};
use crate::oracle::JudgeOracle;
use crate::prompts::{CallSlot, RankingContext};

pub(crate) struct StageContext<'a, O: JudgeOracle + ?Sized> {
    pub oracle: &'a O,
    pub detector: &'a TruncationDetector,
    pub config: &'a TournamentConfig,
    pub run_id: Uuid,
    pub chapter_id: &'a str,
    pub source_text: Option<&'a str>,
    pub cancel: &'a AtomicBool,
    pub trace: Option<&'a TraceRecorder<'a>>,
}

impl<O: JudgeOracle + ?Sized> StageContext<'_, O> {
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// One ranking call over `field`, in the given presentation order.
    pub async fn judge(
        &self,
        field: &[Candidate],
        temperature: f32,
        phase: TracePhase,
        call_index: usize,
    ) -> Result<Verdict, JudgeError> {
        let ctx = RankingContext {
            chapter_id: self.chapter_id,
            source_text: self.source_text,
            candidates: field,
        };
        let tracer = self.trace.map(|recorder| CallTracer {
            recorder,
            phase,
            call_index,
            candidates: field.iter().map(|c| c.display_name.clone()).collect(),
        });
        let slot = CallSlot {
            run_id: Some(self.run_id),
            chapter_id: Some(self.chapter_id.to_string()),
            sample: format!("{}/{call_index}", phase.as_str()),
        };
        VerdictLadder::new(self.oracle, self.detector)
            .slot(slot)
            .call_timeout(self.config.call_timeout())
            .cancel_flag(Some(self.cancel))
            .observer(tracer.as_ref().map(|t| t as &dyn LadderObserver))
            .run(&ctx, temperature)
            .await
    }
}

/// Folds one ladder result into the run counters.
pub(crate) fn tally(stats: &mut RunStats, result: &Result<Verdict, JudgeError>) {
    match result {
        Ok(verdict) => {
            stats.absorb_diagnostics(&verdict.diagnostics);
            stats.parse_failures += verdict.diagnostics.decode_failures;
            if !verdict.is_complete() {
                stats.incomplete_rankings += 1;
            }
        }
        Err(err) => {
            let diagnostics = err.diagnostics();
            stats.absorb_diagnostics(diagnostics);
            stats.parse_failures += diagnostics.decode_failures;
            match err {
                JudgeError::OracleUnavailable { .. } => stats.oracle_failures += 1,
                JudgeError::Cancelled { .. } => stats.cancelled_calls += 1,
                JudgeError::VerdictTruncated { .. } | JudgeError::VerdictUnparseable { .. } => {}
            }
        }
    }
}
