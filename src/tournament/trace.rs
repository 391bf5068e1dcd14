//! Per-call trace capture for tournament runs.
//!
//! Each oracle call the parser ladder makes becomes one JSON line. Writing
//! happens on a background thread so judge calls never block on disk.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{mpsc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use super::parser::{LadderCall, LadderObserver, LadderStage, ParseOutcome};
use crate::cache::hash_text;
use crate::oracle::OracleUsage;

/// Which part of the tournament made the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    Screening,
    Pairwise,
}

impl TracePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TracePhase::Screening => "screening",
            TracePhase::Pairwise => "pairwise",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgeTrace {
    pub timestamp_ms: i64,
    pub run_id: String,
    pub chapter_id: String,
    pub phase: TracePhase,
    /// Screening run number or comparison number within the phase.
    pub call_index: usize,
    pub ladder_stage: LadderStage,
    /// Display names in presentation order.
    pub candidates: Vec<String>,
    pub prompt_hash: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub truncated_by_size_limit: bool,
    /// "parsed", "truncated", "unparseable" or "error".
    pub outcome: &'static str,
    pub detail: Option<String>,
    pub cached: bool,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: JudgeTrace) -> Result<(), TraceError>;
}

/// Collects events in memory. Handy for tests and small runs.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<JudgeTrace>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JudgeTrace> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, event: JudgeTrace) -> Result<(), TraceError> {
        self.events
            .lock()
            .map_err(|_| TraceError::Join("memory trace poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<JudgeTrace>,
}

/// Owns the writer thread. Drop every [`JsonlTraceSink`] clone, then join
/// to flush.
pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    pub fn join(mut self) -> Result<(), TraceError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TraceError::Join("trace worker panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<JudgeTrace>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self { sender },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: JudgeTrace) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<JudgeTrace>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// =============================================================================
// Ladder observer
// =============================================================================

/// Shared trace state for one tournament run. The first write failure is
/// kept and reported once the current stage finishes.
pub(crate) struct TraceRecorder<'a> {
    pub sink: &'a dyn TraceSink,
    pub run_id: &'a str,
    pub chapter_id: &'a str,
    pub failure: Mutex<Option<TraceError>>,
}

impl<'a> TraceRecorder<'a> {
    pub fn new(sink: &'a dyn TraceSink, run_id: &'a str, chapter_id: &'a str) -> Self {
        Self {
            sink,
            run_id,
            chapter_id,
            failure: Mutex::new(None),
        }
    }

    pub fn take_failure(&self) -> Option<TraceError> {
        self.failure.lock().ok().and_then(|mut f| f.take())
    }
}

/// Observer for one ladder run: knows its phase, index and field.
pub(crate) struct CallTracer<'a> {
    pub recorder: &'a TraceRecorder<'a>,
    pub phase: TracePhase,
    pub call_index: usize,
    pub candidates: Vec<String>,
}

impl LadderObserver for CallTracer<'_> {
    fn on_call(&self, stage: LadderStage, call: &LadderCall<'_>) {
        let (outcome, detail, truncated, usage) = match (&call.reply, call.outcome) {
            (Err(err), _) => ("error", Some(err.to_string()), false, OracleUsage::default()),
            (Ok(reply), outcome) => {
                let (label, detail) = match outcome {
                    Some(ParseOutcome::Parsed(_)) => ("parsed", None),
                    Some(ParseOutcome::Truncated) => ("truncated", None),
                    Some(ParseOutcome::Unparseable(reason)) => ("unparseable", Some(reason.clone())),
                    None => ("error", None),
                };
                (label, detail, reply.truncated_by_size_limit, reply.usage)
            }
        };
        let event = JudgeTrace {
            timestamp_ms: now_epoch_ms(),
            run_id: self.recorder.run_id.to_string(),
            chapter_id: self.recorder.chapter_id.to_string(),
            phase: self.phase,
            call_index: self.call_index,
            ladder_stage: stage,
            candidates: self.candidates.clone(),
            prompt_hash: hash_text(&format!("{}\n{}", call.prompt.system, call.prompt.user)),
            temperature: call.prompt.temperature,
            max_output_tokens: call.max_output_tokens,
            truncated_by_size_limit: truncated,
            outcome,
            detail,
            cached: usage.cached,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_nanodollars: usage.cost_nanodollars,
        };
        if let Err(err) = self.recorder.sink.record(event) {
            tracing::warn!(error = %err, "failed to record judge trace");
            if let Ok(mut slot) = self.recorder.failure.lock() {
                slot.get_or_insert(err);
            }
        }
    }
}
