//! Two-stage tournament ranking over an LLM judge.
//!
//! Screening runs rank the whole field several times under shuffled
//! presentation orders and keep the best `top_k` by mean rank. Survivors
//! then meet pairwise in both presentation orders; outcomes drive Elo
//! ratings and feed the position-bias detector.

pub mod aggregate;
pub mod bias;
pub mod config;
pub mod elo;
pub mod error;
pub mod pairwise;
pub mod parser;
pub mod run;
pub mod screening;
mod stage;
pub mod trace;
pub mod types;

pub use aggregate::{aggregate, AggregateInput};
pub use bias::{detect as detect_bias, BiasReport};
pub use config::{
    BatchRequest, CandidateInput, RunOptions, TournamentConfig, TournamentRequest,
    DEFAULT_JUDGE_MODEL, DEFAULT_TRUNCATION_FRAGMENTS, MAX_CONCURRENCY,
};
pub use elo::{expected_score, EloDelta, EloRatings};
pub use error::{JudgeError, TournamentError};
pub use pairwise::{schedule, Matchup, PairwiseResult};
pub use parser::{
    parse_response, parse_structured, remap_candidate_id, LadderCall, LadderObserver,
    LadderStage, ParseOutcome, TruncationDetector, VerdictLadder,
};
pub use run::{run_batch, run_tournament, validate, ChapterOutcome, ChapterReport};
pub use screening::ScreeningResult;
pub use trace::{
    JsonlTraceSink, JudgeTrace, MemoryTraceSink, TraceError, TracePhase, TraceSink, TraceWorker,
};
pub use types::*;
