#![forbid(unsafe_code)]

//! # verdict-harness
//!
//! Tournament ranking of prose drafts with an LLM judge.
//!
//! Asking a judge to rank a whole field once is noisy: the order drafts are
//! shown in moves the result, replies get cut off, and structured output
//! comes back malformed. verdict-harness screens the field with several
//! shuffled ranking runs, promotes a shortlist, and settles the final order
//! with order-swapped pairwise comparisons folded into Elo ratings. Every
//! judge reply goes through a fallback ladder of simpler prompts before a
//! call is given up, and contradictions under order swap are reported as
//! position bias.

pub mod cache;
pub mod gateway;
pub mod oracle;
pub mod prompts;
pub mod tournament;

pub use cache::{ResponseCache, ResponseCacheKey, SqliteResponseCache};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use oracle::{GatewayOracle, JudgeOracle, OracleError, OracleReply, OracleUsage};
pub use prompts::{CallSlot, JudgePrompt, PromptShape, RankingContext};
pub use tournament::{
    run_batch, run_tournament, BatchRequest, BiasReport, Candidate, CandidateInput,
    ChapterOutcome, FinalRanking, JsonlTraceSink, JudgeError, RunOptions, TournamentConfig,
    TournamentError, TournamentRequest, TraceSink, TraceWorker, Verdict,
};
