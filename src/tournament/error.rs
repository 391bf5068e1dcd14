//! Error types for judge calls and tournament runs.

use super::types::VerdictDiagnostics;
use super::trace::TraceError;
use crate::oracle::OracleError;

/// Failure of a single ranking call after the parser ladder is exhausted.
/// Callers catch these and keep going.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("oracle unavailable: {source}")]
    OracleUnavailable {
        #[source]
        source: OracleError,
        diagnostics: Box<VerdictDiagnostics>,
    },

    /// Reply cut off at the output limit. Only surfaces when the caller
    /// runs the ladder with escalation disabled; otherwise it is recorded in
    /// diagnostics and escalated to `VerdictUnparseable`.
    #[error("verdict truncated at {stage}")]
    VerdictTruncated {
        stage: &'static str,
        diagnostics: Box<VerdictDiagnostics>,
    },

    #[error("verdict unparseable: {reason}")]
    VerdictUnparseable {
        reason: String,
        raw: String,
        diagnostics: Box<VerdictDiagnostics>,
    },

    #[error("judge call cancelled")]
    Cancelled { diagnostics: Box<VerdictDiagnostics> },
}

impl JudgeError {
    pub fn diagnostics(&self) -> &VerdictDiagnostics {
        match self {
            JudgeError::OracleUnavailable { diagnostics, .. }
            | JudgeError::VerdictTruncated { diagnostics, .. }
            | JudgeError::VerdictUnparseable { diagnostics, .. }
            | JudgeError::Cancelled { diagnostics } => diagnostics,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            JudgeError::OracleUnavailable { .. } => "oracle_unavailable",
            JudgeError::VerdictTruncated { .. } => "verdict_truncated",
            JudgeError::VerdictUnparseable { .. } => "verdict_unparseable",
            JudgeError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Failure of a whole chapter's tournament.
#[derive(Debug, thiserror::Error)]
pub enum TournamentError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no usable screening runs ({attempted} attempted)")]
    NoUsableScreeningRuns { attempted: usize },
    #[error("tournament cancelled")]
    Cancelled,
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
}
