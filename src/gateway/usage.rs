//! Usage accounting for judge calls.
//!
//! Every provider call, successful or not, produces a [`ProviderCallRecord`]
//! that goes to a [`UsageSink`]. Tests use [`NoopUsageSink`]; the CLI uses
//! [`TracingUsageSink`] so spend shows up in the structured log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// One provider call, as seen by the gateway.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    pub provider: &'static str,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Nanodollars (1e-9 USD).
    pub cost_nanodollars: i64,
    pub upstream_cost_nanodollars: Option<i64>,
    pub run_id: Option<Uuid>,
    pub chapter_id: Option<String>,
    pub latency_ms: u64,
    pub status: CallStatus,
    pub error_code: Option<String>,
    pub caller: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    pub fn new(provider: &'static str, model: impl Into<String>, caller: &'static str) -> Self {
        Self {
            provider,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            upstream_cost_nanodollars: None,
            run_id: None,
            chapter_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn cost(mut self, nanodollars: i64) -> Self {
        self.cost_nanodollars = nanodollars;
        self
    }

    pub fn upstream_cost(mut self, nanodollars: Option<i64>) -> Self {
        self.upstream_cost_nanodollars = nanodollars;
        self
    }

    pub fn run(mut self, run_id: Option<Uuid>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn chapter(mut self, chapter_id: Option<String>) -> Self {
        self.chapter_id = chapter_id;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }
}

/// Destination for usage records. Must not fail the caller.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: ProviderCallRecord);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Emits one `tracing` event per call and keeps running totals.
#[derive(Debug, Default)]
pub struct TracingUsageSink {
    calls: AtomicU64,
    errors: AtomicU64,
    cost_nanodollars: AtomicI64,
}

impl TracingUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Accumulated spend in USD.
    pub fn total_cost_usd(&self) -> f64 {
        self.cost_nanodollars.load(Ordering::Relaxed) as f64 / 1_000_000_000.0
    }
}

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.cost_nanodollars
            .fetch_add(record.cost_nanodollars, Ordering::Relaxed);
        if record.status == CallStatus::Error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(
            provider = record.provider,
            model = %record.model,
            caller = record.caller,
            run_id = ?record.run_id,
            chapter_id = record.chapter_id.as_deref().unwrap_or("-"),
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cost_nanos = record.cost_nanodollars,
            latency_ms = record.latency_ms,
            status = record.status.as_str(),
            error_code = record.error_code.as_deref().unwrap_or(""),
            "provider call"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracing_sink_accumulates_totals() {
        let sink = TracingUsageSink::new();
        sink.record(
            ProviderCallRecord::new("openrouter", "openai/gpt-4o-mini", "test")
                .tokens(100, 50)
                .cost(500_000_000),
        )
        .await;
        sink.record(
            ProviderCallRecord::new("openrouter", "openai/gpt-4o-mini", "test")
                .error("timeout"),
        )
        .await;

        assert_eq!(sink.calls(), 2);
        assert_eq!(sink.errors(), 1);
        assert!((sink.total_cost_usd() - 0.5).abs() < 1e-9);
    }
}
