//! Judge oracle: the boundary between the tournament and the language model.
//!
//! The tournament only sees [`JudgeOracle`]. [`GatewayOracle`] is the
//! production implementation over the provider gateway, with an optional
//! reply cache in front of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::cache::{CacheError, CachedReply, ResponseCache, ResponseCacheKey};
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::prompts::JudgePrompt;

// =============================================================================
// Constants
// =============================================================================

/// Rough prompt-side token estimate: characters per token.
const CHARS_PER_TOKEN: usize = 4;
/// Output floor for any ranking call.
const MIN_OUTPUT_TOKENS: u32 = 2_000;
/// Output tokens budgeted per candidate in the field.
const OUTPUT_TOKENS_PER_CANDIDATE: u32 = 800;
/// Output ceiling for any ranking call.
const MAX_OUTPUT_TOKENS: u32 = 4_096;

/// Output token budget for a ranking call.
///
/// Grows with the number of candidates and, more slowly, with prompt size;
/// always within `[2000, 4096]`.
pub fn estimate_output_budget(prompt_chars: usize, n_candidates: usize) -> u32 {
    let input_tokens = (prompt_chars / CHARS_PER_TOKEN) as u64;
    let by_field = (n_candidates as u64) * OUTPUT_TOKENS_PER_CANDIDATE as u64;
    let by_input = input_tokens / 4;
    let budget = by_field.max(by_input).max(MIN_OUTPUT_TOKENS as u64);
    budget.min(MAX_OUTPUT_TOKENS as u64) as u32
}

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct OracleUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
    pub cached: bool,
}

/// Raw judge reply. `truncated_by_size_limit` is the provider's own signal
/// (finish reason `length`); content-based truncation is the parser's job.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub text: String,
    pub truncated_by_size_limit: bool,
    pub usage: OracleUsage,
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(#[from] ProviderError),
    #[error("oracle call cancelled: {0}")]
    Cancelled(String),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("cache miss: {0}")]
    CacheMiss(String),
}

#[async_trait]
pub trait JudgeOracle: Send + Sync {
    async fn invoke(
        &self,
        prompt: &JudgePrompt,
        max_output_tokens: u32,
    ) -> Result<OracleReply, OracleError>;
}

#[async_trait]
impl<T: JudgeOracle + ?Sized> JudgeOracle for Arc<T> {
    async fn invoke(
        &self,
        prompt: &JudgePrompt,
        max_output_tokens: u32,
    ) -> Result<OracleReply, OracleError> {
        (**self).invoke(prompt, max_output_tokens).await
    }
}

/// Runs `invoke` under an optional deadline. An elapsed deadline drops the
/// in-flight call and reports `Cancelled`.
pub async fn invoke_with_deadline<O: JudgeOracle + ?Sized>(
    oracle: &O,
    prompt: &JudgePrompt,
    max_output_tokens: u32,
    deadline: Option<Duration>,
) -> Result<OracleReply, OracleError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, oracle.invoke(prompt, max_output_tokens))
            .await
            .map_err(|_| OracleError::Cancelled(format!("deadline of {limit:?} elapsed")))?,
        None => oracle.invoke(prompt, max_output_tokens).await,
    }
}

// =============================================================================
// Gateway-backed oracle
// =============================================================================

/// Caller tag on every usage record this oracle produces.
const CALLER: &str = "verdict::judge";

pub struct GatewayOracle<G: ChatGateway> {
    gateway: Arc<G>,
    model: String,
    cache: Option<Arc<dyn ResponseCache>>,
    cache_only: bool,
}

impl<G: ChatGateway> GatewayOracle<G> {
    pub fn new(gateway: Arc<G>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
            cache: None,
            cache_only: false,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Serve only from cache; a miss is an error instead of a network call.
    pub fn cache_only(mut self, cache_only: bool) -> Self {
        self.cache_only = cache_only;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl<G: ChatGateway> JudgeOracle for GatewayOracle<G> {
    async fn invoke(
        &self,
        prompt: &JudgePrompt,
        max_output_tokens: u32,
    ) -> Result<OracleReply, OracleError> {
        let cache_key = self.cache.as_ref().map(|_| {
            ResponseCacheKey::new(
                &self.model,
                prompt.shape.slug(),
                &prompt.system,
                &prompt.user,
                prompt.temperature,
                max_output_tokens,
                prompt.json_mode,
            )
            .with_sample(&prompt.slot.sample)
        });

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_ref()) {
            match cache.get(key).await {
                Ok(Some(hit)) => {
                    return Ok(OracleReply {
                        text: hit.text,
                        truncated_by_size_limit: hit.truncated,
                        usage: OracleUsage {
                            cached: true,
                            ..OracleUsage::default()
                        },
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    if self.cache_only {
                        return Err(OracleError::Cache(err));
                    }
                    warn!(error = %err, "judge cache read failed; calling model");
                }
            }
        }
        if self.cache_only {
            return Err(OracleError::CacheMiss(format!(
                "no cached {} reply for model {}",
                prompt.shape.slug(),
                self.model
            )));
        }

        let mut attribution = Attribution::new(CALLER);
        if let Some(run_id) = prompt.slot.run_id {
            attribution = attribution.with_run(run_id);
        }
        if let Some(chapter_id) = &prompt.slot.chapter_id {
            attribution = attribution.with_chapter(chapter_id.clone());
        }
        let mut request = ChatRequest::new(
            ChatModel::openrouter(&self.model),
            prompt.to_messages(),
            attribution,
        )
        .temperature(prompt.temperature)
        .max_tokens(max_output_tokens);
        if prompt.json_mode {
            request = request.json();
        }

        let response = self.gateway.chat(request).await?;
        let truncated = response.finish_reason.is_truncation();
        let usage = OracleUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost_nanodollars: response.cost_nanodollars,
            cached: false,
        };

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_ref()) {
            let entry = CachedReply {
                text: response.content.clone(),
                truncated,
                input_tokens: Some(usage.input_tokens),
                output_tokens: Some(usage.output_tokens),
                cost_nanodollars: Some(usage.cost_nanodollars),
            };
            if let Err(err) = cache.put(key, &entry).await {
                warn!(error = %err, "judge cache write failed");
            }
        }

        Ok(OracleReply {
            text: response.content,
            truncated_by_size_limit: truncated,
            usage,
        })
    }
}
