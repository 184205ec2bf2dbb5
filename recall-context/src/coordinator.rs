//! Context-augmented generation: retrieve, assemble, dispatch, report.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use recall_adapters::traits::{
    AdapterError, InferenceRequest, MessageRole, ModelAdapter, PromptMessage, ProviderUsage,
};
use recall_memory::RetrievalResult;
use recall_primitives::{MemoryId, RequestId};
use recall_prompts::{ContextAssembler, ContextSnippet, estimate_tokens};

use crate::lifecycle::{RequestEvent, RequestLifecycle};
use crate::retrieval::{ContextRetriever, ContextStrategy, RetrievalOptions};
use crate::scheduler::WriteBackScheduler;
use crate::sink::{ExecutionOutcome, ExecutionRecord, ExecutionSink, TracingExecutionSink};
use crate::{ContextError, ContextResult};

/// Service-wide generation defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationConfig {
    default_model: Option<String>,
    temperature: f32,
    max_tokens: u32,
    context_token_budget: usize,
    oracle_timeout: Duration,
    write_back: bool,
}

impl GenerationConfig {
    /// Model used when a request names none. Without it the adapter's own
    /// default applies.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Default sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Default output token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Token budget for retrieved context.
    #[must_use]
    pub const fn with_context_token_budget(mut self, budget: usize) -> Self {
        self.context_token_budget = budget;
        self
    }

    /// Bounds every oracle call.
    #[must_use]
    pub const fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    /// Stores prompt/response pairs back into memory by default.
    #[must_use]
    pub const fn with_write_back(mut self, enabled: bool) -> Self {
        self.write_back = enabled;
        self
    }

    /// Configured default model, if any.
    #[must_use]
    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    /// Default sampling temperature.
    #[must_use]
    pub const fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Default output token limit.
    #[must_use]
    pub const fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Token budget for retrieved context.
    #[must_use]
    pub const fn context_token_budget(&self) -> usize {
        self.context_token_budget
    }

    /// Oracle call timeout.
    #[must_use]
    pub const fn oracle_timeout(&self) -> Duration {
        self.oracle_timeout
    }

    /// Whether write-back is on by default.
    #[must_use]
    pub const fn write_back(&self) -> bool {
        self.write_back
    }

    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidArgument`] for a temperature outside
    /// `[0, 2]`, a zero token limit or a zero timeout.
    pub fn validate(&self) -> ContextResult<()> {
        check_temperature(self.temperature)?;
        check_max_tokens(self.max_tokens)?;
        if self.oracle_timeout.is_zero() {
            return Err(ContextError::invalid_argument(
                "oracle timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_model: None,
            temperature: 0.7,
            max_tokens: 1000,
            context_token_budget: 1500,
            oracle_timeout: Duration::from_secs(60),
            write_back: false,
        }
    }
}

fn check_temperature(temperature: f32) -> ContextResult<()> {
    if (0.0..=2.0).contains(&temperature) {
        Ok(())
    } else {
        Err(ContextError::invalid_argument(
            "temperature must lie within [0, 2]",
        ))
    }
}

fn check_max_tokens(max_tokens: u32) -> ContextResult<()> {
    if max_tokens == 0 {
        Err(ContextError::invalid_argument(
            "max_tokens must be greater than zero",
        ))
    } else {
        Ok(())
    }
}

/// Per-request options. Absent fields fall back to [`GenerationConfig`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    /// Model override.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Output token limit.
    #[serde(alias = "maxTokens")]
    pub max_tokens: Option<u32>,
    /// Caller system message, placed ahead of the retrieved context.
    #[serde(alias = "systemMessage")]
    pub system_message: Option<String>,
    /// Fail instead of degrading when retrieval fails.
    #[serde(alias = "requireContext")]
    pub require_context: bool,
    /// Write-back override.
    #[serde(alias = "writeBack")]
    pub write_back: Option<bool>,
    /// Retrieval overrides, including `use_vector_memory`.
    #[serde(flatten)]
    pub retrieval: RetrievalOptions,
}

impl GenerationOptions {
    /// Options that skip retrieval.
    #[must_use]
    pub fn without_memory() -> Self {
        Self {
            retrieval: RetrievalOptions::disabled(),
            ..Self::default()
        }
    }

    /// Checks explicit overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidArgument`] for out-of-range values.
    pub fn validate(&self) -> ContextResult<()> {
        if let Some(temperature) = self.temperature {
            check_temperature(temperature)?;
        }
        if let Some(max_tokens) = self.max_tokens {
            check_max_tokens(max_tokens)?;
        }
        self.retrieval.validate()
    }
}

/// Estimated token counts, `chars / 4` rounded up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// System prompt plus user prompt.
    pub prompt_tokens: usize,
    /// Generated text.
    pub response_tokens: usize,
    /// Sum of both.
    pub total_tokens: usize,
}

/// One memory entry that contributed to the prompt.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextProvenance {
    /// Source entry.
    pub id: MemoryId,
    /// Time-weighted score.
    pub score: f64,
    /// Raw cosine similarity.
    pub similarity: f64,
}

/// What retrieval contributed to a response.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorContext {
    /// Whether any context reached the prompt.
    pub used: bool,
    /// Strategy applied, absent when retrieval was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ContextStrategy>,
    /// Entries included in the prompt, by descending score.
    pub results: Vec<ContextProvenance>,
    /// Retrieved entries dropped to respect the token budget.
    pub dropped: usize,
    /// Why retrieval was abandoned, when it failed softly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

/// Result of [`GenerationCoordinator::execute`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    /// Request identifier.
    pub request_id: RequestId,
    /// Generated text.
    pub text: String,
    /// Estimated token usage.
    pub usage: TokenUsage,
    /// Context provenance.
    pub vector_context: VectorContext,
    /// Model the request was sent to.
    pub model: String,
    /// Oracle provider.
    pub provider: String,
    /// `true` when retrieved context was part of the prompt.
    pub hybrid: bool,
    /// Wall time in milliseconds.
    pub execution_time_ms: u64,
    /// Usage reported by the provider, when it reports any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_usage: Option<ProviderUsage>,
}

/// Runs generation requests against one oracle and one store.
pub struct GenerationCoordinator {
    retriever: ContextRetriever,
    adapter: Arc<dyn ModelAdapter>,
    assembler: ContextAssembler,
    config: GenerationConfig,
    write_back: Option<WriteBackScheduler>,
    sink: Arc<dyn ExecutionSink>,
}

impl fmt::Debug for GenerationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata = self.adapter.metadata();
        f.debug_struct("GenerationCoordinator")
            .field("retriever", &self.retriever)
            .field("provider", &metadata.provider())
            .field("model", &metadata.model())
            .field("config", &self.config)
            .field("write_back", &self.write_back.is_some())
            .finish_non_exhaustive()
    }
}

impl GenerationCoordinator {
    /// Creates a coordinator that reports to a [`TracingExecutionSink`].
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidArgument`] for an invalid configuration.
    pub fn new(
        retriever: ContextRetriever,
        adapter: Arc<dyn ModelAdapter>,
        config: GenerationConfig,
    ) -> ContextResult<Self> {
        config.validate()?;
        Ok(Self {
            retriever,
            adapter,
            assembler: ContextAssembler::new(config.context_token_budget),
            config,
            write_back: None,
            sink: Arc::new(TracingExecutionSink),
        })
    }

    /// Replaces the execution sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Enables asynchronous write-back through `scheduler`.
    #[must_use]
    pub fn with_write_back(mut self, scheduler: WriteBackScheduler) -> Self {
        self.write_back = Some(scheduler);
        self
    }

    /// Replaces the context assembler, e.g. to use a custom template.
    #[must_use]
    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    /// Retriever used for context.
    #[must_use]
    pub const fn retriever(&self) -> &ContextRetriever {
        &self.retriever
    }

    /// Generation defaults.
    #[must_use]
    pub const fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Write-back scheduler, if enabled.
    #[must_use]
    pub const fn write_back_scheduler(&self) -> Option<&WriteBackScheduler> {
        self.write_back.as_ref()
    }

    /// Generates a response for `prompt`, with retrieved context unless
    /// `use_vector_memory` is `false`.
    ///
    /// Retrieval failures degrade the request to context-free generation
    /// unless `require_context` is set. Oracle failures are fatal and never
    /// retried.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidArgument`] for an empty prompt or bad
    /// options, [`ContextError::EmbeddingFailed`] or [`ContextError::Memory`]
    /// when context was required but could not be retrieved, and
    /// [`ContextError::GenerationFailed`] when the oracle fails or times out.
    pub async fn execute(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ContextResult<GenerationResponse> {
        let started = Instant::now();
        let mut lifecycle = RequestLifecycle::new(RequestId::random());
        let result = self.run(&mut lifecycle, started, prompt, options).await;

        let outcome = match &result {
            Ok(response) => ExecutionOutcome::Completed {
                hybrid: response.hybrid,
                context_entries: response.vector_context.results.len(),
                total_tokens: response.usage.total_tokens,
                degraded: response.vector_context.degraded_reason.is_some(),
            },
            Err(err) => {
                if let Err(lifecycle_err) = lifecycle.transition(RequestEvent::Fail) {
                    debug!(error = %lifecycle_err, "request already terminal");
                }
                ExecutionOutcome::Failed {
                    category: err.category(),
                    reason: err.to_string(),
                }
            }
        };
        self.sink.record(&ExecutionRecord {
            request_id: lifecycle.request_id(),
            elapsed: started.elapsed(),
            outcome,
        });
        result
    }

    async fn run(
        &self,
        lifecycle: &mut RequestLifecycle,
        started: Instant,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ContextResult<GenerationResponse> {
        let request_id = lifecycle.request_id();
        if prompt.trim().is_empty() {
            return Err(ContextError::invalid_argument("Prompt is required"));
        }
        options.validate()?;

        let (results, mut vector_context) = self.gather_context(lifecycle, prompt, options).await?;

        let snippets = results
            .iter()
            .map(|result| {
                ContextSnippet::new(
                    result.entry.id().to_string(),
                    result.entry.text(),
                    result.score,
                )
            })
            .collect();
        let block = self.assembler.assemble(snippets);
        let system_prompt = self
            .assembler
            .system_prompt(options.system_message.as_deref(), &block)?;
        vector_context.dropped = block.dropped;
        vector_context.results = block
            .included
            .iter()
            .filter_map(|snippet| {
                results
                    .iter()
                    .find(|result| result.entry.id().to_string() == snippet.id)
            })
            .map(|result| ContextProvenance {
                id: result.entry.id(),
                score: result.score,
                similarity: result.similarity,
            })
            .collect();
        let hybrid = !block.is_empty();
        vector_context.used = hybrid;

        let metadata = self.adapter.metadata();
        let model = options
            .model
            .as_deref()
            .or(self.config.default_model())
            .unwrap_or(metadata.model())
            .to_owned();
        let mut request = InferenceRequest::new(vec![PromptMessage::new(MessageRole::User, prompt)])
            .map_err(|err| ContextError::invalid_argument(err.to_string()))?
            .with_model(model.clone())
            .with_temperature(options.temperature.unwrap_or(self.config.temperature))
            .with_max_output_tokens(options.max_tokens.unwrap_or(self.config.max_tokens));
        if let Some(system) = &system_prompt {
            request = request.with_system_prompt(system.clone());
        }
        lifecycle.transition(RequestEvent::Assemble)?;

        lifecycle.transition(RequestEvent::Dispatch)?;
        let timeout = self.config.oracle_timeout;
        let (text, provider_usage) = match tokio::time::timeout(timeout, self.generate(request)).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(ContextError::GenerationFailed {
                    reason: format!("{} ({model}): {err}", metadata.provider()),
                    elapsed: started.elapsed(),
                    timed_out: err.is_timeout(),
                });
            }
            Err(_) => {
                return Err(ContextError::GenerationFailed {
                    reason: format!("{} ({model}) timed out after {timeout:?}", metadata.provider()),
                    elapsed: started.elapsed(),
                    timed_out: true,
                });
            }
        };
        lifecycle.transition(RequestEvent::Format)?;

        let prompt_tokens =
            estimate_tokens(prompt) + system_prompt.as_deref().map_or(0, estimate_tokens);
        let response_tokens = estimate_tokens(&text);
        let usage = TokenUsage {
            prompt_tokens,
            response_tokens,
            total_tokens: prompt_tokens + response_tokens,
        };

        if options.write_back.unwrap_or(self.config.write_back) {
            self.schedule_write_back(request_id, prompt, &text, &model);
        }

        let response = GenerationResponse {
            request_id,
            text,
            usage,
            vector_context,
            model,
            provider: metadata.provider().to_owned(),
            hybrid,
            execution_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            provider_usage,
        };
        lifecycle.transition(RequestEvent::Complete)?;
        Ok(response)
    }

    async fn gather_context(
        &self,
        lifecycle: &mut RequestLifecycle,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ContextResult<(Vec<RetrievalResult>, VectorContext)> {
        if !options.retrieval.use_vector_memory {
            lifecycle.transition(RequestEvent::Skip)?;
            return Ok((Vec::new(), VectorContext::default()));
        }

        match self.retriever.retrieve(prompt, &options.retrieval).await {
            Ok(retrieved) => {
                lifecycle.transition(RequestEvent::Retrieve)?;
                let context = VectorContext {
                    strategy: Some(retrieved.plan.strategy),
                    ..VectorContext::default()
                };
                Ok((retrieved.results, context))
            }
            Err(err) if err.is_invalid_argument() || options.require_context => Err(err),
            Err(err) => {
                warn!(
                    request_id = %lifecycle.request_id(),
                    category = err.category(),
                    error = %err,
                    "retrieval failed; continuing without context"
                );
                lifecycle.transition(RequestEvent::Skip)?;
                let context = VectorContext {
                    degraded_reason: Some(err.to_string()),
                    ..VectorContext::default()
                };
                Ok((Vec::new(), context))
            }
        }
    }

    async fn generate(
        &self,
        request: InferenceRequest,
    ) -> Result<(String, Option<ProviderUsage>), AdapterError> {
        let mut stream = self.adapter.infer(request).await?;
        let mut text = String::new();
        let mut usage = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            text.push_str(&chunk.delta);
            usage = chunk.usage.or(usage);
            if chunk.done {
                break;
            }
        }
        Ok((text, usage))
    }

    fn schedule_write_back(&self, request_id: RequestId, prompt: &str, response: &str, model: &str) {
        let Some(scheduler) = &self.write_back else {
            return;
        };
        if response.trim().is_empty() {
            return;
        }

        let text = format!("Q: {}\nA: {}", prompt.trim(), response.trim());
        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::from("generation"));
        metadata.insert("category".into(), Value::from("conversation"));
        metadata.insert("timestamp".into(), Value::from(Utc::now().to_rfc3339()));
        metadata.insert("request_id".into(), Value::from(request_id.to_string()));
        metadata.insert("model".into(), Value::from(model));

        let retriever = self.retriever.clone();
        let spawned = scheduler.spawn(async move {
            match retriever.remember(&text, metadata).await {
                Ok(entry) => debug!(%request_id, entry_id = %entry.id(), "wrote generation back to memory"),
                Err(err) => warn!(
                    %request_id,
                    category = err.category(),
                    error = %err,
                    "memory write-back failed"
                ),
            }
        });
        if let Err(err) = spawned {
            debug!(%request_id, error = %err, "memory write-back skipped");
        }
    }
}
