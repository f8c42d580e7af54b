//! Text generation: send one cropped region to a vision model, get Markdown.
//!
//! The pipeline talks to a [`TextGenerator`], not to a provider directly, so
//! tests can plug in a deterministic stand-in and library users can wrap any
//! backend. [`LlmTextGenerator`] is the production implementation on top of
//! an `edgequake-llm` provider.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 responses are transient and frequent under concurrent load.
//! [`generate_with_retry`] backs off exponentially (`retry_backoff_ms *
//! 2^(attempt-1)`): with a 500 ms base and 2 retries the waits are 500 ms then
//! 1 s.

use crate::config::PipelineConfig;
use crate::error::ToolError;
use crate::pipeline::encode::to_image_data;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Anything that can turn an image plus an instruction into text.
pub trait TextGenerator: Send + Sync {
    fn generate<'a>(
        &'a self,
        image: &'a [u8],
        media_type: &'a str,
        instruction: &'a str,
    ) -> BoxFuture<'a, Result<String, ToolError>>;
}

/// [`TextGenerator`] backed by an `edgequake-llm` vision provider.
pub struct LlmTextGenerator {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmTextGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

impl std::fmt::Debug for LlmTextGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmTextGenerator").finish_non_exhaustive()
    }
}

impl TextGenerator for LlmTextGenerator {
    /// Message layout: the instruction as the system message, then a user
    /// turn carrying only the image. The empty user text is intentional; the
    /// image carries all the content.
    fn generate<'a>(
        &'a self,
        image: &'a [u8],
        media_type: &'a str,
        instruction: &'a str,
    ) -> BoxFuture<'a, Result<String, ToolError>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(instruction),
                ChatMessage::user_with_images("", vec![to_image_data(image, media_type)]),
            ];
            let response = self
                .provider
                .chat(&messages, Some(&self.options))
                .await
                .map_err(|e| ToolError::Generation(e.to_string()))?;
            debug!(
                "{} input tokens, {} output tokens",
                response.prompt_tokens, response.completion_tokens
            );
            Ok(response.content)
        })
    }
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Call `generator`, retrying failures up to `config.max_retries` times.
///
/// `label` identifies the region in log lines (e.g. `page 3 region 2`).
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    image: &[u8],
    media_type: &str,
    instruction: &str,
    config: &PipelineConfig,
    label: &str,
) -> Result<String, ToolError> {
    let start = Instant::now();
    let mut last_err: Option<ToolError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match generator.generate(image, media_type, instruction).await {
            Ok(text) => {
                debug!("{}: generated in {:?}", label, start.elapsed());
                return Ok(text);
            }
            Err(e) => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ToolError::Generation("unknown error".into())))
}
