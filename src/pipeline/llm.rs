//! VLM interaction: build vision messages and call the provider.
//!
//! All prompt text lives in [`crate::prompts`]; this module owns the message
//! layout, the per-call timeout and the retry loop.
//!
//! ## Retry Strategy
//!
//! Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms
//! base and 3 retries the waits are 500 ms → 1 s → 2 s.

use crate::config::ConversionConfig;
use crate::error::PageError;
use crate::output::PageResult;
use crate::prompts::{maintain_format_context, system_prompt};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Why the last attempt failed.
enum AttemptFailure {
    Api(String),
    TimedOut,
}

/// Convert a single page image into Markdown via the VLM.
///
/// The request holds, in order: the system prompt, the previous page as a
/// context message (`maintain_format` only), and a user turn carrying the
/// page image with empty text.
///
/// Always returns a `PageResult`; a failure is recorded in `result.error`
/// so one bad page does not abort the document.
pub async fn process_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    image_data: ImageData,
    prior_page: Option<&str>,
    config: &ConversionConfig,
) -> PageResult {
    let start = Instant::now();
    let messages = build_messages(image_data, prior_page, config);
    let options = build_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_failure = AttemptFailure::Api("Unknown error".to_string());

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => {
                let duration = start.elapsed();
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_num, response.prompt_tokens, response.completion_tokens, duration
                );

                return PageResult {
                    page_num,
                    markdown: response.content,
                    input_tokens: response.prompt_tokens,
                    output_tokens: response.completion_tokens,
                    duration_ms: duration.as_millis() as u64,
                    retries: attempt as u8,
                    error: None,
                };
            }
            Ok(Err(e)) => {
                let err_msg = format!("{}", e);
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, err_msg);
                last_failure = AttemptFailure::Api(err_msg);
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_num,
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_failure = AttemptFailure::TimedOut;
            }
        }
    }

    let error = match last_failure {
        AttemptFailure::Api(detail) => PageError::LlmFailed {
            page: page_num,
            retries: config.max_retries as u8,
            detail,
        },
        AttemptFailure::TimedOut => PageError::Timeout {
            page: page_num,
            secs: config.api_timeout_secs,
        },
    };

    PageResult {
        page_num,
        markdown: String::new(),
        input_tokens: 0,
        output_tokens: 0,
        duration_ms: start.elapsed().as_millis() as u64,
        retries: config.max_retries as u8,
        error: Some(error),
    }
}

fn build_messages(
    image_data: ImageData,
    prior_page: Option<&str>,
    config: &ConversionConfig,
) -> Vec<ChatMessage> {
    let prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| system_prompt(config.fidelity));

    let mut messages = vec![ChatMessage::system(prompt)];

    if config.maintain_format {
        if let Some(prior) = prior_page.filter(|p| !p.is_empty()) {
            messages.push(ChatMessage::system(maintain_format_context(prior)));
        }
    }

    messages.push(ChatMessage::user_with_images("", vec![image_data]));
    messages
}

/// Build `CompletionOptions` from the conversion config.
fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
