//! VLM interaction: the [`VisionModel`] seam and its edgequake-llm adapter.
//!
//! The extraction client only needs "image(s) + prompt in, text or typed
//! failure out". [`LlmVisionModel`] provides that on top of any
//! `edgequake_llm::LLMProvider`; tests substitute scripted fakes.
//!
//! ## Message Layout
//!
//! 1. **System message** — extraction rules, plus the page-boundary rule when
//!    more than one page is attached
//! 2. **User message** — the page PNGs as base64 image attachments, with a
//!    short text naming the page numbers so markers can be emitted correctly

use crate::config::PipelineConfig;
use crate::error::{BatchFailure, ErrorKind, PipelineError};
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError, ProviderFactory,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// One extraction request.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    /// System prompt.
    pub prompt: String,
    /// User-turn text accompanying the images.
    pub instruction: String,
    /// Page images in ascending page order.
    pub images: Vec<ImageData>,
    pub max_output_tokens: usize,
    pub temperature: f32,
}

/// A vision-capable model that turns page images into text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn extract(&self, request: &VisionRequest) -> Result<String, BatchFailure>;
}

/// [`VisionModel`] backed by an edgequake-llm provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Resolve the provider from the configuration and environment.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self::new(resolve_provider(config)?))
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn extract(&self, request: &VisionRequest) -> Result<String, BatchFailure> {
        let messages = vec![
            ChatMessage::system(request.prompt.as_str()),
            ChatMessage::user_with_images(request.instruction.as_str(), request.images.clone()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_output_tokens),
            ..Default::default()
        };

        match self.provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "{} input tokens, {} output tokens",
                    response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(BatchFailure::new(classify_error(&e), e.to_string())),
        }
    }
}

/// Map a provider error onto the [`ErrorKind`] taxonomy.
///
/// Typed variants decide directly. Only the free-form bodies of API,
/// provider and unknown errors go through [`classify_message`].
pub fn classify_error(error: &LlmError) -> ErrorKind {
    match error {
        LlmError::RateLimited(_) => ErrorKind::RateLimited,
        LlmError::Timeout => ErrorKind::Timeout,
        LlmError::NetworkError(_) | LlmError::SerializationError(_) => {
            ErrorKind::ServiceUnavailable
        }
        LlmError::AuthError(_)
        | LlmError::InvalidRequest(_)
        | LlmError::ModelNotFound(_)
        | LlmError::TokenLimitExceeded { .. }
        | LlmError::ConfigError(_)
        | LlmError::NotSupported(_) => ErrorKind::ClientError,
        LlmError::ApiError(body) | LlmError::ProviderError(body) | LlmError::Unknown(body) => {
            classify_message(body)
        }
    }
}

static RE_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:status|http|code|error)[^0-9a-z]{0,12}(?:code[^0-9]{0,4})?([45]\d\d)\b").unwrap()
});

/// Classify the free-form body of an API or provider error.
///
/// An explicit HTTP status wins; otherwise well-known phrases decide.
/// Unrecognised failures are treated as a transient outage so they get the
/// retry budget rather than failing the batch outright.
pub fn classify_message(message: &str) -> ErrorKind {
    if let Some(status) = RE_STATUS
        .captures(message)
        .and_then(|c| c[1].parse::<u16>().ok())
    {
        return ErrorKind::from_status(status);
    }

    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["rate limit", "rate_limit", "too many requests", "quota"]) {
        ErrorKind::RateLimited
    } else if has(&["timed out", "timeout", "deadline exceeded"]) {
        ErrorKind::Timeout
    } else if has(&[
        "unauthorized",
        "forbidden",
        "invalid api key",
        "api key",
        "invalid request",
        "bad request",
        "content_filter",
        "not found",
        "invalid image",
    ]) {
        ErrorKind::ClientError
    } else {
        ErrorKind::ServiceUnavailable
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`)
/// 2. **Named provider + model** (`config.provider_name`)
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
/// 4. **OpenAI key present** (`OPENAI_API_KEY`)
/// 5. **Full auto-detection** (`ProviderFactory::from_env`)
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_status_codes_win() {
        assert_eq!(
            classify_message("API error: status 429 Too Many Requests"),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_message("HTTP 503 Service Unavailable"),
            ErrorKind::ServiceUnavailable
        );
        assert_eq!(
            classify_message("error code: 400 - invalid image format"),
            ErrorKind::ClientError
        );
        assert_eq!(classify_message("HTTP error 401"), ErrorKind::ClientError);
    }

    #[test]
    fn phrases_are_recognised() {
        assert_eq!(classify_message("Rate limit exceeded"), ErrorKind::RateLimited);
        assert_eq!(classify_message("request timed out"), ErrorKind::Timeout);
        assert_eq!(classify_message("Invalid API key provided"), ErrorKind::ClientError);
        assert_eq!(classify_message("server overloaded"), ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn unknown_errors_are_transient() {
        assert_eq!(
            classify_message("connection reset by peer"),
            ErrorKind::ServiceUnavailable
        );
    }

    #[test]
    fn page_numbers_are_not_status_codes() {
        assert_eq!(
            classify_message("failed to parse response for page 404"),
            ErrorKind::ServiceUnavailable
        );
    }

    #[test]
    fn permanent_provider_errors_are_client_errors() {
        let permanent = [
            LlmError::AuthError("bad credentials".into()),
            LlmError::InvalidRequest("image too large".into()),
            LlmError::ModelNotFound("gpt-9".into()),
            LlmError::TokenLimitExceeded { max: 4096, got: 9000 },
            LlmError::ConfigError("missing base url".into()),
            LlmError::NotSupported("vision".into()),
        ];
        for e in &permanent {
            assert_eq!(classify_error(e), ErrorKind::ClientError, "{e}");
        }
    }

    #[test]
    fn transient_provider_errors_are_retryable() {
        assert_eq!(
            classify_error(&LlmError::RateLimited("slow down".into())),
            ErrorKind::RateLimited
        );
        assert_eq!(classify_error(&LlmError::Timeout), ErrorKind::Timeout);
        assert_eq!(
            classify_error(&LlmError::NetworkError("connection reset".into())),
            ErrorKind::ServiceUnavailable
        );
        let garbled = serde_json::from_str::<u8>("{").unwrap_err();
        assert_eq!(
            classify_error(&LlmError::SerializationError(garbled)),
            ErrorKind::ServiceUnavailable
        );
    }

    #[test]
    fn free_form_bodies_fall_back_to_message_rules() {
        assert_eq!(
            classify_error(&LlmError::ApiError("status 429 Too Many Requests".into())),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_error(&LlmError::ProviderError("HTTP 401 Unauthorized".into())),
            ErrorKind::ClientError
        );
        assert_eq!(
            classify_error(&LlmError::Unknown("upstream overloaded".into())),
            ErrorKind::ServiceUnavailable
        );
    }
}
