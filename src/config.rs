//! Configuration types for resumable page extraction.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The two operating profiles, fast and slow,
//! are not separate code paths: they are presets ([`ProcessingMode`]) for the
//! same handful of knobs, and every knob can still be overridden individually.
//!
//! Settings can also be loaded from a JSON file ([`RunSettings`]) so batch
//! jobs can be replayed with exactly the same limits.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Operating profile presets.
///
/// | option          | Fast   | Slow   |
/// |-----------------|--------|--------|
/// | concurrency     | 10     | 3      |
/// | batch_size      | 1      | 2      |
/// | max_retries     | 3      | 5      |
/// | base_delay      | 500 ms | 2 s    |
/// | max_delay       | 30 s   | 120 s  |
/// | inter_doc_pause | 1 s    | 5 s    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// High concurrency, one page per request, short backoff. (default)
    #[default]
    Fast,
    /// Low concurrency, several pages per request, long backoff.
    Slow,
}

/// Configuration for a pipeline run.
///
/// # Example
/// ```rust
/// use edgequake_pdf2text::{PipelineConfig, ProcessingMode};
///
/// let config = PipelineConfig::builder_for(ProcessingMode::Slow)
///     .concurrency(2)
///     .output_dir("state")
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Preset these values were derived from.
    pub mode: ProcessingMode,

    /// Maximum extraction requests in flight at once.
    pub concurrency: usize,

    /// Pages per extraction request.
    pub batch_size: usize,

    /// Total model calls allowed for one batch, first attempt included.
    pub max_retries: u32,

    /// Base backoff delay; doubles on each retry.
    pub base_delay: Duration,

    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,

    /// Relative jitter applied to each backoff delay (0.25 → ±25 %).
    pub jitter: f64,

    /// Pause inserted between two documents by the batch runner.
    pub inter_doc_pause: Duration,

    /// Per-request timeout for the vision model call.
    pub api_timeout: Duration,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per request. Default: 4096.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses the built-in extraction prompt.
    pub system_prompt: Option<String>,

    /// Longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory holding one state folder per document. Default: `pdf2text-out`.
    pub output_dir: PathBuf,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::preset(ProcessingMode::Fast)
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("mode", &self.mode)
            .field("concurrency", &self.concurrency)
            .field("batch_size", &self.batch_size)
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("inter_doc_pause", &self.inter_doc_pause)
            .field("api_timeout", &self.api_timeout)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("output_dir", &self.output_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Builder starting from the fast preset.
    pub fn builder() -> PipelineConfigBuilder {
        Self::builder_for(ProcessingMode::Fast)
    }

    /// Builder starting from the given preset.
    pub fn builder_for(mode: ProcessingMode) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::preset(mode),
        }
    }

    fn preset(mode: ProcessingMode) -> Self {
        let (concurrency, batch_size, max_retries, base_delay, max_delay, pause) = match mode {
            ProcessingMode::Fast => (
                10,
                1,
                3,
                Duration::from_millis(500),
                Duration::from_secs(30),
                Duration::from_secs(1),
            ),
            ProcessingMode::Slow => (
                3,
                2,
                5,
                Duration::from_secs(2),
                Duration::from_secs(120),
                Duration::from_secs(5),
            ),
        };

        Self {
            mode,
            concurrency,
            batch_size,
            max_retries,
            base_delay,
            max_delay,
            jitter: 0.25,
            inter_doc_pause: pause,
            api_timeout: Duration::from_secs(60),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            system_prompt: None,
            max_rendered_pixels: 2000,
            password: None,
            output_dir: PathBuf::from("pdf2text-out"),
            progress_callback: None,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn base_delay(mut self, d: Duration) -> Self {
        self.config.base_delay = d;
        self
    }

    pub fn max_delay(mut self, d: Duration) -> Self {
        self.config.max_delay = d;
        self
    }

    pub fn jitter(mut self, ratio: f64) -> Self {
        self.config.jitter = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn inter_doc_pause(mut self, d: Duration) -> Self {
        self.config.inter_doc_pause = d;
        self
    }

    pub fn api_timeout(mut self, d: Duration) -> Self {
        self.config.api_timeout = d;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Overlay a settings file on top of the current values.
    pub fn settings(mut self, settings: &RunSettings) -> Self {
        if let Some(n) = settings.concurrency {
            self = self.concurrency(n);
        }
        if let Some(n) = settings.batch_size {
            self = self.batch_size(n);
        }
        if let Some(n) = settings.max_retries {
            self = self.max_retries(n);
        }
        if let Some(ms) = settings.base_delay_ms {
            self = self.base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = settings.max_delay_ms {
            self = self.max_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = settings.inter_doc_pause_ms {
            self = self.inter_doc_pause(Duration::from_millis(ms));
        }
        if let Some(secs) = settings.api_timeout_secs {
            self = self.api_timeout(Duration::from_secs(secs));
        }
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.batch_size == 0 {
            return Err(PipelineError::InvalidConfig("Batch size must be ≥ 1".into()));
        }
        if c.max_retries == 0 {
            return Err(PipelineError::InvalidConfig("Max retries must be ≥ 1".into()));
        }
        if c.max_delay < c.base_delay {
            return Err(PipelineError::InvalidConfig(format!(
                "Max delay ({:?}) must not be shorter than base delay ({:?})",
                c.max_delay, c.base_delay
            )));
        }
        if c.api_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig("API timeout must be > 0".into()));
        }
        Ok(self.config)
    }
}

/// JSON settings file recognised by the CLI (`--config`).
///
/// ```json
/// { "mode": "slow", "concurrency": 2, "batchSize": 4, "baseDelayMs": 3000 }
/// ```
///
/// Durations are milliseconds; `baseDelay`, `maxDelay` and `interDocPause`
/// are accepted as aliases of the `*Ms` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunSettings {
    pub mode: Option<ProcessingMode>,
    pub concurrency: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    #[serde(alias = "baseDelay")]
    pub base_delay_ms: Option<u64>,
    #[serde(alias = "maxDelay")]
    pub max_delay_ms: Option<u64>,
    #[serde(alias = "interDocPause")]
    pub inter_doc_pause_ms: Option<u64>,
    pub api_timeout_secs: Option<u64>,
}

impl RunSettings {
    pub fn from_json(s: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(s)
            .map_err(|e| PipelineError::InvalidConfig(format!("settings file: {e}")))
    }

    pub async fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_preset_defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.mode, ProcessingMode::Fast);
        assert_eq!(c.concurrency, 10);
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn slow_preset_backs_off_longer() {
        let fast = PipelineConfig::default();
        let slow = PipelineConfig::builder_for(ProcessingMode::Slow).build().unwrap();
        assert_eq!(slow.concurrency, 3);
        assert_eq!(slow.max_retries, 5);
        assert!(slow.batch_size >= 2);
        assert!(slow.base_delay > fast.base_delay);
        assert!(slow.inter_doc_pause > fast.inter_doc_pause);
    }

    #[test]
    fn build_rejects_zero_values() {
        let zero_concurrency = PipelineConfig::builder().concurrency(0).build().unwrap_err();
        assert!(zero_concurrency.to_string().contains("Concurrency"));
        let zero_batch = PipelineConfig::builder().batch_size(0).build().unwrap_err();
        assert!(zero_batch.to_string().contains("Batch size"));
        let zero_retries = PipelineConfig::builder().max_retries(0).build().unwrap_err();
        assert!(zero_retries.to_string().contains("Max retries"));
    }

    #[test]
    fn zero_from_settings_file_is_rejected() {
        let s = RunSettings::from_json(r#"{"concurrency": 0}"#).unwrap();
        let err = PipelineConfig::builder().settings(&s).build().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn builder_clamps_jitter() {
        let c = PipelineConfig::builder().jitter(4.0).build().unwrap();
        assert_eq!(c.jitter, 1.0);
    }

    #[test]
    fn build_rejects_inverted_delays() {
        let err = PipelineConfig::builder()
            .base_delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Max delay"));
    }

    #[test]
    fn settings_overlay_preset() {
        let s = RunSettings::from_json(
            r#"{"mode":"slow","concurrency":2,"batchSize":4,"baseDelayMs":3000,"interDocPauseMs":0}"#,
        )
        .unwrap();
        assert_eq!(s.mode, Some(ProcessingMode::Slow));

        let c = PipelineConfig::builder_for(s.mode.unwrap_or_default())
            .settings(&s)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 2);
        assert_eq!(c.batch_size, 4);
        assert_eq!(c.max_retries, 5);
        assert_eq!(c.base_delay, Duration::from_secs(3));
        assert_eq!(c.inter_doc_pause, Duration::ZERO);
    }

    #[test]
    fn settings_accept_plain_duration_keys() {
        let s = RunSettings::from_json(
            r#"{"concurrency":3,"batchSize":2,"maxRetries":5,"baseDelay":2000,"interDocPause":5000}"#,
        )
        .unwrap();
        assert_eq!(s.base_delay_ms, Some(2000));
        assert_eq!(s.inter_doc_pause_ms, Some(5000));

        let c = PipelineConfig::builder().settings(&s).build().unwrap();
        assert_eq!(c.concurrency, 3);
        assert_eq!(c.batch_size, 2);
        assert_eq!(c.max_retries, 5);
        assert_eq!(c.base_delay, Duration::from_secs(2));
        assert_eq!(c.inter_doc_pause, Duration::from_secs(5));
    }

    #[test]
    fn settings_reject_unknown_keys() {
        let err = RunSettings::from_json(r#"{"concurency": 3}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
