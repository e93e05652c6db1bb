//! Configuration types for table extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The adaptive-rendering knobs are
//! named fields with documented defaults so that two runs can be diffed by
//! comparing their configs.

use crate::error::PaperTabError;
use crate::pipeline::normalize::CellNormalizer;
use crate::progress::ProgressCallback;
use crate::provider::BatchProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default vision model.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Configuration for a table-extraction run.
///
/// # Example
/// ```rust
/// use papertab::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi_floor(120)
///     .overlap_frac(0.2)
///     .model("claude-sonnet-4-20250514")
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi_floor, 120);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    // ── Rendering ────────────────────────────────────────────────────────
    /// Longest image edge the provider accepts without downscaling, in pixels. Default: 1568.
    ///
    /// The effective DPI of a region is chosen so its longer edge lands on
    /// this many pixels before clamping to `[dpi_floor, dpi_cap]`.
    pub max_image_dimension: u32,

    /// Lowest DPI a region is ever rendered at. Default: 100.
    pub dpi_floor: u32,

    /// Highest DPI a region is ever rendered at. Default: 300.
    pub dpi_cap: u32,

    /// Tall regions whose clamped DPI falls below this are split into strips. Default: 150.
    pub strip_dpi_threshold: u32,

    /// Fraction of a strip's height shared with the next strip. Range `[0, 1)`. Default: 0.15.
    pub overlap_frac: f64,

    /// Regions at most this tall (points) are treated as degenerate. Default: 4.0.
    pub min_region_height: f64,

    /// Maximum characters of PDF text layer sent with each region. Default: 6000.
    pub max_text_excerpt_chars: usize,

    // ── Requests ─────────────────────────────────────────────────────────
    /// Vision model identifier.
    pub model: String,

    /// Response token ceiling per request. Default: 8192.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Override for the fixed instruction block. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    // ── Batch polling ────────────────────────────────────────────────────
    /// First delay between status polls, milliseconds. Default: 5000.
    pub poll_interval_ms: u64,

    /// Ceiling for the doubling poll delay, milliseconds. Default: 60000.
    pub max_poll_interval_ms: u64,

    /// Poll deadline for one batch, seconds. Default: 3600.
    ///
    /// Entries still without a result at the deadline receive the failure
    /// sentinel; the run itself continues.
    pub batch_timeout_secs: u64,

    // ── Synchronous chat adapter ─────────────────────────────────────────
    /// Concurrent chat calls when no batch endpoint is available. Default: 4.
    pub concurrency: usize,

    /// Retries per chat call on transient failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    // ── PDF access ───────────────────────────────────────────────────────
    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory containing the pdfium shared library. If None, the system library is used.
    pub pdfium_library_path: Option<PathBuf>,

    // ── Collaborators ────────────────────────────────────────────────────
    /// Pre-constructed batch provider. If None, resolved from environment.
    pub provider: Option<Arc<dyn BatchProvider>>,

    /// Progress events receiver.
    pub progress_callback: Option<ProgressCallback>,

    /// Cell cleanup applied to surviving tables. If None, uses [`TextCleaner`](crate::pipeline::normalize::TextCleaner).
    pub normalizer: Option<Arc<dyn CellNormalizer>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_image_dimension: 1568,
            dpi_floor: 100,
            dpi_cap: 300,
            strip_dpi_threshold: 150,
            overlap_frac: 0.15,
            min_region_height: 4.0,
            max_text_excerpt_chars: 6000,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 8192,
            temperature: 0.0,
            system_prompt: None,
            poll_interval_ms: 5_000,
            max_poll_interval_ms: 60_000,
            batch_timeout_secs: 3_600,
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            password: None,
            pdfium_library_path: None,
            provider: None,
            progress_callback: None,
            normalizer: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_image_dimension", &self.max_image_dimension)
            .field("dpi_floor", &self.dpi_floor)
            .field("dpi_cap", &self.dpi_cap)
            .field("strip_dpi_threshold", &self.strip_dpi_threshold)
            .field("overlap_frac", &self.overlap_frac)
            .field("min_region_height", &self.min_region_height)
            .field("max_text_excerpt_chars", &self.max_text_excerpt_chars)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_poll_interval_ms", &self.max_poll_interval_ms)
            .field("batch_timeout_secs", &self.batch_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The render-related knobs, copied out for the blocking render task.
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            max_image_dimension: self.max_image_dimension,
            dpi_floor: self.dpi_floor,
            dpi_cap: self.dpi_cap,
            strip_dpi_threshold: self.strip_dpi_threshold,
            overlap_frac: self.overlap_frac,
            max_text_excerpt_chars: self.max_text_excerpt_chars,
        }
    }
}

/// Plain-data subset of [`ExtractionConfig`] used by the region renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub max_image_dimension: u32,
    pub dpi_floor: u32,
    pub dpi_cap: u32,
    pub strip_dpi_threshold: u32,
    pub overlap_frac: f64,
    pub max_text_excerpt_chars: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        ExtractionConfig::default().render_settings()
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px;
        self
    }

    pub fn dpi_floor(mut self, dpi: u32) -> Self {
        self.config.dpi_floor = dpi;
        self
    }

    pub fn dpi_cap(mut self, dpi: u32) -> Self {
        self.config.dpi_cap = dpi;
        self
    }

    pub fn strip_dpi_threshold(mut self, dpi: u32) -> Self {
        self.config.strip_dpi_threshold = dpi;
        self
    }

    pub fn overlap_frac(mut self, frac: f64) -> Self {
        self.config.overlap_frac = frac;
        self
    }

    pub fn min_region_height(mut self, pts: f64) -> Self {
        self.config.min_region_height = pts;
        self
    }

    pub fn max_text_excerpt_chars(mut self, n: usize) -> Self {
        self.config.max_text_excerpt_chars = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 1.0);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.max_poll_interval_ms = ms;
        self
    }

    pub fn batch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.batch_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn BatchProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn normalizer(mut self, normalizer: Arc<dyn CellNormalizer>) -> Self {
        self.config.normalizer = Some(normalizer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, PaperTabError> {
        let c = &self.config;
        for (name, dpi) in [("dpi_floor", c.dpi_floor), ("dpi_cap", c.dpi_cap)] {
            if !(36..=600).contains(&dpi) {
                return Err(PaperTabError::InvalidConfig(format!(
                    "{name} must be 36–600, got {dpi}"
                )));
            }
        }
        if c.dpi_floor > c.dpi_cap {
            return Err(PaperTabError::InvalidConfig(format!(
                "dpi_floor ({}) must not exceed dpi_cap ({})",
                c.dpi_floor, c.dpi_cap
            )));
        }
        if !(0.0..1.0).contains(&c.overlap_frac) {
            return Err(PaperTabError::InvalidConfig(format!(
                "overlap_frac must be in [0, 1), got {}",
                c.overlap_frac
            )));
        }
        if c.max_image_dimension < 100 {
            return Err(PaperTabError::InvalidConfig(format!(
                "max_image_dimension must be ≥ 100, got {}",
                c.max_image_dimension
            )));
        }
        if c.max_tokens == 0 {
            return Err(PaperTabError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.poll_interval_ms == 0 {
            return Err(PaperTabError::InvalidConfig("poll_interval_ms must be ≥ 1".into()));
        }
        if c.min_region_height.is_nan() || c.min_region_height < 0.0 {
            return Err(PaperTabError::InvalidConfig(format!(
                "min_region_height must be ≥ 0, got {}",
                c.min_region_height
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ExtractionConfig::builder().build().unwrap();
        assert_eq!(config.max_image_dimension, 1568);
        assert_eq!(config.dpi_floor, 100);
        assert_eq!(config.dpi_cap, 300);
        assert_eq!(config.strip_dpi_threshold, 150);
        assert!((config.overlap_frac - 0.15).abs() < f64::EPSILON);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn rejects_inverted_dpi_range() {
        let err = ExtractionConfig::builder()
            .dpi_floor(300)
            .dpi_cap(200)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("dpi_floor"));
    }

    #[test]
    fn rejects_full_overlap() {
        assert!(ExtractionConfig::builder().overlap_frac(1.0).build().is_err());
        assert!(ExtractionConfig::builder().overlap_frac(-0.1).build().is_err());
        assert!(ExtractionConfig::builder().overlap_frac(0.0).build().is_ok());
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = ExtractionConfig::builder().poll_interval_ms(0).build().unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"), "{err}");
        assert!(ExtractionConfig::builder().poll_interval_ms(1).build().is_ok());
    }

    #[test]
    fn rejects_nan_min_height() {
        assert!(ExtractionConfig::builder()
            .min_region_height(f64::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn render_settings_mirror_config() {
        let config = ExtractionConfig::builder()
            .strip_dpi_threshold(180)
            .build()
            .unwrap();
        let rs = config.render_settings();
        assert_eq!(rs.strip_dpi_threshold, 180);
        assert_eq!(rs.dpi_cap, config.dpi_cap);
    }

    #[test]
    fn concurrency_never_zero() {
        let config = ExtractionConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(config.concurrency, 1);
    }
}
