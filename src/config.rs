//! Configuration types for a page-production run.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Every knob lives in one struct so a run is a
//! pure function of `(input, output dir, config)`: text extraction, for
//! instance, is switched on by [`PipelineConfig::extract_text`] rather than by
//! anything read from the process environment mid-run.

use crate::error::PipelineError;
use crate::pipeline::llm::TextGenerator;
use crate::process::{ProcessRunner, SystemRunner};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a page-production run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2pages::{PipelineConfig, PageFormat};
///
/// let config = PipelineConfig::builder()
///     .dpi(200)
///     .concurrency(8)
///     .format(PageFormat::Png)
///     .extract_text(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rasterisation resolution for PDF inputs. Range: 72–600. Default: 150.
    pub dpi: u32,

    /// Maximum number of in-flight external invocations per stage. Default: 4.
    ///
    /// Also the number of page-range chunks a PDF is split into for rendering.
    pub concurrency: usize,

    /// Lossless encoding of the final page images. Default: PNG.
    pub format: PageFormat,

    /// Run the cleanup transform (grayscale, deskew, trim, sharpen) on every
    /// page. Default: true. When false, raw renders become the final pages.
    pub normalize: bool,

    /// Run layout-aware text extraction after normalisation. Default: false.
    pub extract_text: bool,

    /// Timeout applied to each external invocation, in seconds. Default: 120.
    pub process_timeout_secs: u64,

    /// Extra attempts for a failed page-range render. Default: 1.
    pub render_retries: u32,

    /// Names or paths of the external tools.
    pub tools: ToolPaths,

    /// Executes external tools. Default: [`SystemRunner`].
    pub runner: Arc<dyn ProcessRunner>,

    /// Pre-constructed text generator. Takes precedence over `provider_name`.
    pub text_generator: Option<Arc<dyn TextGenerator>>,

    /// Vision provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Vision model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Sampling temperature for region transcription. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per region. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts for a failed region transcription. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Custom transcription instruction. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// What happens to a page when one of its text regions fails.
    pub region_failure: RegionFailurePolicy,

    /// Optional per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            concurrency: 4,
            format: PageFormat::default(),
            normalize: true,
            extract_text: false,
            process_timeout_secs: 120,
            render_retries: 1,
            tools: ToolPaths::default(),
            runner: Arc::new(SystemRunner),
            text_generator: None,
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            system_prompt: None,
            region_failure: RegionFailurePolicy::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("concurrency", &self.concurrency)
            .field("format", &self.format)
            .field("normalize", &self.normalize)
            .field("extract_text", &self.extract_text)
            .field("process_timeout_secs", &self.process_timeout_secs)
            .field("render_retries", &self.render_retries)
            .field("tools", &self.tools)
            .field(
                "text_generator",
                &self.text_generator.as_ref().map(|_| "<dyn TextGenerator>"),
            )
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("max_retries", &self.max_retries)
            .field("region_failure", &self.region_failure)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Per-invocation timeout as a `Duration`.
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn format(mut self, format: PageFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn normalize(mut self, v: bool) -> Self {
        self.config.normalize = v;
        self
    }

    pub fn extract_text(mut self, v: bool) -> Self {
        self.config.extract_text = v;
        self
    }

    pub fn process_timeout_secs(mut self, secs: u64) -> Self {
        self.config.process_timeout_secs = secs;
        self
    }

    pub fn render_retries(mut self, n: u32) -> Self {
        self.config.render_retries = n;
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.config.runner = runner;
        self
    }

    pub fn text_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.config.text_generator = Some(generator);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
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

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn region_failure(mut self, policy: RegionFailurePolicy) -> Self {
        self.config.region_failure = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if !(72..=600).contains(&c.dpi) {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.process_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Process timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums & tool paths ───────────────────────────────────────────────────

/// Lossless encoding of the final page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    #[default]
    Png,
    Tiff,
}

impl PageFormat {
    /// File extension without the dot; also the manifest's `format` value.
    pub fn extension(self) -> &'static str {
        match self {
            PageFormat::Png => "png",
            PageFormat::Tiff => "tif",
        }
    }

    /// The rasteriser flag selecting this format (`pdftoppm -png`).
    pub fn render_flag(self) -> &'static str {
        match self {
            PageFormat::Png => "-png",
            PageFormat::Tiff => "-tiff",
        }
    }
}

impl fmt::Display for PageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// What happens to a page when one of its text regions cannot be transcribed.
///
/// Either way the regions that did succeed are not thrown away: their text is
/// written to the page's `.md` artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegionFailurePolicy {
    /// The page is reported in `errors[]` naming the failed regions. (default)
    ///
    /// Its partial `page-NNNN.md` and any `page-NNNN-img-NN.png` assets are
    /// still written to the output directory, though the manifest lists the
    /// page only under `errors[]`.
    #[default]
    FailPage,
    /// The page stays in `pages[]`; failed regions become HTML-comment markers.
    KeepPartial,
}

/// Names (looked up on `PATH`) or absolute paths of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    /// PDF rasteriser. Default: `pdftoppm`.
    pub rasterizer: String,
    /// PDF metadata reader. Default: `pdfinfo`.
    pub pdf_info: String,
    /// Image processor used for cleanup and as the dimension fallback. Default: `magick`.
    pub image_tool: String,
    /// Layout analyser emitting TSV. Default: `tesseract`.
    pub layout_tool: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            rasterizer: "pdftoppm".into(),
            pdf_info: "pdfinfo".into(),
            image_tool: "magick".into(),
            layout_tool: "tesseract".into(),
        }
    }
}
