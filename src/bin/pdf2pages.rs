//! CLI binary for edgequake-pdf2pages.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints a summary of the manifest.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2pages::{
    run, Manifest, PageFormat, PipelineConfig, PipelineProgressCallback, ProgressCallback,
    RegionFailurePolicy, Stage, ToolPaths, MANIFEST_FILE,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar, reset at the start of each stage.
/// Items complete out of order, so failures are logged above the bar as
/// they happen.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Inspecting input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage, total_items: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:>9.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total_items as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(stage.to_string());
        self.bar.reset_elapsed();
    }

    fn on_item_complete(&self, _stage: Stage, _index: usize) {
        self.bar.inc(1);
    }

    fn on_item_error(&self, stage: Stage, index: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let first_line = error.lines().next().unwrap_or(error);
        let msg = if first_line.chars().count() > 80 {
            format!("{}\u{2026}", first_line.chars().take(79).collect::<String>())
        } else {
            first_line.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>4}  {}  {}",
            red("✗"),
            index,
            dim(&stage.to_string()),
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _pages: usize, _errors: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render a PDF to cleaned-up PNG pages in ./pages
  pdf2pages scan.pdf

  # Higher resolution, more parallel renders, TIFF output
  pdf2pages --dpi 300 --concurrency 8 --format tiff scan.pdf -o out/

  # Keep raw renders (no cleanup step)
  pdf2pages --no-normalize scan.pdf -o raw/

  # A folder of photographed pages, with Markdown extraction
  pdf2pages --extract-text --provider openai --model gpt-4.1-mini photos/ -o book/

  # Print the manifest as JSON
  pdf2pages --json scan.pdf > manifest.json

EXTERNAL TOOLS:
  pdftoppm, pdfinfo   poppler-utils: PDF rendering and metadata
  magick              ImageMagick 7: page cleanup and size fallback
  tesseract           layout analysis (only with --extract-text)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override the log filter (e.g. edgequake_pdf2pages=debug)
"#;

/// Render documents to normalised page images and a JSON manifest.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2pages",
    version,
    about = "Render PDFs and scanned images to cleaned-up page images plus a JSON manifest",
    long_about = "Render a PDF, an image, or a folder of images into normalised page images, \
optionally extracting per-page Markdown with a vision model, and write a manifest.json \
listing every page and every per-page failure.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file, image file, or folder of images.
    input: PathBuf,

    /// Output directory for pages, text, and manifest.json.
    #[arg(short, long, env = "PDF2PAGES_OUTPUT", default_value = "pages")]
    output: PathBuf,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PDF2PAGES_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Maximum number of external tools or model calls in flight.
    #[arg(short, long, env = "PDF2PAGES_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Final page image format.
    #[arg(long, env = "PDF2PAGES_FORMAT", value_enum, default_value = "png")]
    format: FormatArg,

    /// Skip the cleanup step; raw renders become the final pages.
    #[arg(long, env = "PDF2PAGES_NO_NORMALIZE")]
    no_normalize: bool,

    /// Extract per-page Markdown with a vision model.
    #[arg(long, env = "PDF2PAGES_EXTRACT_TEXT")]
    extract_text: bool,

    /// Keep pages whose regions partly failed, with inline failure markers.
    #[arg(long, env = "PDF2PAGES_KEEP_PARTIAL")]
    keep_partial: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom region instruction.
    #[arg(long, env = "PDF2PAGES_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per region.
    #[arg(long, env = "PDF2PAGES_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2PAGES_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per region on LLM failure.
    #[arg(long, env = "PDF2PAGES_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Timeout for each external tool invocation, in seconds.
    #[arg(long, env = "PDF2PAGES_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Rasteriser executable.
    #[arg(long, env = "PDF2PAGES_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: String,

    /// PDF metadata executable.
    #[arg(long, env = "PDF2PAGES_PDFINFO", default_value = "pdfinfo")]
    pdfinfo: String,

    /// Image cleanup / inspection executable.
    #[arg(long, env = "PDF2PAGES_MAGICK", default_value = "magick")]
    magick: String,

    /// Layout analysis executable.
    #[arg(long, env = "PDF2PAGES_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Print the manifest as JSON on stdout.
    #[arg(long, env = "PDF2PAGES_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2PAGES_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2PAGES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2PAGES_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Png,
    Tiff,
}

impl From<FormatArg> for PageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Png => PageFormat::Png,
            FormatArg::Tiff => PageFormat::Tiff,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let manifest = run(&cli.input, &cli.output, &config)
        .await
        .context("Run failed")?;

    if cli.json {
        let json =
            serde_json::to_string_pretty(&manifest).context("Failed to serialise manifest")?;
        println!("{json}");
    }
    if !cli.quiet {
        print_summary(&manifest, &cli.output);
    }

    Ok(())
}

fn print_summary(manifest: &Manifest, out_dir: &std::path::Path) {
    let ok = manifest.pages.len();
    let failed = manifest.errors.len();
    let mark = if failed == 0 {
        green("✔")
    } else if ok == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{} {}/{} pages  {} {}  →  {}",
        mark,
        bold(&ok.to_string()),
        manifest.page_count,
        dim(&format!("{} dpi", manifest.dpi)),
        dim(&manifest.format),
        bold(&out_dir.join(MANIFEST_FILE).display().to_string()),
    );
    for e in &manifest.errors {
        eprintln!("  {} {}", red("✗"), e);
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .format(cli.format.into())
        .normalize(!cli.no_normalize)
        .extract_text(cli.extract_text)
        .process_timeout_secs(cli.timeout)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .region_failure(if cli.keep_partial {
            RegionFailurePolicy::KeepPartial
        } else {
            RegionFailurePolicy::FailPage
        })
        .tools(ToolPaths {
            rasterizer: cli.pdftoppm.clone(),
            pdf_info: cli.pdfinfo.clone(),
            image_tool: cli.magick.clone(),
            layout_tool: cli.tesseract.clone(),
        });

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
