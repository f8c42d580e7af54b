//! # edgequake-pdf2pages
//!
//! Turn a PDF, a scanned image, or a folder of images into cleaned-up page
//! images, optional per-page Markdown, and a JSON manifest describing every
//! page that made it (and every page that did not).
//!
//! ## Why external tools?
//!
//! Rasterising, image cleanup and layout analysis are mature, fast and
//! battle-tested in `pdftoppm`, ImageMagick and Tesseract. This crate
//! orchestrates them: it plans parallel work, bounds concurrency, isolates
//! per-page failures, and records exactly what happened. Every invocation
//! goes through the [`ProcessRunner`] seam, so tests drive the whole pipeline
//! with a scripted fake.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input
//!  │
//!  ├─ 1. Input      PDF (%PDF magic) | image | folder of images
//!  ├─ 2. Render     pdftoppm over parallel page ranges (or copy images)
//!  ├─ 3. Normalize  magick cleanup per page (grayscale, deskew, trim, …)
//!  ├─ 4. Extract    optional: tesseract layout → crops → vision model
//!  └─ 5. Manifest   pages + errors + toolchain → manifest.json
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2pages::{run, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().dpi(200).concurrency(8).build()?;
//!     let manifest = run("scan.pdf", "out/", &config).await?;
//!     eprintln!("{} pages, {} errors", manifest.pages.len(), manifest.errors.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2pages` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2pages = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod executor;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PageFormat, PipelineConfig, PipelineConfigBuilder, RegionFailurePolicy, ToolPaths};
pub use convert::{run, run_sync};
pub use error::{PageError, PipelineError, ToolError};
pub use executor::run_bounded;
pub use output::{Manifest, Page, Toolchain, MANIFEST_FILE};
pub use pipeline::llm::{LlmTextGenerator, TextGenerator};
pub use process::{ProcessOutput, ProcessRunner, SystemRunner, ToolCommand};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
