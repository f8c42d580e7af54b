//! Page production: rasterise a PDF in parallel page ranges, or ingest images.
//!
//! ## Why chunks instead of one call per page?
//!
//! Each rasteriser invocation re-opens and re-parses the PDF. One call per page
//! pays that cost N times; one call for the whole document uses a single core.
//! Splitting `[1, page_count]` into `concurrency` contiguous ranges pays it
//! `concurrency` times and keeps every permit busy.
//!
//! ## Why predict dimensions?
//!
//! Most PDFs use one page size throughout. When `pdfinfo` reports the size in
//! points, `ceil(pts × dpi / 72)` is the pixel size the rasteriser will emit.
//! Measuring the first and last rendered page is enough to confirm it; on a
//! match every page gets the prediction and no further file is opened. Any
//! mismatch (mixed sizes, rotated pages, rounding differences) falls back to
//! measuring every page.

use crate::config::{PageFormat, PipelineConfig};
use crate::error::{PageError, PipelineError, ToolError};
use crate::executor::run_bounded;
use crate::output::Toolchain;
use crate::pipeline::dimensions::{DimensionReader, Dimensions};
use crate::process::{run_checked, ToolCommand};
use crate::progress::{report, Stage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// File-name stem of raw page images inside the scratch directory.
const RAW_PREFIX: &str = "page";

/// Renderer name recorded for image and folder inputs.
pub const PASSTHROUGH_RENDERER: &str = "passthrough";

/// A contiguous, inclusive, 1-based page range rendered by one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub first: usize,
    pub last: usize,
}

impl Chunk {
    pub fn pages(&self) -> impl Iterator<Item = usize> {
        self.first..=self.last
    }

    pub fn len(&self) -> usize {
        self.last + 1 - self.first
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

/// Split `[1, page_count]` into at most `parallelism` contiguous chunks.
///
/// The first `page_count % n` chunks get one extra page, so chunk sizes differ
/// by at most one.
///
/// ```rust
/// use edgequake_pdf2pages::pipeline::render::{chunk_pages, Chunk};
///
/// assert_eq!(
///     chunk_pages(10, 3),
///     vec![
///         Chunk { first: 1, last: 4 },
///         Chunk { first: 5, last: 7 },
///         Chunk { first: 8, last: 10 },
///     ]
/// );
/// ```
pub fn chunk_pages(page_count: usize, parallelism: usize) -> Vec<Chunk> {
    if page_count == 0 {
        return Vec::new();
    }
    let num_chunks = parallelism.clamp(1, page_count);
    let base = page_count / num_chunks;
    let remainder = page_count % num_chunks;

    let mut chunks = Vec::with_capacity(num_chunks);
    let mut first = 1;
    for i in 0..num_chunks {
        let size = if i < remainder { base + 1 } else { base };
        chunks.push(Chunk {
            first,
            last: first + size - 1,
        });
        first += size;
    }
    chunks
}

// ── PDF metadata ─────────────────────────────────────────────────────────

static RE_PAGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"Pages:\s*(\d+)").unwrap());

static RE_PAGE_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Page size:\s*([\d.]+)\s*x\s*([\d.]+)\s*pts").unwrap());

static RE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"version\s+([0-9][\w.\-]*)").unwrap());

/// What `pdfinfo` tells us about a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfInfo {
    pub page_count: usize,
    /// Page size of the first page in PostScript points (1/72 inch).
    pub page_size_pts: Option<(f64, f64)>,
}

/// Parse `pdfinfo` output. `None` when no page count is present.
pub fn parse_pdfinfo(stdout: &str) -> Option<PdfInfo> {
    let page_count = RE_PAGES.captures(stdout)?[1].parse().ok()?;
    let page_size_pts = RE_PAGE_SIZE.captures(stdout).and_then(|c| {
        let w: f64 = c[1].parse().ok()?;
        let h: f64 = c[2].parse().ok()?;
        (w > 0.0 && h > 0.0).then_some((w, h))
    });
    Some(PdfInfo {
        page_count,
        page_size_pts,
    })
}

/// Read page count and page size. Failure here is fatal for the run.
pub async fn probe_pdf(pdf: &Path, config: &PipelineConfig) -> Result<PdfInfo, PipelineError> {
    let cmd = ToolCommand::new(&config.tools.pdf_info, config.process_timeout()).arg(pdf);
    let unreadable = |detail: String| PipelineError::UnreadablePdf {
        path: pdf.to_path_buf(),
        detail,
    };

    let output = run_checked(config.runner.as_ref(), &cmd)
        .await
        .map_err(|e| unreadable(e.to_string()))?;

    parse_pdfinfo(&output.stdout_lossy())
        .ok_or_else(|| unreadable("no 'Pages:' line in pdfinfo output".into()))
}

/// Pixel size the rasteriser produces for a page of `size_pts` at `dpi`.
pub fn predict_dimensions(size_pts: (f64, f64), dpi: u32) -> Dimensions {
    let px = |pts: f64| (pts * f64::from(dpi) / 72.0).ceil() as u32;
    Dimensions::new(px(size_pts.0), px(size_pts.1))
}

/// The prediction is trusted only if both spot-checked pages match it exactly.
pub fn prediction_holds(predicted: Dimensions, first: Dimensions, last: Dimensions) -> bool {
    predicted.is_known() && first == predicted && last == predicted
}

// ── Rendering ────────────────────────────────────────────────────────────

/// A page image waiting for normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub index: usize,
    pub path: PathBuf,
    /// [`Dimensions::UNKNOWN`] when measurement was deferred to normalisation.
    pub dimensions: Dimensions,
}

/// Result of the render stage.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    /// Pages that exist on disk, ascending by index.
    pub pages: Vec<RawPage>,
    pub errors: Vec<PageError>,
    pub toolchain: Toolchain,
}

/// Format raw renders are produced in. With normalisation on, PNG is always
/// used so the header fast path applies; otherwise raw renders are final.
pub fn raw_format(config: &PipelineConfig) -> PageFormat {
    if config.normalize {
        PageFormat::Png
    } else {
        config.format
    }
}

/// Rasterise every page of `pdf` into `scratch`.
///
/// Only the metadata probe can fail the run; everything after it is recorded
/// per page.
pub async fn render_pdf(
    pdf: &Path,
    scratch: &Path,
    config: &PipelineConfig,
) -> Result<RenderOutcome, PipelineError> {
    let start = Instant::now();
    let info = probe_pdf(pdf, config).await?;
    info!(
        "PDF has {} pages{}",
        info.page_count,
        info.page_size_pts
            .map(|(w, h)| format!(", {w} x {h} pts"))
            .unwrap_or_default()
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Render, info.page_count);
    }

    let toolchain = Toolchain {
        renderer: config.tools.rasterizer.clone(),
        version: renderer_version(config).await,
    };

    let format = raw_format(config);
    let chunks = chunk_pages(info.page_count, config.concurrency);
    let chunk_results = run_bounded(&chunks, config.concurrency, |chunk| {
        render_chunk(pdf, scratch, *chunk, format, config)
    })
    .await;

    let produced = collect_rendered(scratch, format).await.unwrap_or_else(|e| {
        warn!("Could not list rendered pages in {}: {}", scratch.display(), e);
        HashMap::new()
    });

    let mut rendered: Vec<(usize, PathBuf)> = Vec::with_capacity(info.page_count);
    let mut errors = Vec::new();

    for (chunk, result) in chunks.iter().zip(&chunk_results) {
        match result {
            Ok(()) => {
                for page in chunk.pages() {
                    match produced.get(&page) {
                        Some(path) => rendered.push((page, path.clone())),
                        None => errors.push(PageError::new(page, "render produced no output")),
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Pages {}-{} failed to render: {}",
                    chunk.first, chunk.last, e
                );
                errors.extend(chunk.pages().map(|p| PageError::new(p, "render failed")));
            }
        }
    }

    let (pages, measure_errors) = acquire_dimensions(rendered, info, config).await;
    errors.extend(measure_errors);
    errors.sort_by_key(|e| e.index);

    if let Some(cb) = config.progress_callback.as_ref() {
        for p in &pages {
            cb.on_item_complete(Stage::Render, p.index);
        }
        for e in &errors {
            cb.on_item_error(Stage::Render, e.index, &e.error);
        }
    }

    info!(
        "Rendered {}/{} pages in {}ms",
        pages.len(),
        info.page_count,
        start.elapsed().as_millis()
    );

    Ok(RenderOutcome {
        pages,
        errors,
        toolchain,
    })
}

/// Render one page range, retrying a non-zero exit up to `render_retries` times.
///
/// Timeouts and spawn failures are not retried. If the final attempt fails the
/// whole range is treated as failed, even if some files were written: the
/// rasteriser gives no guarantee about partially rendered ranges.
async fn render_chunk(
    pdf: &Path,
    scratch: &Path,
    chunk: Chunk,
    format: PageFormat,
    config: &PipelineConfig,
) -> Result<(), ToolError> {
    let cmd = ToolCommand::new(&config.tools.rasterizer, config.process_timeout())
        .arg(format.render_flag())
        .arg("-r")
        .arg(config.dpi.to_string())
        .arg("-f")
        .arg(chunk.first.to_string())
        .arg("-l")
        .arg(chunk.last.to_string())
        .arg(pdf)
        .arg(scratch.join(RAW_PREFIX));

    let mut attempts_left = config.render_retries;
    loop {
        match run_checked(config.runner.as_ref(), &cmd).await {
            Ok(_) => {
                debug!("Rendered pages {}-{}", chunk.first, chunk.last);
                return Ok(());
            }
            Err(e @ ToolError::ExitStatus { .. }) if attempts_left > 0 => {
                attempts_left -= 1;
                warn!(
                    "Pages {}-{}: {} (retrying, {} left)",
                    chunk.first, chunk.last, e, attempts_left
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// Map page number → file for every `page-N.<ext>` in `scratch`.
///
/// The rasteriser zero-pads N to the width of the document's last page
/// number, so the padding is not assumed.
async fn collect_rendered(
    scratch: &Path,
    format: PageFormat,
) -> std::io::Result<HashMap<usize, PathBuf>> {
    let mut found = HashMap::new();
    let mut entries = tokio::fs::read_dir(scratch).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(format.extension()) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(num) = stem
            .strip_prefix(RAW_PREFIX)
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|n| n.parse::<usize>().ok())
        {
            found.insert(num, path);
        }
    }
    Ok(found)
}

/// Attach dimensions to rendered pages, predicting when the spot-check allows.
async fn acquire_dimensions(
    mut rendered: Vec<(usize, PathBuf)>,
    info: PdfInfo,
    config: &PipelineConfig,
) -> (Vec<RawPage>, Vec<PageError>) {
    rendered.sort_by_key(|(index, _)| *index);
    let reader = DimensionReader::new(
        config.runner.as_ref(),
        &config.tools.image_tool,
        config.process_timeout(),
    );

    let predicted = info
        .page_size_pts
        .filter(|_| info.page_count >= 2)
        .map(|pts| predict_dimensions(pts, config.dpi));

    let mut spot_checked = HashMap::new();
    if let (Some(predicted), Some((first_index, first)), Some((last_index, last))) =
        (predicted, rendered.first(), rendered.last())
    {
        let first_dims = reader.read(first).await;
        let last_dims = reader.read(last).await;
        if prediction_holds(predicted, first_dims, last_dims) {
            info!(
                "Uniform page size confirmed: {}x{} px",
                predicted.width, predicted.height
            );
            let pages = rendered
                .into_iter()
                .map(|(index, path)| RawPage {
                    index,
                    path,
                    dimensions: predicted,
                })
                .collect();
            return (pages, Vec::new());
        }
        debug!(
            "Spot-check mismatch: predicted {:?}, first {:?}, last {:?}",
            predicted, first_dims, last_dims
        );
        spot_checked.insert(*first_index, first_dims);
        spot_checked.insert(*last_index, last_dims);
    }

    measure_all(rendered, &spot_checked, &reader, config.concurrency).await
}

/// Measure every page; a page whose size cannot be determined becomes an error.
///
/// Pages in `known` were already measured and are not read again.
async fn measure_all(
    rendered: Vec<(usize, PathBuf)>,
    known: &HashMap<usize, Dimensions>,
    reader: &DimensionReader<'_>,
    concurrency: usize,
) -> (Vec<RawPage>, Vec<PageError>) {
    let measured = run_bounded(&rendered, concurrency, |(index, path)| async move {
        let dims = match known.get(index) {
            Some(&dims) => dims,
            None => reader.read(path).await,
        };
        if dims.is_known() {
            Ok(dims)
        } else {
            Err("could not determine page dimensions")
        }
    })
    .await;

    let mut pages = Vec::with_capacity(rendered.len());
    let mut errors = Vec::new();
    for ((index, path), result) in rendered.into_iter().zip(measured) {
        match result {
            Ok(dimensions) => pages.push(RawPage {
                index,
                path,
                dimensions,
            }),
            Err(e) => errors.push(PageError::new(index, e)),
        }
    }
    (pages, errors)
}

/// Read the rasteriser's version for provenance; `"unknown"` on any failure.
async fn renderer_version(config: &PipelineConfig) -> String {
    let cmd = ToolCommand::new(&config.tools.rasterizer, config.process_timeout()).arg("-v");
    match config.runner.run(&cmd).await {
        // `pdftoppm -v` prints to stderr and has exited non-zero in older releases.
        Ok(out) => {
            let text = format!("{}{}", out.stdout_lossy(), out.stderr_lossy());
            RE_VERSION
                .captures(&text)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "unknown".to_string())
        }
        Err(e) => {
            warn!("Could not read renderer version: {}", e);
            "unknown".to_string()
        }
    }
}

// ── Image inputs ─────────────────────────────────────────────────────────

/// Copy images into `scratch` as `page-NNNN.<ext>`, numbered in slice order.
///
/// Dimensions are measured here only when normalisation is off; otherwise the
/// normaliser measures its own output and a read now would be wasted.
pub async fn ingest_images(
    images: &[PathBuf],
    scratch: &Path,
    config: &PipelineConfig,
) -> RenderOutcome {
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Render, images.len());
    }
    let reader = DimensionReader::new(
        config.runner.as_ref(),
        &config.tools.image_tool,
        config.process_timeout(),
    );
    let numbered: Vec<(usize, &PathBuf)> = images.iter().enumerate().map(|(i, p)| (i + 1, p)).collect();

    let results = run_bounded(&numbered, config.concurrency, |&(index, src)| async move {
        let result = ingest_one(index, src, scratch, config, &reader).await;
        report(config.progress_callback.as_ref(), Stage::Render, index, &result);
        result
    })
    .await;

    let mut pages = Vec::new();
    let mut errors = Vec::new();
    for ((index, _), result) in numbered.iter().zip(results) {
        match result {
            Ok(page) => pages.push(page),
            Err(e) => errors.push(PageError::new(*index, e)),
        }
    }

    RenderOutcome {
        pages,
        errors,
        toolchain: Toolchain {
            renderer: PASSTHROUGH_RENDERER.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    }
}

async fn ingest_one(
    index: usize,
    src: &Path,
    scratch: &Path,
    config: &PipelineConfig,
    reader: &DimensionReader<'_>,
) -> Result<RawPage, ToolError> {
    let ext = src
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "img".to_string());
    let dest = scratch.join(format!("{RAW_PREFIX}-{index:04}.{ext}"));
    tokio::fs::copy(src, &dest)
        .await
        .map_err(|e| ToolError::io(format!("copy {}", src.display()), e))?;

    let dimensions = if config.normalize {
        Dimensions::UNKNOWN
    } else {
        let dims = reader.read(&dest).await;
        if !dims.is_known() {
            return Err(ToolError::Parse("could not determine page dimensions".into()));
        }
        dims
    };
    Ok(RawPage {
        index,
        path: dest,
        dimensions,
    })
}
