//! Region extraction: layout → crops → text → one Markdown file per page.
//!
//! Each page is chopped into reading-order regions once. Image regions are
//! cropped into permanent assets and referenced from the text by a
//! placeholder; text regions are cropped into a temporary file, sent to the
//! [`TextGenerator`], and the crop is removed again. Fragments are joined in
//! region order with a blank line between them.
//!
//! ## Why spawn_blocking?
//!
//! Decoding the page and encoding crops is CPU-bound work inside the `image`
//! crate. Running it on the async worker threads would stall every other
//! in-flight page (and its network calls) for the duration.
//!
//! ## Failure isolation
//!
//! A failing region never discards the other regions of its page. What
//! happens to the page afterwards is decided by [`RegionFailurePolicy`].

use crate::config::{PipelineConfig, RegionFailurePolicy};
use crate::error::{PageError, ToolError};
use crate::executor::run_bounded;
use crate::output::Page;
use crate::pipeline::encode::REGION_MEDIA_TYPE;
use crate::pipeline::layout::{analyze_layout, Region, RegionKind};
use crate::pipeline::llm::{generate_with_retry, TextGenerator};
use crate::progress::{report, Stage};
use crate::prompts::{is_blank, region_prompt, BLANK_MARKER};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a page did not survive extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No regions could be obtained for the page.
    #[error("layout analysis failed: {0}")]
    Layout(#[source] ToolError),

    /// The page image itself could not be decoded.
    #[error("could not decode page image: {0}")]
    Decode(#[source] ToolError),

    /// The page's text file could not be written.
    #[error("could not write page text: {0}")]
    Write(#[source] ToolError),

    /// One or more regions failed; the rest of the page was kept on disk.
    #[error("extraction failed for region(s) {}: {detail}", join_numbers(.regions))]
    Regions { regions: Vec<usize>, detail: String },
}

fn join_numbers(ns: &[usize]) -> String {
    ns.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ")
}

/// Pages that made it through, plus one error per page that did not.
#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub pages: Vec<Page>,
    pub errors: Vec<PageError>,
}

/// `page-0003.md`
pub fn text_file_name(index: usize) -> String {
    format!("page-{index:04}.md")
}

/// `page-0003-img-02.png`
pub fn asset_file_name(index: usize, n: usize) -> String {
    format!("page-{index:04}-img-{n:02}.png")
}

/// Reference left in the page text where an image region was.
pub fn image_placeholder(file: &str) -> String {
    format!("![image]({file})")
}

/// Marker left in the page text where a region failed (`KeepPartial`).
pub fn failed_region_marker(n: usize) -> String {
    format!("<!-- region {n}: extraction failed -->")
}

/// Restrict `region` to a `width`×`height` page; `None` when nothing is left.
pub fn clamp_region(region: &Region, width: u32, height: u32) -> Option<Region> {
    let x = region.x.min(width);
    let y = region.y.min(height);
    let w = region.width.min(width - x);
    let h = region.height.min(height - y);
    (w > 0 && h > 0).then_some(Region {
        x,
        y,
        width: w,
        height: h,
        kind: region.kind,
    })
}

// ── Temporary crops ──────────────────────────────────────────────────────

/// A crop file that is removed when the guard goes out of scope.
///
/// Removal is best-effort: a failure is logged and otherwise ignored.
struct TempCrop {
    path: PathBuf,
}

impl TempCrop {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for TempCrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not delete crop {}: {}", self.path.display(), e);
            }
        }
    }
}

// ── Stage entry point ────────────────────────────────────────────────────

/// Extract text and image assets for every page, at most `concurrency` pages
/// at a time.
///
/// Page images are read from `out_dir`; temporary crops go to `scratch`.
pub async fn extract_pages(
    pages: &[Page],
    out_dir: &Path,
    scratch: &Path,
    generator: &dyn TextGenerator,
    config: &PipelineConfig,
) -> ExtractOutcome {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Extract, pages.len());
    }

    let results = run_bounded(pages, config.concurrency, |page| async move {
        let result = extract_one(page, out_dir, scratch, generator, config).await;
        report(config.progress_callback.as_ref(), Stage::Extract, page.index, &result);
        result
    })
    .await;

    let mut outcome = ExtractOutcome::default();
    for (page, result) in pages.iter().zip(results) {
        match result {
            Ok(p) => outcome.pages.push(p),
            Err(e) => {
                warn!("Page {}: {}", page.index, e);
                outcome.errors.push(PageError::new(page.index, e));
            }
        }
    }

    info!(
        "Extracted {}/{} pages in {}ms",
        outcome.pages.len(),
        pages.len(),
        start.elapsed().as_millis()
    );
    outcome
}

async fn extract_one(
    page: &Page,
    out_dir: &Path,
    scratch: &Path,
    generator: &dyn TextGenerator,
    config: &PipelineConfig,
) -> Result<Page, ExtractError> {
    let page_path = out_dir.join(&page.file);
    let regions = analyze_layout(&page_path, config)
        .await
        .map_err(ExtractError::Layout)?;
    let img = Arc::new(decode_page(page_path).await.map_err(ExtractError::Decode)?);

    let regions = if regions.is_empty() {
        debug!("Page {}: empty layout, treating whole page as text", page.index);
        vec![Region {
            x: 0,
            y: 0,
            width: img.width(),
            height: img.height(),
            kind: RegionKind::Text,
        }]
    } else {
        regions
    };

    let instruction = region_prompt(config.system_prompt.as_deref());
    let mut fragments: Vec<String> = Vec::with_capacity(regions.len());
    let mut assets: Vec<String> = Vec::new();
    let mut failed: Vec<(usize, String)> = Vec::new();

    for (i, region) in regions.iter().enumerate() {
        let n = i + 1;
        let result = match region.kind {
            RegionKind::Image => {
                let file = asset_file_name(page.index, assets.len() + 1);
                crop_region(&img, *region, out_dir.join(&file))
                    .await
                    .map(|()| {
                        fragments.push(image_placeholder(&file));
                        assets.push(file);
                    })
            }
            RegionKind::Text => {
                let label = format!("Page {} region {}", page.index, n);
                let crop = TempCrop::new(scratch.join(format!("crop-{:04}-{:02}.png", page.index, n)));
                let text = transcribe(&img, *region, &crop, generator, instruction, config, &label).await;
                text.map(|text| {
                    if !is_blank(&text) {
                        fragments.push(text.trim().to_string());
                    }
                })
            }
        };

        if let Err(e) = result {
            warn!("Page {} region {}: {}", page.index, n, e);
            if config.region_failure == RegionFailurePolicy::KeepPartial {
                fragments.push(failed_region_marker(n));
            }
            failed.push((n, e.to_string()));
        }
    }

    let text_file = text_file_name(page.index);
    let body = if fragments.is_empty() {
        BLANK_MARKER.to_string()
    } else {
        fragments.join("\n\n")
    };
    tokio::fs::write(out_dir.join(&text_file), format!("{body}\n"))
        .await
        .map_err(|e| ExtractError::Write(ToolError::io(text_file.clone(), e)))?;

    debug!(
        "Page {}: {} regions, {} assets, {} failed",
        page.index,
        regions.len(),
        assets.len(),
        failed.len()
    );

    if !failed.is_empty() && config.region_failure == RegionFailurePolicy::FailPage {
        let detail = failed[0].1.clone();
        return Err(ExtractError::Regions {
            regions: failed.into_iter().map(|(n, _)| n).collect(),
            detail,
        });
    }

    Ok(Page {
        text_file: Some(text_file),
        image_files: Some(assets),
        ..page.clone()
    })
}

/// Crop a text region into `crop`, then send its bytes to the generator.
async fn transcribe(
    img: &Arc<DynamicImage>,
    region: Region,
    crop: &TempCrop,
    generator: &dyn TextGenerator,
    instruction: &str,
    config: &PipelineConfig,
    label: &str,
) -> Result<String, ToolError> {
    crop_region(img, region, crop.path.clone()).await?;
    let bytes = tokio::fs::read(&crop.path)
        .await
        .map_err(|e| ToolError::io(crop.path.display().to_string(), e))?;
    generate_with_retry(generator, &bytes, REGION_MEDIA_TYPE, instruction, config, label).await
}

async fn decode_page(path: PathBuf) -> Result<DynamicImage, ToolError> {
    tokio::task::spawn_blocking(move || {
        image::open(&path).map_err(|e| ToolError::Parse(format!("{}: {e}", path.display())))
    })
    .await
    .map_err(|e| ToolError::Parse(format!("decode task failed: {e}")))?
}

/// Crop `region` out of `img` and save it as PNG at `dest`.
async fn crop_region(img: &Arc<DynamicImage>, region: Region, dest: PathBuf) -> Result<(), ToolError> {
    let img = Arc::clone(img);
    tokio::task::spawn_blocking(move || {
        let r = clamp_region(&region, img.width(), img.height()).ok_or_else(|| {
            ToolError::Parse(format!(
                "region {}x{}+{}+{} lies outside the page",
                region.width, region.height, region.x, region.y
            ))
        })?;
        img.crop_imm(r.x, r.y, r.width, r.height)
            .save_with_format(&dest, image::ImageFormat::Png)
            .map_err(|e| ToolError::io(dest.display().to_string(), std::io::Error::other(e)))
    })
    .await
    .map_err(|e| ToolError::Parse(format!("crop task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOutput, ProcessRunner, ToolCommand};
    use futures::future::BoxFuture;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HEADER: &str = "level\tblock_num\tleft\ttop\twidth\theight\ttext";

    /// Answers every layout call with the same report.
    struct LayoutRunner {
        report: String,
        code: i32,
    }

    impl ProcessRunner for LayoutRunner {
        fn run<'a>(
            &'a self,
            _command: &'a ToolCommand,
        ) -> BoxFuture<'a, Result<ProcessOutput, ToolError>> {
            Box::pin(async move {
                Ok(ProcessOutput {
                    code: Some(self.code),
                    stdout: self.report.as_bytes().to_vec(),
                    stderr: b"layout exploded".to_vec(),
                })
            })
        }
    }

    /// Describes the crop it receives; fails for crops of `fail_width` pixels.
    struct Describe {
        fail_width: Option<u32>,
        calls: AtomicUsize,
    }

    impl TextGenerator for Describe {
        fn generate<'a>(
            &'a self,
            image: &'a [u8],
            media_type: &'a str,
            _instruction: &'a str,
        ) -> BoxFuture<'a, Result<String, ToolError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(media_type, "image/png");
                let img = image::load_from_memory(image).map_err(|e| ToolError::Parse(e.to_string()))?;
                if Some(img.width()) == self.fail_width {
                    return Err(ToolError::Generation("model overloaded".into()));
                }
                Ok(format!("text {}x{}", img.width(), img.height()))
            })
        }
    }

    fn describe(fail_width: Option<u32>) -> Describe {
        Describe {
            fail_width,
            calls: AtomicUsize::new(0),
        }
    }

    fn block(block: u32, l: u32, t: u32, w: u32, h: u32, word: Option<&str>) -> String {
        let mut rows = format!("2\t{block}\t{l}\t{t}\t{w}\t{h}\t");
        if let Some(word) = word {
            rows.push_str(&format!("\n5\t{block}\t{l}\t{t}\t10\t10\t{word}"));
        }
        rows
    }

    struct Fixture {
        out: tempfile::TempDir,
        scratch: tempfile::TempDir,
        page: Page,
    }

    fn fixture() -> Fixture {
        let out = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(400, 600, Luma([255]))
            .save(out.path().join("page-0001.png"))
            .unwrap();
        Fixture {
            out,
            scratch,
            page: Page {
                index: 1,
                file: "page-0001.png".into(),
                width: 400,
                height: 600,
                text_file: None,
                image_files: None,
            },
        }
    }

    fn config(report: String, code: i32, policy: RegionFailurePolicy) -> PipelineConfig {
        PipelineConfig::builder()
            .runner(Arc::new(LayoutRunner { report, code }))
            .max_retries(0)
            .region_failure(policy)
            .build()
            .unwrap()
    }

    fn three_regions() -> String {
        [
            HEADER.to_string(),
            block(1, 10, 10, 300, 50, Some("Title")),
            block(2, 10, 200, 200, 150, None),
            block(3, 10, 450, 380, 100, Some("Body")),
        ]
        .join("\n")
    }

    #[test]
    fn naming() {
        assert_eq!(text_file_name(3), "page-0003.md");
        assert_eq!(asset_file_name(3, 2), "page-0003-img-02.png");
        assert_eq!(image_placeholder("a.png"), "![image](a.png)");
        assert_eq!(failed_region_marker(4), "<!-- region 4: extraction failed -->");
    }

    #[test]
    fn clamping() {
        let r = Region { x: 350, y: 10, width: 100, height: 20, kind: RegionKind::Text };
        assert_eq!(clamp_region(&r, 400, 600).map(|r| r.width), Some(50));
        let outside = Region { x: 500, ..r };
        assert_eq!(clamp_region(&outside, 400, 600), None);
    }

    #[test]
    fn region_error_lists_numbers() {
        let e = ExtractError::Regions { regions: vec![2, 5], detail: "boom".into() };
        assert_eq!(e.to_string(), "extraction failed for region(s) 2, 5: boom");
    }

    #[tokio::test]
    async fn text_and_images_in_reading_order() {
        let fx = fixture();
        let generator = describe(None);
        let cfg = config(three_regions(), 0, RegionFailurePolicy::FailPage);

        let outcome = extract_pages(&[fx.page.clone()], fx.out.path(), fx.scratch.path(), &generator, &cfg).await;
        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        let page = &outcome.pages[0];
        assert_eq!(page.text_file.as_deref(), Some("page-0001.md"));
        assert_eq!(page.image_files, Some(vec!["page-0001-img-01.png".to_string()]));

        let md = std::fs::read_to_string(fx.out.path().join("page-0001.md")).unwrap();
        assert_eq!(
            md,
            "text 300x50\n\n![image](page-0001-img-01.png)\n\ntext 380x100\n"
        );
        let asset = image::open(fx.out.path().join("page-0001-img-01.png")).unwrap();
        assert_eq!((asset.width(), asset.height()), (200, 150));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read_dir(fx.scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_layout_uses_whole_page() {
        let fx = fixture();
        let generator = describe(None);
        let cfg = config(HEADER.to_string(), 0, RegionFailurePolicy::FailPage);

        let outcome = extract_pages(&[fx.page.clone()], fx.out.path(), fx.scratch.path(), &generator, &cfg).await;
        assert_eq!(outcome.pages.len(), 1);
        let md = std::fs::read_to_string(fx.out.path().join("page-0001.md")).unwrap();
        assert_eq!(md, "text 400x600\n");
    }

    #[tokio::test]
    async fn fail_page_keeps_partial_text_on_disk() {
        let fx = fixture();
        let generator = describe(Some(380));
        let cfg = config(three_regions(), 0, RegionFailurePolicy::FailPage);

        let outcome = extract_pages(&[fx.page.clone()], fx.out.path(), fx.scratch.path(), &generator, &cfg).await;
        assert!(outcome.pages.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 1);
        assert!(outcome.errors[0].error.contains("region(s) 3"), "{}", outcome.errors[0].error);

        let md = std::fs::read_to_string(fx.out.path().join("page-0001.md")).unwrap();
        assert!(md.starts_with("text 300x50"));
        assert!(!md.contains("extraction failed"));
        assert!(fx.out.path().join("page-0001-img-01.png").exists());
    }

    #[tokio::test]
    async fn keep_partial_marks_failed_region() {
        let fx = fixture();
        let generator = describe(Some(300));
        let cfg = config(three_regions(), 0, RegionFailurePolicy::KeepPartial);

        let outcome = extract_pages(&[fx.page.clone()], fx.out.path(), fx.scratch.path(), &generator, &cfg).await;
        assert!(outcome.errors.is_empty());
        let md = std::fs::read_to_string(fx.out.path().join("page-0001.md")).unwrap();
        assert!(md.starts_with("<!-- region 1: extraction failed -->\n\n![image]"), "{md}");
        assert!(md.ends_with("text 380x100\n"));
    }

    #[tokio::test]
    async fn layout_failure_fails_the_page() {
        let fx = fixture();
        let generator = describe(None);
        let cfg = config(String::new(), 1, RegionFailurePolicy::KeepPartial);

        let outcome = extract_pages(&[fx.page.clone()], fx.out.path(), fx.scratch.path(), &generator, &cfg).await;
        assert!(outcome.pages.is_empty());
        assert!(outcome.errors[0].error.starts_with("layout analysis failed"));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(!fx.out.path().join("page-0001.md").exists());
    }

    #[test]
    fn temp_crop_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop.png");
        std::fs::write(&path, b"x").unwrap();
        drop(TempCrop::new(path.clone()));
        assert!(!path.exists());
        // Already gone: dropping again is silent.
        drop(TempCrop::new(path));
    }
}
