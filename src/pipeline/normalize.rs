//! Page cleanup: one external image-tool invocation per page.
//!
//! The transform itself (grayscale, contrast stretch, deskew, trim, border,
//! sharpen, lossless encode) belongs to the image tool; this stage only
//! schedules it through the shared executor, moves the result to its final
//! name, and records what happened. A failed page is dropped from later
//! stages and reported once.

use crate::config::{PageFormat, PipelineConfig};
use crate::error::{PageError, ToolError};
use crate::executor::run_bounded;
use crate::output::Page;
use crate::pipeline::dimensions::DimensionReader;
use crate::pipeline::render::RawPage;
use crate::process::{run_checked, ToolCommand};
use crate::progress::{report, Stage};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a page did not survive normalisation.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The image tool failed or timed out.
    #[error("normalize failed: {0}")]
    Transform(#[source] ToolError),

    /// The transform succeeded but the output's size could not be read.
    #[error("normalized image has unreadable dimensions")]
    Measure,

    /// Moving an un-normalised page to its final name failed.
    #[error("could not place page image: {0}")]
    Place(#[source] ToolError),
}

/// Pages that made it through, plus one error per page that did not.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub pages: Vec<Page>,
    pub errors: Vec<PageError>,
}

/// Final file name of a page image: `page-0007.png`.
pub fn page_file_name(index: usize, extension: &str) -> String {
    format!("page-{index:04}.{extension}")
}

/// The cleanup invocation for one page.
pub fn cleanup_command(
    tool: &str,
    src: &Path,
    dest: &Path,
    format: PageFormat,
    timeout: Duration,
) -> ToolCommand {
    let encode: &[&str] = match format {
        PageFormat::Png => &["-define", "png:compression-level=9"],
        PageFormat::Tiff => &["-compress", "lzw"],
    };
    ToolCommand::new(tool, timeout)
        .arg(src)
        .args(["-colorspace", "Gray"])
        .args(["-contrast-stretch", "0.5%x0.5%"])
        .args(["-deskew", "40%"])
        .args(["-trim", "+repage"])
        .args(["-bordercolor", "white", "-border", "20"])
        .args(["-sharpen", "0x1"])
        .args(encode)
        .arg(dest)
}

/// Normalise every raw page into `out_dir`, at most `concurrency` at a time.
pub async fn normalize_pages(
    raw: &[RawPage],
    out_dir: &Path,
    config: &PipelineConfig,
) -> NormalizeOutcome {
    let start = Instant::now();
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Normalize, raw.len());
    }
    let reader = DimensionReader::new(
        config.runner.as_ref(),
        &config.tools.image_tool,
        config.process_timeout(),
    );

    let results = run_bounded(raw, config.concurrency, |page| async move {
        let result = normalize_one(page, out_dir, config, &reader).await;
        report(config.progress_callback.as_ref(), Stage::Normalize, page.index, &result);
        result
    })
    .await;

    let outcome = collect(raw, results);
    info!(
        "Normalized {}/{} pages in {}ms",
        outcome.pages.len(),
        raw.len(),
        start.elapsed().as_millis()
    );
    outcome
}

async fn normalize_one(
    raw: &RawPage,
    out_dir: &Path,
    config: &PipelineConfig,
    reader: &DimensionReader<'_>,
) -> Result<Page, NormalizeError> {
    let file = page_file_name(raw.index, config.format.extension());
    let dest = out_dir.join(&file);
    let cmd = cleanup_command(
        &config.tools.image_tool,
        &raw.path,
        &dest,
        config.format,
        config.process_timeout(),
    );

    run_checked(config.runner.as_ref(), &cmd)
        .await
        .map_err(NormalizeError::Transform)?;

    if let Err(e) = tokio::fs::remove_file(&raw.path).await {
        warn!("Could not delete {}: {}", raw.path.display(), e);
    }

    let dims = reader.read(&dest).await;
    if !dims.is_known() {
        return Err(NormalizeError::Measure);
    }
    debug!("Page {} normalized → {}x{}", raw.index, dims.width, dims.height);

    Ok(Page {
        index: raw.index,
        file,
        width: dims.width,
        height: dims.height,
        text_file: None,
        image_files: None,
    })
}

/// Move raw pages to their final names unchanged (normalisation disabled).
pub async fn place_raw_pages(
    raw: &[RawPage],
    out_dir: &Path,
    config: &PipelineConfig,
) -> NormalizeOutcome {
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(Stage::Normalize, raw.len());
    }
    let results = run_bounded(raw, config.concurrency, |page| async move {
        let result = place_one(page, out_dir, config.format).await;
        report(config.progress_callback.as_ref(), Stage::Normalize, page.index, &result);
        result
    })
    .await;

    collect(raw, results)
}

async fn place_one(
    raw: &RawPage,
    out_dir: &Path,
    fallback: PageFormat,
) -> Result<Page, NormalizeError> {
    let ext = raw
        .path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(fallback.extension());
    let file = page_file_name(raw.index, ext);
    let dest = out_dir.join(&file);
    if tokio::fs::rename(&raw.path, &dest).await.is_err() {
        tokio::fs::copy(&raw.path, &dest)
            .await
            .map_err(|e| NormalizeError::Place(ToolError::io(file.clone(), e)))?;
    }
    Ok(Page {
        index: raw.index,
        file,
        width: raw.dimensions.width,
        height: raw.dimensions.height,
        text_file: None,
        image_files: None,
    })
}

fn collect(raw: &[RawPage], results: Vec<Result<Page, NormalizeError>>) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();
    for (page, result) in raw.iter().zip(results) {
        match result {
            Ok(p) => outcome.pages.push(p),
            Err(e) => {
                warn!("Page {}: {}", page.index, e);
                outcome.errors.push(PageError::new(page.index, e));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(page_file_name(7, "png"), "page-0007.png");
        assert_eq!(page_file_name(12345, "tif"), "page-12345.tif");
    }

    #[test]
    fn cleanup_command_shape() {
        let cmd = cleanup_command(
            "magick",
            Path::new("/s/page-1.png"),
            Path::new("/o/page-0001.png"),
            PageFormat::Png,
            Duration::from_secs(9),
        );
        let args = cmd.args_lossy();
        assert_eq!(cmd.program, "magick");
        assert_eq!(args.first().map(String::as_str), Some("/s/page-1.png"));
        assert_eq!(args.last().map(String::as_str), Some("/o/page-0001.png"));
        for flag in ["-colorspace", "-contrast-stretch", "-deskew", "-trim", "-border", "-sharpen"] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert!(args.iter().any(|a| a == "png:compression-level=9"));

        let tiff = cleanup_command(
            "magick",
            Path::new("a"),
            Path::new("b.tif"),
            PageFormat::Tiff,
            Duration::from_secs(9),
        );
        assert!(tiff.args_lossy().iter().any(|a| a == "lzw"));
    }

    #[test]
    fn error_messages_distinguish_causes() {
        let transform = NormalizeError::Transform(ToolError::Timeout {
            program: "magick".into(),
            secs: 5,
        });
        assert!(transform.to_string().starts_with("normalize failed"));
        assert!(NormalizeError::Measure.to_string().contains("dimensions"));
    }
}
