//! Manifest assembly: fold the results of every stage into one report.
//!
//! Each stage hands on only the pages that survived it, so a page index
//! ends up either in the final page list or in exactly one stage's error
//! list. Assembly just concatenates and orders.

use crate::config::PipelineConfig;
use crate::error::PageError;
use crate::output::{Manifest, Page, Toolchain};

/// Build the manifest from the surviving pages and each stage's errors.
pub fn assemble_manifest(
    source: String,
    config: &PipelineConfig,
    toolchain: Toolchain,
    mut pages: Vec<Page>,
    stage_errors: Vec<Vec<PageError>>,
) -> Manifest {
    let mut errors: Vec<PageError> = stage_errors.into_iter().flatten().collect();
    pages.sort_by_key(|p| p.index);
    errors.sort_by_key(|e| e.index);

    Manifest {
        source,
        page_count: pages.len() + errors.len(),
        dpi: config.dpi,
        format: manifest_format(config, &pages),
        pages,
        errors,
        toolchain,
    }
}

/// Extension recorded as the manifest's `format`.
///
/// Normalised pages are always re-encoded to `config.format`. Without
/// normalisation pages keep their source format: a shared extension is
/// reported as-is, differing ones as `mixed`.
pub fn manifest_format(config: &PipelineConfig, pages: &[Page]) -> String {
    if config.normalize {
        return config.format.extension().to_string();
    }
    let mut exts = pages
        .iter()
        .map(|p| p.file.rsplit_once('.').map_or("", |(_, ext)| ext));
    let Some(first) = exts.next() else {
        return config.format.extension().to_string();
    };
    if exts.all(|e| e == first) {
        first.to_string()
    } else {
        "mixed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: usize, file: &str) -> Page {
        Page {
            index,
            file: file.into(),
            width: 10,
            height: 10,
            text_file: None,
            image_files: None,
        }
    }

    fn toolchain() -> Toolchain {
        Toolchain {
            renderer: "pdftoppm".into(),
            version: "24.02.0".into(),
        }
    }

    #[test]
    fn merges_and_orders_every_stage() {
        let cfg = PipelineConfig::default();
        let m = assemble_manifest(
            "doc.pdf".into(),
            &cfg,
            toolchain(),
            vec![page(5, "page-0005.png"), page(1, "page-0001.png")],
            vec![
                vec![PageError::new(4, "render failed")],
                vec![PageError::new(2, "normalize failed: exit 1")],
                vec![PageError::new(3, "layout analysis failed")],
            ],
        );

        assert_eq!(m.page_count, 5);
        assert_eq!(m.pages.iter().map(|p| p.index).collect::<Vec<_>>(), vec![1, 5]);
        assert_eq!(m.errors.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(m.dpi, 150);
        assert_eq!(m.format, "png");
        assert_eq!(m.source, "doc.pdf");
        assert_eq!(m.toolchain, toolchain());

        let mut seen: Vec<usize> = m
            .pages
            .iter()
            .map(|p| p.index)
            .chain(m.errors.iter().map(|e| e.index))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=m.page_count).collect::<Vec<_>>());
    }

    #[test]
    fn raw_pages_report_their_own_format() {
        let cfg = PipelineConfig::builder().normalize(false).build().unwrap();
        assert_eq!(
            manifest_format(&cfg, &[page(1, "page-0001.jpg"), page(2, "page-0002.jpg")]),
            "jpg"
        );
        assert_eq!(
            manifest_format(&cfg, &[page(1, "page-0001.jpg"), page(2, "page-0002.png")]),
            "mixed"
        );
        assert_eq!(manifest_format(&cfg, &[]), "png");
    }

    #[test]
    fn empty_run_is_still_a_manifest() {
        let cfg = PipelineConfig::default();
        let m = assemble_manifest("x".into(), &cfg, toolchain(), vec![], vec![vec![], vec![]]);
        assert_eq!(m.page_count, 0);
        assert!(m.is_complete());
    }
}
