//! Output types: pages, provenance and the run manifest.
//!
//! The manifest is the single record of a run. Every page index in
//! `1..=page_count` appears exactly once, either in `pages` (with its image,
//! dimensions and any extracted artifacts) or in `errors`.

use crate::error::{PageError, PipelineError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the manifest inside the output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One successfully produced page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 1-based page index, unique within the document.
    pub index: usize,
    /// Page image, relative to the output directory.
    pub file: String,
    pub width: u32,
    pub height: u32,
    /// Extracted text (Markdown), relative to the output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_file: Option<String>,
    /// Image regions cropped out during extraction, in reading order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_files: Option<Vec<String>>,
}

/// Which renderer produced the pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub renderer: String,
    pub version: String,
}

/// The final report of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Input file or folder name.
    pub source: String,
    /// `pages.len() + errors.len()`.
    pub page_count: usize,
    pub dpi: u32,
    /// Extension of the page images, e.g. `png`.
    pub format: String,
    /// Successful pages, ascending by index.
    pub pages: Vec<Page>,
    /// Failed pages, ascending by index.
    pub errors: Vec<PageError>,
    pub toolchain: Toolchain,
}

impl Manifest {
    /// True when every page made it through every stage.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Write `manifest` as pretty JSON to `dir/manifest.json`.
///
/// Uses atomic write (temp file + rename) so readers never observe a
/// half-written manifest.
pub async fn write_manifest(manifest: &Manifest, dir: &Path) -> Result<(), PipelineError> {
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|e| PipelineError::Internal(format!("manifest serialisation: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| PipelineError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| PipelineError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest {
            source: "scan.pdf".into(),
            page_count: 2,
            dpi: 150,
            format: "png".into(),
            pages: vec![Page {
                index: 1,
                file: "page-0001.png".into(),
                width: 1275,
                height: 1650,
                text_file: Some("page-0001.md".into()),
                image_files: Some(vec!["page-0001-img-01.png".into()]),
            }],
            errors: vec![PageError::new(2, "render failed")],
            toolchain: Toolchain {
                renderer: "pdftoppm".into(),
                version: "24.02.0".into(),
            },
        }
    }

    #[test]
    fn serialises_with_camel_case_fields() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["pageCount"], 2);
        assert_eq!(json["pages"][0]["textFile"], "page-0001.md");
        assert_eq!(json["pages"][0]["imageFiles"][0], "page-0001-img-01.png");
        assert_eq!(json["errors"][0]["index"], 2);
        assert_eq!(json["toolchain"]["renderer"], "pdftoppm");
    }

    #[test]
    fn optional_artifacts_are_omitted() {
        let mut m = sample();
        m.pages[0].text_file = None;
        m.pages[0].image_files = None;
        let json = serde_json::to_string(&m).unwrap();
        assert!(!json.contains("textFile"));
        assert!(!json.contains("imageFiles"));
    }

    #[tokio::test]
    async fn write_manifest_is_readable_back() {
        let dir = tempfile::tempdir().unwrap();
        let m = sample();
        write_manifest(&m, dir.path()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        let back: Manifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, m);
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }
}
