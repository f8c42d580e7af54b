//! Input resolution: classify a user-supplied path as a PDF, a single image,
//! or a folder of images.
//!
//! ## Why check magic bytes?
//!
//! A file called `report.pdf` that is really an HTML error page would
//! otherwise surface as an obscure `pdfinfo` failure. Checking `%PDF` up
//! front gives callers a meaningful error before any tool is spawned.
//! Images are recognised by extension; the renderer tools sniff their own
//! formats.

use crate::error::PipelineError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extensions accepted as page images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "webp", "bmp", "gif"];

/// What the pipeline was pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputKind {
    Pdf(PathBuf),
    Image(PathBuf),
    /// A directory; images sorted by file name.
    Folder { dir: PathBuf, images: Vec<PathBuf> },
}

impl InputKind {
    /// Display name recorded as the manifest's `source`.
    pub fn source_name(&self) -> String {
        let path = match self {
            InputKind::Pdf(p) | InputKind::Image(p) => p,
            InputKind::Folder { dir, .. } => dir,
        };
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    /// The page images for image and folder inputs; empty for PDFs.
    pub fn images(&self) -> Vec<PathBuf> {
        match self {
            InputKind::Pdf(_) => Vec::new(),
            InputKind::Image(p) => vec![p.clone()],
            InputKind::Folder { images, .. } => images.clone(),
        }
    }
}

/// True when `path` has one of [`IMAGE_EXTENSIONS`].
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Resolve `path` into an [`InputKind`], validating it along the way.
///
/// All failures here are fatal for the run.
pub fn resolve_input(path: &Path) -> Result<InputKind, PipelineError> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied { path: path.to_path_buf() });
        }
        Err(_) => return Err(PipelineError::InputNotFound { path: path.to_path_buf() }),
    };

    if meta.is_dir() {
        return resolve_folder(path);
    }

    let mut magic = [0u8; 4];
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let is_pdf = f.read_exact(&mut magic).is_ok() && &magic == b"%PDF";
            if is_pdf {
                debug!("Resolved PDF: {}", path.display());
                return Ok(InputKind::Pdf(path.to_path_buf()));
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied { path: path.to_path_buf() });
        }
        Err(_) => return Err(PipelineError::InputNotFound { path: path.to_path_buf() }),
    }

    if is_image_path(path) {
        debug!("Resolved image: {}", path.display());
        return Ok(InputKind::Image(path.to_path_buf()));
    }

    Err(PipelineError::UnsupportedInput { path: path.to_path_buf() })
}

fn resolve_folder(dir: &Path) -> Result<InputKind, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied { path: dir.to_path_buf() },
        _ => PipelineError::InputNotFound { path: dir.to_path_buf() },
    })?;

    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_image_path(p))
        .collect();
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if images.is_empty() {
        return Err(PipelineError::EmptyFolder { path: dir.to_path_buf() });
    }
    debug!("Resolved folder {} with {} images", dir.display(), images.len());
    Ok(InputKind::Folder {
        dir: dir.to_path_buf(),
        images,
    })
}
