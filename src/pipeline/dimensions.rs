//! Pixel dimensions of an image file, without spawning a process if possible.
//!
//! PNG and JPEG carry their size in the first few bytes, so reading a small
//! prefix of the file is enough. Anything else (TIFF, WebP, a truncated or
//! exotic JPEG) falls back to the image tool's `identify`. Dimensions are
//! best-effort metadata: when every path fails the reader returns
//! [`Dimensions::UNKNOWN`] and lets the caller decide whether that matters.

use crate::error::ToolError;
use crate::process::{run_checked, ProcessRunner, ToolCommand};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// The eight bytes every PNG file starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Signature + IHDR length + `IHDR` + width + height.
const PNG_HEADER_LEN: usize = 24;

/// How much of a JPEG is scanned for a start-of-frame marker.
const JPEG_SCAN_LIMIT: usize = 64 * 1024;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const UNKNOWN: Dimensions = Dimensions {
        width: 0,
        height: 0,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Parse width/height from the IHDR chunk that immediately follows the PNG
/// signature. Needs the first 24 bytes; `None` for anything that is not a PNG.
pub fn png_dimensions(header: &[u8]) -> Option<Dimensions> {
    if header.len() < PNG_HEADER_LEN || header[..8] != PNG_SIGNATURE {
        return None;
    }
    let width = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);
    let height = u32::from_be_bytes([header[20], header[21], header[22], header[23]]);
    Some(Dimensions::new(width, height)).filter(Dimensions::is_known)
}

/// Walk the JPEG marker stream up to the first baseline (`0xC0`) or
/// progressive (`0xC2`) start-of-frame segment and read its size.
///
/// Returns `None` if the data is not a JPEG, if start-of-scan is reached first,
/// or if no frame header appears within the first 64 KiB.
pub fn jpeg_dimensions(data: &[u8]) -> Option<Dimensions> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }
    let data = &data[..data.len().min(JPEG_SCAN_LIMIT)];
    let mut pos = 2;

    while pos < data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        // Any number of 0xFF fill bytes may precede the marker type.
        while data.get(pos) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *data.get(pos)?;
        pos += 1;

        match marker {
            0xC0 | 0xC2 => {
                // length(2) precision(1) height(2) width(2)
                let seg = data.get(pos..pos + 7)?;
                let height = u16::from_be_bytes([seg[3], seg[4]]);
                let width = u16::from_be_bytes([seg[5], seg[6]]);
                return Some(Dimensions::new(width.into(), height.into()))
                    .filter(Dimensions::is_known);
            }
            // Start of scan / end of image: no frame header in this window.
            0xDA | 0xD9 => return None,
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD7 => {}
            _ => {
                let len = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
                if len < 2 {
                    return None;
                }
                pos += len;
            }
        }
    }
    None
}

/// Parse `identify -format "%w %h\n"` output. Only the first frame counts.
pub fn parse_identify(stdout: &str) -> Option<Dimensions> {
    let mut parts = stdout.lines().next()?.split_whitespace();
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    Some(Dimensions::new(width, height)).filter(Dimensions::is_known)
}

/// Reads image dimensions, header first, external tool second.
#[derive(Clone, Copy)]
pub struct DimensionReader<'a> {
    runner: &'a dyn ProcessRunner,
    image_tool: &'a str,
    timeout: Duration,
}

impl<'a> DimensionReader<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, image_tool: &'a str, timeout: Duration) -> Self {
        Self {
            runner,
            image_tool,
            timeout,
        }
    }

    /// Best-effort dimensions; [`Dimensions::UNKNOWN`] when nothing worked.
    pub async fn read(&self, path: &Path) -> Dimensions {
        if let Some(dims) = read_header(path).await {
            return dims;
        }
        match self.inspect(path).await {
            Ok(dims) => dims,
            Err(e) => {
                warn!("Could not measure {}: {}", path.display(), e);
                Dimensions::UNKNOWN
            }
        }
    }

    /// Ask the image tool for the size of the first frame.
    async fn inspect(&self, path: &Path) -> Result<Dimensions, ToolError> {
        debug!("Header parse failed for {}, using identify", path.display());
        let cmd = ToolCommand::new(self.image_tool, self.timeout)
            .args(["identify", "-format", "%w %h\n"])
            .arg(path);
        let output = run_checked(self.runner, &cmd).await?;
        let stdout = output.stdout_lossy();
        parse_identify(&stdout)
            .ok_or_else(|| ToolError::Parse(format!("identify printed {:?}", stdout.trim())))
    }
}

/// Dimensions from the file header alone, reading as little as possible.
pub async fn read_header(path: &Path) -> Option<Dimensions> {
    let prefix = read_prefix(path, PNG_HEADER_LEN).await.ok()?;
    if prefix.starts_with(&PNG_SIGNATURE) {
        return png_dimensions(&prefix);
    }
    if prefix.starts_with(&[0xFF, 0xD8]) {
        let window = read_prefix(path, JPEG_SCAN_LIMIT).await.ok()?;
        return jpeg_dimensions(&window);
    }
    None
}

async fn read_prefix(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}
