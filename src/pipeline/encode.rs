//! Image encoding: cropped region bytes → base64 `ImageData`.
//!
//! Vision APIs accept images as base64 payloads embedded in the JSON request
//! body. Regions are cropped to PNG, which keeps glyph edges crisp; JPEG
//! artefacts on small text degrade recognition noticeably.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Media type of every cropped region.
pub const REGION_MEDIA_TYPE: &str = "image/png";

/// Wrap already-encoded image bytes for the vision API.
///
/// ## Why `detail: "high"`?
/// OpenAI's tiling splits images into 512 px tiles; `high` allows several
/// tiles so small print stays legible. `low` collapses the region into one
/// overview tile.
pub fn to_image_data(bytes: &[u8], media_type: &str) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded region → {} bytes base64", b64.len());
    ImageData::new(b64, media_type).with_detail("high")
}
