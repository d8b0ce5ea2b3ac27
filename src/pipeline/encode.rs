//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! PNG is lossless; JPEG artefacts around glyph edges measurably hurt
//! transcription accuracy at the resolutions we render at.

use crate::error::{BatchFailure, ErrorKind};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as a base64 PNG ready for the vision request.
///
/// `detail: "high"` keeps fine print legible for tiling vision models.
pub fn encode_page(page: usize, img: &DynamicImage) -> Result<ImageData, BatchFailure> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| {
            BatchFailure::new(
                ErrorKind::Malformed,
                format!("page {page}: PNG encoding failed: {e}"),
            )
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64", page, b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
