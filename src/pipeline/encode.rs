//! Image encoding: `DynamicImage` → PNG bytes, and bytes → base64 for the wire.
//!
//! PNG is lossless: JPEG ringing around thin table rules and small digits is
//! exactly the kind of artefact that makes a vision model misread a cell.

use crate::output::RenderedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Media type of every image the renderer produces.
pub const PNG_MEDIA_TYPE: &str = "image/png";

/// Encode a rendered region as PNG.
pub fn encode_region(img: &DynamicImage) -> Result<RenderedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} bytes", img.width(), img.height(), buf.len());

    Ok(RenderedImage {
        bytes: buf,
        media_type: PNG_MEDIA_TYPE.to_string(),
    })
}

/// Base64 payload for JSON request bodies.
pub fn to_base64(image: &RenderedImage) -> String {
    STANDARD.encode(&image.bytes)
}
