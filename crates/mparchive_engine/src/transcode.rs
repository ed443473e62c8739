use image::imageops::FilterType;

const GIF_SIGNATURES: &[&[u8]] = &[b"GIF87a", b"GIF89a"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("unreadable image data: {0}")]
    Decode(#[from] image::ImageError),
    #[error("webp encoding failed: {0}")]
    Encode(String),
}

/// Animated formats are stored verbatim; re-encoding would drop frames.
pub fn is_animated_format(bytes: &[u8]) -> bool {
    GIF_SIGNATURES.iter().any(|sig| bytes.starts_with(sig))
}

/// Extension the stored blob will carry, known before any decoding happens.
pub fn stored_extension(bytes: &[u8]) -> &'static str {
    if is_animated_format(bytes) {
        "gif"
    } else {
        "webp"
    }
}

/// Normalises a downloaded image: GIFs pass through, everything else becomes
/// lossy WebP no larger than `max_dimension` on its longer side. Never upscales.
pub fn transcode(
    bytes: &[u8],
    max_dimension: u32,
    quality: f32,
) -> Result<TranscodedImage, TranscodeError> {
    if is_animated_format(bytes) {
        return Ok(TranscodedImage {
            bytes: bytes.to_vec(),
            extension: "gif",
        });
    }

    let mut img = image::load_from_memory(bytes)?;
    if img.width().max(img.height()) > max_dimension {
        img = img.resize(max_dimension, max_dimension, FilterType::Lanczos3);
    }
    let rgba = img.to_rgba8();
    let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
        .encode_simple(false, quality)
        .map_err(|err| TranscodeError::Encode(format!("{err:?}")))?;
    Ok(TranscodedImage {
        bytes: encoded.to_vec(),
        extension: "webp",
    })
}
