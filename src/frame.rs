//! Frame containers and codecs.
//!
//! - `CapturedFrame`: raw RGB24 pixels sampled from a capture device or decoded
//!   from an uploaded image. Pixels are private and zeroized on drop.
//! - `EncodedFrame`: a lossy-encoded still, the only form in which pixels leave
//!   the process (as the detection request payload).
//! - `FrameDimensions`: pixel size of the frame behind a detection result.

use std::sync::Arc;
use std::time::SystemTime;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GenericImageView};
use serde::Serialize;
use zeroize::Zeroize;

use crate::error::{CaptureError, DecodeError, SnapshotError};

/// Default JPEG quality for uploaded stills (0.8 on a 0..1 scale).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";

/// Pixel size of a frame. Both axes are strictly positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    /// Returns `None` when either axis is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }

    /// Byte length of an RGB24 buffer of this size.
    pub(crate) fn rgb_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(3)
    }
}

impl std::fmt::Display for FrameDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// CapturedFrame
// ----------------------------------------------------------------------------

/// Raw RGB24 frame. There is no byte accessor; the only way out is `encode_jpeg`.
pub struct CapturedFrame {
    pixels: Vec<u8>,
    dimensions: FrameDimensions,
    captured_at: SystemTime,
}

impl CapturedFrame {
    /// Wrap an RGB24 buffer, checking that its length matches the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self, CaptureError> {
        let dimensions = FrameDimensions::new(width, height).ok_or_else(|| {
            CaptureError::Unavailable(format!("device reported empty frame {}x{}", width, height))
        })?;
        let expected = dimensions.rgb_len().ok_or_else(|| {
            CaptureError::Unavailable(format!("frame dimensions {} overflow", dimensions))
        })?;
        if pixels.len() != expected {
            return Err(CaptureError::Unavailable(format!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            dimensions,
            captured_at: SystemTime::now(),
        })
    }

    pub fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Encode this frame as a JPEG still at its native size.
    pub fn encode_jpeg(&self, quality: u8) -> Result<EncodedFrame, SnapshotError> {
        let bytes = encode_rgb_jpeg(&self.pixels, self.dimensions, quality)?;
        Ok(EncodedFrame::new(bytes, self.dimensions, JPEG_MEDIA_TYPE))
    }
}

impl Drop for CapturedFrame {
    fn drop(&mut self) {
        self.pixels.zeroize();
    }
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("dimensions", &self.dimensions)
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// EncodedFrame
// ----------------------------------------------------------------------------

/// Encoded still image. Cheap to clone; the payload is shared.
#[derive(Clone)]
pub struct EncodedFrame {
    bytes: Arc<[u8]>,
    dimensions: FrameDimensions,
    media_type: &'static str,
}

impl EncodedFrame {
    pub fn new(bytes: Vec<u8>, dimensions: FrameDimensions, media_type: &'static str) -> Self {
        Self {
            bytes: bytes.into(),
            dimensions,
            media_type,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("len", &self.bytes.len())
            .field("dimensions", &self.dimensions)
            .field("media_type", &self.media_type)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Codecs
// ----------------------------------------------------------------------------

pub(crate) fn encode_rgb_jpeg(
    pixels: &[u8],
    dimensions: FrameDimensions,
    quality: u8,
) -> Result<Vec<u8>, SnapshotError> {
    let mut out = Vec::with_capacity(pixels.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(
            pixels,
            dimensions.width,
            dimensions.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| SnapshotError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode any supported image format into an RGB24 frame.
pub fn decode_image(bytes: &[u8]) -> Result<CapturedFrame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroSized);
    }
    let rgb = image.into_rgb8();
    CapturedFrame::from_rgb(rgb.into_raw(), width, height)
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}
