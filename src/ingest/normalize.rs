use crate::error::CaptureError;

/// Pixel layouts a V4L2 device may hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"NV12" => Some(PixelFormat::Nv12),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, CaptureError> {
    let w = width as usize;
    let h = height as usize;
    let plane = w
        .checked_mul(h)
        .ok_or_else(|| mismatch("frame dimensions overflow"))?;
    match format {
        PixelFormat::Rgb24 => {
            expect_len(pixels, plane * 3, "RGB")?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Nv12 => {
            expect_len(pixels, plane + plane / 2, "NV12")?;
            let mut rgb = vec![0u8; plane * 3];
            for j in 0..h {
                for i in 0..w {
                    let y = pixels[j * w + i];
                    let uv_index = plane + (j / 2) * w + (i / 2) * 2;
                    let (u, v) = (pixels[uv_index], pixels[uv_index + 1]);
                    write_rgb(&mut rgb[(j * w + i) * 3..], y, u, v);
                }
            }
            Ok(rgb)
        }
        PixelFormat::Yuyv => {
            expect_len(pixels, plane * 2, "YUYV")?;
            let mut rgb = vec![0u8; plane * 3];
            // Each 4-byte group Y0 U Y1 V covers two horizontal pixels.
            for (pair, chunk) in pixels.chunks_exact(4).enumerate() {
                let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
                let offset = pair * 6;
                write_rgb(&mut rgb[offset..], y0, u, v);
                write_rgb(&mut rgb[offset + 3..], y1, u, v);
            }
            Ok(rgb)
        }
    }
}

fn write_rgb(out: &mut [u8], y: u8, u: u8, v: u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;

    out[0] = clamp_to_u8(r);
    out[1] = clamp_to_u8(g);
    out[2] = clamp_to_u8(b);
}

fn expect_len(pixels: &[u8], expected: usize, label: &str) -> Result<(), CaptureError> {
    if pixels.len() != expected {
        return Err(mismatch(&format!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        )));
    }
    Ok(())
}

fn mismatch(message: &str) -> CaptureError {
    CaptureError::Unavailable(message.to_string())
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
