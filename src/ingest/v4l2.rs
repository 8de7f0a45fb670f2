//! V4L2 capture device.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates the ideal
//! resolution with an RGB24 preference, and converts NV12/YUYV output to RGB.
//! Dropping the camera closes the stream and the device node.

use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureDevice, CaptureRequest};
use crate::error::CaptureError;
use crate::frame::CapturedFrame;

pub struct V4l2Camera {
    path: String,
    state: V4l2State,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn open(path: &str, request: &CaptureRequest) -> Result<Self, CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(path).map_err(|e| classify_io(path, e))?;
        let mut format = device.format().map_err(|e| classify_io(path, e))?;
        format.width = request.ideal.width;
        format.height = request.ideal.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", path, err);
                device.format().map_err(|e| classify_io(path, e))?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            CaptureError::Unsupported(format!(
                "{} delivers pixel format {}",
                path, format.fourcc
            ))
        })?;

        if request.grab_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(request.grab_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", path, err);
            }
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|e| classify_io(path, e))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: opened {} ({}x{}, {:?}, facing hint {:?})",
            path,
            format.width,
            format.height,
            pixel_format,
            request.facing
        );
        Ok(Self {
            path: path.to_string(),
            state,
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl CaptureDevice for V4l2Camera {
    fn name(&self) -> &str {
        &self.path
    }

    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let rgb = self.state.with_mut(|fields| {
            let (buf, _meta) = fields
                .stream
                .next()
                .map_err(|e| CaptureError::Unavailable(format!("capture v4l2 frame: {}", e)))?;
            normalize_to_rgb(buf, width, height, format)
        })?;
        self.frame_count += 1;
        CapturedFrame::from_rgb(rgb, width, height)
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        log::info!(
            "V4l2Camera: closing {} after {} frames",
            self.path,
            self.frame_count
        );
    }
}

fn classify_io(path: &str, err: std::io::Error) -> CaptureError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            CaptureError::PermissionDenied(format!("{}: {}", path, err))
        }
        _ => CaptureError::Unavailable(format!("{}: {}", path, err)),
    }
}
