//! Synthetic capture device for `stub://` locations.
//!
//! Produces a moving gradient at the requested ideal resolution. Used by tests
//! and by the CLI when no camera is attached.

use crate::error::CaptureError;
use crate::frame::{CapturedFrame, FrameDimensions};

use super::{CaptureDevice, CaptureRequest};

pub struct SyntheticCamera {
    name: String,
    dimensions: FrameDimensions,
    frame_count: u64,
    /// Simulated scene state, shifts every 50 frames.
    scene_state: u8,
}

impl SyntheticCamera {
    pub fn open(location: &str, request: &CaptureRequest) -> Self {
        log::info!(
            "SyntheticCamera: opened {} ({}, facing {:?})",
            location,
            request.ideal,
            request.facing
        );
        Self {
            name: location.to_string(),
            dimensions: request.ideal,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.dimensions.rgb_len().unwrap_or(0);
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn grab(&mut self) -> Result<CapturedFrame, CaptureError> {
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        CapturedFrame::from_rgb(pixels, self.dimensions.width, self.dimensions.height)
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        log::debug!(
            "SyntheticCamera: released {} after {} frames",
            self.name,
            self.frame_count
        );
    }
}
