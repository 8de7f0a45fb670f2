//! Frame sources.
//!
//! `FrameSource` owns at most one active source at a time:
//! - live capture from a device (synthetic `stub://`, HTTP JPEG/MJPEG cameras,
//!   V4L2 devices with feature `capture-v4l2`)
//! - a single static image supplied by the user
//!
//! Live devices are driven by a grabber thread that keeps the latest frame.
//! `stop()` joins that thread, so the device is released and no frame is
//! produced once it returns.
//!
//! The ingestion layer MUST NOT:
//! - Store frames to disk
//! - Log frame content

pub mod http;
#[cfg(feature = "capture-v4l2")]
mod normalize;
mod source;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::frame::{CapturedFrame, FrameDimensions};

pub use http::HttpCamera;
pub use source::{FrameSource, SourceMode};
pub use synthetic::SyntheticCamera;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Camera;

/// Which way the requested camera should face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Towards the user (front camera).
    User,
    /// Away from the user (rear camera). Preferred for detection.
    #[default]
    Environment,
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" | "front" => Ok(Facing::User),
            "environment" | "rear" | "back" => Ok(Facing::Environment),
            other => Err(format!(
                "unknown facing '{}'; expected user or environment",
                other
            )),
        }
    }
}

/// Parameters for opening a capture device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    pub facing: Facing,
    /// Resolution asked for; devices may deliver something else.
    pub ideal: FrameDimensions,
    /// Upper bound on how often the grabber samples the device.
    pub grab_fps: u32,
}

/// An opened capture device. Dropping it releases the hardware.
pub trait CaptureDevice: Send {
    /// Human-readable device identifier for logs.
    fn name(&self) -> &str;

    /// Block until the next frame is available.
    fn grab(&mut self) -> Result<CapturedFrame, CaptureError>;
}

/// Opens capture devices on request.
pub trait DeviceProvider: Send + Sync {
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// Opens devices by location string, selecting the backend from its form:
/// `stub://...`, `http(s)://...`, or a `/dev/video*` path.
#[derive(Clone, Debug)]
pub struct UrlDeviceProvider {
    device: String,
    user_device: Option<String>,
}

impl UrlDeviceProvider {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            user_device: None,
        }
    }

    /// Use a different device when the front camera is requested.
    pub fn with_user_device(mut self, device: Option<String>) -> Self {
        self.user_device = device;
        self
    }

    fn location_for(&self, facing: Facing) -> &str {
        match (facing, self.user_device.as_deref()) {
            (Facing::User, Some(user)) => user,
            _ => &self.device,
        }
    }
}

impl DeviceProvider for UrlDeviceProvider {
    fn open(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        open_device(self.location_for(request.facing), request)
    }
}

/// Open a device from a location string.
pub fn open_device(
    location: &str,
    request: &CaptureRequest,
) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    if location.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::open(location, request)));
    }
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(Box::new(HttpCamera::open(location)?));
    }
    if location.starts_with("/dev/") {
        #[cfg(feature = "capture-v4l2")]
        {
            return Ok(Box::new(V4l2Camera::open(location, request)?));
        }
        #[cfg(not(feature = "capture-v4l2"))]
        {
            return Err(CaptureError::Unsupported(format!(
                "{} (requires the capture-v4l2 feature)",
                location
            )));
        }
    }
    Err(CaptureError::Unsupported(location.to_string()))
}

/// Shared handle type for providers held by the engine.
pub type SharedDeviceProvider = Arc<dyn DeviceProvider>;
