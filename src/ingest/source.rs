use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::error::{CaptureError, DecodeError, SnapshotError};
use crate::frame::{decode_image, CapturedFrame, EncodedFrame, FrameDimensions};
use crate::lock;

use super::{CaptureDevice, CaptureRequest, SharedDeviceProvider};

/// Which kind of source is currently active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Idle,
    LiveCapture,
    StaticImage,
}

/// Owner of the single active frame source.
pub struct FrameSource {
    provider: SharedDeviceProvider,
    jpeg_quality: u8,
    state: Mutex<SourceState>,
}

enum SourceState {
    Idle,
    Live(LiveCapture),
    Static(StaticImage),
}

struct StaticImage {
    encoded: EncodedFrame,
}

impl FrameSource {
    pub fn new(provider: SharedDeviceProvider, jpeg_quality: u8) -> Self {
        Self {
            provider,
            jpeg_quality,
            state: Mutex::new(SourceState::Idle),
        }
    }

    /// Open a capture device and start sampling it.
    ///
    /// Any current source is released first. On failure the source is idle.
    /// Dimensions become known once the first frame arrives.
    pub fn start_capture(&self, request: CaptureRequest) -> Result<(), CaptureError> {
        self.stop();

        let device = self.provider.open(&request)?;
        let live = LiveCapture::spawn(device, request.grab_fps)?;

        let previous = std::mem::replace(&mut *lock(&self.state), SourceState::Live(live));
        drop(previous);
        Ok(())
    }

    /// Decode an uploaded image and make it the active source.
    ///
    /// The upload is decoded and re-encoded once as JPEG at the source's
    /// quality; detection always receives the re-encoded still, never the
    /// original bytes. Any live capture is released before decoding; an image
    /// that fails either step leaves the source idle.
    pub fn load_static_image(&self, bytes: &[u8]) -> Result<FrameDimensions, DecodeError> {
        self.stop();

        let frame = decode_image(bytes)?;
        let dimensions = frame.dimensions();
        let encoded = frame
            .encode_jpeg(self.jpeg_quality)
            .map_err(DecodeError::Reencode)?;
        log::info!(
            "FrameSource: static image loaded ({}, {} bytes encoded)",
            dimensions,
            encoded.len()
        );

        let previous = std::mem::replace(
            &mut *lock(&self.state),
            SourceState::Static(StaticImage { encoded }),
        );
        drop(previous);
        Ok(dimensions)
    }

    /// Produce one encoded still from the active source.
    pub fn snapshot(&self) -> Result<EncodedFrame, SnapshotError> {
        let frame = match &*lock(&self.state) {
            SourceState::Idle => return Err(SnapshotError::NoActiveSource),
            SourceState::Static(image) => return Ok(image.encoded.clone()),
            SourceState::Live(live) => live.latest().ok_or(SnapshotError::NotReady)?,
        };
        frame.encode_jpeg(self.jpeg_quality)
    }

    /// Current frame size, if known.
    pub fn dimensions(&self) -> Option<FrameDimensions> {
        match &*lock(&self.state) {
            SourceState::Idle => None,
            SourceState::Static(image) => Some(image.encoded.dimensions()),
            SourceState::Live(live) => live.latest().map(|frame| frame.dimensions()),
        }
    }

    pub fn mode(&self) -> SourceMode {
        match &*lock(&self.state) {
            SourceState::Idle => SourceMode::Idle,
            SourceState::Live(_) => SourceMode::LiveCapture,
            SourceState::Static(_) => SourceMode::StaticImage,
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode() != SourceMode::Idle
    }

    /// Release the active source. Returns once any capture device is closed.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), SourceState::Idle);
        match previous {
            SourceState::Idle => {}
            SourceState::Live(live) => live.shutdown(),
            SourceState::Static(_) => log::debug!("FrameSource: static image released"),
        }
    }
}

// ----------------------------------------------------------------------------
// LiveCapture: grabber thread around an open device
// ----------------------------------------------------------------------------

struct LiveCapture {
    device_name: String,
    latest: Arc<Mutex<Option<Arc<CapturedFrame>>>>,
    stop_tx: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl LiveCapture {
    fn spawn(mut device: Box<dyn CaptureDevice>, grab_fps: u32) -> Result<Self, CaptureError> {
        let device_name = device.name().to_string();
        let latest = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = mpsc::channel();

        let slot = latest.clone();
        let interval = frame_interval(grab_fps);
        let thread_name = format!("capture:{}", device_name);
        let join = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut consecutive_errors = 0u64;
                loop {
                    match stop_rx.try_recv() {
                        Err(TryRecvError::Empty) => {}
                        Ok(()) | Err(TryRecvError::Disconnected) => break,
                    }
                    match device.grab() {
                        Ok(frame) => {
                            consecutive_errors = 0;
                            *lock(slot.as_ref()) = Some(Arc::new(frame));
                        }
                        Err(err) => {
                            consecutive_errors += 1;
                            if consecutive_errors == 1 || consecutive_errors % 50 == 0 {
                                log::warn!(
                                    "capture {}: grab failed ({} in a row): {}",
                                    device.name(),
                                    consecutive_errors,
                                    err
                                );
                            }
                        }
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                drop(device);
            })
            .map_err(|e| CaptureError::Unavailable(format!("spawn capture thread: {}", e)))?;

        log::info!("FrameSource: live capture started on {}", device_name);
        Ok(Self {
            device_name,
            latest,
            stop_tx,
            join: Some(join),
        })
    }

    fn latest(&self) -> Option<Arc<CapturedFrame>> {
        lock(self.latest.as_ref()).clone()
    }

    fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let _ = self.stop_tx.send(());
        if join.join().is_err() {
            log::error!("capture thread for {} panicked", self.device_name);
        }
        lock(self.latest.as_ref()).take();
        log::info!("FrameSource: live capture on {} released", self.device_name);
    }
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        self.release();
    }
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
