//! The engine session object.
//!
//! One `DetectionEngine` owns the credential, the frame source, the detection
//! history and the scheduler. Presentation code drives it through these
//! methods, reads `status()`, and listens on `subscribe()`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::auth::{AuthSession, AuthStatus, HttpTokenEndpoint, TokenEndpoint};
use crate::config::EngineConfig;
use crate::detect::{
    DetectionClient, DetectionEndpoint, DetectionResult, HttpDetectionEndpoint, OverlayRect,
};
use crate::error::{AuthError, CaptureError, DecodeError, DetectionError, EngineError};
use crate::events::{EngineEvent, EventBus};
use crate::frame::FrameDimensions;
use crate::history::{DetectionHistory, DetectionStats};
use crate::ingest::{
    CaptureRequest, Facing, FrameSource, SharedDeviceProvider, SourceMode, UrlDeviceProvider,
};
use crate::lock;
use crate::scheduler::{DetectionScheduler, SchedulerState, TriggerOutcome};

/// Point-in-time view of everything a presentation layer renders.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStatus {
    pub mode: SourceMode,
    pub dimensions: Option<FrameDimensions>,
    pub last_result: Option<DetectionResult>,
    pub in_flight: bool,
    pub polling: bool,
    pub scheduler: SchedulerState,
    pub auth: AuthStatus,
}

pub struct DetectionEngine {
    config: EngineConfig,
    ideal: FrameDimensions,
    events: Arc<EventBus>,
    auth: Arc<AuthSession>,
    source: Arc<FrameSource>,
    history: Arc<Mutex<DetectionHistory>>,
    scheduler: DetectionScheduler,
}

impl DetectionEngine {
    /// Assemble an engine around explicit collaborators.
    pub fn new(
        config: EngineConfig,
        token_endpoint: Arc<dyn TokenEndpoint>,
        detection_endpoint: Arc<dyn DetectionEndpoint>,
        devices: SharedDeviceProvider,
    ) -> Result<Self> {
        config.validate()?;
        let ideal = config.capture.ideal_dimensions()?;

        let events = Arc::new(EventBus::new());
        let auth = Arc::new(AuthSession::new(token_endpoint, events.clone()));
        let source = Arc::new(FrameSource::new(devices, config.capture.jpeg_quality));
        let client = Arc::new(DetectionClient::new(
            auth.clone(),
            detection_endpoint,
            config.service.target_class.clone(),
        ));
        let history = Arc::new(Mutex::new(DetectionHistory::new()));
        let scheduler =
            DetectionScheduler::new(source.clone(), client, history.clone(), events.clone());

        Ok(Self {
            config,
            ideal,
            events,
            auth,
            source,
            history,
            scheduler,
        })
    }

    /// Engine wired to the HTTP token and detection endpoints and the
    /// configured capture devices.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let timeout = config.service.request_timeout;
        let token = HttpTokenEndpoint::new(config.service.token_url()?, timeout);
        let detector = HttpDetectionEndpoint::new(config.service.detect_url()?, timeout)?
            .with_auth_header(config.service.auth_header.clone());
        let devices = UrlDeviceProvider::new(config.capture.device.clone())
            .with_user_device(config.capture.user_device.clone());
        log::info!(
            "detection engine targeting '{}' at {}",
            config.service.target_class,
            config.service.base_url
        );
        Self::new(
            config.clone(),
            Arc::new(token),
            Arc::new(detector),
            Arc::new(devices),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Begin credential acquisition in the background.
    pub fn start(&self) {
        if !self.auth.spawn_acquire() {
            log::debug!("credential already held or pending");
        }
    }

    /// Acquire a credential and wait for the outcome.
    pub fn authenticate(&self) -> Result<(), AuthError> {
        self.auth.acquire().map(|_| ())
    }

    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Open the camera facing `facing` (configured default when `None`) at
    /// the configured ideal resolution.
    pub fn start_capture(&self, facing: Option<Facing>) -> Result<(), CaptureError> {
        self.start_capture_with(CaptureRequest {
            facing: facing.unwrap_or(self.config.capture.facing),
            ideal: self.ideal,
            grab_fps: self.config.capture.grab_fps,
        })
    }

    pub fn start_capture_with(&self, request: CaptureRequest) -> Result<(), CaptureError> {
        match self.source.start_capture(request) {
            Ok(()) => {
                self.scheduler.arm();
                self.events.publish(EngineEvent::CaptureStarted {
                    facing: request.facing,
                });
                Ok(())
            }
            Err(err) => {
                log::error!("capture failed to start: {}", err);
                self.events.publish(EngineEvent::CaptureFailed(err.clone()));
                Err(err)
            }
        }
    }

    /// Release the source and stop polling. A detection already in flight
    /// may still complete and be recorded.
    pub fn stop_capture(&self) {
        let was_active = self.source.is_active();
        self.scheduler.stop();
        if was_active {
            self.events.publish(EngineEvent::CaptureStopped);
        }
    }

    /// Replace the current source with a decoded still image.
    ///
    /// Stops polling and any live capture, and clears the last result. On a
    /// decode failure the engine is left without a source.
    pub fn load_image(&self, bytes: &[u8]) -> Result<FrameDimensions, DecodeError> {
        let was_live = self.source.mode() == SourceMode::LiveCapture;
        self.scheduler.stop_polling();
        self.scheduler.clear_last_result();

        let loaded = self.source.load_static_image(bytes);
        if was_live {
            self.events.publish(EngineEvent::CaptureStopped);
        }
        let dimensions = loaded?;
        self.scheduler.arm();
        self.events.publish(EngineEvent::ImageLoaded(dimensions));
        Ok(dimensions)
    }

    /// Load a still image and run one detection on it right away.
    pub fn analyze_image(&self, bytes: &[u8]) -> Result<TriggerOutcome, EngineError> {
        self.load_image(bytes)?;
        Ok(self.scheduler.trigger_once()?)
    }

    pub fn trigger_once(&self) -> Result<TriggerOutcome, DetectionError> {
        self.scheduler.trigger_once()
    }

    /// Poll at the configured interval.
    pub fn start_polling(&self) -> bool {
        self.scheduler.start_polling(self.config.polling.interval)
    }

    pub fn start_polling_every(&self, interval: Duration) -> bool {
        self.scheduler.start_polling(interval)
    }

    pub fn stop_polling(&self) -> bool {
        self.scheduler.stop_polling()
    }

    pub fn stats(&self) -> DetectionStats {
        lock(self.history.as_ref()).stats()
    }

    pub fn recent(&self, n: usize) -> Vec<DetectionResult> {
        lock(self.history.as_ref()).recent(n)
    }

    /// Entries for the recent-activity view.
    pub fn recent_activity(&self) -> Vec<DetectionResult> {
        self.recent(self.config.polling.recent_window)
    }

    /// Copy of the full history.
    pub fn history(&self) -> DetectionHistory {
        lock(self.history.as_ref()).clone()
    }

    pub fn last_result(&self) -> Option<DetectionResult> {
        self.scheduler.last_result()
    }

    /// Where to draw the last positive result, as fractions of the frame.
    pub fn overlay(&self) -> Option<OverlayRect> {
        self.scheduler.last_overlay()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            mode: self.source.mode(),
            dimensions: self.source.dimensions(),
            last_result: self.scheduler.last_result(),
            in_flight: self.scheduler.is_in_flight(),
            polling: self.scheduler.is_polling(),
            scheduler: self.scheduler.state(),
            auth: self.auth.status(),
        }
    }

    /// Stop polling and release the source. The engine can be restarted.
    pub fn shutdown(&self) {
        self.stop_capture();
        log::info!("detection engine shut down");
    }
}
