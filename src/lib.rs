//! Cockade Watch detection engine
//!
//! Client-side orchestration for a remote visual-detection service: a live
//! camera or an uploaded image is sampled, encoded, and submitted with a
//! session credential, and every completed round-trip lands in a history
//! that drives the statistics view.
//!
//! # Guarantees
//!
//! 1. **Single-flight**: at most one detection call is outstanding; manual
//!    triggers and polling ticks share one guard.
//! 2. **One source**: a live device and a still image never coexist; the
//!    device is released before another source is installed.
//! 3. **Append-only history**: results are recorded in completion order and
//!    never removed.
//!
//! # Module Structure
//!
//! - `frame`: Captured and encoded frames, JPEG encode and image decode
//! - `ingest`: Frame source and capture devices (synthetic, HTTP, V4L2)
//! - `auth`: Session credential and token endpoint
//! - `detect`: Detection client, response parsing, overlay mapping
//! - `scheduler`: Single-flight triggering and polling
//! - `history`: Detection history and statistics
//! - `engine`: The session object tying it together

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod auth;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod history;
pub mod ingest;
pub mod scheduler;

pub use auth::{AuthCredential, AuthSession, AuthStatus, HttpTokenEndpoint, TokenEndpoint};
pub use config::EngineConfig;
pub use detect::{
    BoundingBox, DetectionClient, DetectionEndpoint, DetectionResponse, DetectionResult,
    HttpDetectionEndpoint, OverlayRect,
};
pub use engine::{DetectionEngine, EngineStatus};
pub use error::{AuthError, CaptureError, DecodeError, DetectionError, EngineError, SnapshotError};
pub use events::{EngineEvent, EventBus};
pub use frame::{decode_image, CapturedFrame, EncodedFrame, FrameDimensions};
pub use history::{DetectionHistory, DetectionStats, DEFAULT_RECENT_WINDOW};
pub use ingest::{
    CaptureDevice, CaptureRequest, DeviceProvider, Facing, FrameSource, SourceMode,
    UrlDeviceProvider,
};
pub use scheduler::{DetectionScheduler, SchedulerState, SkipReason, TriggerOutcome};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Guarded values are only ever replaced wholesale, so a poisoned lock
/// still holds a consistent value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
