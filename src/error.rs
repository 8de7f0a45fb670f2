//! Classified errors surfaced by the orchestration engine.
//!
//! Every error is `Clone` so it can be published on the event bus as well as
//! returned to the caller.

use thiserror::Error;

/// Token acquisition failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The token endpoint answered with a non-success status.
    #[error("token endpoint rejected the request with status {status}")]
    Rejected { status: u16 },

    /// The token endpoint could not be reached.
    #[error("token endpoint transport failure: {0}")]
    Transport(String),

    /// The response body was not JSON or carried no usable `token` field.
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

/// Capture device failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The device exists but access was refused.
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    /// The device could not be opened or stopped delivering frames.
    #[error("camera unavailable: {0}")]
    Unavailable(String),

    /// No device backend handles the configured location.
    #[error("unsupported capture device '{0}'")]
    Unsupported(String),
}

/// Uploaded image decode failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,

    #[error("malformed image: {0}")]
    Malformed(String),

    #[error("image has zero width or height")]
    ZeroSized,

    /// The image decoded but could not be re-encoded as a JPEG still.
    #[error("image could not be re-encoded for upload: {0}")]
    Reencode(SnapshotError),
}

/// Frame sampling failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("no active frame source")]
    NoActiveSource,

    /// Live capture started but no frame has arrived yet.
    #[error("capture device has not produced a frame yet")]
    NotReady,

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// Failures of a single detection round-trip.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DetectionError {
    /// No credential was held when the call was made.
    #[error("no authentication credential available")]
    Unauthenticated,

    /// The detection service answered with a non-success status.
    #[error("detection service failed with status {status_code}")]
    ServiceError { status_code: u16, body: String },

    /// Network-level failure talking to the detection service.
    #[error("detection transport failure: {0}")]
    Transport(String),

    /// The service answered 2xx but the body could not be interpreted.
    #[error("invalid detection response: {0}")]
    InvalidResponse(String),

    /// A frame could not be sampled for the request.
    #[error("frame capture failed: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Errors of composite engine operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Detection(#[from] DetectionError),
}
