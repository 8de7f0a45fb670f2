use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::frame::FrameDimensions;

/// Axis-aligned box in absolute source-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Build from the service's `[y_min, x_min, y_max, x_max]` corner order.
    pub fn from_corners(y_min: f64, x_min: f64, y_max: f64, x_max: f64) -> Self {
        Self {
            x: x_min,
            y: y_min,
            width: x_max - x_min,
            height: y_max - y_min,
        }
    }

    /// Map to display fractions of the frame that produced the box.
    ///
    /// Values are not clamped: a box the service reports outside the frame
    /// yields fractions outside [0, 1].
    pub fn to_overlay(&self, dimensions: FrameDimensions) -> OverlayRect {
        let w = dimensions.width as f64;
        let h = dimensions.height as f64;
        OverlayRect {
            left: self.x / w,
            top: self.y / h,
            width: self.width / w,
            height: self.height / h,
        }
    }
}

/// Bounding box expressed as fractions of the displayed frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct OverlayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Outcome of one completed detection round-trip. Immutable once built.
///
/// A bounding box is present exactly when the target was detected; a
/// negative result always carries zero confidence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
    detected: bool,
    confidence: f64,
    #[serde(rename = "timestamp_ms", serialize_with = "serialize_epoch_ms")]
    timestamp: SystemTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounding_box: Option<BoundingBox>,
}

impl DetectionResult {
    pub fn detected(confidence: f64, bounding_box: BoundingBox, timestamp: SystemTime) -> Self {
        Self {
            detected: true,
            confidence,
            timestamp,
            bounding_box: Some(bounding_box),
        }
    }

    pub fn not_detected(timestamp: SystemTime) -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            timestamp,
            bounding_box: None,
        }
    }

    pub fn is_detected(&self) -> bool {
        self.detected
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Completion time of the round-trip.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn timestamp_ms(&self) -> u128 {
        epoch_ms(self.timestamp)
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        self.bounding_box.as_ref()
    }

    /// Overlay rectangle for this result against the given frame size.
    pub fn overlay(&self, dimensions: FrameDimensions) -> Option<OverlayRect> {
        self.bounding_box.map(|b| b.to_overlay(dimensions))
    }
}

fn epoch_ms(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn serialize_epoch_ms<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(epoch_ms(*time) as u64)
}
