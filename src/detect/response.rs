//! Detection service response parsing.
//!
//! The service answers with three parallel sequences: class labels, boxes in
//! `[y_min, x_min, y_max, x_max]` absolute pixel order, and scores. Only the
//! first occurrence of the target class is considered.

use std::time::SystemTime;

use serde::Deserialize;

use super::result::{BoundingBox, DetectionResult};
use crate::error::DetectionError;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DetectionResponse {
    #[serde(default)]
    pub detection_classes: Option<Vec<String>>,
    #[serde(default)]
    pub detection_boxes: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub detection_scores: Option<Vec<f64>>,
}

impl DetectionResponse {
    pub fn from_slice(body: &[u8]) -> Result<Self, DetectionError> {
        serde_json::from_slice(body).map_err(|e| DetectionError::InvalidResponse(e.to_string()))
    }

    /// Index of the first label equal to `target_class`.
    pub fn target_index(&self, target_class: &str) -> Option<usize> {
        self.detection_classes
            .as_ref()?
            .iter()
            .position(|label| label == target_class)
    }

    /// Normalize into a result stamped with `completed_at`.
    ///
    /// A missing target, or a response without box/score sequences, is a
    /// negative result. A target whose box or score entry is missing or
    /// malformed is an invalid response.
    pub fn into_result(
        self,
        target_class: &str,
        completed_at: SystemTime,
    ) -> Result<DetectionResult, DetectionError> {
        let Some(index) = self.target_index(target_class) else {
            return Ok(DetectionResult::not_detected(completed_at));
        };
        let (Some(boxes), Some(scores)) = (&self.detection_boxes, &self.detection_scores) else {
            return Ok(DetectionResult::not_detected(completed_at));
        };

        let corners = boxes.get(index).ok_or_else(|| {
            DetectionError::InvalidResponse(format!("no box for target at index {}", index))
        })?;
        let &[y_min, x_min, y_max, x_max] = corners.as_slice() else {
            return Err(DetectionError::InvalidResponse(format!(
                "box at index {} has {} coordinates, expected 4",
                index,
                corners.len()
            )));
        };
        let confidence = *scores.get(index).ok_or_else(|| {
            DetectionError::InvalidResponse(format!("no score for target at index {}", index))
        })?;

        Ok(DetectionResult::detected(
            confidence,
            BoundingBox::from_corners(y_min, x_min, y_max, x_max),
            completed_at,
        ))
    }
}
