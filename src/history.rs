//! Append-only detection log and the aggregates derived from it.

use serde::Serialize;

use crate::detect::DetectionResult;

/// Entries shown in the recent-activity view.
pub const DEFAULT_RECENT_WINDOW: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DetectionStats {
    pub total: usize,
    pub detected_count: usize,
    /// Fraction of results that detected the target; 0 when empty.
    pub success_rate: f64,
    /// Mean confidence over all results, negatives included; 0 when empty.
    pub average_confidence: f64,
}

/// Results in completion order. Never truncated.
#[derive(Clone, Debug, Default)]
pub struct DetectionHistory {
    entries: Vec<DetectionResult>,
    detected_count: usize,
    confidence_sum: f64,
}

impl DetectionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: DetectionResult) {
        if result.is_detected() {
            self.detected_count += 1;
        }
        self.confidence_sum += result.confidence();
        self.entries.push(result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &DetectionResult> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&DetectionResult> {
        self.entries.last()
    }

    pub fn stats(&self) -> DetectionStats {
        let total = self.entries.len();
        if total == 0 {
            return DetectionStats::default();
        }
        DetectionStats {
            total,
            detected_count: self.detected_count,
            success_rate: self.detected_count as f64 / total as f64,
            average_confidence: self.confidence_sum / total as f64,
        }
    }

    /// Up to `n` entries, most recent first.
    pub fn recent(&self, n: usize) -> Vec<DetectionResult> {
        self.entries.iter().rev().take(n).cloned().collect()
    }
}
