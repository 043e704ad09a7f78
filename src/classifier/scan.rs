/// Pre-session room scan
///
/// A one-shot variant of the live classifier: a lower detector floor, a
/// separate acceptance confidence, and a clean/dirty verdict instead of
/// scored events.
use super::detector::{Detection, ObjectDetector};
use super::rules::PERSON_LABEL;
use crate::observability::{audit, metrics};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Objects that may not be in the room
pub const RESTRICTED_LABELS: &[&str] = &["cell phone", "mobile phone", "laptop", "book", "tv"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanVerdict {
    pub clean: bool,
    /// Accepted labels, deduplicated and sorted
    pub detected: Vec<String>,
    /// Why the scan could not look at the frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

/// Verdict over accepted detections: clean only with exactly one person and
/// no restricted object.
pub fn evaluate(detections: &[Detection], accept_confidence: f32) -> ScanVerdict {
    let accepted: Vec<&Detection> = detections
        .iter()
        .filter(|d| d.confidence > accept_confidence)
        .collect();

    let persons = accepted.iter().filter(|d| d.label == PERSON_LABEL).count();
    let restricted = accepted
        .iter()
        .any(|d| RESTRICTED_LABELS.contains(&d.label.as_str()));

    let detected: BTreeSet<String> = accepted.iter().map(|d| d.label.clone()).collect();

    ScanVerdict {
        clean: persons == 1 && !restricted,
        detected: detected.into_iter().collect(),
        degraded: None,
    }
}

pub struct EnvironmentScanner {
    detector: Arc<dyn ObjectDetector>,
    floor: f32,
    accept_confidence: f32,
}

impl EnvironmentScanner {
    pub fn new(detector: Arc<dyn ObjectDetector>, floor: f32, accept_confidence: f32) -> Self {
        Self {
            detector,
            floor,
            accept_confidence,
        }
    }

    /// Scan one frame. An unreachable detector yields a clean verdict marked
    /// degraded, since the room could not be inspected.
    pub fn scan(&self, image: &[u8]) -> ScanVerdict {
        match self.detector.detect(image, self.floor) {
            Ok(detections) => evaluate(&detections, self.accept_confidence),
            Err(err) => {
                warn!("room scan degraded: {}", err);
                metrics::get_metrics().detector_unavailable.inc();
                audit::events::detector_degraded(None, &err.to_string());
                ScanVerdict {
                    clean: true,
                    detected: Vec::new(),
                    degraded: Some(err.to_string()),
                }
            }
        }
    }
}
