//! Violation Event Classifier
//!
//! Turns one observation (camera frame, audio level, or window event) into
//! zero or more violations. Image rules need the object detector; when it is
//! unavailable they are skipped and the audio and window channels still
//! apply.

pub mod detector;
pub mod rules;
pub mod scan;

pub use detector::{Detection, ObjectDetector};
pub use scan::{EnvironmentScanner, ScanVerdict};

use crate::config::loader::GuardConfig;
use crate::config::types::{GuardError, Result};
use crate::ledger::{SessionKey, Violation};
use crate::observability::{audit, metrics};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Window focus transition reported by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowEvent {
    FocusLost,
    FocusGained,
}

/// One periodic signal sample from a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub subject_id: String,
    pub session_id: String,
    pub image: Option<Vec<u8>>,
    pub audio_level: Option<f64>,
    pub window_event: Option<WindowEvent>,
}

impl Observation {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            subject_id: key.subject_id.clone(),
            session_id: key.session_id.clone(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_audio_level(mut self, level: f64) -> Self {
        self.audio_level = Some(level);
        self
    }

    pub fn with_window_event(mut self, event: WindowEvent) -> Self {
        self.window_event = Some(event);
        self
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.subject_id.clone(), self.session_id.clone())
    }

    /// Reject observations the classifier cannot interpret
    pub fn validate(&self) -> Result<()> {
        let malformed = |reason: &str| Err(GuardError::MalformedObservation(reason.to_string()));

        if self.subject_id.trim().is_empty() {
            return malformed("missing subject_id");
        }
        if self.session_id.trim().is_empty() {
            return malformed("missing session_id");
        }
        if self.image.is_some() && self.window_event.is_some() {
            return malformed("image and window_event are separate channels");
        }
        if self.image.is_none() && self.audio_level.is_none() && self.window_event.is_none() {
            return malformed("no image, audio_level or window_event");
        }
        if matches!(&self.image, Some(image) if image.is_empty()) {
            return malformed("empty image");
        }
        if matches!(self.audio_level, Some(level) if !level.is_finite()) {
            return malformed("audio_level is not a finite number");
        }
        Ok(())
    }
}

/// Whether the image rules ran for an observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DetectorStatus {
    NotRequested,
    Ok,
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub violations: Vec<Violation>,
    pub detector: DetectorStatus,
}

pub struct ViolationClassifier {
    detector: Arc<dyn ObjectDetector>,
    live_confidence: f32,
    audio_threshold: f64,
}

impl ViolationClassifier {
    pub fn new(detector: Arc<dyn ObjectDetector>, live_confidence: f32, audio_threshold: f64) -> Self {
        Self {
            detector,
            live_confidence,
            audio_threshold,
        }
    }

    pub fn from_config(detector: Arc<dyn ObjectDetector>, config: &GuardConfig) -> Self {
        Self::new(
            detector,
            config.detection.live_confidence,
            config.scoring.audio_threshold,
        )
    }

    /// Classify a validated observation
    pub fn classify(&self, observation: &Observation) -> Result<Classification> {
        observation.validate()?;

        let mut violations = Vec::new();
        let mut status = DetectorStatus::NotRequested;

        if let Some(image) = &observation.image {
            let started = Instant::now();
            let result = self.detector.detect(image, self.live_confidence);
            let metrics = metrics::get_metrics();
            metrics.detector_latency.observe(started.elapsed());

            match result {
                Ok(detections) => {
                    debug!("{} detections for {}", detections.len(), observation.key());
                    violations.extend(rules::image_violations(&detections, self.live_confidence));
                    status = DetectorStatus::Ok;
                }
                Err(err) => {
                    warn!("image rules skipped for {}: {}", observation.key(), err);
                    metrics.detector_unavailable.inc();
                    audit::events::detector_degraded(Some(&observation.key()), &err.to_string());
                    status = DetectorStatus::Unavailable(err.to_string());
                }
            }
        }

        if let Some(audio) = rules::audio_violation(observation.audio_level, self.audio_threshold) {
            violations.push(audio);
        }

        if observation.window_event == Some(WindowEvent::FocusLost) {
            violations.push(Violation::window());
        }

        Ok(Classification {
            violations,
            detector: status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::DetectorError;
    use crate::ledger::Category;

    struct Fixed(Vec<Detection>);

    impl ObjectDetector for Fixed {
        fn detect(&self, _image: &[u8], _min: f32) -> std::result::Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    impl ObjectDetector for Down {
        fn detect(&self, _image: &[u8], _min: f32) -> std::result::Result<Vec<Detection>, DetectorError> {
            Err(DetectorError::Unavailable("model not loaded".to_string()))
        }
    }

    fn key() -> SessionKey {
        SessionKey::new("alice", "T-1")
    }

    fn categories(classification: &Classification) -> Vec<Category> {
        classification.violations.iter().map(|v| v.category).collect()
    }

    #[test]
    fn test_validation() {
        let empty = Observation::new(&key());
        assert!(matches!(empty.validate(), Err(GuardError::MalformedObservation(_))));

        let both = Observation::new(&key())
            .with_image(vec![1])
            .with_window_event(WindowEvent::FocusLost);
        assert!(both.validate().is_err());

        let anonymous = Observation::new(&SessionKey::new("", "T-1")).with_audio_level(10.0);
        assert!(anonymous.validate().is_err());

        let nan = Observation::new(&key()).with_audio_level(f64::NAN);
        assert!(nan.validate().is_err());

        let fine = Observation::new(&key()).with_image(vec![1, 2]).with_audio_level(3.0);
        assert!(fine.validate().is_ok());
    }

    #[test]
    fn test_image_and_audio_channels() {
        let classifier = ViolationClassifier::new(
            Arc::new(Fixed(vec![Detection::new("person", 0.9), Detection::new("laptop", 0.6)])),
            0.4,
            50.0,
        );
        let observation = Observation::new(&key())
            .with_image(vec![0xff, 0xd8])
            .with_audio_level(72.0);

        let classification = classifier.classify(&observation).unwrap();
        assert_eq!(classification.detector, DetectorStatus::Ok);
        assert_eq!(categories(&classification), vec![Category::Laptop, Category::Audio]);
    }

    #[test]
    fn test_unavailable_detector_keeps_audio() {
        let classifier = ViolationClassifier::new(Arc::new(Down), 0.4, 50.0);
        let observation = Observation::new(&key())
            .with_image(vec![0xff, 0xd8])
            .with_audio_level(75.0);

        let classification = classifier.classify(&observation).unwrap();
        assert!(matches!(classification.detector, DetectorStatus::Unavailable(_)));
        assert_eq!(categories(&classification), vec![Category::Audio]);
    }

    #[test]
    fn test_window_events() {
        let classifier = ViolationClassifier::new(Arc::new(Down), 0.4, 50.0);

        let lost = Observation::new(&key()).with_window_event(WindowEvent::FocusLost);
        assert_eq!(
            categories(&classifier.classify(&lost).unwrap()),
            vec![Category::Window]
        );

        let gained = Observation::new(&key()).with_window_event(WindowEvent::FocusGained);
        assert!(classifier.classify(&gained).unwrap().violations.is_empty());
    }
}
