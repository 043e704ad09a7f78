/// Object-detection capability
///
/// The pretrained model itself lives outside this crate. It is reached
/// through [`ObjectDetector`], injected at construction; the shipped adapter
/// runs an external program and every call is bounded by a deadline.
use crate::config::loader::DetectionSettings;
use crate::config::types::{DetectorError, ProbeError};
use crate::probe::tool::run_tool_with_input;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One labelled detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

pub trait ObjectDetector: Send + Sync {
    /// Detections in `image` with confidence at or above `min_confidence`
    fn detect(&self, image: &[u8], min_confidence: f32) -> Result<Vec<Detection>, DetectorError>;
}

/// Stand-in when no detector is configured; every call is unavailable
#[derive(Debug, Clone)]
pub struct UnavailableDetector {
    reason: String,
}

impl UnavailableDetector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ObjectDetector for UnavailableDetector {
    fn detect(&self, _image: &[u8], _min_confidence: f32) -> Result<Vec<Detection>, DetectorError> {
        Err(DetectorError::Unavailable(self.reason.clone()))
    }
}

/// Wraps a detector with a hard deadline.
///
/// The inner call runs on its own thread; when the deadline passes the caller
/// gets [`DetectorError::Timeout`] and the late answer is discarded.
pub struct BoundedDetector {
    inner: Arc<dyn ObjectDetector>,
    timeout: Duration,
}

impl BoundedDetector {
    pub fn new(inner: Arc<dyn ObjectDetector>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl ObjectDetector for BoundedDetector {
    fn detect(&self, image: &[u8], min_confidence: f32) -> Result<Vec<Detection>, DetectorError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let image = image.to_vec();

        thread::spawn(move || {
            let _ = tx.send(inner.detect(&image, min_confidence));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                Err(DetectorError::Timeout(self.timeout))
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(
                DetectorError::Unavailable("detector thread exited without answering".to_string()),
            ),
        }
    }
}

/// Runs an external detection program.
///
/// Protocol: image bytes on stdin, `--conf <floor>` appended to the
/// configured arguments, a JSON array of `{"label", "confidence"}` on stdout.
#[derive(Debug, Clone)]
pub struct ProcessDetector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl ObjectDetector for ProcessDetector {
    fn detect(&self, image: &[u8], min_confidence: f32) -> Result<Vec<Detection>, DetectorError> {
        let conf = min_confidence.to_string();
        let mut args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        args.push("--conf");
        args.push(&conf);

        let output = run_tool_with_input(&self.program, &args, Some(image), self.timeout)
            .map_err(|err| match err {
                ProbeError::Timeout { timeout, .. } => DetectorError::Timeout(timeout),
                other => DetectorError::Unavailable(other.to_string()),
            })?;

        if !output.success() {
            return Err(DetectorError::Unavailable(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.code(),
                output.stderr.trim()
            )));
        }

        parse_detections(&output.stdout)
    }
}

/// Parse the detector's JSON output
pub fn parse_detections(stdout: &str) -> Result<Vec<Detection>, DetectorError> {
    let detections: Vec<Detection> =
        serde_json::from_str(stdout.trim()).map_err(|e| DetectorError::Malformed(e.to_string()))?;
    if let Some(bad) = detections
        .iter()
        .find(|d| !d.confidence.is_finite() || d.label.is_empty())
    {
        return Err(DetectorError::Malformed(format!(
            "invalid detection {:?}",
            bad
        )));
    }
    Ok(detections)
}

/// Build the detector described by the configuration
pub fn from_settings(settings: &DetectionSettings) -> Arc<dyn ObjectDetector> {
    match settings.command.split_first() {
        Some((program, args)) => {
            let process = ProcessDetector::new(program.clone(), args.to_vec(), settings.timeout());
            // the tool runner enforces the same deadline; the wrapper also covers stuck pipes
            Arc::new(BoundedDetector::new(Arc::new(process), settings.timeout()))
        }
        None => Arc::new(UnavailableDetector::new("no detector command configured")),
    }
}
