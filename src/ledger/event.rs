/// Violation events and their categories
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Identity of one exam session for one subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub subject_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(subject_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject_id, self.session_id)
    }
}

/// Violation category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NoFace,
    MultiplePersons,
    Phone,
    Book,
    Laptop,
    Audio,
    Window,
    Environment,
    /// Pre-session scan finding; advisory only
    Scan,
}

impl Category {
    pub const ALL: &'static [Category] = &[
        Category::NoFace,
        Category::MultiplePersons,
        Category::Phone,
        Category::Book,
        Category::Laptop,
        Category::Audio,
        Category::Window,
        Category::Environment,
        Category::Scan,
    ];

    pub fn default_weight(&self) -> u32 {
        match self {
            Category::NoFace | Category::MultiplePersons | Category::Phone => 2,
            Category::Book | Category::Laptop | Category::Audio | Category::Window => 1,
            Category::Environment => 5,
            Category::Scan => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::NoFace => "no_face",
            Category::MultiplePersons => "multiple_persons",
            Category::Phone => "phone",
            Category::Book => "book",
            Category::Laptop => "laptop",
            Category::Audio => "audio",
            Category::Window => "window",
            Category::Environment => "environment",
            Category::Scan => "scan",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-addressed reference to the frame behind an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRef(String);

impl EvidenceRef {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(format!("sha256:{:x}", Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A classified finding before it is bound to a session and time
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub category: Category,
    pub weight: u32,
    pub detail: String,
    /// Text shown to the subject in the live response
    pub alert: String,
}

impl Violation {
    fn new(category: Category, detail: impl Into<String>, alert: impl Into<String>) -> Self {
        Self {
            category,
            weight: category.default_weight(),
            detail: detail.into(),
            alert: alert.into(),
        }
    }

    pub fn no_face() -> Self {
        Self::new(Category::NoFace, "No Face Detected", "No Face Detected")
    }

    pub fn multiple_persons(count: usize) -> Self {
        Self::new(
            Category::MultiplePersons,
            format!("Multiple Persons ({})", count),
            format!("Multiple Persons Detected ({})", count),
        )
    }

    pub fn phone() -> Self {
        Self::new(Category::Phone, "Mobile Phone Detected", "Mobile Phone Detected")
    }

    pub fn book() -> Self {
        Self::new(Category::Book, "Book Detected", "Book Detected")
    }

    pub fn laptop() -> Self {
        Self::new(Category::Laptop, "Laptop Detected", "Laptop Detected")
    }

    pub fn audio(level: f64) -> Self {
        Self::new(
            Category::Audio,
            format!("High Volume ({})", level),
            "High Audio Level",
        )
    }

    pub fn window() -> Self {
        Self::new(
            Category::Window,
            "Tab Switch / Window Focus Lost",
            "Tab Switch / Window Focus Lost",
        )
    }

    pub fn environment(findings: &[&str], weight: u32) -> Self {
        let detail = format!("Environment Violation: {}", findings.join(", "));
        Self {
            weight,
            ..Self::new(Category::Environment, detail.clone(), detail)
        }
    }

    pub fn scan_advisory(detected: &[String]) -> Self {
        let detail = if detected.is_empty() {
            "Scan Violation: Found nobody".to_string()
        } else {
            format!("Scan Violation: Found {}", detected.join(", "))
        };
        Self::new(Category::Scan, detail.clone(), detail)
    }
}

/// One immutable entry of a session ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub id: Uuid,
    pub subject_id: String,
    pub session_id: String,
    pub category: Category,
    pub detail: String,
    pub weight: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceRef>,
}

impl ViolationEvent {
    pub fn record(key: &SessionKey, violation: &Violation, evidence: Option<EvidenceRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: key.subject_id.clone(),
            session_id: key.session_id.clone(),
            category: violation.category,
            detail: violation.detail.clone(),
            weight: violation.weight,
            timestamp: Utc::now(),
            evidence,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.subject_id.clone(), self.session_id.clone())
    }

    pub fn belongs_to(&self, key: &SessionKey) -> bool {
        self.subject_id == key.subject_id && self.session_id == key.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        assert_eq!(Violation::no_face().weight, 2);
        assert_eq!(Violation::multiple_persons(3).weight, 2);
        assert_eq!(Violation::phone().weight, 2);
        assert_eq!(Violation::book().weight, 1);
        assert_eq!(Violation::laptop().weight, 1);
        assert_eq!(Violation::audio(75.0).weight, 1);
        assert_eq!(Violation::window().weight, 1);
        assert_eq!(Violation::scan_advisory(&["book".into()]).weight, 0);
    }

    #[test]
    fn test_detail_and_alert_text() {
        let many = Violation::multiple_persons(3);
        assert_eq!(many.detail, "Multiple Persons (3)");
        assert_eq!(many.alert, "Multiple Persons Detected (3)");

        let audio = Violation::audio(75.0);
        assert_eq!(audio.detail, "High Volume (75)");
        assert_eq!(audio.alert, "High Audio Level");

        let env = Violation::environment(&["Virtual Machine Detected", "Debugger Detected"], 5);
        assert_eq!(
            env.detail,
            "Environment Violation: Virtual Machine Detected, Debugger Detected"
        );
        assert_eq!(env.weight, 5);
    }

    #[test]
    fn test_evidence_digest() {
        let evidence = EvidenceRef::from_bytes(b"abc");
        assert_eq!(
            evidence.as_str(),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_event_json_shape() {
        let key = SessionKey::new("alice", "T-1");
        let event = ViolationEvent::record(&key, &Violation::phone(), None);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["category"], "phone");
        assert_eq!(json["weight"], 2);
        assert!(json.get("evidence").is_none());
        assert!(event.belongs_to(&key));

        let back: ViolationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
