/// Append-only event persistence
use super::event::{SessionKey, ViolationEvent};
use crate::config::types::{GuardError, Result};
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistence collaborator for violation events.
///
/// Implementations never rewrite or drop appended events. `score` must agree
/// with the sum of weights returned by `events` once an append has returned.
pub trait EventStore: Send + Sync {
    fn append(&self, event: &ViolationEvent) -> Result<()>;

    fn events(&self, key: &SessionKey) -> Result<Vec<ViolationEvent>>;

    fn score(&self, key: &SessionKey) -> Result<u64> {
        Ok(self
            .events(key)?
            .iter()
            .map(|event| u64::from(event.weight))
            .sum())
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    sessions: Mutex<HashMap<SessionKey, Vec<ViolationEvent>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, event: &ViolationEvent) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| GuardError::Store("memory store lock poisoned".to_string()))?;
        sessions.entry(event.key()).or_default().push(event.clone());
        Ok(())
    }

    fn events(&self, key: &SessionKey) -> Result<Vec<ViolationEvent>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| GuardError::Store("memory store lock poisoned".to_string()))?;
        Ok(sessions.get(key).cloned().unwrap_or_default())
    }
}

/// JSON-lines file shared by every session.
///
/// Each event is written with a single `write_all` on an append-mode handle so
/// concurrent writers never interleave partial lines. Lines that fail to parse
/// are skipped on read.
#[derive(Debug)]
pub struct JsonlEventStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                GuardError::Store(format!(
                    "Failed to create event log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        // create eagerly so permission problems surface at startup
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                GuardError::Store(format!("Failed to open event log {}: {}", path.display(), e))
            })?;

        debug!("event log at {}", path.display());
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<ViolationEvent>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ViolationEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping malformed line {} in {}: {}",
                    number + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(events)
    }
}

impl EventStore for JsonlEventStore {
    fn append(&self, event: &ViolationEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GuardError::Store("event log lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn events(&self, key: &SessionKey) -> Result<Vec<ViolationEvent>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|event| event.belongs_to(key))
            .collect())
    }
}
