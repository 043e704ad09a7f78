/// Per-session scoring state machine
///
/// ```text
///   Active --(score > threshold)--> Terminated
/// ```
///
/// Terminated has no outgoing transitions. Events keep being appended after
/// termination for audit, but the state never changes again.
use super::event::{Category, EvidenceRef, SessionKey, Violation, ViolationEvent};
use super::store::EventStore;
use crate::config::types::{GuardError, Result};
use crate::observability::{audit, metrics};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Terminated,
}

/// Result of committing one observation's violations
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub recorded: Vec<ViolationEvent>,
    pub score: u64,
    pub state: SessionState,
    /// This commit moved the session from Active to Terminated
    pub newly_terminated: bool,
}

/// Running ledger of one session
pub struct SessionLedger {
    key: SessionKey,
    store: Arc<dyn EventStore>,
    threshold: u64,
    cooldown: Option<Duration>,
    score: u64,
    state: SessionState,
    last_scored: HashMap<Category, DateTime<Utc>>,
}

impl SessionLedger {
    /// Open the ledger for `key`, resuming whatever the store already holds.
    pub fn open(
        key: SessionKey,
        store: Arc<dyn EventStore>,
        threshold: u64,
        cooldown: Option<Duration>,
    ) -> Result<Self> {
        let history = store.events(&key)?;
        let score: u64 = history.iter().map(|e| u64::from(e.weight)).sum();

        let mut last_scored = HashMap::new();
        for event in history.iter().filter(|e| e.weight > 0) {
            last_scored
                .entry(event.category)
                .and_modify(|t: &mut DateTime<Utc>| *t = (*t).max(event.timestamp))
                .or_insert(event.timestamp);
        }

        let state = if score > threshold {
            SessionState::Terminated
        } else {
            SessionState::Active
        };
        if state == SessionState::Terminated {
            info!("session {} resumed already terminated (score {})", key, score);
        }

        Ok(Self {
            key,
            store,
            threshold,
            cooldown,
            score,
            state,
            last_scored,
        })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Append `violations` as events, then re-read the score and apply the
    /// threshold.
    ///
    /// An append failure aborts the commit; events appended before it stay.
    pub fn commit(
        &mut self,
        violations: &[Violation],
        evidence: Option<&EvidenceRef>,
    ) -> Result<CommitOutcome> {
        let metrics = metrics::get_metrics();
        let mut recorded = Vec::with_capacity(violations.len());

        for violation in violations {
            let mut event = ViolationEvent::record(&self.key, violation, evidence.cloned());
            if self.in_cooldown(event.category, event.timestamp) && event.weight > 0 {
                event.weight = 0;
                event.detail.push_str(" (cooldown)");
            }

            self.store.append(&event)?;
            metrics.record_event(event.category);
            if event.weight > 0 {
                self.last_scored.insert(event.category, event.timestamp);
            }
            recorded.push(event);
        }

        if !recorded.is_empty() {
            let stored = self.store.score(&self.key)?;
            if stored < self.score {
                warn!(
                    "store reported score {} below {} for {}; keeping the higher value",
                    stored, self.score, self.key
                );
            }
            self.score = self.score.max(stored);
            for event in recorded.iter().filter(|e| e.weight > 0) {
                audit::events::violation_recorded(
                    &self.key,
                    event.category.as_str(),
                    event.weight,
                    self.score,
                );
            }
        }

        let mut newly_terminated = false;
        if self.state == SessionState::Active && self.score > self.threshold {
            self.state = SessionState::Terminated;
            newly_terminated = true;
            metrics.sessions_terminated.inc();
            audit::events::session_terminated(&self.key, self.score, self.threshold);
        }

        Ok(CommitOutcome {
            recorded,
            score: self.score,
            state: self.state,
            newly_terminated,
        })
    }

    fn in_cooldown(&self, category: Category, now: DateTime<Utc>) -> bool {
        let (Some(window), Some(last)) = (self.cooldown, self.last_scored.get(&category)) else {
            return false;
        };
        match chrono::Duration::from_std(window) {
            Ok(window) => now - *last < window,
            Err(_) => true,
        }
    }
}

/// Registry of open session ledgers.
///
/// Work on one session is serialized through that session's lock; distinct
/// sessions proceed in parallel.
pub struct ViolationScorer {
    store: Arc<dyn EventStore>,
    threshold: u64,
    cooldown: Option<Duration>,
    sessions: Mutex<HashMap<SessionKey, Arc<Mutex<SessionLedger>>>>,
}

impl ViolationScorer {
    pub fn new(store: Arc<dyn EventStore>, threshold: u64, cooldown: Option<Duration>) -> Self {
        Self {
            store,
            threshold,
            cooldown,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    fn ledger(&self, key: &SessionKey) -> Result<Arc<Mutex<SessionLedger>>> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| GuardError::Store("session registry lock poisoned".to_string()))?;
        if let Some(ledger) = sessions.get(key) {
            return Ok(Arc::clone(ledger));
        }

        let ledger = Arc::new(Mutex::new(SessionLedger::open(
            key.clone(),
            Arc::clone(&self.store),
            self.threshold,
            self.cooldown,
        )?));
        sessions.insert(key.clone(), Arc::clone(&ledger));
        metrics::get_metrics().active_sessions.inc();
        Ok(ledger)
    }

    /// Run `f` with exclusive access to the session's ledger, opening it on
    /// first use.
    pub fn with_session<R>(
        &self,
        key: &SessionKey,
        f: impl FnOnce(&mut SessionLedger) -> Result<R>,
    ) -> Result<R> {
        let ledger = self.ledger(key)?;
        let mut guard = ledger
            .lock()
            .map_err(|_| GuardError::Store(format!("ledger lock poisoned for {}", key)))?;
        f(&mut guard)
    }

    pub fn record(
        &self,
        key: &SessionKey,
        violations: &[Violation],
        evidence: Option<&EvidenceRef>,
    ) -> Result<CommitOutcome> {
        self.with_session(key, |ledger| ledger.commit(violations, evidence))
    }

    /// Current score and state without opening a ledger
    pub fn snapshot(&self, key: &SessionKey) -> Result<(u64, SessionState)> {
        let open = self
            .sessions
            .lock()
            .map_err(|_| GuardError::Store("session registry lock poisoned".to_string()))?
            .get(key)
            .cloned();

        if let Some(ledger) = open {
            let guard = ledger
                .lock()
                .map_err(|_| GuardError::Store(format!("ledger lock poisoned for {}", key)))?;
            return Ok((guard.score(), guard.state()));
        }

        let score = self.store.score(key)?;
        let state = if score > self.threshold {
            SessionState::Terminated
        } else {
            SessionState::Active
        };
        Ok((score, state))
    }

    /// Drop the in-memory ledger; stored events are untouched.
    pub fn close_session(&self, key: &SessionKey) -> Result<Option<u64>> {
        let removed = self
            .sessions
            .lock()
            .map_err(|_| GuardError::Store("session registry lock poisoned".to_string()))?
            .remove(key);

        let Some(ledger) = removed else {
            return Ok(None);
        };
        metrics::get_metrics().active_sessions.dec();
        let score = ledger
            .lock()
            .map(|guard| guard.score())
            .map_err(|_| GuardError::Store(format!("ledger lock poisoned for {}", key)))?;
        audit::events::session_closed(key, score);
        Ok(Some(score))
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::MemoryEventStore;

    fn scorer(threshold: u64) -> ViolationScorer {
        ViolationScorer::new(Arc::new(MemoryEventStore::new()), threshold, None)
    }

    #[test]
    fn test_threshold_is_strictly_greater_than() {
        let scorer = scorer(10);
        let key = SessionKey::new("alice", "T-1");

        for _ in 0..5 {
            let outcome = scorer.record(&key, &[Violation::phone()], None).unwrap();
            assert_eq!(outcome.state, SessionState::Active);
        }
        assert_eq!(scorer.snapshot(&key).unwrap(), (10, SessionState::Active));

        let outcome = scorer.record(&key, &[Violation::window()], None).unwrap();
        assert_eq!(outcome.score, 11);
        assert_eq!(outcome.state, SessionState::Terminated);
        assert!(outcome.newly_terminated);
    }

    #[test]
    fn test_termination_is_sticky() {
        let scorer = scorer(1);
        let key = SessionKey::new("alice", "T-1");

        let first = scorer.record(&key, &[Violation::phone()], None).unwrap();
        assert!(first.newly_terminated);

        let later = scorer.record(&key, &[Violation::book()], None).unwrap();
        assert_eq!(later.state, SessionState::Terminated);
        assert!(!later.newly_terminated);
        assert_eq!(later.recorded.len(), 1);
        assert_eq!(later.score, 3);
    }

    #[test]
    fn test_empty_commit_changes_nothing() {
        let scorer = scorer(10);
        let key = SessionKey::new("alice", "T-1");
        let outcome = scorer.record(&key, &[], None).unwrap();
        assert!(outcome.recorded.is_empty());
        assert_eq!(outcome.score, 0);
    }

    #[test]
    fn test_cooldown_records_at_zero_weight() {
        let store = Arc::new(MemoryEventStore::new());
        let scorer = ViolationScorer::new(store.clone(), 10, Some(Duration::from_secs(60)));
        let key = SessionKey::new("alice", "T-1");

        scorer.record(&key, &[Violation::phone()], None).unwrap();
        let second = scorer
            .record(&key, &[Violation::phone(), Violation::book()], None)
            .unwrap();

        assert_eq!(second.recorded[0].weight, 0);
        assert!(second.recorded[0].detail.ends_with("(cooldown)"));
        assert_eq!(second.recorded[1].weight, 1);
        assert_eq!(second.score, 3);
        assert_eq!(store.events(&key).unwrap().len(), 3);
    }

    #[test]
    fn test_close_session_keeps_store() {
        let scorer = scorer(10);
        let key = SessionKey::new("alice", "T-1");
        scorer.record(&key, &[Violation::laptop()], None).unwrap();

        assert_eq!(scorer.close_session(&key).unwrap(), Some(1));
        assert_eq!(scorer.close_session(&key).unwrap(), None);
        assert_eq!(scorer.snapshot(&key).unwrap(), (1, SessionState::Active));
    }
}
