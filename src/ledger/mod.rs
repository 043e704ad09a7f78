//! Violation Ledger & Scorer
//!
//! Append-only per-session event ledgers, the stores that persist them, and
//! the threshold state machine that terminates a session.

pub mod event;
pub mod scorer;
pub mod store;

pub use event::{Category, EvidenceRef, SessionKey, Violation, ViolationEvent};
pub use scorer::{CommitOutcome, SessionLedger, SessionState, ViolationScorer};
pub use store::{EventStore, JsonlEventStore, MemoryEventStore};
