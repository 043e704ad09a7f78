//! examguard: exam session integrity
//!
//! Verifies that a candidate's machine is not virtualized, debugged or
//! sandboxed before an exam starts, then turns the live camera, microphone
//! and window signals of the exam into an append-only violation ledger that
//! terminates the session once its score passes a threshold.
//!
//! # Architecture
//!
//! ## Probes ([`probe`])
//! - [`probe::catalog`]: The ordered set of ten host checks
//! - [`probe::checks`]: Host queries and their pure interpretation helpers
//! - [`probe::tool`]: Bounded external tool runner
//!
//! ## Integrity Probe Coordinator ([`coordinator`])
//! - [`coordinator::race`]: Race-to-positive fast verdict with cooperative cancellation
//! - [`coordinator::report`]: Exhaustive diagnostic report and classification views
//!
//! ## Violation Event Classifier ([`classifier`])
//! - [`classifier::detector`]: Object detection capability (injected, deadline bounded)
//! - [`classifier::rules`]: Live image and audio rules
//! - [`classifier::scan`]: Pre-session room scan
//!
//! ## Violation Ledger & Scorer ([`ledger`])
//! - [`ledger::event`]: Violation categories, weights and events
//! - [`ledger::store`]: Append-only event stores (memory, JSON lines)
//! - [`ledger::scorer`]: Per-session threshold state machine
//!
//! ## Service ([`service`])
//! The operations a proctoring front end calls, wired from one configuration.
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration ([`config`])
//! - [`config::loader`]: JSON configuration with environment overrides
//! - [`config::validator`]: Startup validation
//! - [`config::types`]: Error taxonomy

// Probe set
pub mod probe;

// Integrity Probe Coordinator
pub mod coordinator;

// Violation Event Classifier
pub mod classifier;

// Violation Ledger & Scorer
pub mod ledger;

// Front-end operations
pub mod service;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Command line interface
pub mod cli;

pub use config::types::{GuardError, Result};
pub use config::GuardConfig;
pub use service::IntegrityService;
