//! Configuration and errors
//!
//! Settings loading, validation, and the shared error taxonomy.

pub mod loader;
pub mod types;
pub mod validator;

pub use loader::GuardConfig;
