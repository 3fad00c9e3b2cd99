//! External-facing API of the governance engine.
//!
//! - **Façade**: the single entry point composing the ledger, the workflow
//!   and the auditor
//! - **Types**: request and response enums of every service

pub mod facade;
pub mod types;

// Re-export all types for convenience
pub use types::*;
