//! Core governance services.
//!
//! - **Consent**: ledger of standing consent records
//! - **Request**: review workflow of data requests
//! - **Audit**: append-only access trail
//! - **Notification**: broadcast of governance events

pub mod audit;
pub mod consent;
pub mod notification;
pub mod request;
